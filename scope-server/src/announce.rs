//! Discovery announcements of a listening relay.
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use scope_protocol::discovery::{DISCOVERY_PORT, ServiceRecord};

/// Publishes service records.
pub trait Announcer: Send + Sync {
    fn post(&self, record: &ServiceRecord) -> io::Result<()>;
}

/// Sends service records as UDP datagrams, by default to the local broadcast address.
pub struct UdpAnnouncer {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpAnnouncer {
    pub fn broadcast() -> io::Result<UdpAnnouncer> {
        UdpAnnouncer::new(SocketAddr::from((Ipv4Addr::BROADCAST, DISCOVERY_PORT)))
    }

    pub fn new(target: SocketAddr) -> io::Result<UdpAnnouncer> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;
        Ok(UdpAnnouncer { socket, target })
    }
}

impl Announcer for UdpAnnouncer {
    fn post(&self, record: &ServiceRecord) -> io::Result<()> {
        let datagram = record
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.socket.send_to(&datagram, self.target)?;
        Ok(())
    }
}

/// Re-posts a record until dropped, then posts its withdrawal.
pub(crate) struct Announcement {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Announcement {
    pub(crate) fn start(
        announcer: Arc<dyn Announcer>,
        record: ServiceRecord,
        interval: Duration,
    ) -> Announcement {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            log::debug!("Announcing {} on port {}", record.name, record.port);
            loop {
                if let Err(e) = announcer.post(&record) {
                    log::warn!("Failed to post announcement: {}", e);
                }
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            if let Err(e) = announcer.post(&record.withdrawn()) {
                log::warn!("Failed to withdraw announcement: {}", e);
            }
            log::debug!("Announcement withdrawn");
        });
        Announcement {
            stop: Some(stop),
            handle: Some(handle),
        }
    }
}

impl Drop for Announcement {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use scope_protocol::discovery::RecordKind;

    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<ServiceRecord>>);

    impl Announcer for Collect {
        fn post(&self, record: &ServiceRecord) -> io::Result<()> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    #[test]
    fn repeats_until_dropped_then_withdraws() {
        let collect = Arc::new(Collect::default());
        let announcement = Announcement::start(
            collect.clone(),
            ServiceRecord::announce("_test._tcp", 5000, "SN"),
            Duration::from_millis(5),
        );
        thread::sleep(Duration::from_millis(40));
        drop(announcement);
        let posted = collect.0.lock().unwrap();
        assert!(posted.len() >= 3);
        let (last, repeated) = posted.split_last().unwrap();
        assert_eq!(last.kind, RecordKind::Withdraw);
        assert!(repeated.iter().all(|r| r.kind == RecordKind::Announce));
    }

    #[test]
    fn udp_announcer_reaches_target() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let announcer = UdpAnnouncer::new(receiver.local_addr().unwrap()).unwrap();
        let record = ServiceRecord::announce("_test._tcp", 5000, "SN");
        announcer.post(&record).unwrap();
        let mut buf = [0u8; 256];
        let len = receiver.recv(&mut buf).unwrap();
        assert_eq!(ServiceRecord::decode(&buf[..len]).unwrap(), record);
    }
}
