use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use scope_interfaces::DeviceScanner;
use scope_protocol::CommandChannel;
use scope_protocol::discovery::{DISCOVERY_PORT, RecordKind, SERVICE_NAME, ServiceRecord};
use scope_protocol::error::Result;

use crate::TcpChannel;

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Where announcements are received.
    pub bind: SocketAddr,
    /// Only records carrying this service name are considered.
    pub service_name: String,
    /// An announcement not repeated within this time is considered stale.
    pub ttl: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT)),
            service_name: SERVICE_NAME.to_owned(),
            ttl: Duration::from_secs(6),
        }
    }
}

/// Finds relay servers through their discovery announcements.
///
/// A relay withdraws its announcement while it serves a client, so a relay
/// this scanner opened a channel to stays present until that channel dies.
pub struct NetworkScanner {
    socket: UdpSocket,
    config: ScannerConfig,
    /// Location -> time of the last announcement.
    announced: HashMap<String, Instant>,
    opened: HashMap<String, Weak<TcpChannel>>,
}

impl NetworkScanner {
    pub fn new(config: ScannerConfig) -> io::Result<NetworkScanner> {
        let socket = UdpSocket::bind(config.bind)?;
        socket.set_nonblocking(true)?;
        log::debug!("Listening for announcements on {}", socket.local_addr()?);
        Ok(NetworkScanner {
            socket,
            config,
            announced: HashMap::new(),
            opened: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Processes all datagrams received since the last call.
    fn drain(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 600];
        loop {
            let (len, source) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            };
            let record = match ServiceRecord::decode(&buf[..len]) {
                Ok(record) => record,
                Err(e) => {
                    log::debug!("Ignoring datagram from {}: {}", source, e);
                    continue;
                }
            };
            if record.name != self.config.service_name {
                continue;
            }
            let location = SocketAddr::new(source.ip(), record.port).to_string();
            match record.kind {
                RecordKind::Announce => {
                    if self
                        .announced
                        .insert(location.clone(), Instant::now())
                        .is_none()
                    {
                        log::debug!("Relay {} announced scope {}", location, record.serial);
                    }
                }
                RecordKind::Withdraw => {
                    if self.announced.remove(&location).is_some() {
                        log::debug!("Relay {} withdrew its announcement", location);
                    }
                }
            }
        }
    }
}

impl DeviceScanner for NetworkScanner {
    type Channel = TcpChannel;

    fn scan(&mut self) -> Result<Vec<String>> {
        self.drain()?;
        let ttl = self.config.ttl;
        self.announced.retain(|_, seen| seen.elapsed() <= ttl);
        self.opened
            .retain(|_, channel| channel.upgrade().is_some_and(|c| c.is_alive()));

        let mut present: Vec<String> = self
            .announced
            .keys()
            .chain(self.opened.keys())
            .cloned()
            .collect();
        present.sort();
        present.dedup();
        Ok(present)
    }

    fn open(&mut self, location: &str) -> Result<Arc<TcpChannel>> {
        let channel = Arc::new(TcpChannel::connect(location)?);
        self.opened
            .insert(location.to_owned(), Arc::downgrade(&channel));
        Ok(channel)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scanner(ttl: Duration) -> NetworkScanner {
        NetworkScanner::new(ScannerConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            ttl,
            ..Default::default()
        })
        .unwrap()
    }

    fn post(scanner: &NetworkScanner, record: &ServiceRecord) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .send_to(&record.encode().unwrap(), scanner.local_addr().unwrap())
            .unwrap();
    }

    fn scan_until(scanner: &mut NetworkScanner, expected: usize) -> Vec<String> {
        for _ in 0..100 {
            let found = scanner.scan().unwrap();
            if found.len() == expected {
                return found;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        scanner.scan().unwrap()
    }

    #[test]
    fn announcement_and_withdrawal() {
        let mut scanner = scanner(Duration::from_secs(60));
        let record = ServiceRecord::announce(SERVICE_NAME, 4000, "SN1");
        post(&scanner, &record);
        assert_eq!(scan_until(&mut scanner, 1), ["127.0.0.1:4000"]);

        post(&scanner, &record.withdrawn());
        assert!(scan_until(&mut scanner, 0).is_empty());
    }

    #[test]
    fn foreign_services_are_ignored() {
        let mut scanner = scanner(Duration::from_secs(60));
        post(&scanner, &ServiceRecord::announce("_other._tcp", 4000, "SN1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(scanner.scan().unwrap().is_empty());
    }

    #[test]
    fn stale_announcements_expire() {
        let mut scanner = scanner(Duration::from_millis(30));
        post(&scanner, &ServiceRecord::announce(SERVICE_NAME, 4001, "SN2"));
        assert_eq!(scan_until(&mut scanner, 1).len(), 1);
        std::thread::sleep(Duration::from_millis(60));
        assert!(scanner.scan().unwrap().is_empty());
    }
}
