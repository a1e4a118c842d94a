//! Streams acquisition bursts over a data link.
use std::io::BufWriter;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use scope_protocol::CommandChannel;
use scope_protocol::datalink::write_package;

use crate::error::ServerError;
use crate::framer::BurstFramer;

/// A running data pump, stopped when dropped.
pub(crate) struct DataPump {
    stop: Arc<AtomicBool>,
    /// Set by the pump thread before it tears down the control connection.
    failed: Arc<AtomicBool>,
    socket: TcpStream,
    handle: Option<JoinHandle<Result<(), ServerError>>>,
}

impl DataPump {
    /// Connects to `target` and starts streaming.
    ///
    /// If the pump fails, `control` is shut down so that the session ends
    /// as well.
    pub(crate) fn start<C: CommandChannel + 'static>(
        hardware: Arc<C>,
        framer: Arc<dyn BurstFramer>,
        target: SocketAddr,
        burst_size: usize,
        write_timeout: Duration,
        control: TcpStream,
    ) -> Result<DataPump, ServerError> {
        let socket = TcpStream::connect_timeout(&target, write_timeout)?;
        socket.set_nodelay(true)?;
        socket.set_write_timeout(Some(write_timeout))?;
        log::info!("Data link to {} established", target);

        let stop = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));
        let writer = socket.try_clone()?;
        let handle = thread::spawn({
            let stop = stop.clone();
            let failed = failed.clone();
            move || {
                let result = pump(&*hardware, &*framer, writer, burst_size, &stop)
                    .map_err(|e| match e {
                        ServerError::DataLink(_) => e,
                        other => ServerError::DataLink(other.to_string()),
                    });
                match &result {
                    Err(e) if !stop.load(Ordering::SeqCst) => {
                        log::error!("Data link to {} failed: {}", target, e);
                        failed.store(true, Ordering::SeqCst);
                        let _ = control.shutdown(Shutdown::Both);
                    }
                    _ => log::debug!("Data link to {} stopped", target),
                }
                result
            }
        });
        Ok(DataPump {
            stop,
            failed,
            socket,
            handle: Some(handle),
        })
    }

    /// Stops the pump and reports whether it failed before being stopped.
    pub(crate) fn stop(mut self) -> Result<(), ServerError> {
        self.halt()
    }

    fn halt(&mut self) -> Result<(), ServerError> {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.socket.shutdown(Shutdown::Both);
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let Ok(result) = handle.join() else {
            return Err(ServerError::DataLink("data pump panicked".into()));
        };
        match result {
            Err(e) if self.failed.load(Ordering::SeqCst) => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for DataPump {
    fn drop(&mut self) {
        let _ = self.halt();
    }
}

fn pump<C: CommandChannel + ?Sized>(
    hardware: &C,
    framer: &dyn BurstFramer,
    socket: TcpStream,
    burst_size: usize,
    stop: &AtomicBool,
) -> Result<(), ServerError> {
    let mut writer = BufWriter::new(socket);
    let mut packages = 0u64;
    while !stop.load(Ordering::SeqCst) {
        let header = hardware
            .get_data(burst_size)?
            .ok_or_else(|| ServerError::DataLink("no burst header available".into()))?;
        let payload_len = framer.payload_len(&header).ok_or_else(|| {
            ServerError::DataLink(format!("unparseable burst header {:02x?}", header))
        })?;
        let payload = if payload_len > 0 {
            hardware
                .get_data(payload_len)?
                .ok_or_else(|| ServerError::DataLink("burst payload missing".into()))?
        } else {
            Vec::new()
        };
        write_package(&mut writer, &header, &payload)
            .map_err(|e| ServerError::DataLink(e.to_string()))?;
        packages += 1;
        log::trace!(
            "Data link package {}: {} + {} bytes",
            packages,
            header.len(),
            payload.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Read;
    use std::net::TcpListener;

    use scope_usb::mock::MockTransport;
    use scope_usb::{DATA_ENDPOINT, UsbChannel, UsbConfig};

    use super::*;
    use crate::framer::HeaderOnly;

    fn control_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn start(mock: &MockTransport, control: TcpStream) -> (DataPump, TcpStream) {
        let hardware = Arc::new(UsbChannel::new(mock.clone(), "SN42", UsbConfig::default()));
        let data = TcpListener::bind("127.0.0.1:0").unwrap();
        let pump = DataPump::start(
            hardware,
            Arc::new(HeaderOnly),
            data.local_addr().unwrap(),
            4,
            Duration::from_secs(5),
            control,
        )
        .unwrap();
        let (data, _) = data.accept().unwrap();
        (pump, data)
    }

    #[test]
    fn failure_is_reported_right_after_control_shutdown() {
        let (mut client, control) = control_pair();
        let (pump, _data) = start(&MockTransport::new(), control);

        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
        assert!(matches!(pump.stop(), Err(ServerError::DataLink(_))));
    }

    #[test]
    fn stopping_a_running_pump_is_clean() {
        let mock = MockTransport::new();
        mock.set_latency(Duration::from_millis(5));
        for _ in 0..1000 {
            mock.push_response(DATA_ENDPOINT, vec![1; 4]);
        }
        let (_client, control) = control_pair();
        let (pump, _data) = start(&mock, control);
        thread::sleep(Duration::from_millis(50));
        pump.stop().unwrap();
    }
}
