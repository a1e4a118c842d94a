use std::io;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use scope_protocol::error::{ChannelError, ProtocolError, Result};
use scope_protocol::protocol::PROBE_READ_LEN;
use scope_protocol::{CommandChannel, TransferMode};

use crate::UsbConfig;
use crate::transport::{TransferError, UsbTransport};

/// Upper bound of reads issued by a single [`UsbChannel::flush_data_pipe`].
const MAX_FLUSH_READS: usize = 64;

/// Command channel talking to a scope over its USB bulk endpoints.
///
/// Every transfer holds the channel's lock from submission until the
/// platform reports completion, so a channel can be shared between the
/// control and data threads of a relay. Detached writes complete in
/// submission order, before any later transfer on the same channel.
pub struct UsbChannel<T: UsbTransport> {
    shared: Arc<Shared<T>>,
    serial: String,
    /// Most recently detached write. Later transfers wait for it.
    tail: Mutex<Option<JoinHandle<()>>>,
}

struct Shared<T> {
    transport: Mutex<Option<T>>,
    config: UsbConfig,
}

/// A detached write. Dropping it does not cancel the transfer.
pub struct PendingTransfer {
    completion: Receiver<Result<usize>>,
}

impl PendingTransfer {
    /// Blocks until the transfer completed and returns the number of bytes written.
    pub fn wait(self) -> Result<usize> {
        self.completion
            .recv()
            .unwrap_or_else(|_| Err(ChannelError::LinkDown("transfer abandoned".into())))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: UsbTransport> Shared<T> {
    /// Runs `transfer` while holding the lock. A disconnected device
    /// releases the transport for good.
    fn with_transport<R>(
        &self,
        transfer: impl FnOnce(&T, &UsbConfig) -> std::result::Result<R, TransferError>,
    ) -> Result<R> {
        let mut guard = lock(&self.transport);
        let result = match guard.as_ref() {
            Some(transport) => transfer(transport, &self.config),
            None => return Err(ChannelError::LinkDown("channel destroyed".into())),
        };
        result.map_err(|e| match e {
            TransferError::Disconnected => {
                log::warn!("USB device disconnected, releasing interface");
                *guard = None;
                ChannelError::LinkDown(e.to_string())
            }
            TransferError::Timeout(_) => {
                ChannelError::Io(io::Error::new(io::ErrorKind::TimedOut, e))
            }
            other => ChannelError::Io(io::Error::other(other)),
        })
    }

    fn write_exact(&self, endpoint: u8, data: &[u8]) -> Result<usize> {
        log::trace!("USB write ep 0x{:02x}: {:02x?}", endpoint, data);
        let written =
            self.with_transport(|t, config| t.bulk_out(endpoint, data, config.timeout))?;
        if written != data.len() {
            return Err(ProtocolError::ShortTransfer {
                expected: data.len(),
                actual: written,
            }
            .into());
        }
        Ok(written)
    }

    fn read(&self, endpoint: u8, length: usize) -> Result<Vec<u8>> {
        let data = self.with_transport(|t, config| t.bulk_in(endpoint, length, config.timeout))?;
        log::trace!("USB read ep 0x{:02x}: {} bytes", endpoint, data.len());
        Ok(data)
    }
}

impl<T: UsbTransport> UsbChannel<T> {
    pub fn new(transport: T, serial: impl Into<String>, config: UsbConfig) -> UsbChannel<T> {
        UsbChannel {
            shared: Arc::new(Shared {
                transport: Mutex::new(Some(transport)),
                config,
            }),
            serial: serial.into(),
            tail: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &UsbConfig {
        &self.shared.config
    }

    /// Submits a write on the command endpoint without waiting for it.
    pub fn submit_control(&self, data: &[u8]) -> Result<PendingTransfer> {
        if !self.is_alive() {
            return Err(ChannelError::LinkDown("channel destroyed".into()));
        }
        let (sender, completion) = mpsc::channel();
        let shared = self.shared.clone();
        let endpoint = self.shared.config.command_endpoint;
        let data = data.to_vec();

        let mut tail = lock(&self.tail);
        let previous = tail.take();
        *tail = Some(thread::spawn(move || {
            if let Some(previous) = previous {
                let _ = previous.join();
            }
            let result = shared.write_exact(endpoint, &data);
            if let Err(e) = &result {
                log::warn!("Detached USB write failed: {}", e);
            }
            let _ = sender.send(result);
        }));
        Ok(PendingTransfer { completion })
    }

    /// Waits for outstanding detached writes.
    fn settle(&self) {
        let previous = lock(&self.tail).take();
        if let Some(previous) = previous {
            let _ = previous.join();
        }
    }

    fn write(&self, data: &[u8], mode: TransferMode) -> Result<()> {
        match mode {
            TransferMode::Blocking => {
                self.settle();
                self.shared
                    .write_exact(self.shared.config.command_endpoint, data)?;
            }
            TransferMode::Detached => {
                self.submit_control(data)?;
            }
        }
        Ok(())
    }
}

impl<T: UsbTransport> CommandChannel for UsbChannel<T> {
    fn write_control(&self, message: &[u8], mode: TransferMode) -> Result<()> {
        let max = self.shared.config.max_command_packet;
        if message.len() > max {
            return Err(ProtocolError::FrameTooLarge {
                max,
                got: message.len(),
            }
            .into());
        }
        self.write(message, mode)
    }

    fn write_control_bulk(&self, data: &[u8], mode: TransferMode) -> Result<()> {
        self.write(data, mode)
    }

    fn read_control(&self, length: usize) -> Result<Vec<u8>> {
        if length > PROBE_READ_LEN {
            return Err(ProtocolError::InvalidLength(length).into());
        }
        self.settle();
        let mut probe = self
            .shared
            .read(self.shared.config.probe_endpoint, PROBE_READ_LEN)?;
        if probe.len() < length {
            return Err(ProtocolError::ShortTransfer {
                expected: length,
                actual: probe.len(),
            }
            .into());
        }
        probe.truncate(length);
        Ok(probe)
    }

    fn get_data(&self, number_of_bytes: usize) -> Result<Option<Vec<u8>>> {
        self.settle();
        let data = self
            .shared
            .read(self.shared.config.data_endpoint, number_of_bytes)?;
        if data.is_empty() {
            return Ok(None);
        }
        if data.len() != number_of_bytes {
            return Err(ProtocolError::ShortTransfer {
                expected: number_of_bytes,
                actual: data.len(),
            }
            .into());
        }
        Ok(Some(data))
    }

    fn flush_data_pipe(&self) -> Result<()> {
        self.settle();
        let discarded = self.shared.with_transport(|t, config| {
            let mut discarded = 0;
            for _ in 0..MAX_FLUSH_READS {
                match t.bulk_in(config.data_endpoint, config.flush_chunk, config.flush_timeout) {
                    Ok(data) if data.is_empty() => break,
                    Ok(data) => discarded += data.len(),
                    Err(TransferError::Timeout(_)) => break,
                    Err(e) => return Err(e),
                }
            }
            Ok(discarded)
        })?;
        log::debug!("Flushed {} bytes from the data endpoint", discarded);
        Ok(())
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    fn destroy(&self) {
        if lock(&self.shared.transport).take().is_some() {
            log::debug!("Destroyed USB channel {}", self.serial);
        }
    }

    fn is_alive(&self) -> bool {
        lock(&self.shared.transport).is_some()
    }
}

impl<T: UsbTransport> Drop for UsbChannel<T> {
    fn drop(&mut self) {
        self.settle();
    }
}
