use crate::error::Result;
use crate::header;
use crate::protocol::{Controller, PROBE_READ_LEN};

/// Whether a write waits for the hardware to report completion.
///
/// The number of bytes eventually transferred is the same in both modes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TransferMode {
    #[default]
    Blocking,
    /// Submit the transfer and return immediately.
    Detached,
}

/// Logical operations on a connected scope, independent of the transport.
///
/// Implemented directly over USB and by the TCP client talking to a relay
/// server. Implementations serialize hardware access internally, so a
/// channel may be shared between threads.
pub trait CommandChannel: Send + Sync {
    /// Writes one packet to the command endpoint.
    fn write_control(&self, message: &[u8], mode: TransferMode) -> Result<()>;

    /// Writes an arbitrary amount of bytes to the command endpoint.
    fn write_control_bulk(&self, data: &[u8], mode: TransferMode) -> Result<()>;

    /// Reads a command response of `length` bytes.
    fn read_control(&self, length: usize) -> Result<Vec<u8>>;

    /// Reads acquisition data. `None` means no data was available yet.
    fn get_data(&self, number_of_bytes: usize) -> Result<Option<Vec<u8>>>;

    /// Discards buffered acquisition data.
    fn flush_data_pipe(&self) -> Result<()>;

    /// Identifying string of the device.
    fn serial(&self) -> &str;

    /// Releases the underlying handle. Idempotent; later calls fail.
    fn destroy(&self);

    fn is_alive(&self) -> bool;

    /// Reads `length` bytes starting at `address` of a controller.
    fn get_controller_register(
        &self,
        controller: Controller,
        address: u32,
        length: usize,
    ) -> Result<Vec<u8>> {
        for packet in header::read_packets(controller, address, length)? {
            self.write_control(&packet, TransferMode::Blocking)?;
        }
        let probe = self.read_control(PROBE_READ_LEN)?;
        log::trace!("{} read 0x{:x}: {:02x?}", controller, address, &probe[..]);
        Ok(header::read_response(controller, &probe, length)?)
    }

    /// Writes `data` starting at `address` of a controller.
    fn set_controller_register(
        &self,
        controller: Controller,
        address: u32,
        data: &[u8],
    ) -> Result<()> {
        for packet in header::write_packets(controller, address, data)? {
            self.write_control(&packet, TransferMode::Blocking)?;
        }
        Ok(())
    }
}
