//! # Scope USB Transport
//!
//! Executes command protocol packets against the USB bulk endpoints of a
//! scope.
//!
//! ## Endpoints
//!
//! - **0x02** (OUT): command packets, at most 32 bytes each
//! - **0x83** (IN): command responses, always read 16 bytes at a time
//! - **0x81** (IN): acquisition data, read in bursts
//!
//! ## Architecture
//!
//! [`UsbChannel`] implements [`scope_protocol::CommandChannel`] on top of
//! any [`UsbTransport`]. With the default `nusb` feature, [`NusbTransport`]
//! talks to real hardware and [`UsbScanner`] plugs USB hot-plug into a
//! [`scope_interfaces::InterfaceManager`].
//!
//! ```ignore
//! use scope_interfaces::InterfaceManager;
//! use scope_protocol::{CommandChannel, Controller};
//! use scope_usb::UsbScanner;
//!
//! let mut manager = InterfaceManager::new(UsbScanner::default());
//! manager.poll_device()?;
//! for (location, channel) in manager.registry().iter() {
//!     let version = channel.get_controller_register(Controller::Pic, 0x00, 4)?;
//!     println!("{}: {:02x?}", location, version);
//! }
//! ```
use std::time::Duration;

mod channel;
#[cfg(feature = "nusb")]
mod device;
#[doc(hidden)]
pub mod mock;
mod transport;

pub use channel::{PendingTransfer, UsbChannel};
#[cfg(feature = "nusb")]
pub use device::{NusbTransport, UsbScanner};
pub use transport::{TransferError, UsbTransport};

pub const DEFAULT_VENDOR_ID: u16 = 0x04D8;
pub const DEFAULT_PRODUCT_ID: u16 = 0xF4B5;

pub const COMMAND_ENDPOINT: u8 = 0x02;
pub const PROBE_ENDPOINT: u8 = 0x83;
pub const DATA_ENDPOINT: u8 = 0x81;

#[derive(Debug, Clone)]
pub struct UsbConfig {
    /// Timeout of every regular transfer.
    pub timeout: Duration,
    pub command_endpoint: u8,
    pub probe_endpoint: u8,
    pub data_endpoint: u8,
    /// Largest packet accepted by `write_control`.
    pub max_command_packet: usize,
    /// Read size and timeout used while draining the data endpoint.
    pub flush_chunk: usize,
    pub flush_timeout: Duration,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            command_endpoint: COMMAND_ENDPOINT,
            probe_endpoint: PROBE_ENDPOINT,
            data_endpoint: DATA_ENDPOINT,
            max_command_packet: scope_protocol::protocol::MAX_COMMAND_PACKET,
            flush_chunk: 64 * 1024,
            flush_timeout: Duration::from_millis(10),
        }
    }
}
