use std::sync::Arc;

use scope_protocol::CommandChannel;
use scope_protocol::error::Result;

/// Transport specific discovery of scopes.
///
/// Implemented for local USB devices and for relay servers announced on the
/// network.
pub trait DeviceScanner {
    type Channel: CommandChannel + 'static;

    /// Locations of all matching devices currently present.
    fn scan(&mut self) -> Result<Vec<String>>;

    /// Opens a channel to the device at `location`.
    fn open(&mut self, location: &str) -> Result<Arc<Self::Channel>>;
}
