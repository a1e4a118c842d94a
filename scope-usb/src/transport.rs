use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Transfer timed out after {0:?}")]
    Timeout(Duration),
    #[error("Device disconnected")]
    Disconnected,
    #[error("Endpoint stalled")]
    Stall,
    #[error("Transfer failed: {0}")]
    Failed(String),
}

/// Blocking bulk transfers on a claimed USB interface.
///
/// Each call submits one transfer and returns once the platform reports
/// completion or `timeout` elapses. Implementations do not need to be
/// reentrant: [`crate::UsbChannel`] never issues two transfers at once.
pub trait UsbTransport: Send + Sync + 'static {
    /// Writes `data` to an OUT endpoint and returns the number of bytes transferred.
    fn bulk_out(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransferError>;

    /// Reads up to `length` bytes from an IN endpoint.
    fn bulk_in(
        &self,
        endpoint: u8,
        length: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransferError>;
}
