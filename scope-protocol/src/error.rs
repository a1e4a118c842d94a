use std::io;

use thiserror::Error;

use crate::protocol::{Controller, Operation};

/// Errors raised while building or interpreting protocol frames.
///
/// `UnsupportedOperation`, `PayloadTooLarge` and `ReadTooLong` indicate a
/// programming error on the caller's side and are never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Message too large! Maximum is {max}, but got {got}")]
    FrameTooLarge { max: usize, got: usize },
    #[error("Short transfer: expected {expected} bytes, transferred {actual}")]
    ShortTransfer { expected: usize, actual: usize },
    #[error("Operation {operation:?} is not supported by controller {controller:?}")]
    UnsupportedOperation {
        controller: Controller,
        operation: Operation,
    },
    #[error("Range 0x{address:04x}+{length} exceeds the 4 KiB flash window")]
    AddressOutOfRange { address: u32, length: u32 },
    #[error("Payload of {len} bytes cannot be written to {controller:?} in one transaction")]
    PayloadTooLarge { controller: Controller, len: usize },
    #[error("Read of {requested} bytes from {controller:?} exceeds the maximum of {max}")]
    ReadTooLong {
        controller: Controller,
        requested: usize,
        max: usize,
    },
    #[error("Invalid length {0}")]
    InvalidLength(usize),
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Unknown command byte {0}")]
    UnknownCommand(u8),
}

/// Errors returned by a [`crate::channel::CommandChannel`].
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The socket or endpoint is closed, reset, or the channel was destroyed.
    #[error("Link down: {0}")]
    LinkDown(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ChannelError {
    /// Maps socket errors that mean "the peer is gone" onto [`ChannelError::LinkDown`].
    pub fn from_socket(err: io::Error) -> ChannelError {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => ChannelError::LinkDown(err.to_string()),
            _ => ChannelError::Io(err),
        }
    }

    pub fn is_link_down(&self) -> bool {
        matches!(self, ChannelError::LinkDown(_))
    }
}

pub type Result<T, E = ChannelError> = std::result::Result<T, E>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn eof_maps_to_link_down() {
        let err = ChannelError::from_socket(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(err.is_link_down());
    }

    #[test]
    fn other_io_errors_stay_io() {
        let err = ChannelError::from_socket(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(matches!(err, ChannelError::Io(_)));
    }

    #[test]
    fn protocol_errors_convert() {
        let err: ChannelError = ProtocolError::InvalidLength(3).into();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::InvalidLength(3))
        ));
        assert_eq!(err.to_string(), "Invalid length 3");
    }
}
