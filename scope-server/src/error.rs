use std::io;

use scope_protocol::error::{ChannelError, ProtocolError};
use thiserror::Error;

/// Reasons a relay session ended abnormally.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The client sent bytes that do not form a valid message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The hardware failed while serving a request.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The data pump stopped. Data link failures end the session and are not retried.
    #[error("Data link failed: {0}")]
    DataLink(String),
}
