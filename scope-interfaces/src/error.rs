use scope_protocol::error::ChannelError;
use thiserror::Error;

/// The registry would end up in an inconsistent state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("Interface {0} is already registered")]
    Duplicate(String),
    #[error("Interface has no usable serial or location")]
    MissingKey,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
