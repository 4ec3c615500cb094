//! Frame channel errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// No frame arrived within the poll window
    #[error("Receive timed out")]
    Timeout,

    #[error("Failed to open channel: {0}")]
    OpenFailed(String),

    #[error("Channel closed")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Channel not supported: {0}")]
    Unsupported(String),
}

impl ChannelError {
    /// An empty poll, as opposed to a transport failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
