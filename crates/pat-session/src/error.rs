//! Session engine errors

use thiserror::Error;

use crate::channel::ChannelError;
use crate::correlator::{CorrelationError, RequestId};
use crate::frame::CanId;

/// Frame construction errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid standard CAN ID: 0x{0:X} (max 0x7FF)")]
    InvalidStandardId(u32),

    #[error("Invalid extended CAN ID: 0x{0:X} (max 0x1FFFFFFF)")]
    InvalidExtendedId(u32),

    #[error("Invalid CAN ID {0}")]
    InvalidId(String),

    #[error("Payload too long: {0} bytes (max 8)")]
    PayloadTooLong(usize),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

/// Outcome errors for an issued command
#[derive(Debug, Error, Clone)]
pub enum SessionError {
    /// Transport failure; the medium is presumed unusable, never retried
    #[error("Transport error: {0}")]
    Transport(#[from] ChannelError),

    /// No response within the retry budget
    #[error("Request {id} exhausted after {attempts} attempt(s)")]
    RequestExhausted { id: RequestId, attempts: u32 },

    /// Another request already waits on the same request/response pair
    #[error("Request already pending for {request_id} -> {response_id} (request {pending})")]
    Busy {
        request_id: CanId,
        response_id: CanId,
        pending: RequestId,
    },

    #[error("Request {0} cancelled")]
    Cancelled(RequestId),

    #[error("Session shut down")]
    Shutdown,
}

impl SessionError {
    /// Whether this error came from the transport layer
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<CorrelationError> for SessionError {
    fn from(err: CorrelationError) -> Self {
        match err {
            CorrelationError::Busy {
                request_id,
                response_id,
                pending,
            } => SessionError::Busy {
                request_id,
                response_id,
                pending,
            },
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_conversion_keeps_ids() {
        let err = CorrelationError::Busy {
            request_id: CanId::Standard(0x700),
            response_id: CanId::Standard(0x701),
            pending: RequestId(4),
        };

        match SessionError::from(err) {
            SessionError::Busy {
                request_id,
                response_id,
                pending,
            } => {
                assert_eq!(request_id, CanId::Standard(0x700));
                assert_eq!(response_id, CanId::Standard(0x701));
                assert_eq!(pending, RequestId(4));
            }
            other => panic!("Expected Busy, got {:?}", other),
        }
    }

    #[test]
    fn test_exhausted_message() {
        let err = SessionError::RequestExhausted {
            id: RequestId(7),
            attempts: 3,
        };
        assert_eq!(err.to_string(), "Request #7 exhausted after 3 attempt(s)");
        assert!(!err.is_transport());
    }
}
