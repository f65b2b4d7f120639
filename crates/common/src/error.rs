//! Common error types for SumLoop
//!
//! This module defines the error type shared by the dispatcher, workers and the client.
//! Every error belongs to one [`ErrorKind`] and can be rendered as a protocol `ERROR` line.

use std::net::AddrParseError;
use sumloop_proto::{ProtocolError, Response};
use thiserror::Error;

/// Wire message for an empty registry
pub const NO_SERVERS_AVAILABLE: &str = "No servers available";

/// Coarse classification used by callers to tell failures apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request or heartbeat line
    Protocol,

    /// No healthy worker to route to
    Availability,

    /// Connect, read or write failure on a socket
    Transport,

    /// A request that parsed but could not be evaluated
    Processing,

    /// Configuration and anything else local to the process
    Internal,
}

/// Main error type for SumLoop
#[derive(Error, Debug)]
pub enum SumLoopError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol parse errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The registry holds no worker
    #[error("No servers available")]
    NoWorkersAvailable,

    /// Connection errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Request evaluation errors
    #[error("Processing error: {0}")]
    Processing(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AddrParseError> for SumLoopError {
    fn from(err: AddrParseError) -> Self {
        SumLoopError::Config(err.to_string())
    }
}

impl SumLoopError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SumLoopError::Protocol(_) => ErrorKind::Protocol,
            SumLoopError::NoWorkersAvailable => ErrorKind::Availability,
            SumLoopError::Transport(_) | SumLoopError::Timeout(_) | SumLoopError::Io(_) => {
                ErrorKind::Transport
            }
            SumLoopError::Processing(_) => ErrorKind::Processing,
            SumLoopError::Config(_)
            | SumLoopError::Serialization(_)
            | SumLoopError::Yaml(_)
            | SumLoopError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Convert error to the `ERROR` line sent back to a peer
    pub fn to_response(&self) -> Response {
        match self {
            SumLoopError::Protocol(err) => Response::error(err.to_string()),
            SumLoopError::NoWorkersAvailable => Response::error(NO_SERVERS_AVAILABLE),
            SumLoopError::Transport(msg)
            | SumLoopError::Timeout(msg)
            | SumLoopError::Processing(msg)
            | SumLoopError::Config(msg)
            | SumLoopError::Internal(msg) => Response::error(msg.clone()),
            SumLoopError::Io(err) => Response::error(err.to_string()),
            SumLoopError::Serialization(err) => Response::error(err.to_string()),
            SumLoopError::Yaml(err) => Response::error(err.to_string()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        SumLoopError::Config(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        SumLoopError::Transport(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        SumLoopError::Timeout(msg.into())
    }

    /// Create a processing error
    pub fn processing(msg: impl Into<String>) -> Self {
        SumLoopError::Processing(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        SumLoopError::Internal(msg.into())
    }
}

/// Result type alias for SumLoop operations
pub type Result<T> = std::result::Result<T, SumLoopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            SumLoopError::from(ProtocolError::InvalidFormat).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(SumLoopError::NoWorkersAvailable.kind(), ErrorKind::Availability);
        assert_eq!(SumLoopError::timeout("read").kind(), ErrorKind::Transport);
        assert_eq!(
            SumLoopError::from(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)).kind(),
            ErrorKind::Transport
        );
        assert_eq!(SumLoopError::processing("bad").kind(), ErrorKind::Processing);
        assert_eq!(SumLoopError::config("bad").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_wire_messages() {
        assert_eq!(
            SumLoopError::NoWorkersAvailable.to_response().to_string(),
            "ERROR:No servers available"
        );
        assert_eq!(
            SumLoopError::from(ProtocolError::InvalidFormat)
                .to_response()
                .to_string(),
            "ERROR:Invalid request format"
        );
        assert_eq!(
            SumLoopError::transport("Failed to forward request - refused")
                .to_response()
                .to_string(),
            "ERROR:Failed to forward request - refused"
        );
    }
}
