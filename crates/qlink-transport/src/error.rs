//! Transport error types

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

/// Externally visible failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Timeout,
    Transport,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("timeout contacting controller at {0}")]
    Timeout(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("connect error: {0}")]
    ConnectionFailed(String),

    #[error("max retries exceeded after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Only refused connections are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::ConnectionRefused(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::Transport,
        }
    }
}
