//! Error types for QLink core primitives

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Terminator name other than CR or CRLF
    #[error("unknown line terminator: {0} (expected CR or CRLF)")]
    UnknownTerminator(String),

    /// Hex field in an LED report could not be parsed
    #[error("invalid LED hex: {0}")]
    InvalidHex(String),

    /// Response line did not have a recognized LED report shape
    #[error("malformed LED response: {0:?}")]
    MalformedLedResponse(String),

    /// Switch value other than on/off
    #[error("switch must be on/off, got {0:?}")]
    InvalidSwitch(String),
}
