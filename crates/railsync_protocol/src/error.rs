//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while parsing or encoding registry data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A kilometre number could not be parsed.
    #[error("invalid kilometre number: {0:?}")]
    InvalidKmNumber(String),

    /// A track address could not be parsed.
    #[error("invalid track address: {0:?}")]
    InvalidTrackMeter(String),

    /// A joint number could not be parsed.
    #[error("invalid joint number: {0:?}")]
    InvalidJointNumber(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
