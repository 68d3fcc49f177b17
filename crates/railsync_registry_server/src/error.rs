//! Error types for the reference registry.

use thiserror::Error;

/// Result type for registry operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors the reference registry answers with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Malformed or inconsistent request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown resource or route.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource already exists or is in the wrong state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status of the error response.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::NotFound(_) => 404,
            ServerError::Conflict(_) => 409,
            ServerError::Internal(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status() >= 500
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::InvalidRequest(err.to_string())
    }
}
