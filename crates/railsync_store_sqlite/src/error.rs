//! Error types for the SQLite store.

use railsync_engine::StoreError;
use thiserror::Error;

/// Result type for SQLite store operations.
pub type SqliteResult<T> = Result<T, SqliteStoreError>;

/// Errors raised by the SQLite store.
#[derive(Error, Debug)]
pub enum SqliteStoreError {
    /// Filesystem failure while preparing the database file.
    #[error("sqlite store io error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite engine failure.
    #[error("sqlite store db error: {0}")]
    Db(#[from] rusqlite::Error),

    /// A stored value could not be decoded.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),

    /// The database was written by an incompatible schema.
    #[error("sqlite store version mismatch: found {found}, expected {expected}")]
    VersionMismatch {
        /// Version found in the database.
        found: i64,
        /// Version this build writes.
        expected: i64,
    },

    /// A store rule was violated.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Store(inner) => inner,
            SqliteStoreError::Corrupt(message) => StoreError::Corrupt(message),
            SqliteStoreError::VersionMismatch { .. } => StoreError::Corrupt(error.to_string()),
            SqliteStoreError::Io(_) | SqliteStoreError::Db(_) => {
                StoreError::Database(error.to_string())
            }
        }
    }
}

/// Decodes a stored text column.
pub(crate) fn decode<T>(column: &str, value: &str) -> SqliteResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|err| SqliteStoreError::Corrupt(format!("{column}: {err}")))
}
