//! Error types for the sync engine.

use crate::model::AssetRef;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for a single registry call.
pub type RegistryResult<T> = Result<T, RegistryFailure>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Which part of an asset a registry call touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Names, descriptions, typed properties.
    Properties,
    /// Points and joint geometries.
    Geometry,
    /// Asset locations on tracks.
    Location,
    /// Lifecycle state.
    State,
}

impl ErrorCategory {
    /// Stable name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Properties => "PROPERTIES",
            ErrorCategory::Geometry => "GEOMETRY",
            ErrorCategory::Location => "LOCATION",
            ErrorCategory::State => "STATE",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROPERTIES" => Ok(ErrorCategory::Properties),
            "GEOMETRY" => Ok(ErrorCategory::Geometry),
            "LOCATION" => Ok(ErrorCategory::Location),
            "STATE" => Ok(ErrorCategory::State),
            other => Err(format!("unknown error category: {other}")),
        }
    }
}

/// What a registry call attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Creating a resource or its parts.
    Create,
    /// Updating a resource or its parts.
    Update,
    /// Deleting a resource or its parts.
    Delete,
    /// Reading the registry's current representation.
    FetchExisting,
}

impl Operation {
    /// Stable name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::FetchExisting => "FETCH_EXISTING",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Operation::Create),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            "FETCH_EXISTING" => Ok(Operation::FetchExisting),
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

/// Failure of a single registry call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryFailure {
    /// The registry answered with a non-success status.
    #[error("registry rejected {operation} of {category} with HTTP {status}: {body}")]
    Rejected {
        /// Part of the asset the call touched.
        category: ErrorCategory,
        /// What the call attempted.
        operation: Operation,
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// The call did not complete within its timeout.
    #[error("registry call for {operation} of {category} timed out")]
    Timeout {
        /// Part of the asset the call touched.
        category: ErrorCategory,
        /// What the call attempted.
        operation: Operation,
    },

    /// The registry could not be reached.
    #[error("registry unreachable during {operation} of {category}: {message}")]
    Unreachable {
        /// Part of the asset the call touched.
        category: ErrorCategory,
        /// What the call attempted.
        operation: Operation,
        /// Transport message.
        message: String,
    },

    /// The registry answered with a body that could not be decoded.
    #[error("malformed registry response for {operation} of {category}: {message}")]
    Malformed {
        /// Part of the asset the call touched.
        category: ErrorCategory,
        /// What the call attempted.
        operation: Operation,
        /// Decoder message.
        message: String,
    },
}

impl RegistryFailure {
    /// Part of the asset the failed call touched.
    pub fn category(&self) -> ErrorCategory {
        match self {
            RegistryFailure::Rejected { category, .. }
            | RegistryFailure::Timeout { category, .. }
            | RegistryFailure::Unreachable { category, .. }
            | RegistryFailure::Malformed { category, .. } => *category,
        }
    }

    /// What the failed call attempted.
    pub fn operation(&self) -> Operation {
        match self {
            RegistryFailure::Rejected { operation, .. }
            | RegistryFailure::Timeout { operation, .. }
            | RegistryFailure::Unreachable { operation, .. }
            | RegistryFailure::Malformed { operation, .. } => *operation,
        }
    }

    /// HTTP status, when the registry answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            RegistryFailure::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if no answer was received (timeout or transport failure).
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            RegistryFailure::Timeout { .. } | RegistryFailure::Unreachable { .. }
        )
    }

    /// Relabels the attempted operation, e.g. a property update issued while deleting.
    pub fn during(mut self, new_operation: Operation) -> Self {
        match &mut self {
            RegistryFailure::Rejected { operation, .. }
            | RegistryFailure::Timeout { operation, .. }
            | RegistryFailure::Unreachable { operation, .. }
            | RegistryFailure::Malformed { operation, .. } => *operation = new_operation,
        }
        self
    }

    /// Diagnostic text stored with push errors.
    pub fn diagnostic(&self) -> String {
        match self {
            RegistryFailure::Rejected { body, .. } => body.clone(),
            RegistryFailure::Timeout { .. } => "timeout".to_string(),
            RegistryFailure::Unreachable { message, .. }
            | RegistryFailure::Malformed { message, .. } => message.clone(),
        }
    }
}

/// A registry failure attributed to the asset being pushed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("push of {asset} failed: {source}")]
pub struct PushFailure {
    /// The asset whose push failed.
    pub asset: AssetRef,
    /// The failed call.
    #[source]
    pub source: RegistryFailure,
}

impl PushFailure {
    /// Attributes a registry failure to an asset.
    pub fn new(asset: AssetRef, source: RegistryFailure) -> Self {
        Self { asset, source }
    }
}

/// Attributes registry results to the asset being pushed.
pub trait ForAsset<T> {
    /// Wraps a failure into [`SyncError::Push`] for the given asset.
    fn for_asset(self, asset: AssetRef) -> SyncResult<T>;
}

impl<T> ForAsset<T> for RegistryResult<T> {
    fn for_asset(self, asset: AssetRef) -> SyncResult<T> {
        self.map_err(|source| SyncError::Push(PushFailure::new(asset, source)))
    }
}

/// Errors raised by the persistent stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),

    /// A referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An external id is already mapped differently.
    #[error("external id conflict: {0}")]
    IdentifierConflict(String),

    /// A status change that would rewrite history.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Stored data could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A registry call failed while pushing an asset.
    #[error(transparent)]
    Push(#[from] PushFailure),

    /// A registry call failed outside of an asset push.
    #[error(transparent)]
    Registry(#[from] RegistryFailure),

    /// A store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A collaborator (change source, geocoder, split source) failed.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// The layout is in a state that should never have been published.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The engine could not be set up.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    /// Creates a precondition violation.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// Returns true if this error came from a connectivity failure.
    pub fn is_connectivity(&self) -> bool {
        match self {
            SyncError::Push(failure) => failure.source.is_connectivity(),
            SyncError::Registry(failure) => failure.is_connectivity(),
            _ => false,
        }
    }
}
