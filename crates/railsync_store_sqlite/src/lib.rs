//! # Railsync SQLite Store
//!
//! Durable storage for the registry sync engine.
//!
//! This crate provides:
//! - `PushHistoryStore`: push records, covered publications and push errors
//! - `IdentifierStore`: the (branch, asset) to OID mapping
//! - `BulkTransferStore`: one tracking row per split
//! - `SqliteRunLock`: lease rows shared by every process using the database
//!
//! ## Usage
//!
//! ```rust,ignore
//! use railsync_store_sqlite::{SqliteStore, SqliteStoreConfig};
//!
//! let store = SqliteStore::open(&SqliteStoreConfig::new("/var/lib/railsync/sync.db"))?;
//! let components = store.components(changes, splits, geocoder);
//! let service = railsync_engine::connect(config, components)?;
//! ```
//!
//! ## Key Invariants
//!
//! - Push statuses are checked against the allowed transitions inside the
//!   updating transaction
//! - An OID mapping is written once and never changes
//! - A finished bulk transfer row is never overwritten
//! - Timestamps are stored as RFC 3339 text that sorts chronologically

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bulk_transfer;
mod config;
mod error;
mod history;
mod identifiers;
mod lock;
mod schema;
mod store;

pub use config::{JournalMode, SqliteStoreConfig, DEFAULT_BUSY_TIMEOUT};
pub use error::{SqliteResult, SqliteStoreError};
pub use lock::{SqliteRunLock, DEFAULT_POLL_INTERVAL};
pub use schema::SCHEMA_VERSION;
pub use store::SqliteStore;
