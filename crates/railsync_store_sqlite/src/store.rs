//! The SQLite store handle.

use crate::config::SqliteStoreConfig;
use crate::error::{SqliteResult, SqliteStoreError};
use crate::lock::SqliteRunLock;
use crate::schema::{initialize_schema, open_connection};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use railsync_engine::{ChangeSource, Geocoder, SplitSource, StoreResult, SyncComponents};
use rusqlite::Connection;
use std::sync::Arc;

/// SQLite-backed store for push history, external ids and bulk transfers.
///
/// Cloning is cheap; clones share one connection.
#[derive(Clone)]
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (and if needed creates) the database.
    pub fn open(config: &SqliteStoreConfig) -> SqliteResult<Self> {
        let connection = open_connection(config)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Opens a private in-memory database.
    pub fn in_memory() -> SqliteResult<Self> {
        let mut connection = Connection::open_in_memory()?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// A run lock over this store's connection.
    ///
    /// Processes sharing the database file share the lock.
    pub fn run_lock(&self) -> SqliteRunLock {
        SqliteRunLock::new(Arc::clone(&self.connection))
    }

    /// Wires this store and the given collaborators into sync components.
    pub fn components(
        &self,
        changes: Arc<dyn ChangeSource>,
        splits: Arc<dyn SplitSource>,
        geocoder: Arc<dyn Geocoder>,
    ) -> SyncComponents {
        SyncComponents {
            identifiers: Arc::new(self.clone()),
            history: Arc::new(self.clone()),
            bulk_transfers: Arc::new(self.clone()),
            lock: Arc::new(self.run_lock()),
            changes,
            splits,
            geocoder,
        }
    }

    /// Runs `f` with the connection locked, converting errors for the engine.
    pub(crate) fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> SqliteResult<T>,
    ) -> StoreResult<T> {
        let mut connection = self.connection.lock();
        f(&mut connection).map_err(Into::into)
    }
}

/// Encodes a timestamp so that text order is time order.
pub(crate) fn encode_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Decodes a timestamp written by [`encode_time`].
pub(crate) fn decode_time(column: &str, text: &str) -> SqliteResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| SqliteStoreError::Corrupt(format!("{column}: {err}")))
}

/// Decodes an optional timestamp.
pub(crate) fn decode_optional_time(
    column: &str,
    text: Option<String>,
) -> SqliteResult<Option<DateTime<Utc>>> {
    text.map(|text| decode_time(column, &text)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encoded_times_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 11, 30, 18, 30, 0).unwrap();
        assert!(encode_time(early) < encode_time(late));
        assert_eq!(decode_time("t", &encode_time(late)).unwrap(), late);
    }

    #[test]
    fn bad_time_is_corrupt() {
        assert!(matches!(
            decode_time("push_record.started_at", "yesterday"),
            Err(SqliteStoreError::Corrupt(_))
        ));
    }
}
