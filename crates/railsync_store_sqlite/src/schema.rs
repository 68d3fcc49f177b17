//! Connection setup and schema.

use crate::config::SqliteStoreConfig;
use crate::error::{SqliteResult, SqliteStoreError};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::debug;

/// Schema version written by this build.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS push_record (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    branch TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_push_record_branch ON push_record (branch, id);

CREATE TABLE IF NOT EXISTS push_record_publication (
    push_id INTEGER NOT NULL REFERENCES push_record (id),
    publication_id INTEGER NOT NULL,
    published_at TEXT NOT NULL,
    PRIMARY KEY (push_id, publication_id)
);
CREATE INDEX IF NOT EXISTS idx_push_record_publication
    ON push_record_publication (publication_id);

CREATE TABLE IF NOT EXISTS push_error (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    push_id INTEGER NOT NULL REFERENCES push_record (id),
    category TEXT NOT NULL,
    operation TEXT NOT NULL,
    asset_type TEXT NOT NULL,
    asset_id INTEGER NOT NULL,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_push_error_push ON push_error (push_id);

CREATE TABLE IF NOT EXISTS external_id (
    branch TEXT NOT NULL,
    asset_type TEXT NOT NULL,
    asset_id INTEGER NOT NULL,
    oid TEXT NOT NULL,
    PRIMARY KEY (branch, asset_type, asset_id),
    UNIQUE (branch, asset_type, oid)
);

CREATE TABLE IF NOT EXISTS bulk_transfer (
    split_id INTEGER PRIMARY KEY,
    branch TEXT NOT NULL,
    state TEXT NOT NULL,
    external_id INTEGER,
    temporary_failure INTEGER NOT NULL,
    expedited_start INTEGER NOT NULL,
    assets_total INTEGER,
    assets_moved INTEGER,
    started_at TEXT,
    ended_at TEXT,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_bulk_transfer_branch ON bulk_transfer (branch, split_id);

CREATE TABLE IF NOT EXISTS run_lock (
    name TEXT PRIMARY KEY,
    token TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
";

/// Opens a connection with the configured pragmas and an initialized schema.
pub fn open_connection(config: &SqliteStoreConfig) -> SqliteResult<Connection> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let mut connection = Connection::open_with_flags(&config.path, flags)?;
    connection.busy_timeout(config.busy_timeout)?;
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    // journal_mode answers with the resulting mode, so it is read as a query.
    let mode: String = connection.query_row(
        &format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()),
        [],
        |row| row.get(0),
    )?;
    debug!(path = %config.path.display(), journal_mode = %mode, "sqlite store opened");
    initialize_schema(&mut connection)?;
    Ok(connection)
}

/// Creates the tables, or checks the version of an existing database.
pub fn initialize_schema(connection: &mut Connection) -> SqliteResult<()> {
    let tx = connection.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", [], |row| row.get(0))
        .optional()?;
    match version {
        None => {
            tx.execute(
                "INSERT INTO store_meta (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
            tx.execute_batch(SCHEMA)?;
        }
        Some(SCHEMA_VERSION) => {}
        Some(found) => {
            return Err(SqliteStoreError::VersionMismatch {
                found,
                expected: SCHEMA_VERSION,
            });
        }
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let mut connection = Connection::open_in_memory().unwrap();
        initialize_schema(&mut connection).unwrap();
        initialize_schema(&mut connection).unwrap();
        let tables: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'run_lock'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let mut connection = Connection::open_in_memory().unwrap();
        initialize_schema(&mut connection).unwrap();
        connection
            .execute("UPDATE store_meta SET version = 99", [])
            .unwrap();
        let err = initialize_schema(&mut connection).unwrap_err();
        assert!(matches!(
            err,
            SqliteStoreError::VersionMismatch { found: 99, .. }
        ));
    }
}
