//! Push history tables.

use crate::error::{decode, SqliteResult};
use crate::store::{decode_optional_time, decode_time, encode_time, SqliteStore};
use chrono::{DateTime, Utc};
use railsync_engine::{
    AssetRef, IntId, LayoutBranch, PublicationId, PublicationRef, PushErrorRecord, PushFailure,
    PushHistoryStore, PushId, PushRecord, PushStatus, StoreError, StoreResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

const RECORD_COLUMNS: &str = "id, branch, status, started_at, ended_at";
const ERROR_COLUMNS: &str =
    "e.id, e.push_id, e.category, e.operation, e.asset_type, e.asset_id, e.message, e.created_at";

struct RecordRow {
    id: i64,
    branch: String,
    status: String,
    started_at: String,
    ended_at: Option<String>,
}

impl RecordRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            branch: row.get(1)?,
            status: row.get(2)?,
            started_at: row.get(3)?,
            ended_at: row.get(4)?,
        })
    }

    fn decode(self, connection: &Connection) -> SqliteResult<PushRecord> {
        let id = PushId(self.id);
        Ok(PushRecord {
            id,
            branch: decode("push_record.branch", &self.branch)?,
            status: decode("push_record.status", &self.status)?,
            started_at: decode_time("push_record.started_at", &self.started_at)?,
            ended_at: decode_optional_time("push_record.ended_at", self.ended_at)?,
            publications: publications(connection, id)?,
        })
    }
}

struct ErrorRow {
    id: i64,
    push_id: i64,
    category: String,
    operation: String,
    asset_type: String,
    asset_id: i64,
    message: String,
    created_at: String,
}

impl ErrorRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            push_id: row.get(1)?,
            category: row.get(2)?,
            operation: row.get(3)?,
            asset_type: row.get(4)?,
            asset_id: row.get(5)?,
            message: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn decode(self) -> SqliteResult<PushErrorRecord> {
        Ok(PushErrorRecord {
            id: self.id,
            push_id: PushId(self.push_id),
            category: decode("push_error.category", &self.category)?,
            operation: decode("push_error.operation", &self.operation)?,
            asset: AssetRef {
                asset_type: decode("push_error.asset_type", &self.asset_type)?,
                id: IntId(self.asset_id),
            },
            message: self.message,
            created_at: decode_time("push_error.created_at", &self.created_at)?,
        })
    }
}

fn publications(connection: &Connection, push_id: PushId) -> SqliteResult<Vec<PublicationRef>> {
    let mut statement = connection.prepare_cached(
        "SELECT publication_id, published_at FROM push_record_publication
         WHERE push_id = ?1 ORDER BY rowid",
    )?;
    let rows = statement
        .query_map(params![push_id.0], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter()
        .map(|(id, published_at)| {
            Ok(PublicationRef {
                id: PublicationId(id),
                published_at: decode_time("push_record_publication.published_at", &published_at)?,
            })
        })
        .collect()
}

fn record(connection: &Connection, push_id: PushId) -> SqliteResult<Option<PushRecord>> {
    let row = connection
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM push_record WHERE id = ?1"),
            params![push_id.0],
            RecordRow::read,
        )
        .optional()?;
    row.map(|row| row.decode(connection)).transpose()
}

/// The most recent record covering a publication.
fn latest_covering(
    connection: &Connection,
    publication_id: PublicationId,
) -> SqliteResult<Option<PushRecord>> {
    let row = connection
        .query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM push_record WHERE id = (
                    SELECT MAX(push_id) FROM push_record_publication WHERE publication_id = ?1
                )"
            ),
            params![publication_id.0],
            RecordRow::read,
        )
        .optional()?;
    row.map(|row| row.decode(connection)).transpose()
}

impl PushHistoryStore for SqliteStore {
    fn start_push(
        &self,
        branch: LayoutBranch,
        publications: &[PublicationRef],
    ) -> StoreResult<PushId> {
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            tx.execute(
                "INSERT INTO push_record (branch, status, started_at) VALUES (?1, ?2, ?3)",
                params![
                    branch.to_string(),
                    PushStatus::InProgress.as_str(),
                    encode_time(Utc::now())
                ],
            )?;
            let push_id = PushId(tx.last_insert_rowid());
            {
                let mut insert = tx.prepare_cached(
                    "INSERT OR IGNORE INTO push_record_publication (push_id, publication_id, published_at)
                     VALUES (?1, ?2, ?3)",
                )?;
                for publication in publications {
                    insert.execute(params![
                        push_id.0,
                        publication.id.0,
                        encode_time(publication.published_at)
                    ])?;
                }
            }
            tx.commit()?;
            Ok(push_id)
        })
    }

    fn update_status(&self, push_id: PushId, status: PushStatus) -> StoreResult<()> {
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM push_record WHERE id = ?1",
                    params![push_id.0],
                    |row| row.get(0),
                )
                .optional()?;
            let current = current.ok_or_else(|| StoreError::NotFound(format!("push {push_id}")))?;
            let current: PushStatus = decode("push_record.status", &current)?;
            current.ensure_transition(status)?;
            let ended_at = status.is_terminal().then(|| encode_time(Utc::now()));
            tx.execute(
                "UPDATE push_record SET status = ?1, ended_at = COALESCE(?2, ended_at) WHERE id = ?3",
                params![status.as_str(), ended_at, push_id.0],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn insert_error(&self, push_id: PushId, failure: &PushFailure) -> StoreResult<PushErrorRecord> {
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            let exists = tx
                .query_row(
                    "SELECT 1 FROM push_record WHERE id = ?1",
                    params![push_id.0],
                    |_| Ok(()),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("push {push_id}")).into());
            }
            let created_at = Utc::now();
            let message = failure.source.diagnostic();
            tx.execute(
                "INSERT INTO push_error
                    (push_id, category, operation, asset_type, asset_id, message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    push_id.0,
                    failure.source.category().as_str(),
                    failure.source.operation().as_str(),
                    failure.asset.asset_type.as_str(),
                    failure.asset.id.0,
                    message,
                    encode_time(created_at)
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(PushErrorRecord {
                id,
                push_id,
                category: failure.source.category(),
                operation: failure.source.operation(),
                asset: failure.asset,
                message,
                created_at,
            })
        })
    }

    fn push(&self, push_id: PushId) -> StoreResult<Option<PushRecord>> {
        self.with_connection(|connection| record(connection, push_id))
    }

    fn latest_push(&self, branch: LayoutBranch) -> StoreResult<Option<PushRecord>> {
        self.with_connection(|connection| {
            let row = connection
                .query_row(
                    &format!(
                        "SELECT {RECORD_COLUMNS} FROM push_record
                         WHERE branch = ?1 ORDER BY id DESC LIMIT 1"
                    ),
                    params![branch.to_string()],
                    RecordRow::read,
                )
                .optional()?;
            row.map(|row| row.decode(connection)).transpose()
        })
    }

    fn latest_successful_publication_moment(
        &self,
        branch: LayoutBranch,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        self.with_connection(|connection| {
            let latest: Option<String> = connection.query_row(
                "SELECT MAX(p.published_at) FROM push_record_publication p
                 JOIN push_record r ON r.id = p.push_id
                 WHERE r.branch = ?1 AND r.status = ?2",
                params![branch.to_string(), PushStatus::Successful.as_str()],
                |row| row.get(0),
            )?;
            decode_optional_time("push_record_publication.published_at", latest)
        })
    }

    fn latest_error_for_publication(
        &self,
        publication_id: PublicationId,
    ) -> StoreResult<Option<PushErrorRecord>> {
        self.with_connection(|connection| {
            let row = connection
                .query_row(
                    &format!(
                        "SELECT {ERROR_COLUMNS} FROM push_error e
                         JOIN push_record_publication p ON p.push_id = e.push_id
                         WHERE p.publication_id = ?1
                         ORDER BY e.id DESC LIMIT 1"
                    ),
                    params![publication_id.0],
                    ErrorRow::read,
                )
                .optional()?;
            row.map(ErrorRow::decode).transpose()
        })
    }

    fn status_for_publication(
        &self,
        publication_id: PublicationId,
    ) -> StoreResult<Option<PushStatus>> {
        self.with_connection(|connection| {
            Ok(latest_covering(connection, publication_id)?.map(|record| record.status))
        })
    }

    fn is_publication_pushed(&self, publication_id: PublicationId) -> StoreResult<bool> {
        self.with_connection(|connection| {
            let pushed = connection
                .query_row(
                    "SELECT 1 FROM push_record_publication p
                     JOIN push_record r ON r.id = p.push_id
                     WHERE p.publication_id = ?1 AND r.status = ?2 LIMIT 1",
                    params![publication_id.0, PushStatus::Successful.as_str()],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(pushed.is_some())
        })
    }

    fn resolve_stuck_pushes(&self) -> StoreResult<Vec<(PushId, PushStatus)>> {
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            let open = tx
                .prepare("SELECT id, status FROM push_record WHERE ended_at IS NULL")?
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let now = encode_time(Utc::now());
            let mut resolved = Vec::new();
            for (id, status) in open {
                let status: PushStatus = decode("push_record.status", &status)?;
                if let Some(swept) = status.swept() {
                    tx.execute(
                        "UPDATE push_record SET status = ?1, ended_at = ?2 WHERE id = ?3",
                        params![swept.as_str(), now, id],
                    )?;
                    resolved.push((PushId(id), swept));
                }
            }
            tx.commit()?;
            Ok(resolved)
        })
    }
}
