//! Bulk transfer table.

use crate::error::{decode, SqliteResult};
use crate::store::{decode_optional_time, decode_time, encode_time, SqliteStore};
use railsync_engine::{BulkTransfer, BulkTransferStore, LayoutBranch, SplitId, StoreResult};
use railsync_protocol::BulkTransferExternalId;
use rusqlite::{params, Connection, OptionalExtension, Row};

const COLUMNS: &str = "split_id, branch, state, external_id, temporary_failure, expedited_start, \
                       assets_total, assets_moved, started_at, ended_at, updated_at";

struct TransferRow {
    split_id: i64,
    branch: String,
    state: String,
    external_id: Option<i64>,
    temporary_failure: bool,
    expedited_start: bool,
    assets_total: Option<i64>,
    assets_moved: Option<i64>,
    started_at: Option<String>,
    ended_at: Option<String>,
    updated_at: String,
}

impl TransferRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            split_id: row.get(0)?,
            branch: row.get(1)?,
            state: row.get(2)?,
            external_id: row.get(3)?,
            temporary_failure: row.get(4)?,
            expedited_start: row.get(5)?,
            assets_total: row.get(6)?,
            assets_moved: row.get(7)?,
            started_at: row.get(8)?,
            ended_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn decode(self) -> SqliteResult<BulkTransfer> {
        Ok(BulkTransfer {
            split_id: SplitId(self.split_id),
            branch: decode("bulk_transfer.branch", &self.branch)?,
            state: decode("bulk_transfer.state", &self.state)?,
            external_id: self.external_id.map(BulkTransferExternalId),
            temporary_failure: self.temporary_failure,
            expedited_start: self.expedited_start,
            assets_total: self.assets_total.map(count),
            assets_moved: self.assets_moved.map(count),
            started_at: decode_optional_time("bulk_transfer.started_at", self.started_at)?,
            ended_at: decode_optional_time("bulk_transfer.ended_at", self.ended_at)?,
            updated_at: decode_time("bulk_transfer.updated_at", &self.updated_at)?,
        })
    }
}

fn count(value: i64) -> u64 {
    value.max(0) as u64
}

fn stored_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn load(connection: &Connection, split_id: SplitId) -> SqliteResult<Option<BulkTransfer>> {
    let row = connection
        .query_row(
            &format!("SELECT {COLUMNS} FROM bulk_transfer WHERE split_id = ?1"),
            params![split_id.0],
            TransferRow::read,
        )
        .optional()?;
    row.map(TransferRow::decode).transpose()
}

impl BulkTransferStore for SqliteStore {
    fn get(&self, split_id: SplitId) -> StoreResult<Option<BulkTransfer>> {
        self.with_connection(|connection| load(connection, split_id))
    }

    fn save(&self, transfer: &BulkTransfer) -> StoreResult<()> {
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            if let Some(current) = load(&tx, transfer.split_id)? {
                current.ensure_replaceable_by(transfer)?;
            }
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO bulk_transfer ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    transfer.split_id.0,
                    transfer.branch.to_string(),
                    transfer.state.as_str(),
                    transfer.external_id.map(|id| id.0),
                    transfer.temporary_failure,
                    transfer.expedited_start,
                    transfer.assets_total.map(stored_count),
                    transfer.assets_moved.map(stored_count),
                    transfer.started_at.map(encode_time),
                    transfer.ended_at.map(encode_time),
                    encode_time(transfer.updated_at),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn list(&self, branch: LayoutBranch) -> StoreResult<Vec<BulkTransfer>> {
        self.with_connection(|connection| {
            let rows = connection
                .prepare_cached(&format!(
                    "SELECT {COLUMNS} FROM bulk_transfer WHERE branch = ?1 ORDER BY split_id"
                ))?
                .query_map(params![branch.to_string()], TransferRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(TransferRow::decode).collect()
        })
    }
}
