//! External id mapping table.

use crate::store::SqliteStore;
use railsync_engine::{
    AssetRef, AssetType, IdentifierStore, IntId, LayoutBranch, StoreError, StoreResult,
};
use railsync_protocol::Oid;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

impl IdentifierStore for SqliteStore {
    fn external_id(&self, branch: LayoutBranch, asset: AssetRef) -> StoreResult<Option<Oid>> {
        self.with_connection(|connection| {
            let oid: Option<String> = connection
                .query_row(
                    "SELECT oid FROM external_id
                     WHERE branch = ?1 AND asset_type = ?2 AND asset_id = ?3",
                    params![branch.to_string(), asset.asset_type.as_str(), asset.id.0],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(oid.map(Oid::new))
        })
    }

    fn internal_id(
        &self,
        branch: LayoutBranch,
        asset_type: AssetType,
        oid: &Oid,
    ) -> StoreResult<Option<IntId>> {
        self.with_connection(|connection| {
            let id: Option<i64> = connection
                .query_row(
                    "SELECT asset_id FROM external_id
                     WHERE branch = ?1 AND asset_type = ?2 AND oid = ?3",
                    params![branch.to_string(), asset_type.as_str(), oid.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id.map(IntId))
        })
    }

    fn external_ids(
        &self,
        branch: LayoutBranch,
        asset_type: AssetType,
        ids: &[IntId],
    ) -> StoreResult<HashMap<IntId, Oid>> {
        self.with_connection(|connection| {
            let mut statement = connection.prepare_cached(
                "SELECT oid FROM external_id
                 WHERE branch = ?1 AND asset_type = ?2 AND asset_id = ?3",
            )?;
            let branch = branch.to_string();
            let mut found = HashMap::with_capacity(ids.len());
            for &id in ids {
                let oid: Option<String> = statement
                    .query_row(params![branch, asset_type.as_str(), id.0], |row| row.get(0))
                    .optional()?;
                if let Some(oid) = oid {
                    found.insert(id, Oid::new(oid));
                }
            }
            Ok(found)
        })
    }

    fn insert(&self, branch: LayoutBranch, asset: AssetRef, oid: &Oid) -> StoreResult<()> {
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            let branch_name = branch.to_string();
            let existing: Option<String> = tx
                .query_row(
                    "SELECT oid FROM external_id
                     WHERE branch = ?1 AND asset_type = ?2 AND asset_id = ?3",
                    params![branch_name, asset.asset_type.as_str(), asset.id.0],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing) = existing {
                return if existing == oid.as_str() {
                    Ok(())
                } else {
                    Err(StoreError::IdentifierConflict(format!(
                        "{asset} in {branch} is already mapped to {existing}, refusing {oid}"
                    ))
                    .into())
                };
            }
            let other: Option<i64> = tx
                .query_row(
                    "SELECT asset_id FROM external_id
                     WHERE branch = ?1 AND asset_type = ?2 AND oid = ?3",
                    params![branch_name, asset.asset_type.as_str(), oid.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(other) = other {
                return Err(StoreError::IdentifierConflict(format!(
                    "{oid} in {branch} already belongs to {} {other}",
                    asset.asset_type
                ))
                .into());
            }
            tx.execute(
                "INSERT INTO external_id (branch, asset_type, asset_id, oid) VALUES (?1, ?2, ?3, ?4)",
                params![branch_name, asset.asset_type.as_str(), asset.id.0, oid.as_str()],
            )?;
            tx.commit()?;
            Ok(())
        })
    }
}
