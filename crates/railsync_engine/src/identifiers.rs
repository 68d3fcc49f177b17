//! External identifier (OID) mapping.
//!
//! Each internal entity has at most one OID per layout branch. The mapping is
//! written once, after the first successful create, and never changes.

use crate::error::{StoreError, StoreResult};
use crate::model::{AssetRef, AssetType, IntId, LayoutBranch};
use parking_lot::RwLock;
use railsync_protocol::Oid;
use std::collections::HashMap;

/// Persistent (branch, asset) → OID mapping.
pub trait IdentifierStore: Send + Sync {
    /// Returns the OID of an entity.
    fn external_id(&self, branch: LayoutBranch, asset: AssetRef) -> StoreResult<Option<Oid>>;

    /// Returns the internal id mapped to an OID.
    fn internal_id(
        &self,
        branch: LayoutBranch,
        asset_type: AssetType,
        oid: &Oid,
    ) -> StoreResult<Option<IntId>>;

    /// Returns the OIDs of the given entities; unmapped entities are left out.
    fn external_ids(
        &self,
        branch: LayoutBranch,
        asset_type: AssetType,
        ids: &[IntId],
    ) -> StoreResult<HashMap<IntId, Oid>>;

    /// Records the OID of an entity.
    ///
    /// Recording the same mapping again is a no-op. Mapping an entity to a
    /// different OID, or an OID to a different entity, fails with
    /// [`StoreError::IdentifierConflict`].
    fn insert(&self, branch: LayoutBranch, asset: AssetRef, oid: &Oid) -> StoreResult<()>;
}

#[derive(Default)]
struct Mappings {
    forward: HashMap<(LayoutBranch, AssetRef), Oid>,
    reverse: HashMap<(LayoutBranch, AssetType, Oid), IntId>,
}

/// In-memory identifier store.
#[derive(Default)]
pub struct MemoryIdentifierStore {
    mappings: RwLock<Mappings>,
}

impl MemoryIdentifierStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of mappings.
    pub fn len(&self) -> usize {
        self.mappings.read().forward.len()
    }

    /// Returns true if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdentifierStore for MemoryIdentifierStore {
    fn external_id(&self, branch: LayoutBranch, asset: AssetRef) -> StoreResult<Option<Oid>> {
        Ok(self.mappings.read().forward.get(&(branch, asset)).cloned())
    }

    fn internal_id(
        &self,
        branch: LayoutBranch,
        asset_type: AssetType,
        oid: &Oid,
    ) -> StoreResult<Option<IntId>> {
        Ok(self
            .mappings
            .read()
            .reverse
            .get(&(branch, asset_type, oid.clone()))
            .copied())
    }

    fn external_ids(
        &self,
        branch: LayoutBranch,
        asset_type: AssetType,
        ids: &[IntId],
    ) -> StoreResult<HashMap<IntId, Oid>> {
        let mappings = self.mappings.read();
        Ok(ids
            .iter()
            .filter_map(|&id| {
                let asset = AssetRef { asset_type, id };
                mappings.forward.get(&(branch, asset)).map(|oid| (id, oid.clone()))
            })
            .collect())
    }

    fn insert(&self, branch: LayoutBranch, asset: AssetRef, oid: &Oid) -> StoreResult<()> {
        let mut mappings = self.mappings.write();
        if let Some(existing) = mappings.forward.get(&(branch, asset)) {
            return if existing == oid {
                Ok(())
            } else {
                Err(StoreError::IdentifierConflict(format!(
                    "{asset} in {branch} is already mapped to {existing}, refusing {oid}"
                )))
            };
        }
        let reverse_key = (branch, asset.asset_type, oid.clone());
        if let Some(other) = mappings.reverse.get(&reverse_key) {
            return Err(StoreError::IdentifierConflict(format!(
                "{oid} in {branch} already belongs to {} {other}",
                asset.asset_type
            )));
        }
        mappings.forward.insert((branch, asset), oid.clone());
        mappings.reverse.insert(reverse_key, asset.id);
        Ok(())
    }
}
