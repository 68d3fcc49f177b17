//! Per-type converters.
//!
//! Each converter reconciles one kind of layout entity with the registry:
//! it folds the changes of a push per entity, processes deleted entities
//! first, and then creates, updates or deletes each entity with the smallest
//! set of registry calls.

mod geometry;
mod location_track;
mod switch;
mod track_number;

pub use location_track::push_location_tracks;
pub use switch::push_switches;
pub use track_number::push_track_numbers;

use crate::client::RegistryClient;
use crate::collaborators::Geocoder;
use crate::error::{ForAsset, RegistryResult, SyncError, SyncResult};
use crate::http::HttpClient;
use crate::identifiers::IdentifierStore;
use crate::model::{AssetRef, LayoutBranch, LayoutChange};
use railsync_protocol::Oid;
use std::collections::HashMap;

/// Everything a converter needs to push one branch.
pub struct PushContext<'a, C: HttpClient> {
    /// Branch being pushed.
    pub branch: LayoutBranch,
    /// Registry client.
    pub client: &'a RegistryClient<C>,
    /// OID mapping.
    pub identifiers: &'a dyn IdentifierStore,
    /// Address calculation.
    pub geocoder: &'a dyn Geocoder,
}

impl<'a, C: HttpClient> PushContext<'a, C> {
    /// Returns the OID of an entity, if it has one.
    pub fn oid_of(&self, asset: AssetRef) -> SyncResult<Option<Oid>> {
        Ok(self.identifiers.external_id(self.branch, asset)?)
    }

    /// Returns the OID of an entity that must already have been pushed.
    pub fn require_oid(&self, asset: AssetRef) -> SyncResult<Oid> {
        self.oid_of(asset)?.ok_or_else(|| {
            SyncError::precondition(format!("{asset} has no external id in {}", self.branch))
        })
    }

    /// Records the OID returned by a create, unless the entity already had one.
    fn remember(&self, asset: AssetRef, reused: Option<&Oid>, created: &Oid) -> SyncResult<()> {
        if reused != Some(created) {
            self.identifiers.insert(self.branch, asset, created)?;
        }
        Ok(())
    }
}

/// What to do with one entity.
enum Plan<T> {
    /// Create the entity, reusing an OID the registry has forgotten.
    Create { reuse: Option<Oid> },
    /// Update the entity from the registry's current representation.
    Update { oid: Oid, existing: T },
    /// Delete the entity.
    Delete { oid: Oid, existing: T },
}

/// Decides between create, update and delete for one entity.
fn plan<C, T>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    deleted: bool,
    fetch: impl FnOnce(&Oid) -> RegistryResult<Option<T>>,
) -> SyncResult<Plan<T>>
where
    C: HttpClient,
{
    let Some(oid) = ctx.oid_of(asset)? else {
        return Ok(Plan::Create { reuse: None });
    };
    match fetch(&oid).for_asset(asset)? {
        None => Ok(Plan::Create { reuse: Some(oid) }),
        Some(existing) if deleted => Ok(Plan::Delete { oid, existing }),
        Some(existing) => Ok(Plan::Update { oid, existing }),
    }
}

/// Folds changes per entity and orders them deleted-first.
///
/// `changes` must be in publication order. The latest version of each
/// entity wins; changed ranges of all its versions are unioned.
pub fn latest_changes<T: LayoutChange>(changes: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut order = Vec::new();
    let mut latest: HashMap<_, T> = HashMap::new();
    for change in changes {
        let id = change.entity_id();
        let merged = match latest.remove(&id) {
            Some(earlier) => {
                let mut later = change;
                later.absorb_earlier(earlier);
                later
            }
            None => {
                order.push(id);
                change
            }
        };
        latest.insert(id, merged);
    }
    let mut folded: Vec<T> = order.into_iter().filter_map(|id| latest.remove(&id)).collect();
    deleted_first(&mut folded);
    folded
}

/// Stable sort putting deleted entities before all others.
pub fn deleted_first<T: LayoutChange>(changes: &mut [T]) {
    changes.sort_by_key(|change| if change.is_deleted() { 0u8 } else { 1u8 });
}
