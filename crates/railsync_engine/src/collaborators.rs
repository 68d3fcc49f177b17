//! Interfaces of the systems the engine consumes but does not own.

use crate::error::SyncResult;
use crate::model::{AddressPoint, AlignmentRef, IntId, LayoutBranch, PublicationChanges, Split};
use chrono::{DateTime, Utc};
use railsync_protocol::{Coordinate, KmRange, TrackMeter};

/// Source of published layout changes.
pub trait ChangeSource: Send + Sync {
    /// Returns the publications made after `since` (all when `None`), oldest first.
    fn unpushed_changes(
        &self,
        branch: LayoutBranch,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<PublicationChanges>>;
}

/// Point to address conversion.
pub trait Geocoder: Send + Sync {
    /// Returns the addressed points of an alignment, limited to `range` when given.
    ///
    /// Returns `None` when the alignment cannot be geocoded.
    fn points_for_address_range(
        &self,
        branch: LayoutBranch,
        alignment: AlignmentRef,
        range: Option<&KmRange>,
    ) -> SyncResult<Option<Vec<AddressPoint>>>;

    /// Returns the address of a point on a track number's reference line.
    fn address_for_point(
        &self,
        branch: LayoutBranch,
        track_number_id: IntId,
        point: Coordinate,
    ) -> SyncResult<Option<TrackMeter>>;
}

/// Source of published location track splits.
pub trait SplitSource: Send + Sync {
    /// Returns every published split of the branch, oldest first.
    fn published_splits(&self, branch: LayoutBranch) -> SyncResult<Vec<Split>>;
}
