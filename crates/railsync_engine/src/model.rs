//! Internal layout model as seen by the sync engine.
//!
//! Only the attributes the engine reads are modelled here; the layout storage
//! itself lives behind the collaborator traits.

use chrono::{DateTime, Utc};
use railsync_protocol::{Coordinate, JointNumber, KmNumber, TrackMeter};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Internal identifier of a track number, location track or switch.
    IntId
);
id_type!(
    /// Identifier of a publication (an approved batch of layout changes).
    PublicationId
);
id_type!(
    /// Identifier of a location track split.
    SplitId
);
id_type!(
    /// Identifier of a design branch.
    DesignId
);
id_type!(
    /// Identifier of a push record.
    PushId
);

/// Isolation context for layout data and external identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LayoutBranch {
    /// The main (official) layout.
    #[default]
    Main,
    /// A design draft.
    Design(DesignId),
}

impl fmt::Display for LayoutBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutBranch::Main => f.write_str("MAIN"),
            LayoutBranch::Design(id) => write!(f, "DESIGN_{id}"),
        }
    }
}

impl FromStr for LayoutBranch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "MAIN" {
            return Ok(LayoutBranch::Main);
        }
        s.strip_prefix("DESIGN_")
            .and_then(|id| id.parse::<i64>().ok())
            .map(|id| LayoutBranch::Design(DesignId(id)))
            .ok_or_else(|| format!("unknown layout branch: {s}"))
    }
}

/// Kind of asset pushed to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssetType {
    /// Track number (a route number in the registry).
    TrackNumber,
    /// Location track.
    LocationTrack,
    /// Switch (a turnout asset in the registry).
    Switch,
}

impl AssetType {
    /// Stable name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::TrackNumber => "TRACK_NUMBER",
            AssetType::LocationTrack => "LOCATION_TRACK",
            AssetType::Switch => "SWITCH",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRACK_NUMBER" => Ok(AssetType::TrackNumber),
            "LOCATION_TRACK" => Ok(AssetType::LocationTrack),
            "SWITCH" => Ok(AssetType::Switch),
            other => Err(format!("unknown asset type: {other}")),
        }
    }
}

/// Reference to exactly one pushed asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetRef {
    /// Asset kind.
    pub asset_type: AssetType,
    /// Internal identifier.
    pub id: IntId,
}

impl AssetRef {
    /// Reference to a track number.
    pub fn track_number(id: IntId) -> Self {
        Self {
            asset_type: AssetType::TrackNumber,
            id,
        }
    }

    /// Reference to a location track.
    pub fn location_track(id: IntId) -> Self {
        Self {
            asset_type: AssetType::LocationTrack,
            id,
        }
    }

    /// Reference to a switch.
    pub fn switch(id: IntId) -> Self {
        Self {
            asset_type: AssetType::Switch,
            id,
        }
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.asset_type, self.id)
    }
}

/// Lifecycle state of track numbers and location tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutState {
    /// In use.
    InUse,
    /// Exists but not in use.
    NotInUse,
    /// Deleted.
    Deleted,
}

/// Location track classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    /// Main track.
    Main,
    /// Side track.
    Side,
    /// Trap track.
    Trap,
    /// Chord track.
    Chord,
}

/// Whether a switch physically exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchStateCategory {
    /// The switch exists.
    Exists,
    /// The switch has been removed.
    NotExisting,
}

/// A track number.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackNumber {
    /// Internal id.
    pub id: IntId,
    /// The number itself, e.g. `"001"`.
    pub number: String,
    /// Description.
    pub description: String,
    /// Lifecycle state.
    pub state: LayoutState,
}

/// Plan metadata covering a stretch of a location track, by distance along it.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSegment {
    /// Start distance along the track, metres.
    pub start_m: f64,
    /// End distance along the track, metres.
    pub end_m: f64,
    /// Name of the plan the geometry came from.
    pub plan_name: String,
    /// Origin of the plan.
    pub plan_source: String,
}

impl MetadataSegment {
    /// Length of the segment in metres.
    pub fn length(&self) -> f64 {
        self.end_m - self.start_m
    }
}

/// A location track.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationTrack {
    /// Internal id.
    pub id: IntId,
    /// Name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Track number the track is addressed on.
    pub track_number_id: IntId,
    /// Classification.
    pub track_type: TrackType,
    /// Lifecycle state.
    pub state: LayoutState,
    /// Owner organisation.
    pub owner: String,
    /// Track this one duplicates.
    pub duplicate_of: Option<IntId>,
    /// Plan metadata segments, ordered by distance.
    pub metadata: Vec<MetadataSegment>,
}

/// Link from a switch joint to a location track passing through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JointTrackLink {
    /// Location track passing through the joint.
    pub location_track_id: IntId,
    /// Track number of that location track.
    pub track_number_id: IntId,
}

/// A switch joint.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchJoint {
    /// Joint number.
    pub number: JointNumber,
    /// Location of the joint.
    pub location: Coordinate,
    /// Location tracks passing through the joint.
    pub tracks: Vec<JointTrackLink>,
}

/// A switch.
#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
    /// Internal id.
    pub id: IntId,
    /// Name.
    pub name: String,
    /// Switch structure type, e.g. `"YV60-300-1:9-O"`.
    pub type_name: String,
    /// Existence.
    pub state_category: SwitchStateCategory,
    /// Owner organisation.
    pub owner: String,
    /// Whether the switch is a trap point, if known.
    pub trap_point: Option<bool>,
    /// Joints.
    pub joints: Vec<SwitchJoint>,
}

impl Switch {
    /// Returns the joint with the given number.
    pub fn joint(&self, number: JointNumber) -> Option<&SwitchJoint> {
        self.joints.iter().find(|j| j.number == number)
    }
}

/// A geocoded point along an alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddressPoint {
    /// Track address.
    pub address: TrackMeter,
    /// Location.
    pub coordinate: Coordinate,
    /// Distance along the alignment, metres.
    pub m: f64,
}

/// An alignment that can be geocoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlignmentRef {
    /// Reference line of a track number.
    ReferenceLine(IntId),
    /// A location track.
    LocationTrack(IntId),
}

/// A change to a single entity inside a publication.
pub trait LayoutChange {
    /// Internal id of the changed entity.
    fn entity_id(&self) -> IntId;

    /// Whether the entity is now deleted / not existing.
    fn is_deleted(&self) -> bool;

    /// Folds an earlier change of the same entity into this (later) one.
    fn absorb_earlier(&mut self, earlier: Self);
}

/// Changed track number with the kilometres whose geometry changed.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackNumberChange {
    /// Entity state after the publication.
    pub track_number: TrackNumber,
    /// Kilometres with changed geometry.
    pub changed_kms: BTreeSet<KmNumber>,
}

/// Changed location track with the kilometres whose geometry changed.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationTrackChange {
    /// Entity state after the publication.
    pub location_track: LocationTrack,
    /// Kilometres with changed geometry.
    pub changed_kms: BTreeSet<KmNumber>,
}

/// Changed switch with the joints that changed.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchChange {
    /// Entity state after the publication.
    pub switch: Switch,
    /// Joints that were added, moved or removed.
    pub changed_joints: BTreeSet<JointNumber>,
}

impl LayoutChange for TrackNumberChange {
    fn entity_id(&self) -> IntId {
        self.track_number.id
    }

    fn is_deleted(&self) -> bool {
        self.track_number.state == LayoutState::Deleted
    }

    fn absorb_earlier(&mut self, earlier: Self) {
        self.changed_kms.extend(earlier.changed_kms);
    }
}

impl LayoutChange for LocationTrackChange {
    fn entity_id(&self) -> IntId {
        self.location_track.id
    }

    fn is_deleted(&self) -> bool {
        self.location_track.state == LayoutState::Deleted
    }

    fn absorb_earlier(&mut self, earlier: Self) {
        self.changed_kms.extend(earlier.changed_kms);
    }
}

impl LayoutChange for SwitchChange {
    fn entity_id(&self) -> IntId {
        self.switch.id
    }

    fn is_deleted(&self) -> bool {
        self.switch.state_category == SwitchStateCategory::NotExisting
    }

    fn absorb_earlier(&mut self, earlier: Self) {
        self.changed_joints.extend(earlier.changed_joints);
    }
}

/// A publication reference with its moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicationRef {
    /// Publication id.
    pub id: PublicationId,
    /// When the publication was made.
    pub published_at: DateTime<Utc>,
}

/// All changes of one publication that concern the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicationChanges {
    /// Publication id.
    pub id: PublicationId,
    /// When the publication was made.
    pub published_at: DateTime<Utc>,
    /// Track number changes.
    pub track_numbers: Vec<TrackNumberChange>,
    /// Location track changes.
    pub location_tracks: Vec<LocationTrackChange>,
    /// Switch changes.
    pub switches: Vec<SwitchChange>,
}

impl PublicationChanges {
    /// Returns the reference of this publication.
    pub fn reference(&self) -> PublicationRef {
        PublicationRef {
            id: self.id,
            published_at: self.published_at,
        }
    }

    /// Returns true if the publication carries no registry changes.
    pub fn is_empty(&self) -> bool {
        self.track_numbers.is_empty() && self.location_tracks.is_empty() && self.switches.is_empty()
    }
}

/// Target of a location track split.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitTarget {
    /// Target location track.
    pub location_track_id: IntId,
    /// First address taken over by the target.
    pub start: TrackMeter,
    /// Last address taken over by the target.
    pub end: TrackMeter,
}

/// A published location track split.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    /// Split id.
    pub id: SplitId,
    /// Publication that carried the split.
    pub publication_id: PublicationId,
    /// Track that was split.
    pub source_track_id: IntId,
    /// Resulting tracks.
    pub targets: Vec<SplitTarget>,
    /// Whether the bulk transfer should be force-started.
    pub expedited: bool,
}
