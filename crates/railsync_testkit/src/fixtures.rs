//! Layout fixtures.
//!
//! Small constructors for the entities and publications most tests need.
//! Every constructor returns a value in its common state; tests adjust the
//! fields they care about.

use chrono::{DateTime, Duration, TimeZone, Utc};
use railsync_engine::{
    IntId, JointTrackLink, LayoutState, LocationTrack, LocationTrackChange, MetadataSegment,
    PublicationChanges, PublicationId, Split, SplitId, SplitTarget, Switch, SwitchChange,
    SwitchJoint, SwitchStateCategory, TrackNumber, TrackNumberChange, TrackType,
};
use railsync_protocol::{Coordinate, JointNumber, KmNumber, TrackMeter};
use std::collections::BTreeSet;

/// Moment of publication `id`: one hour per id after a fixed base.
pub fn published_at(id: i64) -> DateTime<Utc> {
    let base = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    base + Duration::hours(id)
}

/// Kilometre set from plain numbers.
pub fn kms(numbers: &[u32]) -> BTreeSet<KmNumber> {
    numbers.iter().copied().map(KmNumber).collect()
}

/// Joint set from plain numbers.
pub fn joints(numbers: &[u32]) -> BTreeSet<JointNumber> {
    numbers.iter().copied().map(JointNumber).collect()
}

/// A track number in use.
pub fn track_number(id: i64, number: &str) -> TrackNumber {
    TrackNumber {
        id: IntId(id),
        number: number.to_string(),
        description: format!("track number {number}"),
        state: LayoutState::InUse,
    }
}

/// A main location track in use, without metadata.
pub fn location_track(id: i64, name: &str, track_number_id: i64) -> LocationTrack {
    LocationTrack {
        id: IntId(id),
        name: name.to_string(),
        description: format!("location track {name}"),
        track_number_id: IntId(track_number_id),
        track_type: TrackType::Main,
        state: LayoutState::InUse,
        owner: "Väylävirasto".to_string(),
        duplicate_of: None,
        metadata: Vec::new(),
    }
}

/// A metadata segment from `start_m` to `end_m`.
pub fn metadata(start_m: f64, end_m: f64, plan_name: &str) -> MetadataSegment {
    MetadataSegment {
        start_m,
        end_m,
        plan_name: plan_name.to_string(),
        plan_source: "GEOMETRIAPALVELU".to_string(),
    }
}

/// A joint at `(x, y)` lying on the given (location track, track number) pairs.
pub fn joint(number: u32, x: f64, y: f64, tracks: &[(i64, i64)]) -> SwitchJoint {
    SwitchJoint {
        number: JointNumber(number),
        location: Coordinate::new(x, y),
        tracks: tracks
            .iter()
            .map(|&(location_track_id, track_number_id)| JointTrackLink {
                location_track_id: IntId(location_track_id),
                track_number_id: IntId(track_number_id),
            })
            .collect(),
    }
}

/// An existing switch.
pub fn switch(id: i64, name: &str, joints: Vec<SwitchJoint>) -> Switch {
    Switch {
        id: IntId(id),
        name: name.to_string(),
        type_name: "YV60-300-1:9-O".to_string(),
        state_category: SwitchStateCategory::Exists,
        owner: "Väylävirasto".to_string(),
        trap_point: None,
        joints,
    }
}

/// Change of a track number on the given kilometres.
pub fn track_number_change(track_number: TrackNumber, changed: &[u32]) -> TrackNumberChange {
    TrackNumberChange {
        track_number,
        changed_kms: kms(changed),
    }
}

/// Change of a location track on the given kilometres.
pub fn location_track_change(track: LocationTrack, changed: &[u32]) -> LocationTrackChange {
    LocationTrackChange {
        location_track: track,
        changed_kms: kms(changed),
    }
}

/// Change of a switch on the given joints.
pub fn switch_change(switch: Switch, changed: &[u32]) -> SwitchChange {
    SwitchChange {
        switch,
        changed_joints: joints(changed),
    }
}

/// Builds a publication.
#[derive(Debug, Clone)]
pub struct PublicationBuilder {
    publication: PublicationChanges,
}

impl PublicationBuilder {
    /// An empty publication published at [`published_at`]`(id)`.
    pub fn new(id: i64) -> Self {
        Self {
            publication: PublicationChanges {
                id: PublicationId(id),
                published_at: published_at(id),
                track_numbers: Vec::new(),
                location_tracks: Vec::new(),
                switches: Vec::new(),
            },
        }
    }

    /// Adds a track number change.
    pub fn track_number(mut self, change: TrackNumberChange) -> Self {
        self.publication.track_numbers.push(change);
        self
    }

    /// Adds a location track change.
    pub fn location_track(mut self, change: LocationTrackChange) -> Self {
        self.publication.location_tracks.push(change);
        self
    }

    /// Adds a switch change.
    pub fn switch(mut self, change: SwitchChange) -> Self {
        self.publication.switches.push(change);
        self
    }

    /// Finishes the publication.
    pub fn build(self) -> PublicationChanges {
        self.publication
    }
}

/// A split of `source` into `targets`, each taking one kilometre in order.
pub fn split(id: i64, publication_id: i64, source: i64, targets: &[i64]) -> Split {
    Split {
        id: SplitId(id),
        publication_id: PublicationId(publication_id),
        source_track_id: IntId(source),
        targets: targets
            .iter()
            .enumerate()
            .map(|(index, &target)| {
                let km = KmNumber(index as u32);
                SplitTarget {
                    location_track_id: IntId(target),
                    start: TrackMeter::new(km, 0.0),
                    end: TrackMeter::new(km, 999.0),
                }
            })
            .collect(),
        expedited: false,
    }
}
