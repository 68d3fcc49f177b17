//! Property-based test generators using proptest.
//!
//! Strategies for layout changes and state sequences. Generated entities
//! reference each other consistently: location tracks point at generated
//! track numbers, and ids are unique within a publication.

use crate::fixtures::{kms, location_track, track_number, PublicationBuilder};
use proptest::prelude::*;
use railsync_engine::{
    LayoutState, LocationTrackChange, PublicationChanges, PushStatus, TrackNumberChange,
};
use railsync_protocol::{KmNumber, RemoteBulkTransferState};
use std::collections::BTreeSet;

/// Strategy for layout states.
pub fn layout_state_strategy() -> impl Strategy<Value = LayoutState> {
    prop_oneof![
        Just(LayoutState::InUse),
        Just(LayoutState::NotInUse),
        Just(LayoutState::Deleted),
    ]
}

/// Strategy for non-empty kilometre sets below `max_km`.
pub fn km_set_strategy(max_km: u32) -> impl Strategy<Value = BTreeSet<KmNumber>> {
    prop::collection::btree_set(0..max_km.max(1), 1..4)
        .prop_map(|numbers| numbers.into_iter().map(KmNumber).collect())
}

/// Strategy for push statuses.
pub fn push_status_strategy() -> impl Strategy<Value = PushStatus> {
    prop_oneof![
        Just(PushStatus::InProgress),
        Just(PushStatus::InProgressMValues),
        Just(PushStatus::Successful),
        Just(PushStatus::Failed),
        Just(PushStatus::ConnectionIssue),
    ]
}

/// Strategy for remote bulk transfer states.
pub fn remote_bulk_transfer_state_strategy() -> impl Strategy<Value = RemoteBulkTransferState> {
    prop_oneof![
        Just(RemoteBulkTransferState::Created),
        Just(RemoteBulkTransferState::InProgress),
        Just(RemoteBulkTransferState::Finished),
        Just(RemoteBulkTransferState::Failed),
    ]
}

/// Strategy for sequences of polled remote states.
pub fn remote_state_sequence_strategy(
    max_len: usize,
) -> impl Strategy<Value = Vec<RemoteBulkTransferState>> {
    prop::collection::vec(remote_bulk_transfer_state_strategy(), 1..max_len.max(2))
}

/// Strategy for track number changes with distinct ids starting at 1.
///
/// Each change is on kilometres below 3, so a reference line registered
/// over three kilometres covers all of them.
pub fn track_number_changes_strategy(
    max_count: usize,
) -> impl Strategy<Value = Vec<TrackNumberChange>> {
    prop::collection::vec((layout_state_strategy(), km_set_strategy(3)), 1..max_count.max(2))
        .prop_map(|entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(index, (state, changed_kms))| {
                    let id = index as i64 + 1;
                    let mut number = track_number(id, &format!("{id:03}"));
                    number.state = state;
                    TrackNumberChange {
                        track_number: number,
                        changed_kms,
                    }
                })
                .collect()
        })
}

/// Strategy for a publication of track numbers with one location track each.
///
/// Location track `100 + n` lies on track number `n`.
pub fn publication_strategy(
    publication_id: i64,
    max_count: usize,
) -> impl Strategy<Value = PublicationChanges> {
    (
        track_number_changes_strategy(max_count),
        prop::collection::vec(layout_state_strategy(), max_count.max(1)),
    )
        .prop_map(move |(track_numbers, track_states)| {
            let mut builder = PublicationBuilder::new(publication_id);
            for (change, state) in track_numbers.into_iter().zip(track_states) {
                let id = change.track_number.id.0;
                let mut track = location_track(100 + id, &format!("LT{id}"), id);
                track.state = state;
                builder = builder
                    .location_track(LocationTrackChange {
                        location_track: track,
                        changed_kms: kms(&[0]),
                    })
                    .track_number(change);
            }
            builder.build()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn track_number_ids_are_distinct(changes in track_number_changes_strategy(6)) {
            let ids: HashSet<_> = changes.iter().map(|c| c.track_number.id).collect();
            prop_assert_eq!(ids.len(), changes.len());
            for change in &changes {
                prop_assert!(!change.changed_kms.is_empty());
                prop_assert!(change.changed_kms.iter().all(|km| km.0 < 3));
            }
        }

        #[test]
        fn publication_tracks_reference_its_numbers(publication in publication_strategy(1, 4)) {
            let numbers: HashSet<_> = publication
                .track_numbers
                .iter()
                .map(|c| c.track_number.id)
                .collect();
            prop_assert_eq!(publication.location_tracks.len(), numbers.len());
            for change in &publication.location_tracks {
                prop_assert!(numbers.contains(&change.location_track.track_number_id));
            }
        }
    }
}
