//! Bulk transfer management against the reference registry.

use proptest::prelude::*;
use railsync_engine::{
    AssetRef, BulkTransfer, BulkTransferOutcome, BulkTransferState, BulkTransferStore, IntId,
    LayoutBranch, PushOutcome, PushStatus, RegistrySync, RegistrySyncService, RunLock, SplitId,
    BULK_TRANSFER_LOCK,
};
use railsync_protocol::{
    paths, BulkTransferExternalId, BulkTransferStateResponse, HttpMethod, RemoteBulkTransferState,
};
use railsync_registry_server::Fault;
use railsync_testkit::prelude::*;
use std::time::Duration;

const WAIT: Duration = Duration::from_millis(10);

/// Pushes track number 1 and location tracks 10, 11 and 12 in publication 1,
/// then registers split 1 of track 10 into 11 and 12.
fn pushed_split(harness: &SyncHarness) -> RegistrySync<HarnessClient> {
    harness.changes.publish(
        PublicationBuilder::new(1)
            .track_number(track_number_change(track_number(1, "001"), &[0]))
            .location_track(location_track_change(location_track(10, "LT1", 1), &[0]))
            .location_track(location_track_change(location_track(11, "LT1A", 1), &[0]))
            .location_track(location_track_change(location_track(12, "LT1B", 1), &[0]))
            .build(),
    );
    harness.splits.add(split(1, 1, 10, &[11, 12]));
    let service = harness.service();
    let outcome = service.trigger_push(LayoutBranch::Main, false).unwrap();
    assert!(matches!(
        outcome,
        PushOutcome::Completed {
            status: PushStatus::Successful,
            ..
        }
    ));
    service
}

fn advanced(outcome: BulkTransferOutcome) -> BulkTransfer {
    match outcome {
        BulkTransferOutcome::Advanced(transfer) => transfer,
        other => panic!("expected an advanced transfer, got {other:?}"),
    }
}

fn manage(service: &RegistrySync<HarnessClient>) -> BulkTransferOutcome {
    service
        .trigger_bulk_transfer_management(LayoutBranch::Main, WAIT)
        .unwrap()
}

#[test]
fn transfer_is_created_polled_and_finished() {
    let harness = SyncHarness::new();
    let service = pushed_split(&harness);

    let created = advanced(manage(&service));
    assert_eq!(created.state, BulkTransferState::Created);
    let id = created.external_id.unwrap();
    let job = harness.server.bulk_transfer(id).unwrap();
    assert_eq!(
        Some(job.request.source_location_track),
        harness.oid(AssetRef::location_track(IntId(10)))
    );
    assert_eq!(job.request.target_location_tracks.len(), 2);

    harness
        .server
        .set_bulk_transfer_state(
            id,
            BulkTransferStateResponse {
                assets_total: Some(10),
                assets_moved: Some(4),
                ..BulkTransferStateResponse::with_state(RemoteBulkTransferState::InProgress)
            },
        )
        .unwrap();
    let running = advanced(manage(&service));
    assert_eq!(running.state, BulkTransferState::InProgress);
    assert_eq!(running.assets_moved, Some(4));

    harness
        .server
        .set_bulk_transfer_state(
            id,
            BulkTransferStateResponse::with_state(RemoteBulkTransferState::Finished),
        )
        .unwrap();
    let finished = advanced(manage(&service));
    assert_eq!(finished.state, BulkTransferState::Successful);
    // counters from earlier polls are kept
    assert_eq!(finished.assets_total, Some(10));

    assert!(matches!(manage(&service), BulkTransferOutcome::Idle));
    assert_eq!(
        harness.components().bulk_transfers.get(SplitId(1)).unwrap(),
        Some(finished)
    );
}

#[test]
fn unavailable_registry_is_a_temporary_failure() {
    let harness = SyncHarness::new();
    let service = pushed_split(&harness);
    let created = advanced(manage(&service));

    harness
        .server
        .fail(HttpMethod::Get, paths::BULK_TRANSFERS, Fault::status(503));
    let retried = advanced(manage(&service));
    assert_eq!(retried.state, BulkTransferState::Created);
    assert!(retried.temporary_failure);
    assert_eq!(retried.external_id, created.external_id);

    harness.server.clear_faults();
    let polled = advanced(manage(&service));
    assert_eq!(polled.state, BulkTransferState::Created);
    assert!(!polled.temporary_failure);
}

#[test]
fn rejected_creation_fails_the_transfer() {
    let harness = SyncHarness::new();
    let service = pushed_split(&harness);
    harness
        .server
        .fail(HttpMethod::Post, paths::BULK_TRANSFERS, Fault::status(400));

    let failed = advanced(manage(&service));
    assert_eq!(failed.state, BulkTransferState::Failed);
    assert_eq!(failed.external_id, None);
    assert!(matches!(manage(&service), BulkTransferOutcome::Idle));
}

#[test]
fn lagging_poll_never_moves_transfer_back() {
    let harness = SyncHarness::new();
    let service = pushed_split(&harness);
    let id = advanced(manage(&service)).external_id.unwrap();

    harness
        .server
        .set_bulk_transfer_state(
            id,
            BulkTransferStateResponse::with_state(RemoteBulkTransferState::InProgress),
        )
        .unwrap();
    assert_eq!(advanced(manage(&service)).state, BulkTransferState::InProgress);

    harness
        .server
        .set_bulk_transfer_state(
            id,
            BulkTransferStateResponse::with_state(RemoteBulkTransferState::Created),
        )
        .unwrap();
    assert_eq!(advanced(manage(&service)).state, BulkTransferState::InProgress);
}

#[test]
fn expedited_transfer_is_started() {
    let harness = SyncHarness::new();
    let service = pushed_split(&harness);
    service.set_bulk_transfer_expedited(SplitId(1), true).unwrap();
    let pending = harness
        .components()
        .bulk_transfers
        .get(SplitId(1))
        .unwrap()
        .unwrap();
    assert_eq!(pending.state, BulkTransferState::Pending);
    assert!(pending.expedited_start);

    let id = advanced(manage(&service)).external_id.unwrap();
    let started = advanced(manage(&service));
    assert_eq!(started.state, BulkTransferState::InProgress);
    assert_eq!(harness.server.bulk_transfer(id).unwrap().start_requests, 1);
    assert_eq!(
        harness
            .server
            .requests_matching(HttpMethod::Post, &paths::bulk_transfer_start(id))
            .len(),
        1
    );
}

#[test]
fn unpushed_split_waits() {
    let harness = SyncHarness::new();
    harness.splits.add(split(3, 7, 10, &[11]));
    let service = harness.service();
    assert_eq!(manage(&service), BulkTransferOutcome::WaitingForPush(SplitId(3)));
    assert!(harness
        .server
        .requests_matching(HttpMethod::Post, paths::BULK_TRANSFERS)
        .is_empty());
}

#[test]
fn failed_push_blocks_transfers() {
    let harness = SyncHarness::new();
    let service = pushed_split(&harness);
    harness.changes.publish(
        PublicationBuilder::new(2)
            .track_number(track_number_change(track_number(2, "002"), &[0]))
            .build(),
    );
    harness
        .server
        .fail(HttpMethod::Post, paths::ROUTE_NUMBERS, Fault::status(400));
    service.trigger_push(LayoutBranch::Main, false).unwrap();

    assert_eq!(manage(&service), BulkTransferOutcome::Blocked);
}

#[test]
fn held_lock_skips_management() {
    let harness = SyncHarness::new();
    let service = pushed_split(&harness);
    let lock = &harness.components().lock;
    let token = lock
        .try_lock(BULK_TRANSFER_LOCK, Duration::ZERO, Duration::from_secs(60))
        .unwrap()
        .unwrap();
    assert_eq!(manage(&service), BulkTransferOutcome::LockBusy);
    lock.unlock(BULK_TRANSFER_LOCK, &token).unwrap();
    assert!(matches!(manage(&service), BulkTransferOutcome::Advanced(_)));
}

fn rank(state: BulkTransferState) -> u8 {
    match state {
        BulkTransferState::Pending => 0,
        BulkTransferState::Created => 1,
        BulkTransferState::InProgress => 2,
        BulkTransferState::Successful | BulkTransferState::Failed => 3,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn local_state_only_moves_forward(polls in remote_state_sequence_strategy(8)) {
        let harness = SyncHarness::new();
        let service = pushed_split(&harness);
        let id = advanced(manage(&service)).external_id.unwrap();
        prop_assert_eq!(id, BulkTransferExternalId(1));

        let mut previous = BulkTransferState::Created;
        for remote in polls {
            harness
                .server
                .set_bulk_transfer_state(id, BulkTransferStateResponse::with_state(remote))
                .unwrap();
            let state = match manage(&service) {
                BulkTransferOutcome::Advanced(transfer) => transfer.state,
                BulkTransferOutcome::Idle => previous,
                other => panic!("unexpected outcome {other:?}"),
            };
            prop_assert!(rank(state) >= rank(previous));
            if previous.is_terminal() {
                prop_assert_eq!(state, previous);
            }
            previous = state;
        }
    }
}
