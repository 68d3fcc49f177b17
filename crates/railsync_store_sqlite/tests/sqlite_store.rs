//! Conformance tests for the SQLite-backed stores.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use railsync_engine::{
    AssetRef, AssetType, BulkTransfer, BulkTransferState, BulkTransferStore, DesignId,
    ErrorCategory, IdentifierStore, IntId, LayoutBranch, Operation, PublicationId, PublicationRef,
    PushFailure, PushHistoryStore, PushStatus, RegistryFailure, RunLock, SplitId, StoreError,
};
use railsync_protocol::{BulkTransferExternalId, Oid};
use railsync_store_sqlite::{SqliteStore, SqliteStoreConfig};
use std::time::Duration;
use tempfile::TempDir;

fn publication(id: i64, hour: u32) -> PublicationRef {
    PublicationRef {
        id: PublicationId(id),
        published_at: Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap(),
    }
}

fn rejected(asset: AssetRef) -> PushFailure {
    PushFailure::new(
        asset,
        RegistryFailure::Rejected {
            category: ErrorCategory::Location,
            operation: Operation::Create,
            status: 400,
            body: "kmM out of range".into(),
        },
    )
}

fn open(dir: &TempDir) -> SqliteStore {
    SqliteStore::open(&SqliteStoreConfig::new(dir.path().join("state/sync.db"))).unwrap()
}

#[test]
fn push_history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let push_id = {
        let store = open(&dir);
        let id = store
            .start_push(LayoutBranch::Main, &[publication(1, 8), publication(2, 9)])
            .unwrap();
        store.update_status(id, PushStatus::InProgressMValues).unwrap();
        store.update_status(id, PushStatus::Successful).unwrap();
        id
    };

    let store = open(&dir);
    let record = store.push(push_id).unwrap().unwrap();
    assert_eq!(record.status, PushStatus::Successful);
    assert!(record.ended_at.is_some());
    assert_eq!(record.publications, vec![publication(1, 8), publication(2, 9)]);
    assert_eq!(
        store
            .latest_successful_publication_moment(LayoutBranch::Main)
            .unwrap(),
        Some(publication(2, 9).published_at)
    );
    assert!(store.is_publication_pushed(PublicationId(2)).unwrap());
}

#[test]
fn terminal_status_is_final() {
    let store = SqliteStore::in_memory().unwrap();
    let id = store.start_push(LayoutBranch::Main, &[publication(1, 8)]).unwrap();
    store.update_status(id, PushStatus::ConnectionIssue).unwrap();

    let err = store.update_status(id, PushStatus::Successful).unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
    let err = store
        .update_status(railsync_engine::PushId(99), PushStatus::Failed)
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn errors_are_found_through_publications() {
    let store = SqliteStore::in_memory().unwrap();
    let first = store.start_push(LayoutBranch::Main, &[publication(1, 8)]).unwrap();
    store.update_status(first, PushStatus::Failed).unwrap();
    let asset = AssetRef::location_track(IntId(7));
    store.insert_error(first, &rejected(asset)).unwrap();

    let retry = store
        .start_push(LayoutBranch::Main, &[publication(1, 8), publication(3, 10)])
        .unwrap();
    store.update_status(retry, PushStatus::Failed).unwrap();
    let latest = store.insert_error(retry, &rejected(asset)).unwrap();

    let found = store
        .latest_error_for_publication(PublicationId(1))
        .unwrap()
        .unwrap();
    assert_eq!(found, latest);
    assert_eq!(found.category, ErrorCategory::Location);
    assert_eq!(found.operation, Operation::Create);
    assert_eq!(found.message, "kmM out of range");
    assert_eq!(
        store.status_for_publication(PublicationId(3)).unwrap(),
        Some(PushStatus::Failed)
    );
    assert!(store
        .latest_error_for_publication(PublicationId(4))
        .unwrap()
        .is_none());
}

#[test]
fn stuck_pushes_are_resolved() {
    let store = SqliteStore::in_memory().unwrap();
    let interrupted = store.start_push(LayoutBranch::Main, &[publication(1, 8)]).unwrap();
    let redrawing = store
        .start_push(LayoutBranch::Design(DesignId(4)), &[publication(2, 9)])
        .unwrap();
    store
        .update_status(redrawing, PushStatus::InProgressMValues)
        .unwrap();

    let mut resolved = store.resolve_stuck_pushes().unwrap();
    resolved.sort_by_key(|(id, _)| *id);
    assert_eq!(
        resolved,
        vec![
            (interrupted, PushStatus::Failed),
            (redrawing, PushStatus::Successful)
        ]
    );
    assert!(store.resolve_stuck_pushes().unwrap().is_empty());
    assert_eq!(
        store
            .latest_push(LayoutBranch::Design(DesignId(4)))
            .unwrap()
            .unwrap()
            .id,
        redrawing
    );
}

#[test]
fn identifiers_are_written_once() {
    let store = SqliteStore::in_memory().unwrap();
    let asset = AssetRef::switch(IntId(11));
    let oid = Oid::new("1.2.246.578.3.10002.188907");
    store.insert(LayoutBranch::Main, asset, &oid).unwrap();
    store.insert(LayoutBranch::Main, asset, &oid).unwrap();

    let err = store
        .insert(LayoutBranch::Main, asset, &Oid::new("1.2.3"))
        .unwrap_err();
    assert!(matches!(err, StoreError::IdentifierConflict(_)));
    let err = store
        .insert(LayoutBranch::Main, AssetRef::switch(IntId(12)), &oid)
        .unwrap_err();
    assert!(matches!(err, StoreError::IdentifierConflict(_)));

    // branches are isolated
    let design = LayoutBranch::Design(DesignId(1));
    assert!(store.external_id(design, asset).unwrap().is_none());
    store.insert(design, AssetRef::switch(IntId(12)), &oid).unwrap();

    assert_eq!(
        store
            .internal_id(LayoutBranch::Main, AssetType::Switch, &oid)
            .unwrap(),
        Some(IntId(11))
    );
    let mapped = store
        .external_ids(LayoutBranch::Main, AssetType::Switch, &[IntId(11), IntId(12)])
        .unwrap();
    assert_eq!(mapped.len(), 1);
    assert_eq!(mapped[&IntId(11)], oid);
}

#[test]
fn bulk_transfer_rows_round_trip_and_finish() {
    let store = SqliteStore::in_memory().unwrap();
    let mut transfer = BulkTransfer::pending(SplitId(3), LayoutBranch::Main, true);
    store.save(&transfer).unwrap();

    transfer.state = BulkTransferState::InProgress;
    transfer.external_id = Some(BulkTransferExternalId(77));
    transfer.assets_total = Some(120);
    transfer.assets_moved = Some(40);
    transfer.started_at = Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
    store.save(&transfer).unwrap();
    assert_eq!(store.get(SplitId(3)).unwrap(), Some(transfer.clone()));

    transfer.state = BulkTransferState::Successful;
    transfer.updated_at = Utc::now();
    store.save(&transfer).unwrap();
    // rewriting the same finished row is allowed
    store.save(&transfer).unwrap();

    let mut reopened = transfer.clone();
    reopened.state = BulkTransferState::Failed;
    let err = store.save(&reopened).unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    store
        .save(&BulkTransfer::pending(SplitId(1), LayoutBranch::Main, false))
        .unwrap();
    store
        .save(&BulkTransfer::pending(
            SplitId(2),
            LayoutBranch::Design(DesignId(5)),
            false,
        ))
        .unwrap();
    let main: Vec<_> = store
        .list(LayoutBranch::Main)
        .unwrap()
        .into_iter()
        .map(|t| t.split_id)
        .collect();
    assert_eq!(main, vec![SplitId(1), SplitId(3)]);
}

#[test]
fn run_lock_is_shared_across_connections() {
    let dir = TempDir::new().unwrap();
    let first = open(&dir).run_lock();
    let second = open(&dir).run_lock();
    let lease = Duration::from_secs(60);

    let token = first.try_lock("registry-push", Duration::ZERO, lease).unwrap().unwrap();
    assert!(second
        .try_lock("registry-push", Duration::from_millis(100), lease)
        .unwrap()
        .is_none());
    first.unlock("registry-push", &token).unwrap();
    assert!(second
        .try_lock("registry-push", Duration::ZERO, lease)
        .unwrap()
        .is_some());
}

fn any_status() -> impl Strategy<Value = PushStatus> {
    prop_oneof![
        Just(PushStatus::InProgress),
        Just(PushStatus::InProgressMValues),
        Just(PushStatus::Successful),
        Just(PushStatus::Failed),
        Just(PushStatus::ConnectionIssue),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn stored_status_only_moves_forward(steps in prop::collection::vec(any_status(), 1..6)) {
        let store = SqliteStore::in_memory().unwrap();
        let id = store.start_push(LayoutBranch::Main, &[publication(1, 8)]).unwrap();
        let mut expected = PushStatus::InProgress;
        for next in steps {
            let allowed = expected.can_advance_to(next);
            prop_assert_eq!(store.update_status(id, next).is_ok(), allowed);
            if allowed {
                expected = next;
            }
            let record = store.push(id).unwrap().unwrap();
            prop_assert_eq!(record.status, expected);
            prop_assert_eq!(record.ended_at.is_some(), expected.is_terminal());
        }
    }
}
