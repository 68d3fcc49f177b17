//! Integration tests for the push path against the reference registry.

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use railsync_engine::{
    AlignmentRef, AssetRef, IntId, LayoutBranch, LayoutState, LoopbackClient, MemoryPushHistory,
    Operation, PublicationId, PublicationRef, PushErrorRecord, PushFailure, PushHistoryStore,
    PushId, PushOutcome, PushRecord, PushStatus, RegistrySync, RegistrySyncService, RunLock,
    StoreError, StoreResult, SyncError, PUSH_LOCK,
};
use railsync_protocol::{
    paths, AssetGeometry, AssetKind, Coordinate, HttpMethod, JointNumber, KmNumber, NodeState,
    NodeType, Oid, RegistryAsset, RegistryAssetState, RegistryGeometry, RegistryLayoutState,
    RegistryLocationTrack, RegistryNode, RegistryNodes, RegistryPoint, RegistryRouteNumber,
    RegistryTrackType, TrackMeter,
};
use railsync_registry_server::{Fault, RedrawKind};
use railsync_testkit::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ROUTE_NUMBER_OID: &str = "1.2.3.4.1";
const TRACK_OID: &str = "1.2.3.4.5";

fn registry_point(km: u32, meters: f64) -> RegistryPoint {
    RegistryPoint::new(
        TrackMeter::new(KmNumber(km), meters),
        Coordinate::new(f64::from(km) * 1000.0 + meters, 105.0),
    )
}

fn registry_nodes() -> Option<RegistryNodes> {
    RegistryNodes::endpoints(
        Some(RegistryNode::endpoint(
            NodeType::StartPoint,
            NodeState::InUse,
            registry_point(0, 0.0),
        )),
        Some(RegistryNode::endpoint(
            NodeType::EndPoint,
            NodeState::InUse,
            registry_point(1, 750.0),
        )),
    )
}

/// Registers route number 1 and location track 10 in the registry and maps their OIDs.
fn preload_track(harness: &SyncHarness) -> Oid {
    harness
        .server
        .insert_route_number(RegistryRouteNumber {
            id: Some(Oid::new(ROUTE_NUMBER_OID)),
            name: "001".into(),
            description: String::new(),
            state: RegistryLayoutState::InUse,
            nodecollection: None,
        })
        .unwrap();
    let oid = harness
        .server
        .insert_location_track(RegistryLocationTrack {
            id: Some(Oid::new(TRACK_OID)),
            name: "LT1".into(),
            description: String::new(),
            track_type: RegistryTrackType::Main,
            state: RegistryLayoutState::InUse,
            route_number: Oid::new(ROUTE_NUMBER_OID),
            owner: None,
            duplicate_of: None,
            nodecollection: registry_nodes(),
        })
        .unwrap();
    harness
        .server
        .insert_points(
            &oid,
            vec![registry_point(0, 0.0), registry_point(0, 500.0), registry_point(1, 750.0)],
        )
        .unwrap();
    harness.map_oid(AssetRef::track_number(IntId(1)), ROUTE_NUMBER_OID);
    harness.map_oid(AssetRef::location_track(IntId(10)), TRACK_OID);
    oid
}

fn push(harness: &SyncHarness) -> PushOutcome {
    harness.service().trigger_push(LayoutBranch::Main, false).unwrap()
}

fn completed(outcome: PushOutcome) -> PushStatus {
    match outcome {
        PushOutcome::Completed { status, .. } => status,
        other => panic!("expected a completed push, got {other:?}"),
    }
}

#[test]
fn new_layout_is_created_with_points_and_metadata() {
    let harness = SyncHarness::new();
    harness.geocoder.add_reference_line(1, 0, 2);
    harness.geocoder.add_location_track(10, 0, 2);
    let mut track = location_track(10, "LT1", 1);
    track.metadata = vec![metadata(100.0, 900.0, "plan.xml"), metadata(900.0, 900.5, "sliver.xml")];
    harness.changes.publish(
        PublicationBuilder::new(1)
            .track_number(track_number_change(track_number(1, "001"), &[0, 1]))
            .location_track(location_track_change(track, &[0, 1]))
            .build(),
    );

    assert_eq!(completed(push(&harness)), PushStatus::Successful);

    let route_number = harness.oid(AssetRef::track_number(IntId(1))).unwrap();
    let track_oid = harness.oid(AssetRef::location_track(IntId(10))).unwrap();
    let registered = harness.server.location_track(&track_oid).unwrap();
    assert_eq!(registered.route_number, route_number);
    let nodes = registered.nodecollection.unwrap();
    assert_eq!(nodes.nodes.len(), 2);
    assert!(nodes.nodes.iter().all(|n| n.state == NodeState::InUse));

    // one call per kilometre and alignment
    assert_eq!(
        harness
            .server
            .requests_matching(HttpMethod::Post, paths::POINTS)
            .len(),
        4
    );
    assert_eq!(harness.server.points(&route_number).len(), 8);
    assert_eq!(harness.server.points(&track_oid).len(), 8);

    let metadata: Vec<_> = harness
        .server
        .assets()
        .into_iter()
        .filter(|a| a.kind == AssetKind::LocationTrackMetadata)
        .collect();
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0].locations[0].location_track, track_oid);

    assert_eq!(
        harness.server.redraws(),
        vec![
            (RedrawKind::RouteNumbers, vec![route_number]),
            (RedrawKind::LocationTracks, vec![track_oid]),
        ]
    );

    let service = harness.service();
    assert_eq!(
        service.push_status(PublicationId(1)).unwrap(),
        Some(PushStatus::Successful)
    );
    assert!(matches!(
        service.trigger_push(LayoutBranch::Main, false).unwrap(),
        PushOutcome::NothingToPush
    ));
}

#[test]
fn deleted_location_track_is_retired_in_place() {
    let harness = SyncHarness::new();
    let oid = preload_track(&harness);
    let mut track = location_track(10, "LT1", 1);
    track.state = LayoutState::Deleted;
    harness.changes.publish(
        PublicationBuilder::new(1)
            .location_track(location_track_change(track, &[0]))
            .build(),
    );

    assert_eq!(completed(push(&harness)), PushStatus::Successful);

    assert_eq!(
        harness
            .server
            .requests_matching(HttpMethod::Get, &paths::location_track(&oid))
            .len(),
        1
    );
    let registered = harness.server.location_track(&oid).unwrap();
    assert_eq!(registered.state, RegistryLayoutState::Deleted);
    let nodes = registered.nodecollection.unwrap();
    assert_eq!(nodes.nodes.len(), 2);
    assert!(nodes.nodes.iter().all(|n| n.state == NodeState::NotInUse));

    let deletes: Vec<String> = harness
        .server
        .requests_matching(HttpMethod::Delete, paths::POINTS)
        .into_iter()
        .map(|r| r.path)
        .collect();
    assert_eq!(deletes, vec![paths::points(&oid, None)]);
    assert!(harness.server.points(&oid).is_empty());
    assert_eq!(
        harness.oid(AssetRef::location_track(IntId(10))),
        Some(Oid::new(TRACK_OID))
    );
}

#[test]
fn update_replaces_only_changed_kilometres() {
    let harness = SyncHarness::new();
    let oid = preload_track(&harness);
    harness.geocoder.add_location_track(10, 0, 2);
    harness.changes.publish(
        PublicationBuilder::new(1)
            .location_track(location_track_change(location_track(10, "LT1 renamed", 1), &[1]))
            .build(),
    );

    assert_eq!(completed(push(&harness)), PushStatus::Successful);

    // the kilometre is cleared, then created again
    let deletes: Vec<String> = harness
        .server
        .requests_matching(HttpMethod::Delete, paths::POINTS)
        .into_iter()
        .map(|r| r.path)
        .collect();
    assert_eq!(deletes, vec![paths::points(&oid, Some(KmNumber(1)))]);
    assert_eq!(
        harness
            .server
            .requests_matching(HttpMethod::Post, paths::POINTS)
            .len(),
        1
    );
    assert!(harness
        .server
        .requests_matching(HttpMethod::Put, paths::POINTS)
        .is_empty());

    let points = harness.server.points(&oid);
    assert!(points.contains(&registry_point(0, 500.0)));
    assert_eq!(points.iter().filter(|p| p.km_m.km() == KmNumber(1)).count(), 4);
    assert_eq!(harness.server.location_track(&oid).unwrap().name, "LT1 renamed");
}

/// Start and end address of every metadata stretch in the registry, sorted.
fn metadata_stretches(harness: &SyncHarness) -> Vec<(TrackMeter, TrackMeter)> {
    let mut stretches: Vec<_> = harness
        .server
        .assets()
        .into_iter()
        .filter(|a| a.kind == AssetKind::LocationTrackMetadata)
        .map(|a| {
            let nodes = &a.locations[0].nodecollection;
            (
                nodes.node(NodeType::StartPoint).unwrap().point.km_m,
                nodes.node(NodeType::EndPoint).unwrap().point.km_m,
            )
        })
        .collect();
    stretches.sort();
    stretches
}

fn address(km: u32, meters: f64) -> TrackMeter {
    TrackMeter::new(KmNumber(km), meters)
}

#[test]
fn metadata_is_resplit_on_changed_kilometres() {
    let harness = SyncHarness::new();
    harness.geocoder.add_reference_line(1, 0, 2);
    harness.geocoder.add_location_track(10, 0, 2);
    let mut track = location_track(10, "LT1", 1);
    track.metadata = vec![metadata(100.0, 1700.0, "plan.xml")];
    harness.changes.publish(
        PublicationBuilder::new(1)
            .track_number(track_number_change(track_number(1, "001"), &[0, 1]))
            .location_track(location_track_change(track.clone(), &[0, 1]))
            .build(),
    );
    assert_eq!(completed(push(&harness)), PushStatus::Successful);
    assert_eq!(metadata_stretches(&harness), vec![(address(0, 100.0), address(1, 700.0))]);

    harness.changes.publish(
        PublicationBuilder::new(2)
            .location_track(location_track_change(track.clone(), &[0]))
            .build(),
    );
    assert_eq!(completed(push(&harness)), PushStatus::Successful);
    // the km 0 piece is pushed up to the post of km 1, the rest stays
    assert_eq!(
        metadata_stretches(&harness),
        vec![
            (address(0, 100.0), address(1, 0.0)),
            (address(1, 0.0), address(1, 700.0)),
        ]
    );
    let track_oid = harness.oid(AssetRef::location_track(IntId(10))).unwrap();
    let creates: Vec<_> = harness
        .server
        .requests_matching(HttpMethod::Post, paths::ASSETS)
        .into_iter()
        .filter(|r| r.path == paths::ASSETS)
        .collect();
    assert_eq!(creates.len(), 2);

    harness.changes.publish(
        PublicationBuilder::new(3)
            .location_track(location_track_change(track, &[1]))
            .build(),
    );
    assert_eq!(completed(push(&harness)), PushStatus::Successful);
    assert_eq!(
        metadata_stretches(&harness),
        vec![
            (address(0, 100.0), address(1, 0.0)),
            (address(1, 0.0), address(1, 700.0)),
        ]
    );
    assert_eq!(harness.server.points(&track_oid).len(), 8);
}

#[test]
fn geocoding_failure_fails_update_without_deleting_points() {
    let harness = SyncHarness::new();
    harness.geocoder.add_reference_line(1, 0, 2);
    harness.geocoder.add_location_track(10, 0, 2);
    harness.changes.publish(
        PublicationBuilder::new(1)
            .track_number(track_number_change(track_number(1, "001"), &[0, 1]))
            .location_track(location_track_change(location_track(10, "LT1", 1), &[0, 1]))
            .build(),
    );
    assert_eq!(completed(push(&harness)), PushStatus::Successful);
    let track_oid = harness.oid(AssetRef::location_track(IntId(10))).unwrap();

    harness
        .geocoder
        .fail(AlignmentRef::LocationTrack(IntId(10)));
    harness.changes.publish(
        PublicationBuilder::new(2)
            .location_track(location_track_change(location_track(10, "LT1", 1), &[0, 1]))
            .build(),
    );
    let service = harness.service();
    assert!(matches!(
        service.trigger_push(LayoutBranch::Main, false),
        Err(SyncError::Collaborator(_))
    ));

    assert!(harness
        .server
        .requests_matching(HttpMethod::Delete, paths::POINTS)
        .is_empty());
    assert_eq!(harness.server.points(&track_oid).len(), 8);
    assert_eq!(
        service.push_status(PublicationId(2)).unwrap(),
        Some(PushStatus::Failed)
    );
}

#[test]
fn switch_update_touches_only_changed_joints() {
    let harness = SyncHarness::new();
    preload_track(&harness);
    harness.geocoder.add_reference_line(1, 0, 2);
    let asset_oid = harness
        .server
        .insert_asset(RegistryAsset {
            id: Some(Oid::new("1.2.3.4.20")),
            kind: AssetKind::Turnout,
            state: RegistryAssetState::InUse,
            properties: Vec::new(),
            locations: Vec::new(),
            geometries: vec![
                AssetGeometry {
                    joint_number: JointNumber(1),
                    geometry: RegistryGeometry::point(Coordinate::new(100.0, 10.0)),
                },
                AssetGeometry {
                    joint_number: JointNumber(5),
                    geometry: RegistryGeometry::point(Coordinate::new(120.0, 10.0)),
                },
            ],
        })
        .unwrap();
    harness.map_oid(AssetRef::switch(IntId(20)), asset_oid.as_str());

    let switch = switch(
        20,
        "V001",
        vec![
            joint(1, 100.0, 10.0, &[(10, 1)]),
            joint(2, 150.0, 10.0, &[(10, 1)]),
        ],
    );
    harness.changes.publish(
        PublicationBuilder::new(1)
            .switch(switch_change(switch, &[2, 5]))
            .build(),
    );

    assert_eq!(completed(push(&harness)), PushStatus::Successful);

    let server = &harness.server;
    assert_eq!(
        server
            .requests_matching(HttpMethod::Post, &paths::asset_part(&asset_oid, "locations"))
            .len(),
        1
    );
    assert!(server
        .requests_matching(HttpMethod::Put, &paths::asset_part(&asset_oid, "state"))
        .is_empty());

    let asset = server.asset(&asset_oid).unwrap();
    assert_eq!(asset.locations.len(), 1);
    assert_eq!(asset.locations[0].location_track, Oid::new(TRACK_OID));
    let located: Vec<_> = asset.locations[0]
        .nodecollection
        .nodes
        .iter()
        .map(|n| n.joint_number)
        .collect();
    assert_eq!(located, vec![Some(JointNumber(2))]);
    let node = &asset.locations[0].nodecollection.nodes[0];
    assert_eq!(node.point.km_m, TrackMeter::new(KmNumber(0), 150.0));

    let geometries: Vec<_> = asset.geometries.iter().map(|g| g.joint_number).collect();
    assert_eq!(geometries, vec![JointNumber(1), JointNumber(2)]);
    assert!(asset.property("name").is_some());
}

#[test]
fn new_switch_gets_locations_and_geometries() {
    let harness = SyncHarness::new();
    preload_track(&harness);
    harness.geocoder.add_reference_line(1, 0, 2);
    let switch = switch(
        21,
        "V002",
        vec![joint(1, 200.0, 10.0, &[(10, 1)]), joint(2, 230.0, 10.0, &[(10, 1), (99, 1)])],
    );
    harness.changes.publish(
        PublicationBuilder::new(1)
            .switch(switch_change(switch, &[1, 2]))
            .build(),
    );

    assert_eq!(completed(push(&harness)), PushStatus::Successful);

    let oid = harness.oid(AssetRef::switch(IntId(21))).unwrap();
    let asset = harness.server.asset(&oid).unwrap();
    assert_eq!(asset.kind, AssetKind::Turnout);
    // track 99 has no OID and is skipped
    assert_eq!(asset.locations.len(), 1);
    assert_eq!(asset.locations[0].nodecollection.nodes.len(), 2);
    assert_eq!(asset.geometries.len(), 2);
}

#[test]
fn forgotten_oid_is_reused_on_create() {
    let harness = SyncHarness::new();
    let forgotten = "1.2.246.578.1.77";
    harness.map_oid(AssetRef::track_number(IntId(1)), forgotten);
    harness.changes.publish(
        PublicationBuilder::new(1)
            .track_number(track_number_change(track_number(1, "001"), &[0]))
            .build(),
    );

    assert_eq!(completed(push(&harness)), PushStatus::Successful);

    let oid = Oid::new(forgotten);
    assert_eq!(
        harness
            .server
            .requests_matching(HttpMethod::Get, &paths::route_number(&oid))
            .len(),
        1
    );
    assert_eq!(harness.server.route_number(&oid).unwrap().name, "001");
    assert_eq!(harness.oid(AssetRef::track_number(IntId(1))), Some(oid));
}

#[test]
fn timeout_ends_push_with_connection_issue() {
    let harness = SyncHarness::new();
    harness.changes.publish(
        PublicationBuilder::new(1)
            .track_number(track_number_change(track_number(1, "001"), &[0]))
            .build(),
    );
    harness
        .server
        .fail(HttpMethod::Post, paths::ROUTE_NUMBERS, Fault::Timeout);

    let service = harness.service();
    assert_eq!(completed(push(&harness)), PushStatus::ConnectionIssue);
    assert_eq!(
        service.push_status(PublicationId(1)).unwrap(),
        Some(PushStatus::ConnectionIssue)
    );
    assert!(service.push_error(PublicationId(1)).unwrap().is_some());

    // a connection issue does not block the next run
    harness.server.clear_faults();
    assert_eq!(
        completed(service.trigger_push(LayoutBranch::Main, false).unwrap()),
        PushStatus::Successful
    );
}

#[test]
fn rejected_call_fails_push_until_retried() {
    let harness = SyncHarness::new();
    harness.changes.publish(
        PublicationBuilder::new(1)
            .track_number(track_number_change(track_number(1, "001"), &[0]))
            .build(),
    );
    harness.server.fail_times(
        HttpMethod::Post,
        paths::ROUTE_NUMBERS,
        Fault::Status {
            status: 400,
            body: "name already taken".into(),
        },
        1,
    );

    let service = harness.service();
    let PushOutcome::Completed { push_id, status } =
        service.trigger_push(LayoutBranch::Main, false).unwrap()
    else {
        panic!("push did not complete");
    };
    assert_eq!(status, PushStatus::Failed);
    let error = service.push_error(PublicationId(1)).unwrap().unwrap();
    assert_eq!(error.push_id, push_id);
    assert_eq!(error.operation, Operation::Create);
    assert_eq!(error.asset, AssetRef::track_number(IntId(1)));
    assert_eq!(error.message, "name already taken");

    assert!(matches!(
        service.trigger_push(LayoutBranch::Main, false).unwrap(),
        PushOutcome::PreviousPushFailed
    ));
    assert_eq!(
        completed(service.trigger_push(LayoutBranch::Main, true).unwrap()),
        PushStatus::Successful
    );
}

/// Push history whose next error insert fails.
#[derive(Default)]
struct FailingErrorInsert {
    inner: MemoryPushHistory,
    fail_next: AtomicBool,
}

impl PushHistoryStore for FailingErrorInsert {
    fn start_push(
        &self,
        branch: LayoutBranch,
        publications: &[PublicationRef],
    ) -> StoreResult<PushId> {
        self.inner.start_push(branch, publications)
    }

    fn update_status(&self, push_id: PushId, status: PushStatus) -> StoreResult<()> {
        self.inner.update_status(push_id, status)
    }

    fn insert_error(&self, push_id: PushId, failure: &PushFailure) -> StoreResult<PushErrorRecord> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("disk full".into()));
        }
        self.inner.insert_error(push_id, failure)
    }

    fn push(&self, push_id: PushId) -> StoreResult<Option<PushRecord>> {
        self.inner.push(push_id)
    }

    fn latest_push(&self, branch: LayoutBranch) -> StoreResult<Option<PushRecord>> {
        self.inner.latest_push(branch)
    }

    fn latest_successful_publication_moment(
        &self,
        branch: LayoutBranch,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        self.inner.latest_successful_publication_moment(branch)
    }

    fn latest_error_for_publication(
        &self,
        publication_id: PublicationId,
    ) -> StoreResult<Option<PushErrorRecord>> {
        self.inner.latest_error_for_publication(publication_id)
    }

    fn status_for_publication(
        &self,
        publication_id: PublicationId,
    ) -> StoreResult<Option<PushStatus>> {
        self.inner.status_for_publication(publication_id)
    }

    fn is_publication_pushed(&self, publication_id: PublicationId) -> StoreResult<bool> {
        self.inner.is_publication_pushed(publication_id)
    }

    fn resolve_stuck_pushes(&self) -> StoreResult<Vec<(PushId, PushStatus)>> {
        self.inner.resolve_stuck_pushes()
    }
}

#[test]
fn history_failure_does_not_leave_push_running() {
    let harness = SyncHarness::new();
    harness.geocoder.add_reference_line(1, 0, 1);
    harness.changes.publish(
        PublicationBuilder::new(1)
            .track_number(track_number_change(track_number(1, "001"), &[0]))
            .build(),
    );
    harness
        .server
        .fail_times(HttpMethod::Post, paths::ROUTE_NUMBERS, Fault::status(400), 1);
    let history = Arc::new(FailingErrorInsert::default());
    history.fail_next.store(true, Ordering::SeqCst);
    let shared: Arc<dyn PushHistoryStore> = history.clone();
    let mut components = harness.components().clone();
    components.history = shared;
    let service = RegistrySync::new(
        LoopbackClient::new(Arc::clone(&harness.server)),
        harness.config().clone(),
        components,
    )
    .unwrap();

    assert!(matches!(
        service.trigger_push(LayoutBranch::Main, false),
        Err(SyncError::Store(_))
    ));
    let record = history.latest_push(LayoutBranch::Main).unwrap().unwrap();
    assert_eq!(record.status, PushStatus::Failed);

    assert_eq!(
        completed(service.trigger_push(LayoutBranch::Main, true).unwrap()),
        PushStatus::Successful
    );
}

#[test]
fn offline_registry_skips_push_without_record() {
    let harness = SyncHarness::new();
    harness.changes.publish(PublicationBuilder::new(1).build());
    harness.server.set_online(false);

    let service = harness.service();
    assert!(matches!(
        service.trigger_push(LayoutBranch::Main, false).unwrap(),
        PushOutcome::Offline
    ));
    assert!(harness
        .components()
        .history
        .latest_push(LayoutBranch::Main)
        .unwrap()
        .is_none());
    assert_eq!(service.push_status(PublicationId(1)).unwrap(), None);
}

#[test]
fn held_lock_prevents_second_run() {
    let harness = SyncHarness::new();
    harness.changes.publish(PublicationBuilder::new(1).build());
    let lock = &harness.components().lock;
    let token = lock
        .try_lock(PUSH_LOCK, Duration::ZERO, Duration::from_secs(60))
        .unwrap()
        .unwrap();

    assert!(matches!(push(&harness), PushOutcome::LockBusy));
    assert!(harness
        .components()
        .history
        .latest_push(LayoutBranch::Main)
        .unwrap()
        .is_none());

    lock.unlock(PUSH_LOCK, &token).unwrap();
    assert_eq!(completed(push(&harness)), PushStatus::Successful);
}

#[test]
fn concurrent_triggers_run_one_push_at_a_time() {
    let harness = SyncHarness::new();
    harness.changes.publish(
        PublicationBuilder::new(1)
            .track_number(track_number_change(track_number(1, "001"), &[0]))
            .build(),
    );

    let service = harness.service();
    let outcomes: Vec<PushOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| service.trigger_push(LayoutBranch::Main, false).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, PushOutcome::Completed { .. }))
        .count();
    assert_eq!(completed, 1);
    assert!(outcomes.iter().all(|o| matches!(
        o,
        PushOutcome::Completed { .. } | PushOutcome::LockBusy | PushOutcome::NothingToPush
    )));
    assert_eq!(
        harness
            .server
            .requests_matching(HttpMethod::Post, paths::ROUTE_NUMBERS)
            .iter()
            .filter(|r| r.path == paths::ROUTE_NUMBERS)
            .count(),
        1
    );
}

#[test]
fn interrupted_push_is_failed_on_startup() {
    let harness = SyncHarness::new();
    let publication = PublicationBuilder::new(1).build();
    let push_id = harness
        .components()
        .history
        .start_push(LayoutBranch::Main, &[publication.reference()])
        .unwrap();
    harness.changes.publish(publication);

    let service = harness.service();
    let record = harness.components().history.push(push_id).unwrap().unwrap();
    assert_eq!(record.status, PushStatus::Failed);
    assert!(matches!(
        service.trigger_push(LayoutBranch::Main, false).unwrap(),
        PushOutcome::PreviousPushFailed
    ));
}

#[test]
fn sqlite_backed_push_survives_restart() {
    let harness = SyncHarness::with_sqlite();
    harness.geocoder.add_reference_line(1, 0, 1);
    harness.changes.publish(
        PublicationBuilder::new(1)
            .track_number(track_number_change(track_number(1, "001"), &[0]))
            .build(),
    );
    assert_eq!(completed(push(&harness)), PushStatus::Successful);

    let restarted = harness.service();
    assert_eq!(
        restarted.push_status(PublicationId(1)).unwrap(),
        Some(PushStatus::Successful)
    );
    assert!(matches!(
        restarted.trigger_push(LayoutBranch::Main, false).unwrap(),
        PushOutcome::NothingToPush
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn deleted_route_numbers_are_pushed_first(changes in track_number_changes_strategy(6)) {
        let harness = SyncHarness::new();
        let mut builder = PublicationBuilder::new(1);
        for change in changes.clone() {
            builder = builder.track_number(change);
        }
        harness.changes.publish(builder.build());

        prop_assert_eq!(completed(push(&harness)), PushStatus::Successful);

        let states: Vec<String> = harness
            .server
            .requests_matching(HttpMethod::Post, paths::ROUTE_NUMBERS)
            .into_iter()
            .filter(|r| r.path == paths::ROUTE_NUMBERS)
            .filter_map(|r| r.body?.get("state")?.as_str().map(str::to_string))
            .collect();
        prop_assert_eq!(states.len(), changes.len());
        let first_kept = states.iter().position(|s| s != "DELETED").unwrap_or(states.len());
        prop_assert!(states[first_kept..].iter().all(|s| s != "DELETED"));
    }
}
