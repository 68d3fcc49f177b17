//! Location tracks, with their points and plan metadata.

use super::geometry::{
    all_points, changed_endpoint_nodes, changed_points, clip_segments, create_all_points,
    create_metadata, endpoint_nodes, m_ranges, recreate_changed_points,
};
use super::track_number::{node_state, registry_state};
use super::{latest_changes, plan, Plan, PushContext};
use crate::error::{ForAsset, Operation, SyncResult};
use crate::http::HttpClient;
use crate::model::{
    AlignmentRef, AssetRef, LayoutChange, LocationTrack, LocationTrackChange, TrackType,
};
use railsync_protocol::{NodeState, Oid, RegistryLocationTrack, RegistryNodes, RegistryTrackType};
use tracing::debug;

fn registry_track_type(track_type: TrackType) -> RegistryTrackType {
    match track_type {
        TrackType::Main => RegistryTrackType::Main,
        TrackType::Side => RegistryTrackType::Side,
        TrackType::Trap => RegistryTrackType::Trap,
        TrackType::Chord => RegistryTrackType::Chord,
    }
}

fn registry_track<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    track: &LocationTrack,
    id: Option<Oid>,
    nodes: Option<RegistryNodes>,
) -> SyncResult<RegistryLocationTrack> {
    let route_number = ctx.require_oid(AssetRef::track_number(track.track_number_id))?;
    let duplicate_of = match track.duplicate_of {
        Some(duplicate) => ctx.oid_of(AssetRef::location_track(duplicate))?,
        None => None,
    };
    Ok(RegistryLocationTrack {
        id,
        name: track.name.clone(),
        description: track.description.clone(),
        track_type: registry_track_type(track.track_type),
        state: registry_state(track.state),
        route_number,
        owner: Some(track.owner.clone()).filter(|owner| !owner.is_empty()),
        duplicate_of,
        nodecollection: nodes,
    })
}

/// Pushes changed location tracks and returns their OIDs in processing order.
pub fn push_location_tracks<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    changes: Vec<LocationTrackChange>,
) -> SyncResult<Vec<Oid>> {
    latest_changes(changes)
        .iter()
        .map(|change| push_location_track(ctx, change))
        .collect()
}

fn push_location_track<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    change: &LocationTrackChange,
) -> SyncResult<Oid> {
    let track = &change.location_track;
    let asset = AssetRef::location_track(track.id);
    match plan(ctx, asset, change.is_deleted(), |oid| ctx.client.get_location_track(oid))? {
        Plan::Create { reuse } => create(ctx, asset, track, reuse),
        Plan::Update { oid, existing } => update(ctx, asset, change, oid, &existing),
        Plan::Delete { oid, existing } => delete(ctx, asset, track, oid, &existing),
    }
}

fn create<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    track: &LocationTrack,
    reuse: Option<Oid>,
) -> SyncResult<Oid> {
    debug!(%asset, reused = ?reuse, "creating location track");
    let points = all_points(ctx, AlignmentRef::LocationTrack(track.id))?;
    let nodes = endpoint_nodes(&points, node_state(track.state));
    let body = registry_track(ctx, track, reuse.clone(), nodes)?;
    let oid = ctx.client.create_location_track(&body).for_asset(asset)?;
    ctx.remember(asset, reuse.as_ref(), &oid)?;
    create_all_points(ctx, asset, &oid, &points)?;
    create_metadata(ctx, asset, &oid, &track.metadata, &points)?;
    Ok(oid)
}

fn update<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    change: &LocationTrackChange,
    oid: Oid,
    existing: &RegistryLocationTrack,
) -> SyncResult<Oid> {
    let track = &change.location_track;
    let alignment = AlignmentRef::LocationTrack(track.id);
    debug!(%asset, %oid, kms = change.changed_kms.len(), "updating location track");

    let changed = changed_points(ctx, asset, alignment, &change.changed_kms)?;
    let points = all_points(ctx, alignment)?;
    let nodes = changed_endpoint_nodes(
        endpoint_nodes(&points, node_state(track.state)),
        existing.nodecollection.as_ref(),
    );
    let body = registry_track(ctx, track, Some(oid.clone()), nodes)?;
    ctx.client.update_location_track(&body).for_asset(asset)?;

    // metadata on the changed kilometres goes with their points
    recreate_changed_points(ctx, asset, &oid, &change.changed_kms, &changed)?;

    let ranges = m_ranges(&points, &change.changed_kms);
    let segments = clip_segments(&track.metadata, &ranges);
    create_metadata(ctx, asset, &oid, &segments, &points)?;
    Ok(oid)
}

fn delete<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    track: &LocationTrack,
    oid: Oid,
    existing: &RegistryLocationTrack,
) -> SyncResult<Oid> {
    debug!(%asset, %oid, "deleting location track");
    let nodes = existing
        .nodecollection
        .as_ref()
        .map(|nodes| nodes.with_state(NodeState::NotInUse));
    let body = registry_track(ctx, track, Some(oid.clone()), nodes)?;
    ctx.client
        .update_location_track(&body)
        .map_err(|failure| failure.during(Operation::Delete))
        .for_asset(asset)?;
    ctx.client.delete_points(&oid, None).for_asset(asset)?;
    Ok(oid)
}
