//! Track numbers, pushed as registry route numbers.

use super::geometry::{
    all_points, changed_endpoint_nodes, changed_points, create_all_points, endpoint_nodes,
    replace_changed_points,
};
use super::{latest_changes, plan, Plan, PushContext};
use crate::error::{ForAsset, Operation, SyncResult};
use crate::http::HttpClient;
use crate::model::{
    AlignmentRef, AssetRef, LayoutChange, LayoutState, TrackNumber, TrackNumberChange,
};
use railsync_protocol::{NodeState, Oid, RegistryLayoutState, RegistryNodes, RegistryRouteNumber};
use tracing::debug;

pub(super) fn registry_state(state: LayoutState) -> RegistryLayoutState {
    match state {
        LayoutState::InUse => RegistryLayoutState::InUse,
        LayoutState::NotInUse => RegistryLayoutState::NotInUse,
        LayoutState::Deleted => RegistryLayoutState::Deleted,
    }
}

pub(super) fn node_state(state: LayoutState) -> NodeState {
    match state {
        LayoutState::InUse => NodeState::InUse,
        LayoutState::NotInUse | LayoutState::Deleted => NodeState::NotInUse,
    }
}

fn route_number(
    track_number: &TrackNumber,
    id: Option<Oid>,
    nodes: Option<RegistryNodes>,
) -> RegistryRouteNumber {
    RegistryRouteNumber {
        id,
        name: track_number.number.clone(),
        description: track_number.description.clone(),
        state: registry_state(track_number.state),
        nodecollection: nodes,
    }
}

/// Pushes changed track numbers and returns their OIDs in processing order.
pub fn push_track_numbers<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    changes: Vec<TrackNumberChange>,
) -> SyncResult<Vec<Oid>> {
    latest_changes(changes)
        .iter()
        .map(|change| push_track_number(ctx, change))
        .collect()
}

fn push_track_number<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    change: &TrackNumberChange,
) -> SyncResult<Oid> {
    let track_number = &change.track_number;
    let asset = AssetRef::track_number(track_number.id);
    match plan(ctx, asset, change.is_deleted(), |oid| ctx.client.get_route_number(oid))? {
        Plan::Create { reuse } => create(ctx, asset, track_number, reuse),
        Plan::Update { oid, existing } => update(ctx, asset, change, oid, &existing),
        Plan::Delete { oid, existing } => delete(ctx, asset, track_number, oid, &existing),
    }
}

fn create<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    track_number: &TrackNumber,
    reuse: Option<Oid>,
) -> SyncResult<Oid> {
    debug!(%asset, reused = ?reuse, "creating route number");
    let points = all_points(ctx, AlignmentRef::ReferenceLine(track_number.id))?;
    let nodes = endpoint_nodes(&points, node_state(track_number.state));
    let oid = ctx
        .client
        .create_route_number(&route_number(track_number, reuse.clone(), nodes))
        .for_asset(asset)?;
    ctx.remember(asset, reuse.as_ref(), &oid)?;
    create_all_points(ctx, asset, &oid, &points)?;
    Ok(oid)
}

fn update<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    change: &TrackNumberChange,
    oid: Oid,
    existing: &RegistryRouteNumber,
) -> SyncResult<Oid> {
    let track_number = &change.track_number;
    let alignment = AlignmentRef::ReferenceLine(track_number.id);
    debug!(%asset, %oid, kms = change.changed_kms.len(), "updating route number");

    let changed = changed_points(ctx, asset, alignment, &change.changed_kms)?;
    let points = all_points(ctx, alignment)?;
    let nodes = changed_endpoint_nodes(
        endpoint_nodes(&points, node_state(track_number.state)),
        existing.nodecollection.as_ref(),
    );
    ctx.client
        .update_route_number(&route_number(track_number, Some(oid.clone()), nodes))
        .for_asset(asset)?;
    replace_changed_points(ctx, asset, &oid, &change.changed_kms, &changed)?;
    Ok(oid)
}

fn delete<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    track_number: &TrackNumber,
    oid: Oid,
    existing: &RegistryRouteNumber,
) -> SyncResult<Oid> {
    debug!(%asset, %oid, "deleting route number");
    let nodes = existing
        .nodecollection
        .as_ref()
        .map(|nodes| nodes.with_state(NodeState::NotInUse));
    ctx.client
        .update_route_number(&route_number(track_number, Some(oid.clone()), nodes))
        .map_err(|failure| failure.during(Operation::Delete))
        .for_asset(asset)?;
    ctx.client.delete_points(&oid, None).for_asset(asset)?;
    Ok(oid)
}
