//! Switches, pushed as registry turnout assets.
//!
//! A switch is addressed through its joints: every joint lies on one or more
//! location tracks, and each such track gets an asset location holding the
//! joint nodes addressed on it. Updates only touch the changed joints.

use super::{latest_changes, plan, Plan, PushContext};
use crate::error::{ForAsset, Operation, SyncResult};
use crate::http::HttpClient;
use crate::model::{AssetRef, LayoutChange, Switch, SwitchChange, SwitchStateCategory};
use railsync_protocol::{
    AssetGeometry, AssetKind, AssetLocation, AssetProperty, JointNumber, Oid, RegistryAsset,
    RegistryAssetState, RegistryGeometry, RegistryNode, RegistryNodes, RegistryPoint,
};
use std::collections::BTreeSet;
use tracing::debug;

fn asset_state(switch: &Switch) -> RegistryAssetState {
    match switch.state_category {
        SwitchStateCategory::Exists => RegistryAssetState::InUse,
        SwitchStateCategory::NotExisting => RegistryAssetState::Deleted,
    }
}

fn properties(switch: &Switch) -> Vec<AssetProperty> {
    let mut properties = vec![
        AssetProperty::string("name", switch.name.clone()),
        AssetProperty::enumeration("turnout_type", switch.type_name.clone()),
        AssetProperty::string("owner", switch.owner.clone()),
    ];
    if let Some(trap_point) = switch.trap_point {
        let value = if trap_point { "yes" } else { "no" };
        properties.push(AssetProperty::enumeration("trap_point", value));
    }
    properties
}

/// Locations of the selected joints, one per pushed location track.
fn locations<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    switch: &Switch,
    include: impl Fn(JointNumber) -> bool,
) -> SyncResult<Vec<AssetLocation>> {
    let mut by_track: Vec<(Oid, Vec<RegistryNode>)> = Vec::new();
    for joint in switch.joints.iter().filter(|j| include(j.number)) {
        for link in &joint.tracks {
            let Some(track_oid) = ctx.oid_of(AssetRef::location_track(link.location_track_id))?
            else {
                continue;
            };
            let Some(address) =
                ctx.geocoder
                    .address_for_point(ctx.branch, link.track_number_id, joint.location)?
            else {
                continue;
            };
            let node = RegistryNode::joint(joint.number, RegistryPoint::new(address, joint.location));
            match by_track.iter_mut().find(|(oid, _)| *oid == track_oid) {
                Some((_, nodes)) => nodes.push(node),
                None => by_track.push((track_oid, vec![node])),
            }
        }
    }
    Ok(by_track
        .into_iter()
        .enumerate()
        .map(|(index, (location_track, nodes))| AssetLocation {
            location_track,
            nodecollection: RegistryNodes::joints(nodes),
            priority: index as u32 + 1,
        })
        .collect())
}

fn geometries(switch: &Switch, include: impl Fn(JointNumber) -> bool) -> Vec<AssetGeometry> {
    switch
        .joints
        .iter()
        .filter(|j| include(j.number))
        .map(|joint| AssetGeometry {
            joint_number: joint.number,
            geometry: RegistryGeometry::point(joint.location),
        })
        .collect()
}

/// Replaces the changed joints in the registry's locations.
fn merge_locations(
    existing: &[AssetLocation],
    changed: &BTreeSet<JointNumber>,
    fresh: Vec<AssetLocation>,
) -> Vec<AssetLocation> {
    let is_changed =
        |node: &RegistryNode| node.joint_number.is_some_and(|joint| changed.contains(&joint));
    let mut merged: Vec<AssetLocation> = existing
        .iter()
        .map(|location| {
            let mut location = location.clone();
            location.nodecollection.nodes.retain(|node| !is_changed(node));
            location
        })
        .collect();
    for location in fresh {
        match merged
            .iter_mut()
            .find(|m| m.location_track == location.location_track)
        {
            Some(current) => current
                .nodecollection
                .nodes
                .extend(location.nodecollection.nodes),
            None => merged.push(location),
        }
    }
    merged.retain(|location| !location.nodecollection.nodes.is_empty());
    for (index, location) in merged.iter_mut().enumerate() {
        location
            .nodecollection
            .nodes
            .sort_by_key(|node| node.joint_number);
        location.priority = index as u32 + 1;
    }
    merged
}

/// Replaces the changed joints in the registry's joint geometries.
fn merge_geometries(
    existing: &[AssetGeometry],
    changed: &BTreeSet<JointNumber>,
    fresh: Vec<AssetGeometry>,
) -> Vec<AssetGeometry> {
    let mut merged: Vec<AssetGeometry> = existing
        .iter()
        .filter(|g| !changed.contains(&g.joint_number))
        .cloned()
        .chain(fresh)
        .collect();
    merged.sort_by_key(|g| g.joint_number);
    merged
}

/// Pushes changed switches and returns their OIDs in processing order.
pub fn push_switches<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    changes: Vec<SwitchChange>,
) -> SyncResult<Vec<Oid>> {
    latest_changes(changes)
        .iter()
        .map(|change| push_switch(ctx, change))
        .collect()
}

fn push_switch<C: HttpClient>(ctx: &PushContext<'_, C>, change: &SwitchChange) -> SyncResult<Oid> {
    let switch = &change.switch;
    let asset = AssetRef::switch(switch.id);
    match plan(ctx, asset, change.is_deleted(), |oid| ctx.client.get_asset(oid))? {
        Plan::Create { reuse } => create(ctx, asset, switch, reuse),
        Plan::Update { oid, existing } => update(ctx, asset, change, oid, &existing),
        Plan::Delete { oid, .. } => delete(ctx, asset, switch, oid),
    }
}

fn create<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    switch: &Switch,
    reuse: Option<Oid>,
) -> SyncResult<Oid> {
    debug!(%asset, reused = ?reuse, "creating switch");
    let body = RegistryAsset {
        id: reuse.clone(),
        kind: AssetKind::Turnout,
        state: asset_state(switch),
        properties: properties(switch),
        locations: Vec::new(),
        geometries: Vec::new(),
    };
    let oid = ctx.client.create_asset(&body).for_asset(asset)?;
    ctx.remember(asset, reuse.as_ref(), &oid)?;

    let locations = locations(ctx, switch, |_| true)?;
    if !locations.is_empty() {
        ctx.client
            .create_asset_locations(&oid, &locations)
            .for_asset(asset)?;
    }
    let geometries = geometries(switch, |_| true);
    if !geometries.is_empty() {
        ctx.client
            .replace_asset_geometries(&oid, &geometries)
            .for_asset(asset)?;
    }
    Ok(oid)
}

fn update<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    change: &SwitchChange,
    oid: Oid,
    existing: &RegistryAsset,
) -> SyncResult<Oid> {
    let switch = &change.switch;
    let changed = &change.changed_joints;
    debug!(%asset, %oid, joints = changed.len(), "updating switch");

    ctx.client
        .update_asset_properties(&oid, &properties(switch))
        .for_asset(asset)?;

    let state = asset_state(switch);
    if existing.state != state {
        ctx.client.update_asset_state(&oid, state).for_asset(asset)?;
    }

    if changed.is_empty() {
        return Ok(oid);
    }

    let fresh = locations(ctx, switch, |joint| changed.contains(&joint))?;
    if existing.locations.is_empty() {
        if !fresh.is_empty() {
            ctx.client
                .create_asset_locations(&oid, &fresh)
                .for_asset(asset)?;
        }
    } else {
        let merged = merge_locations(&existing.locations, changed, fresh);
        if merged != existing.locations {
            ctx.client
                .replace_asset_locations(&oid, &merged)
                .for_asset(asset)?;
        }
    }

    let merged = merge_geometries(
        &existing.geometries,
        changed,
        geometries(switch, |joint| changed.contains(&joint)),
    );
    if merged != existing.geometries {
        ctx.client
            .replace_asset_geometries(&oid, &merged)
            .for_asset(asset)?;
    }
    Ok(oid)
}

fn delete<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    switch: &Switch,
    oid: Oid,
) -> SyncResult<Oid> {
    debug!(%asset, %oid, "deleting switch");
    ctx.client
        .update_asset_state(&oid, RegistryAssetState::Deleted)
        .map_err(|failure| failure.during(Operation::Delete))
        .for_asset(asset)?;
    ctx.client
        .update_asset_properties(&oid, &properties(switch))
        .map_err(|failure| failure.during(Operation::Delete))
        .for_asset(asset)?;
    Ok(oid)
}
