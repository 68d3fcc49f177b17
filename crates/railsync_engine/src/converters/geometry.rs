//! Points, endpoint nodes and metadata stretches shared by the track converters.

use super::PushContext;
use crate::error::{ForAsset, SyncError, SyncResult};
use crate::http::HttpClient;
use crate::model::{AddressPoint, AlignmentRef, AssetRef, MetadataSegment};
use railsync_protocol::{
    AssetLocation, AssetProperty, Coordinate, KmNumber, KmRange, NodeState, NodeType, Oid,
    RegistryAsset, RegistryNode, RegistryNodes, RegistryPoint, TrackMeter,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Metadata stretches shorter than this are not pushed.
pub(super) const MIN_METADATA_LENGTH: f64 = 1.0;

/// Coordinates closer than this are considered equal.
const COORDINATE_TOLERANCE: f64 = 0.001;

pub(super) fn registry_point(point: &AddressPoint) -> RegistryPoint {
    RegistryPoint::new(point.address, point.coordinate)
}

/// All geocoded points of an alignment; empty when it cannot be geocoded.
pub(super) fn all_points<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    alignment: AlignmentRef,
) -> SyncResult<Vec<AddressPoint>> {
    Ok(ctx
        .geocoder
        .points_for_address_range(ctx.branch, alignment, None)?
        .unwrap_or_default())
}

/// Start and end nodes of an alignment.
pub(super) fn endpoint_nodes(points: &[AddressPoint], state: NodeState) -> Option<RegistryNodes> {
    let start = points
        .first()
        .map(|p| RegistryNode::endpoint(NodeType::StartPoint, state, registry_point(p)));
    let end = points
        .last()
        .map(|p| RegistryNode::endpoint(NodeType::EndPoint, state, registry_point(p)));
    RegistryNodes::endpoints(start, end)
}

fn same_node(a: &RegistryNode, b: &RegistryNode) -> bool {
    if a.point.km_m != b.point.km_m {
        return false;
    }
    match (&a.point.geometry, &b.point.geometry) {
        (Some(a), Some(b)) => a.coordinate().distance(&b.coordinate()) <= COORDINATE_TOLERANCE,
        (None, None) => true,
        _ => false,
    }
}

/// Keeps only the endpoint nodes that differ from the registry's nodes.
pub(super) fn changed_endpoint_nodes(
    new: Option<RegistryNodes>,
    existing: Option<&RegistryNodes>,
) -> Option<RegistryNodes> {
    let new = new?;
    let changed = |node_type: NodeType| {
        let node = new.node(node_type)?;
        match existing.and_then(|e| e.node(node_type)) {
            Some(current) if same_node(node, current) => None,
            _ => Some(node.clone()),
        }
    };
    RegistryNodes::endpoints(changed(NodeType::StartPoint), changed(NodeType::EndPoint))
}

fn by_km(points: &[AddressPoint]) -> BTreeMap<KmNumber, Vec<RegistryPoint>> {
    let mut grouped: BTreeMap<KmNumber, Vec<RegistryPoint>> = BTreeMap::new();
    for point in points {
        grouped
            .entry(point.address.km())
            .or_default()
            .push(registry_point(point));
    }
    grouped
}

/// Creates every point of a freshly created alignment, one call per kilometre.
pub(super) fn create_all_points<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    oid: &Oid,
    points: &[AddressPoint],
) -> SyncResult<()> {
    for (km, km_points) in by_km(points) {
        debug!(%asset, %oid, %km, count = km_points.len(), "creating points");
        ctx.client.create_points(oid, &km_points).for_asset(asset)?;
    }
    Ok(())
}

/// Geocoded points of the changed kilometres, by kilometre.
///
/// Fails when the alignment cannot be geocoded: a kilometre missing from the
/// result is deleted from the registry, so a geocoding gap must never look
/// like a removed kilometre.
pub(super) fn changed_points<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    alignment: AlignmentRef,
    changed_kms: &BTreeSet<KmNumber>,
) -> SyncResult<BTreeMap<KmNumber, Vec<RegistryPoint>>> {
    let mut grouped = BTreeMap::new();
    for range in KmRange::contiguous(changed_kms) {
        let points = ctx
            .geocoder
            .points_for_address_range(ctx.branch, alignment, Some(&range))?
            .ok_or_else(|| {
                SyncError::Collaborator(format!(
                    "cannot geocode {asset} on kilometres {}..={}",
                    range.start, range.end
                ))
            })?;
        grouped.extend(by_km(&points));
    }
    Ok(grouped)
}

/// Replaces the points of changed kilometres in place.
///
/// Kilometres without points no longer exist on the alignment and have their
/// points deleted.
pub(super) fn replace_changed_points<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    oid: &Oid,
    changed_kms: &BTreeSet<KmNumber>,
    points: &BTreeMap<KmNumber, Vec<RegistryPoint>>,
) -> SyncResult<()> {
    for km in changed_kms {
        match points.get(km) {
            Some(km_points) => {
                debug!(%asset, %oid, %km, count = km_points.len(), "replacing points");
                ctx.client.update_points(oid, km_points).for_asset(asset)?;
            }
            None => {
                debug!(%asset, %oid, %km, "deleting points of removed kilometre");
                ctx.client.delete_points(oid, Some(*km)).for_asset(asset)?;
            }
        }
    }
    Ok(())
}

/// Clears changed kilometres and creates their points again.
///
/// Clearing a kilometre also drops whatever the registry located on its
/// points, metadata included.
pub(super) fn recreate_changed_points<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    oid: &Oid,
    changed_kms: &BTreeSet<KmNumber>,
    points: &BTreeMap<KmNumber, Vec<RegistryPoint>>,
) -> SyncResult<()> {
    for km in changed_kms {
        debug!(%asset, %oid, %km, "clearing kilometre");
        ctx.client.delete_points(oid, Some(*km)).for_asset(asset)?;
        if let Some(km_points) = points.get(km) {
            debug!(%asset, %oid, %km, count = km_points.len(), "creating points");
            ctx.client.create_points(oid, km_points).for_asset(asset)?;
        }
    }
    Ok(())
}

/// Point at distance `m` along an alignment, interpolated between geocoded points.
pub(super) fn point_at_m(points: &[AddressPoint], m: f64) -> Option<AddressPoint> {
    let first = points.first()?;
    let last = points.last()?;
    if m <= first.m {
        return Some(*first);
    }
    if m >= last.m {
        return Some(*last);
    }
    let window = points.windows(2).find(|w| w[0].m <= m && m <= w[1].m)?;
    let (a, b) = (window[0], window[1]);
    if (b.m - m).abs() < f64::EPSILON {
        return Some(b);
    }
    let span = b.m - a.m;
    let ratio = if span > 0.0 { (m - a.m) / span } else { 0.0 };
    let coordinate = Coordinate::new(
        a.coordinate.x + (b.coordinate.x - a.coordinate.x) * ratio,
        a.coordinate.y + (b.coordinate.y - a.coordinate.y) * ratio,
    );
    let address = TrackMeter::new(a.address.km(), a.address.meters() + (m - a.m));
    Some(AddressPoint {
        address,
        coordinate,
        m,
    })
}

/// Distance ranges of each run of consecutive changed kilometres.
///
/// A range starts at the first point of its run and ends where the next
/// kilometre starts, or at the end of the alignment.
pub(super) fn m_ranges(
    points: &[AddressPoint],
    changed_kms: &BTreeSet<KmNumber>,
) -> Vec<(f64, f64)> {
    KmRange::contiguous(changed_kms)
        .into_iter()
        .filter_map(|range| {
            let first = points.iter().find(|p| range.contains(p.address.km()))?;
            let end = points
                .iter()
                .find(|p| p.address.km() > range.end)
                .or(points.last())?;
            Some((first.m, end.m))
        })
        .collect()
}

/// Clips metadata segments to the given distance ranges, dropping slivers.
pub(super) fn clip_segments(
    segments: &[MetadataSegment],
    ranges: &[(f64, f64)],
) -> Vec<MetadataSegment> {
    let mut clipped = Vec::new();
    for segment in segments {
        for &(start, end) in ranges {
            let piece = MetadataSegment {
                start_m: segment.start_m.max(start),
                end_m: segment.end_m.min(end),
                ..segment.clone()
            };
            if piece.length() >= MIN_METADATA_LENGTH {
                clipped.push(piece);
            }
        }
    }
    clipped
}

fn metadata_asset(
    track_oid: &Oid,
    segment: &MetadataSegment,
    points: &[AddressPoint],
) -> Option<RegistryAsset> {
    let start = point_at_m(points, segment.start_m)?;
    let end = point_at_m(points, segment.end_m)?;
    let nodes = RegistryNodes::endpoints(
        Some(RegistryNode::endpoint(
            NodeType::StartPoint,
            NodeState::InUse,
            registry_point(&start),
        )),
        Some(RegistryNode::endpoint(
            NodeType::EndPoint,
            NodeState::InUse,
            registry_point(&end),
        )),
    )?;
    Some(RegistryAsset::metadata(
        vec![
            AssetProperty::string("filename", segment.plan_name.clone()),
            AssetProperty::enumeration("source", segment.plan_source.clone()),
        ],
        AssetLocation {
            location_track: track_oid.clone(),
            nodecollection: nodes,
            priority: 1,
        },
    ))
}

/// Creates metadata assets for the given segments of a location track.
pub(super) fn create_metadata<C: HttpClient>(
    ctx: &PushContext<'_, C>,
    asset: AssetRef,
    track_oid: &Oid,
    segments: &[MetadataSegment],
    points: &[AddressPoint],
) -> SyncResult<usize> {
    let mut created = 0;
    for segment in segments.iter().filter(|s| s.length() >= MIN_METADATA_LENGTH) {
        if let Some(metadata) = metadata_asset(track_oid, segment, points) {
            ctx.client.create_asset(&metadata).for_asset(asset)?;
            created += 1;
        }
    }
    Ok(created)
}
