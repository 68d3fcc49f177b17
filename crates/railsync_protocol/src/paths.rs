//! Registry endpoint paths.

use crate::address::KmNumber;
use crate::ids::{BulkTransferExternalId, Oid};

/// Health / version endpoint.
pub const VERSION: &str = "/api/versions/v1.0/version";
/// Route number collection.
pub const ROUTE_NUMBERS: &str = "/api/infra/v1.0/routenumber";
/// Route number redraw.
pub const ROUTE_NUMBER_REDRAW: &str = "/api/infra/v1.0/routenumber/redraw";
/// Location track collection.
pub const LOCATION_TRACKS: &str = "/api/infra/v1.0/locationtracks";
/// Location track redraw.
pub const LOCATION_TRACK_REDRAW: &str = "/api/infra/v1.0/locationtracks/redraw";
/// Points of route numbers and location tracks.
pub const POINTS: &str = "/api/infra/v1.0/points";
/// Asset collection.
pub const ASSETS: &str = "/api/assets/v1.2";
/// Bulk transfer collection.
pub const BULK_TRANSFERS: &str = "/api/split/bulk-transfer";

/// A single route number.
pub fn route_number(oid: &Oid) -> String {
    format!("{ROUTE_NUMBERS}/{oid}")
}

/// A single location track.
pub fn location_track(oid: &Oid) -> String {
    format!("{LOCATION_TRACKS}/{oid}")
}

/// Points of one alignment, optionally limited to one kilometre.
pub fn points(oid: &Oid, km: Option<KmNumber>) -> String {
    match km {
        Some(km) => format!("{POINTS}/{oid}/{km}"),
        None => format!("{POINTS}/{oid}"),
    }
}

/// A single asset.
pub fn asset(oid: &Oid) -> String {
    format!("{ASSETS}/{oid}")
}

/// A sub-resource of an asset (`properties`, `state`, `locations`, `geoms`).
pub fn asset_part(oid: &Oid, part: &str) -> String {
    format!("{ASSETS}/{oid}/{part}")
}

/// Forced start of a bulk transfer.
pub fn bulk_transfer_start(id: BulkTransferExternalId) -> String {
    format!("{BULK_TRANSFERS}/{id}/start")
}

/// State of a bulk transfer.
pub fn bulk_transfer_state(id: BulkTransferExternalId) -> String {
    format!("{BULK_TRANSFERS}/{id}/state")
}
