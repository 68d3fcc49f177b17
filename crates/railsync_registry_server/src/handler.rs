//! Request routing for registry endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{RedrawKind, RegistryStore};
use parking_lot::Mutex;
use railsync_protocol::{
    paths, AssetGeometry, AssetLocation, AssetProperty, AssetStateUpdate, BulkTransferExternalId,
    BulkTransferRequest, CreatedResponse, HttpMethod, HttpRequest, HttpResponse, KmNumber, Oid,
    RegistryAsset, RegistryLocationTrack, RegistryPoint, RegistryRouteNumber,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// A registry endpoint, with its path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Health / version.
    Version,
    /// Route number collection.
    RouteNumbers,
    /// Route number redraw.
    RouteNumberRedraw,
    /// One route number.
    RouteNumber(Oid),
    /// Location track collection.
    LocationTracks,
    /// Location track redraw.
    LocationTrackRedraw,
    /// One location track.
    LocationTrack(Oid),
    /// Points of an alignment, optionally of one kilometre.
    Points(Oid, Option<KmNumber>),
    /// Asset collection.
    Assets,
    /// One asset.
    Asset(Oid),
    /// A part of an asset (`properties`, `state`, `locations`, `geoms`).
    AssetPart(Oid, String),
    /// Bulk transfer collection.
    BulkTransfers,
    /// Forced start of a bulk transfer.
    BulkTransferStart(BulkTransferExternalId),
    /// State of a bulk transfer.
    BulkTransferState(BulkTransferExternalId),
}

impl Route {
    /// Parses a request path. Returns `None` for unknown paths.
    pub fn parse(path: &str) -> Option<Route> {
        if path == paths::VERSION {
            return Some(Route::Version);
        }
        if let Some(rest) = under(path, paths::ROUTE_NUMBERS) {
            return match rest.as_slice() {
                [] => Some(Route::RouteNumbers),
                ["redraw"] => Some(Route::RouteNumberRedraw),
                [oid] => Some(Route::RouteNumber(Oid::new(*oid))),
                _ => None,
            };
        }
        if let Some(rest) = under(path, paths::LOCATION_TRACKS) {
            return match rest.as_slice() {
                [] => Some(Route::LocationTracks),
                ["redraw"] => Some(Route::LocationTrackRedraw),
                [oid] => Some(Route::LocationTrack(Oid::new(*oid))),
                _ => None,
            };
        }
        if let Some(rest) = under(path, paths::POINTS) {
            return match rest.as_slice() {
                [oid] => Some(Route::Points(Oid::new(*oid), None)),
                [oid, km] => km.parse().ok().map(|km| Route::Points(Oid::new(*oid), Some(km))),
                _ => None,
            };
        }
        if let Some(rest) = under(path, paths::ASSETS) {
            return match rest.as_slice() {
                [] => Some(Route::Assets),
                [oid] => Some(Route::Asset(Oid::new(*oid))),
                [oid, part] => Some(Route::AssetPart(Oid::new(*oid), part.to_string())),
                _ => None,
            };
        }
        if let Some(rest) = under(path, paths::BULK_TRANSFERS) {
            return match rest.as_slice() {
                [] => Some(Route::BulkTransfers),
                [id, action] => {
                    let id = BulkTransferExternalId(id.parse().ok()?);
                    match *action {
                        "start" => Some(Route::BulkTransferStart(id)),
                        "state" => Some(Route::BulkTransferState(id)),
                        _ => None,
                    }
                }
                _ => None,
            };
        }
        None
    }
}

/// Path segments below `prefix`, or `None` if `path` is not under it.
fn under<'a>(path: &'a str, prefix: &str) -> Option<Vec<&'a str>> {
    let rest = path.strip_prefix(prefix)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    Some(rest.split('/').filter(|s| !s.is_empty()).collect())
}

/// Handles registry requests against a [`RegistryStore`].
pub struct RequestHandler {
    config: ServerConfig,
    store: Arc<Mutex<RegistryStore>>,
}

impl RequestHandler {
    /// Creates a handler over a shared store.
    pub fn new(config: ServerConfig, store: Arc<Mutex<RegistryStore>>) -> Self {
        Self { config, store }
    }

    /// Answers a request. Failures become error responses.
    pub fn handle(&self, request: &HttpRequest) -> HttpResponse {
        match self.dispatch(request) {
            Ok(response) => response,
            Err(err) => {
                debug!(method = %request.method, path = %request.path, error = %err, "request rejected");
                HttpResponse::new(err.status(), err.to_string())
            }
        }
    }

    fn dispatch(&self, request: &HttpRequest) -> ServerResult<HttpResponse> {
        let route = Route::parse(&request.path)
            .ok_or_else(|| ServerError::NotFound(format!("no route for {}", request.path)))?;
        let mut store = self.store.lock();
        match (request.method, route) {
            (HttpMethod::Get, Route::Version) => self.json(&serde_json::json!({ "version": "1.0" })),

            (HttpMethod::Get, Route::RouteNumber(oid)) => {
                let found = store
                    .route_number(&oid)
                    .ok_or_else(|| ServerError::NotFound(format!("route number {oid}")))?;
                self.json(found)
            }
            (HttpMethod::Post, Route::RouteNumbers) => {
                let oid = store.create_route_number(body::<RegistryRouteNumber>(request)?)?;
                created(oid)
            }
            (HttpMethod::Put, Route::RouteNumbers) => {
                store.update_route_number(body(request)?)?;
                Ok(HttpResponse::empty(200))
            }
            (HttpMethod::Post, Route::RouteNumberRedraw) => {
                store.redraw(RedrawKind::RouteNumbers, body(request)?)?;
                Ok(HttpResponse::empty(200))
            }

            (HttpMethod::Get, Route::LocationTrack(oid)) => {
                let found = store
                    .location_track(&oid)
                    .ok_or_else(|| ServerError::NotFound(format!("location track {oid}")))?;
                self.json(found)
            }
            (HttpMethod::Post, Route::LocationTracks) => {
                let oid = store.create_location_track(body::<RegistryLocationTrack>(request)?)?;
                created(oid)
            }
            (HttpMethod::Put, Route::LocationTracks) => {
                store.update_location_track(body(request)?)?;
                Ok(HttpResponse::empty(200))
            }
            (HttpMethod::Post, Route::LocationTrackRedraw) => {
                store.redraw(RedrawKind::LocationTracks, body(request)?)?;
                Ok(HttpResponse::empty(200))
            }

            (HttpMethod::Get, Route::Points(oid, None)) => self.json(&store.points(&oid)),
            (HttpMethod::Post, Route::Points(oid, None)) => {
                store.add_points(&oid, body::<Vec<RegistryPoint>>(request)?)?;
                Ok(HttpResponse::empty(200))
            }
            (HttpMethod::Put, Route::Points(oid, None)) => {
                store.replace_points(&oid, body::<Vec<RegistryPoint>>(request)?)?;
                Ok(HttpResponse::empty(200))
            }
            (HttpMethod::Delete, Route::Points(oid, km)) => {
                store.delete_points(&oid, km)?;
                Ok(HttpResponse::empty(200))
            }

            (HttpMethod::Get, Route::Asset(oid)) => {
                let found = store
                    .asset(&oid)
                    .ok_or_else(|| ServerError::NotFound(format!("asset {oid}")))?;
                self.json(found)
            }
            (HttpMethod::Post, Route::Assets) => {
                let oid = store.create_asset(body::<RegistryAsset>(request)?)?;
                created(oid)
            }
            (method, Route::AssetPart(oid, part)) => {
                match (method, part.as_str()) {
                    (HttpMethod::Put, "properties") => {
                        store.update_asset_properties(&oid, body::<Vec<AssetProperty>>(request)?)?
                    }
                    (HttpMethod::Put, "state") => {
                        let update: AssetStateUpdate = body(request)?;
                        store.update_asset_state(&oid, update.state)?
                    }
                    (HttpMethod::Post, "locations") => {
                        store.create_asset_locations(&oid, body::<Vec<AssetLocation>>(request)?)?
                    }
                    (HttpMethod::Put, "locations") => {
                        store.replace_asset_locations(&oid, body::<Vec<AssetLocation>>(request)?)?
                    }
                    (HttpMethod::Put, "geoms") => {
                        store.replace_asset_geometries(&oid, body::<Vec<AssetGeometry>>(request)?)?
                    }
                    _ => return Err(method_not_allowed(method, &request.path)),
                }
                Ok(HttpResponse::empty(200))
            }

            (HttpMethod::Post, Route::BulkTransfers) => {
                let id = store.create_bulk_transfer(body::<BulkTransferRequest>(request)?)?;
                let body = serde_json::to_vec(&CreatedResponse { id })
                    .map_err(|e| ServerError::Internal(e.to_string()))?;
                Ok(HttpResponse::new(201, body))
            }
            (HttpMethod::Post, Route::BulkTransferStart(id)) => {
                store.start_bulk_transfer(id)?;
                Ok(HttpResponse::empty(200))
            }
            (HttpMethod::Get, Route::BulkTransferState(id)) => {
                let job = store
                    .bulk_transfer(id)
                    .ok_or_else(|| ServerError::NotFound(format!("bulk transfer {id}")))?;
                self.json(&job.state)
            }

            (method, _) => Err(method_not_allowed(method, &request.path)),
        }
    }

    /// Encodes a read response, splitting addresses if configured.
    fn json<T: Serialize + ?Sized>(&self, value: &T) -> ServerResult<HttpResponse> {
        let mut value =
            serde_json::to_value(value).map_err(|e| ServerError::Internal(e.to_string()))?;
        if self.config.split_addresses {
            split_addresses(&mut value);
        }
        let body = serde_json::to_vec(&value).map_err(|e| ServerError::Internal(e.to_string()))?;
        Ok(HttpResponse::new(200, body))
    }
}

fn body<T: DeserializeOwned>(request: &HttpRequest) -> ServerResult<T> {
    let bytes = request
        .body
        .as_deref()
        .ok_or_else(|| ServerError::InvalidRequest("missing body".into()))?;
    Ok(serde_json::from_slice(bytes)?)
}

fn created(oid: Oid) -> ServerResult<HttpResponse> {
    let body =
        serde_json::to_vec(&CreatedResponse { id: oid }).map_err(|e| ServerError::Internal(e.to_string()))?;
    Ok(HttpResponse::new(201, body))
}

fn method_not_allowed(method: HttpMethod, path: &str) -> ServerError {
    ServerError::InvalidRequest(format!("{method} not supported on {path}"))
}

/// Rewrites every `"kmM": "KKKK+MMMM.mmm"` into `{"km": "KKKK", "m": "MMMM.mmm"}`.
pub fn split_addresses(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if key == "kmM" {
                    if let Some((km, m)) = field.as_str().and_then(|s| s.split_once('+')) {
                        *field = serde_json::json!({ "km": km, "m": m });
                        continue;
                    }
                }
                split_addresses(field);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(split_addresses),
        _ => {}
    }
}
