//! The in-process registry server.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::faults::{Fault, FaultInjector, FaultRule};
use crate::handler::RequestHandler;
use crate::store::{BulkTransferJob, RedrawKind, RegistryStore};
use parking_lot::Mutex;
use railsync_protocol::{
    BulkTransferExternalId, BulkTransferStateResponse, HttpMethod, HttpRequest, HttpResponse,
    LoopbackServer, Oid, RegistryAsset, RegistryLocationTrack, RegistryPoint,
    RegistryRouteNumber, TransportError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// A request as the server received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// Method.
    pub method: HttpMethod,
    /// Path.
    pub path: String,
    /// Decoded JSON body, if any.
    pub body: Option<serde_json::Value>,
}

/// The reference registry.
///
/// Answers requests in-process through [`LoopbackServer`], records every
/// request it receives and can be told to fail or go offline.
///
/// # Example
///
/// ```
/// use railsync_registry_server::{RegistryServer, ServerConfig};
/// use railsync_protocol::{paths, HttpMethod, HttpRequest, LoopbackServer};
///
/// let server = RegistryServer::new(ServerConfig::default());
/// let response = server
///     .handle(&HttpRequest::new(HttpMethod::Get, paths::VERSION))
///     .unwrap();
/// assert_eq!(response.status, 200);
/// ```
pub struct RegistryServer {
    handler: RequestHandler,
    store: Arc<Mutex<RegistryStore>>,
    requests: Mutex<Vec<RecordedRequest>>,
    faults: Mutex<FaultInjector>,
    online: AtomicBool,
}

impl RegistryServer {
    /// Creates an empty registry.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(Mutex::new(RegistryStore::new(&config)));
        let online = AtomicBool::new(config.online);
        Self {
            handler: RequestHandler::new(config, Arc::clone(&store)),
            store,
            requests: Mutex::new(Vec::new()),
            faults: Mutex::new(FaultInjector::default()),
            online,
        }
    }

    /// Makes the registry reachable or unreachable.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Injects a fault on every request matching method and path prefix.
    pub fn fail(&self, method: HttpMethod, path_prefix: impl Into<String>, fault: Fault) {
        self.faults
            .lock()
            .push(FaultRule::new(method, path_prefix, fault));
    }

    /// Injects a fault on the next `count` matching requests.
    pub fn fail_times(
        &self,
        method: HttpMethod,
        path_prefix: impl Into<String>,
        fault: Fault,
        count: usize,
    ) {
        self.faults
            .lock()
            .push(FaultRule::new(method, path_prefix, fault).times(count));
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Requests with the given method whose path starts with `path_prefix`.
    pub fn requests_matching(&self, method: HttpMethod, path_prefix: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.path.starts_with(path_prefix))
            .cloned()
            .collect()
    }

    /// Forgets the recorded requests.
    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    /// Returns a route number.
    pub fn route_number(&self, oid: &Oid) -> Option<RegistryRouteNumber> {
        self.store.lock().route_number(oid).cloned()
    }

    /// Returns a location track.
    pub fn location_track(&self, oid: &Oid) -> Option<RegistryLocationTrack> {
        self.store.lock().location_track(oid).cloned()
    }

    /// Returns an asset.
    pub fn asset(&self, oid: &Oid) -> Option<RegistryAsset> {
        self.store.lock().asset(oid).cloned()
    }

    /// Returns every asset.
    pub fn assets(&self) -> Vec<RegistryAsset> {
        self.store.lock().assets()
    }

    /// Returns the points of an alignment in address order.
    pub fn points(&self, oid: &Oid) -> Vec<RegistryPoint> {
        self.store.lock().points(oid)
    }

    /// Returns the redraw requests received.
    pub fn redraws(&self) -> Vec<(RedrawKind, Vec<Oid>)> {
        self.store.lock().redraws().to_vec()
    }

    /// Returns a bulk transfer job.
    pub fn bulk_transfer(&self, id: BulkTransferExternalId) -> Option<BulkTransferJob> {
        self.store.lock().bulk_transfer(id).cloned()
    }

    // ------------------------------------------------------------------
    // Preloading
    // ------------------------------------------------------------------

    /// Stores a route number as if it had been created earlier.
    pub fn insert_route_number(&self, route_number: RegistryRouteNumber) -> ServerResult<Oid> {
        self.store.lock().create_route_number(route_number)
    }

    /// Stores a location track as if it had been created earlier.
    pub fn insert_location_track(&self, track: RegistryLocationTrack) -> ServerResult<Oid> {
        self.store.lock().create_location_track(track)
    }

    /// Stores an asset as if it had been created earlier.
    pub fn insert_asset(&self, asset: RegistryAsset) -> ServerResult<Oid> {
        self.store.lock().create_asset(asset)
    }

    /// Adds points to an alignment.
    pub fn insert_points(&self, oid: &Oid, points: Vec<RegistryPoint>) -> ServerResult<()> {
        self.store.lock().add_points(oid, points)
    }

    /// Sets what state polls of a bulk transfer answer.
    pub fn set_bulk_transfer_state(
        &self,
        id: BulkTransferExternalId,
        state: BulkTransferStateResponse,
    ) -> ServerResult<()> {
        self.store.lock().set_bulk_transfer_state(id, state)
    }
}

impl Default for RegistryServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl LoopbackServer for RegistryServer {
    fn handle(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(RecordedRequest {
            method: request.method,
            path: request.path.clone(),
            body: request
                .body
                .as_deref()
                .and_then(|body| serde_json::from_slice(body).ok()),
        });
        if !self.online.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("registry offline".into()));
        }
        if let Some(injected) = self.faults.lock().intercept(request) {
            trace!(method = %request.method, path = %request.path, "fault injected");
            return injected;
        }
        let response = self.handler.handle(request);
        trace!(method = %request.method, path = %request.path, status = response.status, "handled");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railsync_protocol::{paths, RegistryLayoutState, RemoteBulkTransferState};

    fn route_number(id: &str) -> RegistryRouteNumber {
        RegistryRouteNumber {
            id: Some(Oid::new(id)),
            name: "002".into(),
            description: String::new(),
            state: RegistryLayoutState::InUse,
            nodecollection: None,
        }
    }

    #[test]
    fn records_requests_even_when_offline() {
        let server = RegistryServer::new(ServerConfig::default().with_online(false));
        let request = HttpRequest::new(HttpMethod::Get, paths::VERSION);
        assert!(matches!(server.handle(&request), Err(TransportError::Connect(_))));
        assert_eq!(server.requests().len(), 1);

        server.set_online(true);
        assert_eq!(server.handle(&request).unwrap().status, 200);
        assert_eq!(server.requests_matching(HttpMethod::Get, paths::VERSION).len(), 2);
    }

    #[test]
    fn injected_fault_skips_store() {
        let server = RegistryServer::default();
        server.fail_times(HttpMethod::Post, paths::ROUTE_NUMBERS, Fault::status(503), 1);
        let body = serde_json::to_vec(&route_number("1.2.3")).unwrap();
        let request = HttpRequest::new(HttpMethod::Post, paths::ROUTE_NUMBERS).with_body(body);

        assert_eq!(server.handle(&request).unwrap().status, 503);
        assert!(server.route_number(&Oid::new("1.2.3")).is_none());
        assert_eq!(server.handle(&request).unwrap().status, 201);
        assert!(server.route_number(&Oid::new("1.2.3")).is_some());
    }

    #[test]
    fn preloaded_state_is_served() {
        let server = RegistryServer::default();
        server.insert_route_number(route_number("1.2.9")).unwrap();
        let response = server
            .handle(&HttpRequest::new(
                HttpMethod::Get,
                paths::route_number(&Oid::new("1.2.9")),
            ))
            .unwrap();
        assert_eq!(response.status, 200);
        assert!(server
            .set_bulk_transfer_state(
                BulkTransferExternalId(1),
                BulkTransferStateResponse::with_state(RemoteBulkTransferState::Finished),
            )
            .is_err());
    }
}
