//! Typed client of the registry's HTTP interface.
//!
//! One method per registry resource or action. Every call is bounded by one
//! of the configured timeout classes and produces either a decoded value or a
//! [`RegistryFailure`] tagged with the error category and operation.

use crate::config::RegistryTimeouts;
use crate::error::{ErrorCategory, Operation, RegistryFailure, RegistryResult};
use crate::http::HttpClient;
use crate::status::OnlineStatus;
use railsync_protocol::{
    paths, AssetGeometry, AssetLocation, AssetProperty, AssetStateUpdate, BulkTransferExternalId,
    BulkTransferRequest, BulkTransferStateResponse, CreatedResponse, HttpMethod, HttpRequest,
    HttpResponse, KmNumber, Oid, RegistryAsset, RegistryAssetState, RegistryLocationTrack,
    RegistryPoint, RegistryRouteNumber, TransportError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace};

/// Call context: what is touched and how long the call may take.
#[derive(Debug, Clone, Copy)]
struct Call {
    category: ErrorCategory,
    operation: Operation,
    timeout: Duration,
}

/// Registry client over an [`HttpClient`].
pub struct RegistryClient<C: HttpClient> {
    http: C,
    timeouts: RegistryTimeouts,
}

impl<C: HttpClient> RegistryClient<C> {
    /// Creates a client.
    pub fn new(http: C, timeouts: RegistryTimeouts) -> Self {
        Self { http, timeouts }
    }

    /// Returns the underlying HTTP client.
    pub fn http(&self) -> &C {
        &self.http
    }

    /// Returns the configured timeouts.
    pub fn timeouts(&self) -> &RegistryTimeouts {
        &self.timeouts
    }

    fn call(&self, category: ErrorCategory, operation: Operation) -> Call {
        Call {
            category,
            operation,
            timeout: self.timeouts.default,
        }
    }

    fn long_call(&self, category: ErrorCategory, operation: Operation) -> Call {
        Call {
            timeout: self.timeouts.long,
            ..self.call(category, operation)
        }
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    /// Checks the health endpoint. Never fails.
    pub fn check_online_status(&self) -> OnlineStatus {
        let request = HttpRequest::new(HttpMethod::Get, paths::VERSION);
        match self.http.send(&request, self.timeouts.health) {
            Ok(response) if response.is_success() => OnlineStatus::Online,
            Ok(response) => {
                debug!(status = response.status, "registry health check failed");
                OnlineStatus::Offline
            }
            Err(err) => {
                debug!(error = %err, "registry unreachable");
                OnlineStatus::Offline
            }
        }
    }

    // ------------------------------------------------------------------
    // Route numbers
    // ------------------------------------------------------------------

    /// Fetches a route number.
    pub fn get_route_number(&self, oid: &Oid) -> RegistryResult<Option<RegistryRouteNumber>> {
        self.lookup(
            paths::route_number(oid),
            self.call(ErrorCategory::Properties, Operation::FetchExisting),
        )
    }

    /// Creates a route number and returns its OID.
    pub fn create_route_number(&self, route_number: &RegistryRouteNumber) -> RegistryResult<Oid> {
        self.create(
            paths::ROUTE_NUMBERS,
            route_number,
            self.call(ErrorCategory::Properties, Operation::Create),
        )
    }

    /// Updates the properties (and given endpoint nodes) of a route number.
    pub fn update_route_number(&self, route_number: &RegistryRouteNumber) -> RegistryResult<()> {
        self.write(
            HttpMethod::Put,
            paths::ROUTE_NUMBERS.to_string(),
            route_number,
            self.call(ErrorCategory::Properties, Operation::Update),
        )
    }

    // ------------------------------------------------------------------
    // Location tracks
    // ------------------------------------------------------------------

    /// Fetches a location track.
    pub fn get_location_track(&self, oid: &Oid) -> RegistryResult<Option<RegistryLocationTrack>> {
        self.lookup(
            paths::location_track(oid),
            self.call(ErrorCategory::Properties, Operation::FetchExisting),
        )
    }

    /// Creates a location track and returns its OID.
    pub fn create_location_track(&self, track: &RegistryLocationTrack) -> RegistryResult<Oid> {
        self.create(
            paths::LOCATION_TRACKS,
            track,
            self.call(ErrorCategory::Properties, Operation::Create),
        )
    }

    /// Updates the properties (and given endpoint nodes) of a location track.
    pub fn update_location_track(&self, track: &RegistryLocationTrack) -> RegistryResult<()> {
        self.write(
            HttpMethod::Put,
            paths::LOCATION_TRACKS.to_string(),
            track,
            self.call(ErrorCategory::Properties, Operation::Update),
        )
    }

    // ------------------------------------------------------------------
    // Points
    // ------------------------------------------------------------------

    /// Adds points to a route number or location track.
    pub fn create_points(&self, oid: &Oid, points: &[RegistryPoint]) -> RegistryResult<()> {
        self.write(
            HttpMethod::Post,
            paths::points(oid, None),
            points,
            self.call(ErrorCategory::Geometry, Operation::Create),
        )
    }

    /// Replaces the points of the kilometres covered by `points`.
    pub fn update_points(&self, oid: &Oid, points: &[RegistryPoint]) -> RegistryResult<()> {
        self.write(
            HttpMethod::Put,
            paths::points(oid, None),
            points,
            self.call(ErrorCategory::Geometry, Operation::Update),
        )
    }

    /// Deletes the points of one kilometre, or all points when `km` is `None`.
    pub fn delete_points(&self, oid: &Oid, km: Option<KmNumber>) -> RegistryResult<()> {
        let request = HttpRequest::new(HttpMethod::Delete, paths::points(oid, km));
        self.execute(&request, self.call(ErrorCategory::Geometry, Operation::Delete))
            .map(drop)
    }

    // ------------------------------------------------------------------
    // Assets
    // ------------------------------------------------------------------

    /// Fetches an asset (a switch).
    pub fn get_asset(&self, oid: &Oid) -> RegistryResult<Option<RegistryAsset>> {
        self.lookup(
            paths::asset(oid),
            self.call(ErrorCategory::Properties, Operation::FetchExisting),
        )
    }

    /// Creates an asset and returns its OID.
    pub fn create_asset(&self, asset: &RegistryAsset) -> RegistryResult<Oid> {
        self.create(
            paths::ASSETS,
            asset,
            self.call(ErrorCategory::Properties, Operation::Create),
        )
    }

    /// Replaces the typed properties of an asset.
    pub fn update_asset_properties(
        &self,
        oid: &Oid,
        properties: &[AssetProperty],
    ) -> RegistryResult<()> {
        self.write(
            HttpMethod::Put,
            paths::asset_part(oid, "properties"),
            properties,
            self.call(ErrorCategory::Properties, Operation::Update),
        )
    }

    /// Changes the lifecycle state of an asset.
    pub fn update_asset_state(&self, oid: &Oid, state: RegistryAssetState) -> RegistryResult<()> {
        self.write(
            HttpMethod::Put,
            paths::asset_part(oid, "state"),
            &AssetStateUpdate { state },
            self.call(ErrorCategory::State, Operation::Update),
        )
    }

    /// Adds locations to an asset that has none.
    pub fn create_asset_locations(
        &self,
        oid: &Oid,
        locations: &[AssetLocation],
    ) -> RegistryResult<()> {
        self.write(
            HttpMethod::Post,
            paths::asset_part(oid, "locations"),
            locations,
            self.call(ErrorCategory::Location, Operation::Create),
        )
    }

    /// Replaces the locations of an asset.
    pub fn replace_asset_locations(
        &self,
        oid: &Oid,
        locations: &[AssetLocation],
    ) -> RegistryResult<()> {
        self.write(
            HttpMethod::Put,
            paths::asset_part(oid, "locations"),
            locations,
            self.call(ErrorCategory::Location, Operation::Update),
        )
    }

    /// Replaces the joint geometries of an asset.
    pub fn replace_asset_geometries(
        &self,
        oid: &Oid,
        geometries: &[AssetGeometry],
    ) -> RegistryResult<()> {
        self.write(
            HttpMethod::Put,
            paths::asset_part(oid, "geoms"),
            geometries,
            self.call(ErrorCategory::Geometry, Operation::Update),
        )
    }

    // ------------------------------------------------------------------
    // Redraw
    // ------------------------------------------------------------------

    /// Asks the registry to recompute the derived geometry of route numbers.
    pub fn redraw_route_numbers(&self, oids: &[Oid]) -> RegistryResult<()> {
        self.write(
            HttpMethod::Post,
            paths::ROUTE_NUMBER_REDRAW.to_string(),
            oids,
            self.long_call(ErrorCategory::Geometry, Operation::Update),
        )
    }

    /// Asks the registry to recompute the derived geometry of location tracks.
    pub fn redraw_location_tracks(&self, oids: &[Oid]) -> RegistryResult<()> {
        self.write(
            HttpMethod::Post,
            paths::LOCATION_TRACK_REDRAW.to_string(),
            oids,
            self.long_call(ErrorCategory::Geometry, Operation::Update),
        )
    }

    // ------------------------------------------------------------------
    // Bulk transfer
    // ------------------------------------------------------------------

    /// Creates a bulk transfer job.
    pub fn create_bulk_transfer(
        &self,
        request: &BulkTransferRequest,
    ) -> RegistryResult<BulkTransferExternalId> {
        let call = self.long_call(ErrorCategory::Location, Operation::Create);
        let body = encode(request, call)?;
        let request = HttpRequest::new(HttpMethod::Post, paths::BULK_TRANSFERS).with_body(body);
        let response = self.execute(&request, call)?;
        decode::<CreatedResponse<BulkTransferExternalId>>(&response, call).map(|r| r.id)
    }

    /// Forces an early start of a bulk transfer.
    pub fn start_bulk_transfer(&self, id: BulkTransferExternalId) -> RegistryResult<()> {
        let call = Call {
            timeout: self.timeouts.expedite,
            ..self.call(ErrorCategory::Location, Operation::Update)
        };
        let request = HttpRequest::new(HttpMethod::Post, paths::bulk_transfer_start(id));
        self.execute(&request, call).map(drop)
    }

    /// Polls the state of a bulk transfer.
    pub fn poll_bulk_transfer(
        &self,
        id: BulkTransferExternalId,
    ) -> RegistryResult<BulkTransferStateResponse> {
        let call = self.long_call(ErrorCategory::Location, Operation::FetchExisting);
        let request = HttpRequest::new(HttpMethod::Get, paths::bulk_transfer_state(id));
        let response = self.execute(&request, call)?;
        decode(&response, call)
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn execute(&self, request: &HttpRequest, call: Call) -> RegistryResult<HttpResponse> {
        trace!(method = %request.method, path = %request.path, "registry call");
        let response = self
            .http
            .send(request, call.timeout)
            .map_err(|err| transport_failure(err, call))?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(RegistryFailure::Rejected {
                category: call.category,
                operation: call.operation,
                status: response.status,
                body: response.body_text(),
            })
        }
    }

    fn lookup<T: DeserializeOwned>(&self, path: String, call: Call) -> RegistryResult<Option<T>> {
        let request = HttpRequest::new(HttpMethod::Get, path);
        match self.execute(&request, call) {
            Ok(response) => decode(&response, call).map(Some),
            Err(RegistryFailure::Rejected { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn create<B: Serialize + ?Sized>(&self, path: &str, body: &B, call: Call) -> RegistryResult<Oid> {
        let request = HttpRequest::new(HttpMethod::Post, path).with_body(encode(body, call)?);
        let response = self.execute(&request, call)?;
        decode::<CreatedResponse<Oid>>(&response, call).map(|r| r.id)
    }

    fn write<B: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        path: String,
        body: &B,
        call: Call,
    ) -> RegistryResult<()> {
        let request = HttpRequest::new(method, path).with_body(encode(body, call)?);
        self.execute(&request, call).map(drop)
    }
}

fn transport_failure(err: TransportError, call: Call) -> RegistryFailure {
    match err {
        TransportError::Timeout => RegistryFailure::Timeout {
            category: call.category,
            operation: call.operation,
        },
        TransportError::Connect(message) | TransportError::Other(message) => {
            RegistryFailure::Unreachable {
                category: call.category,
                operation: call.operation,
                message,
            }
        }
    }
}

fn encode<B: Serialize + ?Sized>(body: &B, call: Call) -> RegistryResult<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| RegistryFailure::Malformed {
        category: call.category,
        operation: call.operation,
        message: format!("request encoding failed: {e}"),
    })
}

fn decode<T: DeserializeOwned>(response: &HttpResponse, call: Call) -> RegistryResult<T> {
    serde_json::from_slice(&response.body).map_err(|e| RegistryFailure::Malformed {
        category: call.category,
        operation: call.operation,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use railsync_protocol::{RegistryLayoutState, RemoteBulkTransferState};
    use std::collections::VecDeque;

    /// Replays canned responses and records requests.
    struct Scripted {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        requests: Mutex<Vec<(HttpRequest, Duration)>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpClient for Scripted {
        fn send(
            &self,
            request: &HttpRequest,
            timeout: Duration,
        ) -> Result<HttpResponse, TransportError> {
            self.requests.lock().push((request.clone(), timeout));
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::empty(200)))
        }
    }

    fn client(responses: Vec<Result<HttpResponse, TransportError>>) -> RegistryClient<Scripted> {
        RegistryClient::new(
            Scripted::new(responses),
            RegistryTimeouts {
                default: Duration::from_secs(1),
                long: Duration::from_secs(2),
                expedite: Duration::from_secs(3),
                health: Duration::from_secs(4),
            },
        )
    }

    #[test]
    fn lookup_not_found_is_none() {
        let client = client(vec![Ok(HttpResponse::new(404, "no such thing"))]);
        assert_eq!(client.get_route_number(&Oid::new("1.2.3")).unwrap(), None);
    }

    #[test]
    fn lookup_decodes_and_ignores_unknown_fields() {
        let body = r#"{"id":"1.2.3","name":"001","state":"IN USE","extra":[1,2]}"#;
        let client = client(vec![Ok(HttpResponse::new(200, body))]);
        let route_number = client.get_route_number(&Oid::new("1.2.3")).unwrap().unwrap();
        assert_eq!(route_number.name, "001");
        assert_eq!(route_number.state, RegistryLayoutState::InUse);
    }

    #[test]
    fn rejection_carries_category_operation_and_body() {
        let client = client(vec![Ok(HttpResponse::new(400, "bad km"))]);
        let err = client
            .create_points(&Oid::new("1.2.3"), &[])
            .unwrap_err();
        assert_eq!(
            err,
            RegistryFailure::Rejected {
                category: ErrorCategory::Geometry,
                operation: Operation::Create,
                status: 400,
                body: "bad km".into(),
            }
        );
    }

    #[test]
    fn transport_failures_are_distinguished() {
        let client = client(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Connect("refused".into())),
        ]);
        let oid = Oid::new("1");
        assert!(matches!(
            client.update_asset_state(&oid, RegistryAssetState::Deleted),
            Err(RegistryFailure::Timeout {
                category: ErrorCategory::State,
                ..
            })
        ));
        assert!(matches!(
            client.delete_points(&oid, None),
            Err(RegistryFailure::Unreachable {
                operation: Operation::Delete,
                ..
            })
        ));
    }

    #[test]
    fn undecodable_body_is_malformed() {
        let client = client(vec![Ok(HttpResponse::new(200, "<html>"))]);
        let err = client.get_asset(&Oid::new("1")).unwrap_err();
        assert!(matches!(err, RegistryFailure::Malformed { .. }));
    }

    #[test]
    fn health_check_never_fails() {
        let client = client(vec![
            Ok(HttpResponse::empty(200)),
            Ok(HttpResponse::empty(500)),
            Err(TransportError::Timeout),
        ]);
        assert_eq!(client.check_online_status(), OnlineStatus::Online);
        assert_eq!(client.check_online_status(), OnlineStatus::Offline);
        assert_eq!(client.check_online_status(), OnlineStatus::Offline);
        let requests = client.http().requests.lock();
        assert!(requests.iter().all(|(_, t)| *t == Duration::from_secs(4)));
    }

    #[test]
    fn timeout_classes() {
        let client = client(vec![
            Ok(HttpResponse::new(200, r#"{"id":7}"#)),
            Ok(HttpResponse::empty(200)),
            Ok(HttpResponse::new(200, r#"{"state":"IN_PROGRESS"}"#)),
            Ok(HttpResponse::empty(200)),
        ]);
        let request = BulkTransferRequest {
            source_location_track: Oid::new("1"),
            target_location_tracks: Vec::new(),
        };
        let id = client.create_bulk_transfer(&request).unwrap();
        assert_eq!(id, BulkTransferExternalId(7));
        client.start_bulk_transfer(id).unwrap();
        let state = client.poll_bulk_transfer(id).unwrap();
        assert_eq!(state.state, RemoteBulkTransferState::InProgress);
        client.redraw_route_numbers(&[Oid::new("1")]).unwrap();

        let requests = client.http().requests.lock();
        let timeouts: Vec<_> = requests.iter().map(|(_, t)| t.as_secs()).collect();
        assert_eq!(timeouts, vec![2, 3, 2, 2]);
        assert_eq!(requests[1].0.path, "/api/split/bulk-transfer/7/start");
    }

    #[test]
    fn create_returns_assigned_oid() {
        let client = client(vec![Ok(HttpResponse::new(200, r#"{"id":"1.2.3.4.5"}"#))]);
        let oid = client
            .create_route_number(&RegistryRouteNumber {
                id: None,
                name: "001".into(),
                description: String::new(),
                state: RegistryLayoutState::InUse,
                nodecollection: None,
            })
            .unwrap();
        assert_eq!(oid, Oid::new("1.2.3.4.5"));
        let requests = client.http().requests.lock();
        assert_eq!(requests[0].0.method, HttpMethod::Post);
        assert_eq!(requests[0].0.path, paths::ROUTE_NUMBERS);
    }
}
