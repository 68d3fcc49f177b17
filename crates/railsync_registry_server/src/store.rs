//! Registry resources held by the reference registry.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use chrono::Utc;
use railsync_protocol::{
    AssetGeometry, AssetKind, AssetLocation, AssetProperty, BulkTransferExternalId,
    BulkTransferRequest, BulkTransferStateResponse, KmNumber, NodeType, Oid, RegistryAsset,
    RegistryAssetState, RegistryLocationTrack, RegistryNode, RegistryNodes, RegistryPoint,
    RegistryRouteNumber, RemoteBulkTransferState, TrackMeter,
};
use std::collections::{BTreeMap, HashMap};

/// Which alignments a redraw request covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedrawKind {
    /// Route numbers.
    RouteNumbers,
    /// Location tracks.
    LocationTracks,
}

/// A bulk transfer job.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkTransferJob {
    /// The creating request.
    pub request: BulkTransferRequest,
    /// What a state poll answers.
    pub state: BulkTransferStateResponse,
    /// Number of forced start requests received.
    pub start_requests: usize,
}

/// All resources of the reference registry.
#[derive(Debug)]
pub struct RegistryStore {
    oid_prefix: String,
    next_oid: u64,
    next_bulk_transfer: i64,
    route_numbers: BTreeMap<Oid, RegistryRouteNumber>,
    location_tracks: BTreeMap<Oid, RegistryLocationTrack>,
    assets: BTreeMap<Oid, RegistryAsset>,
    points: HashMap<Oid, BTreeMap<KmNumber, Vec<RegistryPoint>>>,
    bulk_transfers: BTreeMap<BulkTransferExternalId, BulkTransferJob>,
    redraws: Vec<(RedrawKind, Vec<Oid>)>,
}

impl RegistryStore {
    /// Creates an empty registry.
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            oid_prefix: config.oid_prefix.clone(),
            next_oid: config.first_oid,
            next_bulk_transfer: config.first_bulk_transfer_id,
            route_numbers: BTreeMap::new(),
            location_tracks: BTreeMap::new(),
            assets: BTreeMap::new(),
            points: HashMap::new(),
            bulk_transfers: BTreeMap::new(),
            redraws: Vec::new(),
        }
    }

    fn contains(&self, oid: &Oid) -> bool {
        self.route_numbers.contains_key(oid)
            || self.location_tracks.contains_key(oid)
            || self.assets.contains_key(oid)
    }

    /// Honours a requested OID, or assigns the next one.
    fn assign_oid(&mut self, requested: Option<Oid>) -> ServerResult<Oid> {
        if let Some(oid) = requested {
            if self.contains(&oid) {
                return Err(ServerError::Conflict(format!("{oid} already exists")));
            }
            return Ok(oid);
        }
        loop {
            let oid = Oid::new(format!("{}.{}", self.oid_prefix, self.next_oid));
            self.next_oid += 1;
            if !self.contains(&oid) {
                return Ok(oid);
            }
        }
    }

    // ------------------------------------------------------------------
    // Route numbers and location tracks
    // ------------------------------------------------------------------

    /// Returns a route number.
    pub fn route_number(&self, oid: &Oid) -> Option<&RegistryRouteNumber> {
        self.route_numbers.get(oid)
    }

    /// Stores a new route number.
    pub fn create_route_number(&mut self, mut route_number: RegistryRouteNumber) -> ServerResult<Oid> {
        let oid = self.assign_oid(route_number.id.take())?;
        route_number.id = Some(oid.clone());
        self.route_numbers.insert(oid.clone(), route_number);
        Ok(oid)
    }

    /// Updates the properties and the given endpoint nodes of a route number.
    pub fn update_route_number(&mut self, update: RegistryRouteNumber) -> ServerResult<()> {
        let oid = required_id(update.id.as_ref())?;
        let current = self
            .route_numbers
            .get_mut(&oid)
            .ok_or_else(|| ServerError::NotFound(format!("route number {oid}")))?;
        current.name = update.name;
        current.description = update.description;
        current.state = update.state;
        merge_nodes(&mut current.nodecollection, update.nodecollection);
        Ok(())
    }

    /// Returns a location track.
    pub fn location_track(&self, oid: &Oid) -> Option<&RegistryLocationTrack> {
        self.location_tracks.get(oid)
    }

    fn check_track_references(&self, track: &RegistryLocationTrack) -> ServerResult<()> {
        if !self.route_numbers.contains_key(&track.route_number) {
            return Err(ServerError::InvalidRequest(format!(
                "unknown route number {}",
                track.route_number
            )));
        }
        match &track.duplicate_of {
            Some(duplicate) if !self.location_tracks.contains_key(duplicate) => Err(
                ServerError::InvalidRequest(format!("unknown duplicate location track {duplicate}")),
            ),
            _ => Ok(()),
        }
    }

    /// Stores a new location track.
    pub fn create_location_track(
        &mut self,
        mut track: RegistryLocationTrack,
    ) -> ServerResult<Oid> {
        self.check_track_references(&track)?;
        let oid = self.assign_oid(track.id.take())?;
        track.id = Some(oid.clone());
        self.location_tracks.insert(oid.clone(), track);
        Ok(oid)
    }

    /// Updates the properties and the given endpoint nodes of a location track.
    pub fn update_location_track(&mut self, update: RegistryLocationTrack) -> ServerResult<()> {
        let oid = required_id(update.id.as_ref())?;
        if !self.location_tracks.contains_key(&oid) {
            return Err(ServerError::NotFound(format!("location track {oid}")));
        }
        self.check_track_references(&update)?;
        let current = self
            .location_tracks
            .get_mut(&oid)
            .ok_or_else(|| ServerError::NotFound(format!("location track {oid}")))?;
        let RegistryLocationTrack {
            name,
            description,
            track_type,
            state,
            route_number,
            owner,
            duplicate_of,
            nodecollection,
            ..
        } = update;
        current.name = name;
        current.description = description;
        current.track_type = track_type;
        current.state = state;
        current.route_number = route_number;
        current.owner = owner;
        current.duplicate_of = duplicate_of;
        merge_nodes(&mut current.nodecollection, nodecollection);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Points
    // ------------------------------------------------------------------

    fn points_mut(&mut self, oid: &Oid) -> ServerResult<&mut BTreeMap<KmNumber, Vec<RegistryPoint>>> {
        if !self.route_numbers.contains_key(oid) && !self.location_tracks.contains_key(oid) {
            return Err(ServerError::NotFound(format!("alignment {oid}")));
        }
        Ok(self.points.entry(oid.clone()).or_default())
    }

    /// Returns the points of an alignment in address order.
    pub fn points(&self, oid: &Oid) -> Vec<RegistryPoint> {
        self.points
            .get(oid)
            .map(|by_km| by_km.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Adds points to an alignment.
    pub fn add_points(&mut self, oid: &Oid, points: Vec<RegistryPoint>) -> ServerResult<()> {
        let by_km = self.points_mut(oid)?;
        for point in points {
            by_km.entry(point.km_m.km()).or_default().push(point);
        }
        for points in by_km.values_mut() {
            sort_points(points);
        }
        Ok(())
    }

    /// Replaces the points of every kilometre present in `points`.
    pub fn replace_points(&mut self, oid: &Oid, points: Vec<RegistryPoint>) -> ServerResult<()> {
        let by_km = self.points_mut(oid)?;
        let mut replaced: BTreeMap<KmNumber, Vec<RegistryPoint>> = BTreeMap::new();
        for point in points {
            replaced.entry(point.km_m.km()).or_default().push(point);
        }
        for (km, mut points) in replaced {
            sort_points(&mut points);
            by_km.insert(km, points);
        }
        Ok(())
    }

    /// Deletes the points of one kilometre, or all of them.
    ///
    /// Metadata is located on points and goes with them: the part of every
    /// metadata stretch of the track lying on a deleted kilometre is removed.
    pub fn delete_points(&mut self, oid: &Oid, km: Option<KmNumber>) -> ServerResult<()> {
        self.points_mut(oid)?;
        match km {
            Some(km) => {
                let (from, to) = (TrackMeter::new(km, 0.0), TrackMeter::new(km.next(), 0.0));
                self.cut_metadata(oid, from, to)?;
                if let Some(by_km) = self.points.get_mut(oid) {
                    by_km.remove(&km);
                }
            }
            None => {
                self.assets.retain(|_, asset| !is_metadata_on(asset, oid));
                if let Some(by_km) = self.points.get_mut(oid) {
                    by_km.clear();
                }
            }
        }
        Ok(())
    }

    /// The point stored at an address, or a bare address when there is none.
    fn point_at(&self, oid: &Oid, address: TrackMeter) -> RegistryPoint {
        self.points
            .get(oid)
            .and_then(|by_km| by_km.get(&address.km()))
            .and_then(|points| points.iter().find(|p| p.km_m == address))
            .cloned()
            .unwrap_or(RegistryPoint {
                km_m: address,
                geometry: None,
            })
    }

    /// Removes `[from, to)` from the metadata stretches of a track.
    ///
    /// A stretch running through the whole cut is split in two; the second
    /// part gets a new OID.
    fn cut_metadata(&mut self, track: &Oid, from: TrackMeter, to: TrackMeter) -> ServerResult<()> {
        let from_point = self.point_at(track, from);
        let to_point = self.point_at(track, to);
        let affected: Vec<Oid> = self
            .assets
            .iter()
            .filter(|(_, asset)| is_metadata_on(asset, track))
            .map(|(oid, _)| oid.clone())
            .collect();
        for oid in affected {
            let Some(asset) = self.assets.remove(&oid) else {
                continue;
            };
            let mut pieces = cut_stretch(asset, from, &from_point, to, &to_point).into_iter();
            if let Some(mut first) = pieces.next() {
                first.id = Some(oid.clone());
                self.assets.insert(oid, first);
            }
            for mut rest in pieces {
                let rest_oid = self.assign_oid(None)?;
                rest.id = Some(rest_oid.clone());
                self.assets.insert(rest_oid, rest);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Assets
    // ------------------------------------------------------------------

    /// Returns an asset.
    pub fn asset(&self, oid: &Oid) -> Option<&RegistryAsset> {
        self.assets.get(oid)
    }

    /// Returns every asset, by OID.
    pub fn assets(&self) -> Vec<RegistryAsset> {
        self.assets.values().cloned().collect()
    }

    fn asset_mut(&mut self, oid: &Oid) -> ServerResult<&mut RegistryAsset> {
        self.assets
            .get_mut(oid)
            .ok_or_else(|| ServerError::NotFound(format!("asset {oid}")))
    }

    /// Stores a new asset.
    pub fn create_asset(&mut self, mut asset: RegistryAsset) -> ServerResult<Oid> {
        for location in &asset.locations {
            self.check_location(location)?;
        }
        let oid = self.assign_oid(asset.id.take())?;
        asset.id = Some(oid.clone());
        self.assets.insert(oid.clone(), asset);
        Ok(oid)
    }

    /// Sets the given properties, keeping the others.
    pub fn update_asset_properties(
        &mut self,
        oid: &Oid,
        properties: Vec<AssetProperty>,
    ) -> ServerResult<()> {
        let asset = self.asset_mut(oid)?;
        for property in properties {
            match asset.properties.iter_mut().find(|p| p.name == property.name) {
                Some(current) => *current = property,
                None => asset.properties.push(property),
            }
        }
        Ok(())
    }

    /// Changes the lifecycle state of an asset.
    pub fn update_asset_state(&mut self, oid: &Oid, state: RegistryAssetState) -> ServerResult<()> {
        self.asset_mut(oid)?.state = state;
        Ok(())
    }

    fn check_location(&self, location: &AssetLocation) -> ServerResult<()> {
        if self.location_tracks.contains_key(&location.location_track) {
            Ok(())
        } else {
            Err(ServerError::InvalidRequest(format!(
                "unknown location track {}",
                location.location_track
            )))
        }
    }

    /// Adds the first locations of an asset.
    pub fn create_asset_locations(
        &mut self,
        oid: &Oid,
        locations: Vec<AssetLocation>,
    ) -> ServerResult<()> {
        for location in &locations {
            self.check_location(location)?;
        }
        let asset = self.asset_mut(oid)?;
        if !asset.locations.is_empty() {
            return Err(ServerError::Conflict(format!("asset {oid} already has locations")));
        }
        asset.locations = locations;
        Ok(())
    }

    /// Replaces the locations of an asset.
    pub fn replace_asset_locations(
        &mut self,
        oid: &Oid,
        locations: Vec<AssetLocation>,
    ) -> ServerResult<()> {
        for location in &locations {
            self.check_location(location)?;
        }
        self.asset_mut(oid)?.locations = locations;
        Ok(())
    }

    /// Replaces the joint geometries of an asset.
    pub fn replace_asset_geometries(
        &mut self,
        oid: &Oid,
        geometries: Vec<AssetGeometry>,
    ) -> ServerResult<()> {
        self.asset_mut(oid)?.geometries = geometries;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Redraw
    // ------------------------------------------------------------------

    /// Records a redraw request.
    pub fn redraw(&mut self, kind: RedrawKind, oids: Vec<Oid>) -> ServerResult<()> {
        let known = |oid: &Oid| match kind {
            RedrawKind::RouteNumbers => self.route_numbers.contains_key(oid),
            RedrawKind::LocationTracks => self.location_tracks.contains_key(oid),
        };
        if let Some(unknown) = oids.iter().find(|oid| !known(oid)) {
            return Err(ServerError::InvalidRequest(format!("cannot redraw unknown {unknown}")));
        }
        self.redraws.push((kind, oids));
        Ok(())
    }

    /// Returns the recorded redraw requests.
    pub fn redraws(&self) -> &[(RedrawKind, Vec<Oid>)] {
        &self.redraws
    }

    // ------------------------------------------------------------------
    // Bulk transfers
    // ------------------------------------------------------------------

    /// Creates a bulk transfer job.
    pub fn create_bulk_transfer(
        &mut self,
        request: BulkTransferRequest,
    ) -> ServerResult<BulkTransferExternalId> {
        let tracks = std::iter::once(&request.source_location_track)
            .chain(request.target_location_tracks.iter().map(|t| &t.location_track));
        for oid in tracks {
            if !self.location_tracks.contains_key(oid) {
                return Err(ServerError::InvalidRequest(format!("unknown location track {oid}")));
            }
        }
        let id = BulkTransferExternalId(self.next_bulk_transfer);
        self.next_bulk_transfer += 1;
        self.bulk_transfers.insert(
            id,
            BulkTransferJob {
                request,
                state: BulkTransferStateResponse::with_state(RemoteBulkTransferState::Created),
                start_requests: 0,
            },
        );
        Ok(id)
    }

    fn job_mut(&mut self, id: BulkTransferExternalId) -> ServerResult<&mut BulkTransferJob> {
        self.bulk_transfers
            .get_mut(&id)
            .ok_or_else(|| ServerError::NotFound(format!("bulk transfer {id}")))
    }

    /// Forces a created job to start.
    pub fn start_bulk_transfer(&mut self, id: BulkTransferExternalId) -> ServerResult<()> {
        let job = self.job_mut(id)?;
        job.start_requests += 1;
        match job.state.state {
            RemoteBulkTransferState::Created => {
                job.state.state = RemoteBulkTransferState::InProgress;
                job.state.started_at = Some(Utc::now());
                Ok(())
            }
            RemoteBulkTransferState::InProgress => Ok(()),
            state => Err(ServerError::Conflict(format!(
                "bulk transfer {id} already ended in {state:?}"
            ))),
        }
    }

    /// Returns a job.
    pub fn bulk_transfer(&self, id: BulkTransferExternalId) -> Option<&BulkTransferJob> {
        self.bulk_transfers.get(&id)
    }

    /// Overrides what the next state polls answer.
    pub fn set_bulk_transfer_state(
        &mut self,
        id: BulkTransferExternalId,
        state: BulkTransferStateResponse,
    ) -> ServerResult<()> {
        self.job_mut(id)?.state = state;
        Ok(())
    }
}

fn required_id(id: Option<&Oid>) -> ServerResult<Oid> {
    id.cloned()
        .ok_or_else(|| ServerError::InvalidRequest("update without id".into()))
}

fn is_metadata_on(asset: &RegistryAsset, track: &Oid) -> bool {
    asset.kind == AssetKind::LocationTrackMetadata
        && asset.locations.iter().any(|l| &l.location_track == track)
}

/// Start and end node of a metadata stretch.
fn stretch_nodes(asset: &RegistryAsset) -> Option<(RegistryNode, RegistryNode)> {
    let nodes = &asset.locations.first()?.nodecollection;
    Some((
        nodes.node(NodeType::StartPoint)?.clone(),
        nodes.node(NodeType::EndPoint)?.clone(),
    ))
}

fn with_stretch(
    asset: &RegistryAsset,
    start: RegistryNode,
    end: RegistryNode,
) -> Option<RegistryAsset> {
    let mut piece = asset.clone();
    piece.locations.first_mut()?.nodecollection = RegistryNodes::endpoints(Some(start), Some(end))?;
    Some(piece)
}

/// What is left of a metadata stretch after removing `[from, to)`.
fn cut_stretch(
    asset: RegistryAsset,
    from: TrackMeter,
    from_point: &RegistryPoint,
    to: TrackMeter,
    to_point: &RegistryPoint,
) -> Vec<RegistryAsset> {
    let Some((start, end)) = stretch_nodes(&asset) else {
        return vec![asset];
    };
    if end.point.km_m <= from || start.point.km_m >= to {
        return vec![asset];
    }
    let mut pieces = Vec::new();
    if start.point.km_m < from {
        let cut_end = RegistryNode::endpoint(NodeType::EndPoint, end.state, from_point.clone());
        pieces.extend(with_stretch(&asset, start.clone(), cut_end));
    }
    if end.point.km_m > to {
        let cut_start = RegistryNode::endpoint(NodeType::StartPoint, start.state, to_point.clone());
        pieces.extend(with_stretch(&asset, cut_start, end));
    }
    pieces
}

fn sort_points(points: &mut [RegistryPoint]) {
    points.sort_by(|a, b| a.km_m.meters().total_cmp(&b.km_m.meters()));
}

/// Applies the endpoint nodes of an update; nodes it omits are kept.
fn merge_nodes(current: &mut Option<RegistryNodes>, update: Option<RegistryNodes>) {
    let Some(update) = update else {
        return;
    };
    let Some(existing) = current.as_ref() else {
        *current = Some(update);
        return;
    };
    let pick = |node_type| {
        update
            .node(node_type)
            .or_else(|| existing.node(node_type))
            .cloned()
    };
    *current = RegistryNodes::endpoints(pick(NodeType::StartPoint), pick(NodeType::EndPoint));
}
