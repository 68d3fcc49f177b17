//! Route numbers, location tracks and their node/point representation.

use crate::address::{JointNumber, TrackMeter};
use crate::ids::Oid;
use serde::{Deserialize, Serialize};

/// A planar coordinate in the layout's projected reference system.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Coordinate {
    /// Easting.
    pub x: f64,
    /// Northing.
    pub y: f64,
}

impl Coordinate {
    /// Creates a coordinate.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another coordinate.
    pub fn distance(&self, other: &Coordinate) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Geometry kind of a registry geometry. Only points are exchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GeometryType {
    /// A single point.
    #[default]
    Point,
}

/// GeoJSON-like point geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryGeometry {
    /// Geometry kind.
    #[serde(rename = "type", default)]
    pub geometry_type: GeometryType,
    /// `[x, y]` coordinates.
    pub coordinates: [f64; 2],
}

impl RegistryGeometry {
    /// Creates a point geometry.
    pub fn point(coordinate: Coordinate) -> Self {
        Self {
            geometry_type: GeometryType::Point,
            coordinates: [coordinate.x, coordinate.y],
        }
    }

    /// Returns the coordinate of the point.
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.coordinates[0], self.coordinates[1])
    }
}

/// An addressed point on a route number or location track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryPoint {
    /// Track address of the point.
    #[serde(rename = "kmM")]
    pub km_m: TrackMeter,
    /// Location of the point, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<RegistryGeometry>,
}

impl RegistryPoint {
    /// Creates a point with a known location.
    pub fn new(km_m: TrackMeter, coordinate: Coordinate) -> Self {
        Self {
            km_m,
            geometry: Some(RegistryGeometry::point(coordinate)),
        }
    }
}

/// Role of a node in a node collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// First point of an alignment.
    StartPoint,
    /// Last point of an alignment.
    EndPoint,
    /// A switch joint.
    Joint,
}

/// Whether a node is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Node is in use.
    #[serde(rename = "IN USE")]
    InUse,
    /// Node is no longer in use.
    #[serde(rename = "NOT IN USE")]
    NotInUse,
}

/// A node: an addressed point with a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryNode {
    /// Role of the node.
    pub node_type: NodeType,
    /// Usage state.
    pub state: NodeState,
    /// Location and address.
    pub point: RegistryPoint,
    /// Joint number, for switch joint nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joint_number: Option<JointNumber>,
}

impl RegistryNode {
    /// Creates an endpoint node.
    pub fn endpoint(node_type: NodeType, state: NodeState, point: RegistryPoint) -> Self {
        Self {
            node_type,
            state,
            point,
            joint_number: None,
        }
    }

    /// Creates a joint node.
    pub fn joint(joint_number: JointNumber, point: RegistryPoint) -> Self {
        Self {
            node_type: NodeType::Joint,
            state: NodeState::InUse,
            point,
            joint_number: Some(joint_number),
        }
    }
}

/// Which nodes a node collection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodesType {
    /// Both endpoints.
    StartAndEnd,
    /// Only the start point.
    Start,
    /// Only the end point.
    End,
    /// Switch joints.
    Joints,
}

/// A collection of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryNodes {
    /// The nodes.
    pub nodes: Vec<RegistryNode>,
    /// Which nodes are carried.
    #[serde(rename = "type")]
    pub nodes_type: NodesType,
}

impl RegistryNodes {
    /// Builds an endpoint collection. Returns `None` when neither node is given.
    pub fn endpoints(start: Option<RegistryNode>, end: Option<RegistryNode>) -> Option<Self> {
        let nodes_type = match (&start, &end) {
            (Some(_), Some(_)) => NodesType::StartAndEnd,
            (Some(_), None) => NodesType::Start,
            (None, Some(_)) => NodesType::End,
            (None, None) => return None,
        };
        Some(Self {
            nodes: start.into_iter().chain(end).collect(),
            nodes_type,
        })
    }

    /// Builds a joint collection.
    pub fn joints(nodes: Vec<RegistryNode>) -> Self {
        Self {
            nodes,
            nodes_type: NodesType::Joints,
        }
    }

    /// Returns the first node of the given role.
    pub fn node(&self, node_type: NodeType) -> Option<&RegistryNode> {
        self.nodes.iter().find(|node| node.node_type == node_type)
    }

    /// Returns a copy with every node set to the given state.
    pub fn with_state(&self, state: NodeState) -> Self {
        let mut copy = self.clone();
        for node in &mut copy.nodes {
            node.state = state;
        }
        copy
    }
}

/// Lifecycle state of a route number or location track in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistryLayoutState {
    /// In use.
    #[serde(rename = "IN USE")]
    InUse,
    /// Built but not in use.
    #[serde(rename = "NOT IN USE")]
    NotInUse,
    /// Deleted.
    #[serde(rename = "DELETED")]
    Deleted,
}

/// Location track classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistryTrackType {
    /// Main track.
    Main,
    /// Side track.
    Side,
    /// Trap track.
    Trap,
    /// Chord track.
    Chord,
}

/// A route number (internally: a track number).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRouteNumber {
    /// Registry identifier; absent when the registry should assign one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Oid>,
    /// Route number name (the track number).
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Lifecycle state.
    pub state: RegistryLayoutState,
    /// Endpoint nodes, when being written or returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodecollection: Option<RegistryNodes>,
}

/// A location track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryLocationTrack {
    /// Registry identifier; absent when the registry should assign one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Oid>,
    /// Track name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Track classification.
    #[serde(rename = "type")]
    pub track_type: RegistryTrackType,
    /// Lifecycle state.
    pub state: RegistryLayoutState,
    /// Route number the track belongs to.
    #[serde(rename = "routenumber")]
    pub route_number: Oid,
    /// Owner organisation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Track this one duplicates, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<Oid>,
    /// Endpoint nodes, when being written or returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodecollection: Option<RegistryNodes>,
}
