//! Generic registry assets: switches and location track metadata.

use crate::address::JointNumber;
use crate::ids::Oid;
use crate::track::{RegistryGeometry, RegistryNodes};
use serde::{Deserialize, Serialize};

/// Kind of a registry asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// A switch.
    Turnout,
    /// Descriptive metadata attached to a stretch of a location track.
    LocationTrackMetadata,
}

/// Lifecycle state of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistryAssetState {
    /// In use.
    #[serde(rename = "IN USE")]
    InUse,
    /// Not in use.
    #[serde(rename = "NOT IN USE")]
    NotInUse,
    /// Deleted.
    #[serde(rename = "DELETED")]
    Deleted,
}

/// A typed asset property.
///
/// Exactly one of the value fields is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetProperty {
    /// Property name.
    pub name: String,
    /// Enumerated value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_value: Option<String>,
    /// Integer value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integer_value: Option<i64>,
    /// Free text value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
}

impl AssetProperty {
    /// Creates a free text property.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enum_value: None,
            integer_value: None,
            string_value: Some(value.into()),
        }
    }

    /// Creates an enumerated property.
    pub fn enumeration(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enum_value: Some(value.into()),
            integer_value: None,
            string_value: None,
        }
    }

    /// Creates an integer property.
    pub fn integer(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            enum_value: None,
            integer_value: Some(value),
            string_value: None,
        }
    }
}

/// Where an asset lies on one location track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetLocation {
    /// Location track the nodes are addressed on.
    #[serde(rename = "locationtrack")]
    pub location_track: Oid,
    /// Nodes on that track.
    pub nodecollection: RegistryNodes,
    /// Ordering priority among the asset's locations (1 = primary).
    pub priority: u32,
}

/// Location of a single switch joint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetGeometry {
    /// Joint the geometry belongs to.
    pub joint_number: JointNumber,
    /// Point geometry.
    pub geometry: RegistryGeometry,
}

/// Body of an asset state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetStateUpdate {
    /// New lifecycle state.
    pub state: RegistryAssetState,
}

/// A registry asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryAsset {
    /// Registry identifier; absent when the registry should assign one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Oid>,
    /// Asset kind.
    #[serde(rename = "type")]
    pub kind: AssetKind,
    /// Lifecycle state.
    pub state: RegistryAssetState,
    /// Typed properties.
    #[serde(default)]
    pub properties: Vec<AssetProperty>,
    /// Locations on location tracks.
    #[serde(default)]
    pub locations: Vec<AssetLocation>,
    /// Joint geometries.
    #[serde(default)]
    pub geometries: Vec<AssetGeometry>,
}

impl RegistryAsset {
    /// Creates a location track metadata asset covering one stretch of track.
    pub fn metadata(properties: Vec<AssetProperty>, location: AssetLocation) -> Self {
        Self {
            id: None,
            kind: AssetKind::LocationTrackMetadata,
            state: RegistryAssetState::InUse,
            properties,
            locations: vec![location],
            geometries: Vec::new(),
        }
    }

    /// Returns the property with the given name.
    pub fn property(&self, name: &str) -> Option<&AssetProperty> {
        self.properties.iter().find(|p| p.name == name)
    }
}
