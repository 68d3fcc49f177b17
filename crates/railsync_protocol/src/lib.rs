//! # railsync Protocol
//!
//! Wire types for the external rail-infrastructure registry.
//!
//! This crate provides:
//! - Track addresses (`KmNumber`, `TrackMeter`) and their registry encoding
//! - Registry resources: route numbers, location tracks, nodes and points
//! - Switch and metadata assets with their properties, locations and geometries
//! - Bulk transfer requests and state responses
//! - HTTP exchange types and the loopback seam used by in-process registries
//! - Endpoint paths shared by the client and the reference registry
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Address encoding
//!
//! Addresses are written as `"KKKK+MMMM.mmm"`. The registry answers node and
//! point reads with a split `{"km": "0012", "m": "0345.678"}` object; both forms
//! decode into the same [`TrackMeter`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod address;
mod asset;
mod bulk_transfer;
mod error;
mod exchange;
mod ids;
pub mod paths;
mod track;

pub use address::{JointNumber, KmNumber, KmRange, TrackMeter};
pub use asset::{
    AssetGeometry, AssetKind, AssetLocation, AssetProperty, AssetStateUpdate, RegistryAsset,
    RegistryAssetState,
};
pub use bulk_transfer::{
    BulkTransferRequest, BulkTransferStateResponse, BulkTransferTarget, RemoteBulkTransferState,
};
pub use error::{ProtocolError, ProtocolResult};
pub use exchange::{HttpMethod, HttpRequest, HttpResponse, LoopbackServer, TransportError};
pub use ids::{BulkTransferExternalId, CreatedResponse, Oid};
pub use track::{
    Coordinate, GeometryType, NodeState, NodeType, NodesType, RegistryGeometry, RegistryLayoutState,
    RegistryLocationTrack, RegistryNode, RegistryNodes, RegistryPoint, RegistryRouteNumber,
    RegistryTrackType,
};
