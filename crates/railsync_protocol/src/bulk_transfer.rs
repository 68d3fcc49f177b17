//! Bulk transfer: the registry job that moves track assets after a split.

use crate::address::TrackMeter;
use crate::ids::Oid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A target track of a split and the address range it takes over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkTransferTarget {
    /// Registry identifier of the target location track.
    pub location_track: Oid,
    /// First address moved to the target.
    pub start_km_m: TrackMeter,
    /// Last address moved to the target.
    pub end_km_m: TrackMeter,
}

/// Request to create a bulk transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkTransferRequest {
    /// Registry identifier of the split source track.
    pub source_location_track: Oid,
    /// Targets, in address order.
    pub target_location_tracks: Vec<BulkTransferTarget>,
}

/// State of a bulk transfer as reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteBulkTransferState {
    /// Job exists but has not started.
    Created,
    /// Job is moving assets.
    InProgress,
    /// Job completed.
    Finished,
    /// Job failed.
    Failed,
}

/// Poll response for a bulk transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkTransferStateResponse {
    /// Current state of the job.
    pub state: RemoteBulkTransferState,
    /// Total number of assets to move.
    #[serde(default)]
    pub assets_total: Option<u64>,
    /// Number of assets moved so far.
    #[serde(default)]
    pub assets_moved: Option<u64>,
    /// When the job started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job ended.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl BulkTransferStateResponse {
    /// A response carrying only a state.
    pub fn with_state(state: RemoteBulkTransferState) -> Self {
        Self {
            state,
            assets_total: None,
            assets_moved: None,
            started_at: None,
            ended_at: None,
        }
    }
}
