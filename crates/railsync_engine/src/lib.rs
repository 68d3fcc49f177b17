//! # Railsync Engine
//!
//! Pushes published track layout changes to the external rail registry and
//! follows the bulk transfers the registry runs after location track splits.
//!
//! This crate provides:
//! - Registry client with per-call timeouts and classified failures
//! - External id (OID) mapping per layout branch
//! - Per-type converters for track numbers, location tracks and switches
//! - Push orchestration with history, run lock and online status cache
//! - Bulk transfer state machine
//! - Scheduler for the periodic background jobs
//!
//! ## Architecture
//!
//! A push run replays every publication made since the last successful run:
//! 1. Check that the registry is online
//! 2. Take the push run lock
//! 3. Push track numbers, then location tracks, then switches
//! 4. Request a redraw of the pushed route numbers and location tracks
//!
//! Bulk transfers are managed independently, but only after the publication
//! carrying the split has been pushed, and never while the latest push failed.
//!
//! ## Key Invariants
//!
//! - At most one push run and one bulk transfer run at a time
//! - Push record statuses only move forward
//! - An OID, once assigned, is never reassigned
//! - Deleted entities are pushed before the others of their type
//! - A bulk transfer never moves back from IN_PROGRESS

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bulk_transfer;
mod client;
mod collaborators;
mod config;
pub mod converters;
mod error;
mod history;
mod http;
mod identifiers;
mod lock;
mod model;
mod push;
mod scheduler;
mod service;
mod status;

pub use bulk_transfer::{
    BulkTransfer, BulkTransferCoordinator, BulkTransferOutcome, BulkTransferState,
    BulkTransferStore, MemoryBulkTransferStore,
};
pub use client::RegistryClient;
pub use collaborators::{ChangeSource, Geocoder, SplitSource};
pub use config::{RegistryConfig, RegistryTimeouts};
pub use error::{
    ErrorCategory, ForAsset, Operation, PushFailure, RegistryFailure, RegistryResult, StoreError,
    StoreResult, SyncError, SyncResult,
};
pub use history::{MemoryPushHistory, PushErrorRecord, PushHistoryStore, PushRecord, PushStatus};
pub use http::{HttpClient, LoopbackClient, ReqwestClient};
pub use identifiers::{IdentifierStore, MemoryIdentifierStore};
pub use lock::{
    run_with_lock, LockToken, ProcessRunLock, RunLock, RunLockGuard, BULK_TRANSFER_LOCK, PUSH_LOCK,
};
pub use model::{
    AddressPoint, AlignmentRef, AssetRef, AssetType, DesignId, IntId, JointTrackLink, LayoutBranch,
    LayoutChange, LayoutState, LocationTrack, LocationTrackChange, MetadataSegment,
    PublicationChanges, PublicationId, PublicationRef, PushId, Split, SplitId, SplitTarget, Switch,
    SwitchChange, SwitchJoint, SwitchStateCategory, TrackNumber, TrackNumberChange, TrackType,
};
pub use push::{PushOrchestrator, PushOutcome};
pub use scheduler::Scheduler;
pub use service::{
    connect, start_background_jobs, DisabledSyncService, RegistrySync, RegistrySyncService,
    SyncComponents, BULK_TRANSFER_TASK, PUSH_TASK,
};
pub use status::{OnlineStatus, OnlineStatusCache};
