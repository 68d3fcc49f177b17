//! Bulk transfer tracking.
//!
//! After a location track split is pushed, the registry moves the assets of
//! the source track onto the targets in a long-running job. Each split gets a
//! [`BulkTransfer`] row that the [`BulkTransferCoordinator`] advances one step
//! per invocation:
//!
//! ```text
//! PENDING ──create──► CREATED ──start/poll──► IN_PROGRESS ──poll──► SUCCESSFUL
//!    │                   │                        │                  FAILED
//!    └───────────────────┴──── fatal failure ─────┴────────────────► FAILED
//! ```
//!
//! Transient registry failures only raise `temporary_failure`; the state is
//! kept and the next invocation retries.

use crate::client::RegistryClient;
use crate::collaborators::SplitSource;
use crate::error::{RegistryFailure, StoreError, StoreResult, SyncError, SyncResult};
use crate::history::{PushHistoryStore, PushStatus};
use crate::http::HttpClient;
use crate::identifiers::IdentifierStore;
use crate::model::{AssetRef, IntId, LayoutBranch, Split, SplitId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use railsync_protocol::{
    BulkTransferExternalId, BulkTransferRequest, BulkTransferStateResponse, BulkTransferTarget,
    Oid, RemoteBulkTransferState,
};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Local state of a bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkTransferState {
    /// Split pushed, job not yet created.
    Pending,
    /// Job created in the registry.
    Created,
    /// Job is moving assets.
    InProgress,
    /// Job finished.
    Successful,
    /// Job failed, or the registry rejected a request for it.
    Failed,
}

impl BulkTransferState {
    /// Stable name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkTransferState::Pending => "PENDING",
            BulkTransferState::Created => "CREATED",
            BulkTransferState::InProgress => "IN_PROGRESS",
            BulkTransferState::Successful => "SUCCESSFUL",
            BulkTransferState::Failed => "FAILED",
        }
    }

    /// Returns true if the transfer will never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BulkTransferState::Successful | BulkTransferState::Failed)
    }
}

impl fmt::Display for BulkTransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BulkTransferState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BulkTransferState::Pending),
            "CREATED" => Ok(BulkTransferState::Created),
            "IN_PROGRESS" => Ok(BulkTransferState::InProgress),
            "SUCCESSFUL" => Ok(BulkTransferState::Successful),
            "FAILED" => Ok(BulkTransferState::Failed),
            other => Err(format!("unknown bulk transfer state: {other}")),
        }
    }
}

/// Tracking row of the bulk transfer of one split.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkTransfer {
    /// Split whose assets are moved.
    pub split_id: SplitId,
    /// Branch of the split.
    pub branch: LayoutBranch,
    /// Local state.
    pub state: BulkTransferState,
    /// Registry job id, once created.
    pub external_id: Option<BulkTransferExternalId>,
    /// Set while the last registry call failed transiently.
    pub temporary_failure: bool,
    /// Whether the job should be force-started.
    pub expedited_start: bool,
    /// Total number of assets to move.
    pub assets_total: Option<u64>,
    /// Number of assets moved so far.
    pub assets_moved: Option<u64>,
    /// When the registry started the job.
    pub started_at: Option<DateTime<Utc>>,
    /// When the registry ended the job.
    pub ended_at: Option<DateTime<Utc>>,
    /// Last time the row was written.
    pub updated_at: DateTime<Utc>,
}

impl BulkTransfer {
    /// A new transfer awaiting creation.
    pub fn pending(split_id: SplitId, branch: LayoutBranch, expedited_start: bool) -> Self {
        Self {
            split_id,
            branch,
            state: BulkTransferState::Pending,
            external_id: None,
            temporary_failure: false,
            expedited_start,
            assets_total: None,
            assets_moved: None,
            started_at: None,
            ended_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Fails unless `next` may replace this row; finished transfers are final.
    pub fn ensure_replaceable_by(&self, next: &BulkTransfer) -> StoreResult<()> {
        if self.state.is_terminal() && self != next {
            return Err(StoreError::InvalidTransition {
                from: self.state.to_string(),
                to: next.state.to_string(),
            });
        }
        Ok(())
    }

    fn refresh(&mut self, response: &BulkTransferStateResponse) {
        self.assets_total = response.assets_total.or(self.assets_total);
        self.assets_moved = response.assets_moved.or(self.assets_moved);
        self.started_at = response.started_at.or(self.started_at);
        self.ended_at = response.ended_at.or(self.ended_at);
    }
}

/// Persistent bulk transfer rows. Rows are never deleted.
pub trait BulkTransferStore: Send + Sync {
    /// Returns the transfer of a split.
    fn get(&self, split_id: SplitId) -> StoreResult<Option<BulkTransfer>>;

    /// Inserts or replaces the transfer of a split.
    ///
    /// A terminal row is never overwritten.
    fn save(&self, transfer: &BulkTransfer) -> StoreResult<()>;

    /// Returns all transfers of a branch, by split id.
    fn list(&self, branch: LayoutBranch) -> StoreResult<Vec<BulkTransfer>>;
}

/// In-memory bulk transfer store.
#[derive(Debug, Default)]
pub struct MemoryBulkTransferStore {
    rows: RwLock<BTreeMap<SplitId, BulkTransfer>>,
}

impl MemoryBulkTransferStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BulkTransferStore for MemoryBulkTransferStore {
    fn get(&self, split_id: SplitId) -> StoreResult<Option<BulkTransfer>> {
        Ok(self.rows.read().get(&split_id).cloned())
    }

    fn save(&self, transfer: &BulkTransfer) -> StoreResult<()> {
        let mut rows = self.rows.write();
        if let Some(current) = rows.get(&transfer.split_id) {
            current.ensure_replaceable_by(transfer)?;
        }
        rows.insert(transfer.split_id, transfer.clone());
        Ok(())
    }

    fn list(&self, branch: LayoutBranch) -> StoreResult<Vec<BulkTransfer>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|t| t.branch == branch)
            .cloned()
            .collect())
    }
}

/// Result of one coordinator invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkTransferOutcome {
    /// The integration is disabled.
    Disabled,
    /// Another invocation holds the bulk transfer lock.
    LockBusy,
    /// The latest push failed; transfers wait for it to be resolved.
    Blocked,
    /// No split needs attention.
    Idle,
    /// The oldest open split has not been pushed yet.
    WaitingForPush(SplitId),
    /// The transfer of a split was stepped.
    Advanced(BulkTransfer),
}

enum Step {
    Created(BulkTransferExternalId),
    Started,
    Polled(BulkTransferStateResponse),
}

/// Drives bulk transfers through their registry lifecycle.
pub struct BulkTransferCoordinator<C: HttpClient> {
    client: Arc<RegistryClient<C>>,
    history: Arc<dyn PushHistoryStore>,
    splits: Arc<dyn SplitSource>,
    transfers: Arc<dyn BulkTransferStore>,
    identifiers: Arc<dyn IdentifierStore>,
}

impl<C: HttpClient> BulkTransferCoordinator<C> {
    /// Creates a coordinator.
    pub fn new(
        client: Arc<RegistryClient<C>>,
        history: Arc<dyn PushHistoryStore>,
        splits: Arc<dyn SplitSource>,
        transfers: Arc<dyn BulkTransferStore>,
        identifiers: Arc<dyn IdentifierStore>,
    ) -> Self {
        Self {
            client,
            history,
            splits,
            transfers,
            identifiers,
        }
    }

    /// Advances the oldest open transfer of a branch by one step.
    ///
    /// Registry failures are recorded on the transfer row; only store,
    /// collaborator and precondition errors are returned.
    pub fn manage(&self, branch: LayoutBranch) -> SyncResult<BulkTransferOutcome> {
        let latest = self.history.latest_push(branch)?;
        if latest.is_some_and(|push| push.status == PushStatus::Failed) {
            debug!(%branch, "latest push failed, bulk transfers blocked");
            return Ok(BulkTransferOutcome::Blocked);
        }

        for split in self.splits.published_splits(branch)? {
            let current = self.transfers.get(split.id)?;
            if current.as_ref().is_some_and(|t| t.state.is_terminal()) {
                continue;
            }
            if !self.history.is_publication_pushed(split.publication_id)? {
                debug!(split = %split.id, publication = %split.publication_id, "split not pushed yet");
                return Ok(BulkTransferOutcome::WaitingForPush(split.id));
            }
            let transfer = current
                .unwrap_or_else(|| BulkTransfer::pending(split.id, branch, split.expedited));
            return self.advance(branch, &split, transfer).map(BulkTransferOutcome::Advanced);
        }
        Ok(BulkTransferOutcome::Idle)
    }

    /// Sets whether the transfer of a split should be force-started.
    pub fn set_expedited(
        &self,
        branch: LayoutBranch,
        split_id: SplitId,
        expedited: bool,
    ) -> SyncResult<()> {
        let mut transfer = self
            .transfers
            .get(split_id)?
            .unwrap_or_else(|| BulkTransfer::pending(split_id, branch, expedited));
        if transfer.state.is_terminal() {
            return Err(SyncError::precondition(format!(
                "bulk transfer of split {split_id} already ended {}",
                transfer.state
            )));
        }
        transfer.expedited_start = expedited;
        transfer.updated_at = Utc::now();
        self.transfers.save(&transfer)?;
        info!(split = %split_id, expedited, "bulk transfer expedite flag set");
        Ok(())
    }

    fn advance(
        &self,
        branch: LayoutBranch,
        split: &Split,
        mut transfer: BulkTransfer,
    ) -> SyncResult<BulkTransfer> {
        let step = match (transfer.state, transfer.external_id) {
            (BulkTransferState::Pending, _) => {
                let request = self.request(branch, split)?;
                self.client.create_bulk_transfer(&request).map(Step::Created)
            }
            (BulkTransferState::Created, Some(id)) if transfer.expedited_start => {
                self.client.start_bulk_transfer(id).map(|()| Step::Started)
            }
            (BulkTransferState::Created | BulkTransferState::InProgress, Some(id)) => {
                self.client.poll_bulk_transfer(id).map(Step::Polled)
            }
            (state, _) => {
                return Err(SyncError::precondition(format!(
                    "bulk transfer of split {} is {state} without a registry job",
                    split.id
                )))
            }
        };

        match step {
            Ok(step) => {
                transfer.temporary_failure = false;
                apply(&mut transfer, step);
            }
            Err(failure) if is_temporary(&failure) => {
                warn!(split = %split.id, state = %transfer.state, error = %failure,
                    "bulk transfer call failed temporarily");
                transfer.temporary_failure = true;
            }
            Err(failure) => {
                error!(split = %split.id, state = %transfer.state, error = %failure,
                    "bulk transfer failed");
                transfer.temporary_failure = false;
                transfer.state = BulkTransferState::Failed;
            }
        }
        transfer.updated_at = Utc::now();
        self.transfers.save(&transfer)?;
        Ok(transfer)
    }

    fn request(&self, branch: LayoutBranch, split: &Split) -> SyncResult<BulkTransferRequest> {
        let oid = |id: IntId| -> SyncResult<Oid> {
            let asset = AssetRef::location_track(id);
            self.identifiers
                .external_id(branch, asset)?
                .ok_or_else(|| {
                    SyncError::precondition(format!("{asset} of split {} has no OID", split.id))
                })
        };
        let target_location_tracks = split
            .targets
            .iter()
            .map(|target| {
                Ok(BulkTransferTarget {
                    location_track: oid(target.location_track_id)?,
                    start_km_m: target.start,
                    end_km_m: target.end,
                })
            })
            .collect::<SyncResult<Vec<_>>>()?;
        Ok(BulkTransferRequest {
            source_location_track: oid(split.source_track_id)?,
            target_location_tracks,
        })
    }
}

fn apply(transfer: &mut BulkTransfer, step: Step) {
    let previous = transfer.state;
    match step {
        Step::Created(id) => {
            transfer.external_id = Some(id);
            transfer.state = BulkTransferState::Created;
        }
        Step::Started => transfer.state = BulkTransferState::InProgress,
        Step::Polled(response) => {
            transfer.refresh(&response);
            transfer.state = match response.state {
                // a lagging poll must not move the transfer back
                RemoteBulkTransferState::Created => previous,
                RemoteBulkTransferState::InProgress => BulkTransferState::InProgress,
                RemoteBulkTransferState::Finished => BulkTransferState::Successful,
                RemoteBulkTransferState::Failed => BulkTransferState::Failed,
            };
        }
    }
    if transfer.state != previous {
        info!(split = %transfer.split_id, from = %previous, to = %transfer.state,
            "bulk transfer advanced");
    }
}

/// Timeouts, transport failures and gateway errors are retried later.
fn is_temporary(failure: &RegistryFailure) -> bool {
    failure.is_connectivity() || matches!(failure.status(), Some(502..=504))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCategory, Operation};

    fn transfer(state: BulkTransferState) -> BulkTransfer {
        BulkTransfer {
            state,
            external_id: Some(BulkTransferExternalId(7)),
            ..BulkTransfer::pending(SplitId(1), LayoutBranch::Main, false)
        }
    }

    fn polled(state: RemoteBulkTransferState) -> Step {
        Step::Polled(BulkTransferStateResponse::with_state(state))
    }

    #[test]
    fn created_poll_never_regresses() {
        let mut t = transfer(BulkTransferState::InProgress);
        apply(&mut t, polled(RemoteBulkTransferState::Created));
        assert_eq!(t.state, BulkTransferState::InProgress);

        let mut t = transfer(BulkTransferState::Created);
        apply(&mut t, polled(RemoteBulkTransferState::Created));
        assert_eq!(t.state, BulkTransferState::Created);
    }

    #[test]
    fn remote_states_map_to_local() {
        let mut t = transfer(BulkTransferState::Created);
        apply(&mut t, polled(RemoteBulkTransferState::InProgress));
        assert_eq!(t.state, BulkTransferState::InProgress);
        apply(&mut t, polled(RemoteBulkTransferState::Finished));
        assert_eq!(t.state, BulkTransferState::Successful);

        let mut t = transfer(BulkTransferState::InProgress);
        apply(&mut t, polled(RemoteBulkTransferState::Failed));
        assert_eq!(t.state, BulkTransferState::Failed);
    }

    #[test]
    fn poll_refreshes_counters() {
        let mut t = transfer(BulkTransferState::InProgress);
        t.assets_total = Some(40);
        let response = BulkTransferStateResponse {
            assets_moved: Some(12),
            ..BulkTransferStateResponse::with_state(RemoteBulkTransferState::InProgress)
        };
        apply(&mut t, Step::Polled(response));
        assert_eq!(t.assets_total, Some(40));
        assert_eq!(t.assets_moved, Some(12));
    }

    #[test]
    fn gateway_errors_are_temporary() {
        let rejected = |status| RegistryFailure::Rejected {
            category: ErrorCategory::Location,
            operation: Operation::FetchExisting,
            status,
            body: String::new(),
        };
        for status in [502, 503, 504] {
            assert!(is_temporary(&rejected(status)));
        }
        for status in [400, 404, 409, 500] {
            assert!(!is_temporary(&rejected(status)));
        }
        assert!(is_temporary(&RegistryFailure::Timeout {
            category: ErrorCategory::Location,
            operation: Operation::Create,
        }));
        assert!(!is_temporary(&RegistryFailure::Malformed {
            category: ErrorCategory::Location,
            operation: Operation::FetchExisting,
            message: "eof".into(),
        }));
    }

    #[test]
    fn finished_rows_are_never_rewritten() {
        let store = MemoryBulkTransferStore::new();
        let done = transfer(BulkTransferState::Successful);
        store.save(&done).unwrap();
        store.save(&done).unwrap();

        let reopened = transfer(BulkTransferState::InProgress);
        assert!(matches!(
            store.save(&reopened),
            Err(StoreError::InvalidTransition { .. })
        ));
        assert_eq!(store.get(SplitId(1)).unwrap(), Some(done));
    }

    #[test]
    fn state_names_parse_back() {
        for state in [
            BulkTransferState::Pending,
            BulkTransferState::Created,
            BulkTransferState::InProgress,
            BulkTransferState::Successful,
            BulkTransferState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<BulkTransferState>().unwrap(), state);
        }
    }
}
