//! Push history: push records, their publications and push errors.

use crate::error::{ErrorCategory, Operation, PushFailure, StoreError, StoreResult};
use crate::model::{AssetRef, LayoutBranch, PublicationId, PublicationRef, PushId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::str::FromStr;

/// Status of a push run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushStatus {
    /// Assets are being pushed.
    InProgress,
    /// Assets are pushed; only the derived geometry recomputation remains.
    InProgressMValues,
    /// Completed.
    Successful,
    /// The registry rejected a call, or the run hit a defect.
    Failed,
    /// The registry could not be reached.
    ConnectionIssue,
}

impl PushStatus {
    /// Stable name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            PushStatus::InProgress => "IN_PROGRESS",
            PushStatus::InProgressMValues => "IN_PROGRESS_M_VALUES",
            PushStatus::Successful => "SUCCESSFUL",
            PushStatus::Failed => "FAILED",
            PushStatus::ConnectionIssue => "CONNECTION_ISSUE",
        }
    }

    /// Returns true for statuses that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PushStatus::Successful | PushStatus::Failed | PushStatus::ConnectionIssue
        )
    }

    /// Returns true if a run may move from `self` to `next`.
    pub fn can_advance_to(&self, next: PushStatus) -> bool {
        use PushStatus::*;
        matches!(
            (*self, next),
            (InProgress, InProgressMValues)
                | (InProgress, Failed)
                | (InProgress, ConnectionIssue)
                | (InProgressMValues, Successful)
                | (InProgressMValues, Failed)
                | (InProgressMValues, ConnectionIssue)
        )
    }

    /// Fails with [`StoreError::InvalidTransition`] unless `self` may advance to `next`.
    pub fn ensure_transition(&self, next: PushStatus) -> StoreResult<()> {
        if self.can_advance_to(next) {
            Ok(())
        } else {
            Err(StoreError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Terminal status a record interrupted in this status is resolved to.
    pub fn swept(&self) -> Option<PushStatus> {
        match self {
            PushStatus::InProgress => Some(PushStatus::Failed),
            PushStatus::InProgressMValues => Some(PushStatus::Successful),
            _ => None,
        }
    }
}

impl fmt::Display for PushStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PushStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(PushStatus::InProgress),
            "IN_PROGRESS_M_VALUES" => Ok(PushStatus::InProgressMValues),
            "SUCCESSFUL" => Ok(PushStatus::Successful),
            "FAILED" => Ok(PushStatus::Failed),
            "CONNECTION_ISSUE" => Ok(PushStatus::ConnectionIssue),
            other => Err(format!("unknown push status: {other}")),
        }
    }
}

/// One push run.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRecord {
    /// Record id.
    pub id: PushId,
    /// Branch the run pushed.
    pub branch: LayoutBranch,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: PushStatus,
    /// Publications covered by the run.
    pub publications: Vec<PublicationRef>,
}

impl PushRecord {
    /// Returns true if the run covered the publication.
    pub fn covers(&self, publication_id: PublicationId) -> bool {
        self.publications.iter().any(|p| p.id == publication_id)
    }
}

/// The asset and call that ended a push run.
#[derive(Debug, Clone, PartialEq)]
pub struct PushErrorRecord {
    /// Error id.
    pub id: i64,
    /// Owning push record.
    pub push_id: PushId,
    /// Part of the asset the failed call touched.
    pub category: ErrorCategory,
    /// What the failed call attempted.
    pub operation: Operation,
    /// The failing asset.
    pub asset: AssetRef,
    /// Registry response body or transport message.
    pub message: String,
    /// When the error was recorded.
    pub created_at: DateTime<Utc>,
}

/// Persistent push history.
pub trait PushHistoryStore: Send + Sync {
    /// Creates an IN_PROGRESS record covering the given publications.
    fn start_push(
        &self,
        branch: LayoutBranch,
        publications: &[PublicationRef],
    ) -> StoreResult<PushId>;

    /// Moves a record to a later status. Terminal statuses set the end time.
    fn update_status(&self, push_id: PushId, status: PushStatus) -> StoreResult<()>;

    /// Records the failure that ended a run.
    fn insert_error(&self, push_id: PushId, failure: &PushFailure) -> StoreResult<PushErrorRecord>;

    /// Returns a record by id.
    fn push(&self, push_id: PushId) -> StoreResult<Option<PushRecord>>;

    /// Returns the most recently started record of a branch.
    fn latest_push(&self, branch: LayoutBranch) -> StoreResult<Option<PushRecord>>;

    /// Returns the latest publication moment covered by a successful run.
    fn latest_successful_publication_moment(
        &self,
        branch: LayoutBranch,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    /// Returns the latest error of a run that covered the publication.
    fn latest_error_for_publication(
        &self,
        publication_id: PublicationId,
    ) -> StoreResult<Option<PushErrorRecord>>;

    /// Returns the status of the latest run that covered the publication.
    fn status_for_publication(&self, publication_id: PublicationId)
        -> StoreResult<Option<PushStatus>>;

    /// Returns true if a successful run covered the publication.
    fn is_publication_pushed(&self, publication_id: PublicationId) -> StoreResult<bool>;

    /// Resolves records left without an end time by an interrupted process.
    fn resolve_stuck_pushes(&self) -> StoreResult<Vec<(PushId, PushStatus)>>;
}

#[derive(Default)]
struct History {
    records: Vec<PushRecord>,
    errors: Vec<PushErrorRecord>,
}

impl History {
    fn record_mut(&mut self, push_id: PushId) -> StoreResult<&mut PushRecord> {
        self.records
            .iter_mut()
            .find(|r| r.id == push_id)
            .ok_or_else(|| StoreError::NotFound(format!("push {push_id}")))
    }

    fn latest_covering(&self, publication_id: PublicationId) -> Option<&PushRecord> {
        self.records.iter().rev().find(|r| r.covers(publication_id))
    }
}

/// In-memory push history.
#[derive(Default)]
pub struct MemoryPushHistory {
    history: RwLock<History>,
}

impl MemoryPushHistory {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all records, oldest first.
    pub fn records(&self) -> Vec<PushRecord> {
        self.history.read().records.clone()
    }

    /// Returns all errors, oldest first.
    pub fn errors(&self) -> Vec<PushErrorRecord> {
        self.history.read().errors.clone()
    }
}

impl PushHistoryStore for MemoryPushHistory {
    fn start_push(
        &self,
        branch: LayoutBranch,
        publications: &[PublicationRef],
    ) -> StoreResult<PushId> {
        let mut history = self.history.write();
        let id = PushId(history.records.len() as i64 + 1);
        history.records.push(PushRecord {
            id,
            branch,
            started_at: Utc::now(),
            ended_at: None,
            status: PushStatus::InProgress,
            publications: publications.to_vec(),
        });
        Ok(id)
    }

    fn update_status(&self, push_id: PushId, status: PushStatus) -> StoreResult<()> {
        let mut history = self.history.write();
        let record = history.record_mut(push_id)?;
        record.status.ensure_transition(status)?;
        record.status = status;
        if status.is_terminal() {
            record.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    fn insert_error(&self, push_id: PushId, failure: &PushFailure) -> StoreResult<PushErrorRecord> {
        let mut history = self.history.write();
        history.record_mut(push_id)?;
        let error = PushErrorRecord {
            id: history.errors.len() as i64 + 1,
            push_id,
            category: failure.source.category(),
            operation: failure.source.operation(),
            asset: failure.asset,
            message: failure.source.diagnostic(),
            created_at: Utc::now(),
        };
        history.errors.push(error.clone());
        Ok(error)
    }

    fn push(&self, push_id: PushId) -> StoreResult<Option<PushRecord>> {
        Ok(self
            .history
            .read()
            .records
            .iter()
            .find(|r| r.id == push_id)
            .cloned())
    }

    fn latest_push(&self, branch: LayoutBranch) -> StoreResult<Option<PushRecord>> {
        Ok(self
            .history
            .read()
            .records
            .iter()
            .rev()
            .find(|r| r.branch == branch)
            .cloned())
    }

    fn latest_successful_publication_moment(
        &self,
        branch: LayoutBranch,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self
            .history
            .read()
            .records
            .iter()
            .filter(|r| r.branch == branch && r.status == PushStatus::Successful)
            .flat_map(|r| r.publications.iter().map(|p| p.published_at))
            .max())
    }

    fn latest_error_for_publication(
        &self,
        publication_id: PublicationId,
    ) -> StoreResult<Option<PushErrorRecord>> {
        let history = self.history.read();
        Ok(history
            .errors
            .iter()
            .rev()
            .find(|e| {
                history
                    .records
                    .iter()
                    .any(|r| r.id == e.push_id && r.covers(publication_id))
            })
            .cloned())
    }

    fn status_for_publication(
        &self,
        publication_id: PublicationId,
    ) -> StoreResult<Option<PushStatus>> {
        Ok(self
            .history
            .read()
            .latest_covering(publication_id)
            .map(|r| r.status))
    }

    fn is_publication_pushed(&self, publication_id: PublicationId) -> StoreResult<bool> {
        Ok(self
            .history
            .read()
            .records
            .iter()
            .any(|r| r.status == PushStatus::Successful && r.covers(publication_id)))
    }

    fn resolve_stuck_pushes(&self) -> StoreResult<Vec<(PushId, PushStatus)>> {
        let mut history = self.history.write();
        let now = Utc::now();
        let mut resolved = Vec::new();
        for record in history.records.iter_mut().filter(|r| r.ended_at.is_none()) {
            if let Some(status) = record.status.swept() {
                record.status = status;
                record.ended_at = Some(now);
                resolved.push((record.id, status));
            }
        }
        Ok(resolved)
    }
}
