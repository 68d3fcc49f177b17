//! Push orchestration.
//!
//! A push run takes every publication made since the last successful run and
//! replays its changes against the registry, track numbers first, then
//! location tracks, then switches. The run is recorded in the push history
//! and guarded by the push run lock.

use crate::client::RegistryClient;
use crate::collaborators::{ChangeSource, Geocoder};
use crate::converters::{push_location_tracks, push_switches, push_track_numbers, PushContext};
use crate::error::{PushFailure, SyncError, SyncResult};
use crate::history::{PushHistoryStore, PushStatus};
use crate::http::HttpClient;
use crate::identifiers::IdentifierStore;
use crate::lock::{RunLock, RunLockGuard, PUSH_LOCK};
use crate::model::{LayoutBranch, PublicationChanges, PublicationRef, PushId};
use crate::status::{OnlineStatus, OnlineStatusCache};
use railsync_protocol::Oid;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of a push trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The integration is disabled.
    Disabled,
    /// The registry is unreachable; nothing was recorded.
    Offline,
    /// Another run holds the push lock.
    LockBusy,
    /// The previous run failed and retrying was not requested.
    PreviousPushFailed,
    /// No publication is waiting.
    NothingToPush,
    /// A run was recorded and ended with the given status.
    Completed {
        /// Record of the run.
        push_id: PushId,
        /// Final status.
        status: PushStatus,
    },
}

/// OIDs touched by a run, used for redraw.
#[derive(Debug, Default)]
struct Pushed {
    route_numbers: Vec<Oid>,
    location_tracks: Vec<Oid>,
}

/// Runs pushes against the registry.
pub struct PushOrchestrator<C: HttpClient> {
    client: Arc<RegistryClient<C>>,
    identifiers: Arc<dyn IdentifierStore>,
    history: Arc<dyn PushHistoryStore>,
    changes: Arc<dyn ChangeSource>,
    geocoder: Arc<dyn Geocoder>,
    lock: Arc<dyn RunLock>,
    online: Arc<OnlineStatusCache>,
    lock_wait: Duration,
    lock_lease: Duration,
}

impl<C: HttpClient> PushOrchestrator<C> {
    /// Creates an orchestrator. Call [`startup`](Self::startup) before the first push.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<RegistryClient<C>>,
        identifiers: Arc<dyn IdentifierStore>,
        history: Arc<dyn PushHistoryStore>,
        changes: Arc<dyn ChangeSource>,
        geocoder: Arc<dyn Geocoder>,
        lock: Arc<dyn RunLock>,
        online: Arc<OnlineStatusCache>,
        lock_wait: Duration,
        lock_lease: Duration,
    ) -> Self {
        Self {
            client,
            identifiers,
            history,
            changes,
            geocoder,
            lock,
            online,
            lock_wait,
            lock_lease,
        }
    }

    /// Resolves runs left unfinished by a previous process.
    pub fn startup(&self) -> SyncResult<usize> {
        let resolved = self.history.resolve_stuck_pushes()?;
        for (push_id, status) in &resolved {
            warn!(push = %push_id, %status, "resolved interrupted push");
        }
        Ok(resolved.len())
    }

    /// Returns the registry status, checking it when the cached one expired.
    pub fn online_status(&self) -> OnlineStatus {
        self.online.get_or_check(|| self.client.check_online_status())
    }

    /// Pushes everything published since the last successful run.
    pub fn trigger_push(&self, branch: LayoutBranch, retry_failed: bool) -> SyncResult<PushOutcome> {
        if !self.online_status().is_online() {
            info!(%branch, "registry offline, push skipped");
            return Ok(PushOutcome::Offline);
        }
        let Some(_guard) =
            RunLockGuard::acquire(self.lock.as_ref(), PUSH_LOCK, self.lock_wait, self.lock_lease)?
        else {
            debug!(%branch, "push lock busy");
            return Ok(PushOutcome::LockBusy);
        };
        let outcome = self.push_locked(branch, retry_failed);
        self.online.invalidate();
        outcome
    }

    fn push_locked(&self, branch: LayoutBranch, retry_failed: bool) -> SyncResult<PushOutcome> {
        if let Some(previous) = self.history.latest_push(branch)? {
            match previous.status {
                PushStatus::Successful | PushStatus::ConnectionIssue => {}
                PushStatus::Failed if retry_failed => {
                    info!(%branch, push = %previous.id, "retrying after failed push");
                }
                PushStatus::Failed => {
                    debug!(%branch, push = %previous.id, "previous push failed");
                    return Ok(PushOutcome::PreviousPushFailed);
                }
                // only reachable if a lease expired under a live run
                PushStatus::InProgress | PushStatus::InProgressMValues => {
                    warn!(%branch, push = %previous.id, "previous push still running");
                    return Ok(PushOutcome::LockBusy);
                }
            }
        }

        let since = self.history.latest_successful_publication_moment(branch)?;
        let publications = self.changes.unpushed_changes(branch, since)?;
        if publications.is_empty() {
            debug!(%branch, "nothing to push");
            return Ok(PushOutcome::NothingToPush);
        }

        let refs: Vec<PublicationRef> = publications.iter().map(|p| p.reference()).collect();
        let push_id = self.history.start_push(branch, &refs)?;
        info!(%branch, push = %push_id, publications = refs.len(), "push started");

        let result = match self.push_changes(branch, publications) {
            Ok(pushed) => self.complete(branch, push_id, &pushed),
            Err(SyncError::Push(failure)) => self.record_failure(push_id, &failure),
            Err(err) => Err(err),
        };
        // an unfinished record would block every later run
        result.map_err(|err| self.abandon(branch, push_id, err))
    }

    fn complete(
        &self,
        branch: LayoutBranch,
        push_id: PushId,
        pushed: &Pushed,
    ) -> SyncResult<PushOutcome> {
        self.history
            .update_status(push_id, PushStatus::InProgressMValues)?;
        self.redraw(push_id, pushed);
        self.history.update_status(push_id, PushStatus::Successful)?;
        info!(%branch, push = %push_id, "push successful");
        Ok(PushOutcome::Completed {
            push_id,
            status: PushStatus::Successful,
        })
    }

    /// Finalizes a run that ended in an error as FAILED.
    fn abandon(&self, branch: LayoutBranch, push_id: PushId, err: SyncError) -> SyncError {
        error!(%branch, push = %push_id, error = %err, "push aborted");
        if let Err(store_err) = self.history.update_status(push_id, PushStatus::Failed) {
            error!(push = %push_id, error = %store_err, "failed to finalize push record");
        }
        err
    }

    fn push_changes(
        &self,
        branch: LayoutBranch,
        publications: Vec<PublicationChanges>,
    ) -> SyncResult<Pushed> {
        let ctx = PushContext {
            branch,
            client: self.client.as_ref(),
            identifiers: self.identifiers.as_ref(),
            geocoder: self.geocoder.as_ref(),
        };
        let (mut track_numbers, mut location_tracks, mut switches) =
            (Vec::new(), Vec::new(), Vec::new());
        for publication in publications {
            track_numbers.extend(publication.track_numbers);
            location_tracks.extend(publication.location_tracks);
            switches.extend(publication.switches);
        }

        let route_numbers = push_track_numbers(&ctx, track_numbers)?;
        let location_tracks = push_location_tracks(&ctx, location_tracks)?;
        let switches = push_switches(&ctx, switches)?;
        debug!(
            route_numbers = route_numbers.len(),
            location_tracks = location_tracks.len(),
            switches = switches.len(),
            "changes pushed"
        );
        Ok(Pushed {
            route_numbers,
            location_tracks,
        })
    }

    fn record_failure(&self, push_id: PushId, failure: &PushFailure) -> SyncResult<PushOutcome> {
        let status = if failure.source.is_connectivity() || !self.recheck_online() {
            PushStatus::ConnectionIssue
        } else {
            PushStatus::Failed
        };
        self.history.insert_error(push_id, failure)?;
        self.history.update_status(push_id, status)?;
        match status {
            PushStatus::ConnectionIssue => {
                warn!(push = %push_id, asset = %failure.asset, error = %failure.source,
                    "push interrupted by connection issue");
            }
            _ => {
                error!(push = %push_id, asset = %failure.asset, error = %failure.source,
                    "push failed");
            }
        }
        Ok(PushOutcome::Completed { push_id, status })
    }

    fn recheck_online(&self) -> bool {
        let status = self.client.check_online_status();
        self.online.store(status);
        status.is_online()
    }

    fn redraw(&self, push_id: PushId, pushed: &Pushed) {
        if !pushed.route_numbers.is_empty() {
            if let Err(err) = self.client.redraw_route_numbers(&pushed.route_numbers) {
                warn!(push = %push_id, error = %err, "route number redraw failed");
            }
        }
        if !pushed.location_tracks.is_empty() {
            if let Err(err) = self.client.redraw_location_tracks(&pushed.location_tracks) {
                warn!(push = %push_id, error = %err, "location track redraw failed");
            }
        }
    }
}
