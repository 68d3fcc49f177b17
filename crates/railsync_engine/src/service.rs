//! Service facade and background job wiring.

use crate::bulk_transfer::{
    BulkTransferCoordinator, BulkTransferOutcome, BulkTransferStore, MemoryBulkTransferStore,
};
use crate::client::RegistryClient;
use crate::collaborators::{ChangeSource, Geocoder, SplitSource};
use crate::config::RegistryConfig;
use crate::error::{SyncError, SyncResult};
use crate::history::{MemoryPushHistory, PushErrorRecord, PushHistoryStore, PushStatus};
use crate::http::{HttpClient, ReqwestClient};
use crate::identifiers::{IdentifierStore, MemoryIdentifierStore};
use crate::lock::{ProcessRunLock, RunLock, RunLockGuard, BULK_TRANSFER_LOCK};
use crate::model::{LayoutBranch, PublicationId, SplitId};
use crate::push::{PushOrchestrator, PushOutcome};
use crate::scheduler::Scheduler;
use crate::status::{OnlineStatus, OnlineStatusCache};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Operations the rest of the application uses to drive registry sync.
pub trait RegistrySyncService: Send + Sync {
    /// Pushes everything published since the last successful run.
    fn trigger_push(&self, branch: LayoutBranch, retry_failed: bool) -> SyncResult<PushOutcome>;

    /// Returns the (possibly cached) registry status.
    fn online_status(&self) -> OnlineStatus;

    /// Returns the latest error of a run that covered the publication.
    fn push_error(&self, publication_id: PublicationId) -> SyncResult<Option<PushErrorRecord>>;

    /// Returns the status of the latest run that covered the publication.
    fn push_status(&self, publication_id: PublicationId) -> SyncResult<Option<PushStatus>>;

    /// Advances bulk transfers, waiting at most `timeout` for the lock.
    fn trigger_bulk_transfer_management(
        &self,
        branch: LayoutBranch,
        timeout: Duration,
    ) -> SyncResult<BulkTransferOutcome>;

    /// Sets whether the bulk transfer of a split should be force-started.
    fn set_bulk_transfer_expedited(&self, split_id: SplitId, expedited: bool) -> SyncResult<()>;
}

/// Stores and collaborators shared by the push and bulk transfer paths.
#[derive(Clone)]
pub struct SyncComponents {
    /// OID mapping.
    pub identifiers: Arc<dyn IdentifierStore>,
    /// Push records and errors.
    pub history: Arc<dyn PushHistoryStore>,
    /// Bulk transfer rows.
    pub bulk_transfers: Arc<dyn BulkTransferStore>,
    /// Run lock shared by all service instances.
    pub lock: Arc<dyn RunLock>,
    /// Published changes.
    pub changes: Arc<dyn ChangeSource>,
    /// Published splits.
    pub splits: Arc<dyn SplitSource>,
    /// Address calculation.
    pub geocoder: Arc<dyn Geocoder>,
}

impl SyncComponents {
    /// Components backed by in-memory stores and an in-process lock.
    pub fn in_memory(
        changes: Arc<dyn ChangeSource>,
        splits: Arc<dyn SplitSource>,
        geocoder: Arc<dyn Geocoder>,
    ) -> Self {
        Self {
            identifiers: Arc::new(MemoryIdentifierStore::new()),
            history: Arc::new(MemoryPushHistory::new()),
            bulk_transfers: Arc::new(MemoryBulkTransferStore::new()),
            lock: Arc::new(ProcessRunLock::new()),
            changes,
            splits,
            geocoder,
        }
    }
}

/// The enabled sync service.
pub struct RegistrySync<C: HttpClient> {
    config: RegistryConfig,
    components: SyncComponents,
    push: PushOrchestrator<C>,
    bulk_transfers: BulkTransferCoordinator<C>,
}

impl<C: HttpClient> RegistrySync<C> {
    /// Creates the service and resolves runs interrupted by a previous process.
    pub fn new(http: C, config: RegistryConfig, components: SyncComponents) -> SyncResult<Self> {
        let client = Arc::new(RegistryClient::new(http, config.timeouts));
        let online = Arc::new(OnlineStatusCache::new(config.online_status_ttl));
        let push = PushOrchestrator::new(
            Arc::clone(&client),
            Arc::clone(&components.identifiers),
            Arc::clone(&components.history),
            Arc::clone(&components.changes),
            Arc::clone(&components.geocoder),
            Arc::clone(&components.lock),
            online,
            config.lock_wait,
            config.push_lock_lease,
        );
        let bulk_transfers = BulkTransferCoordinator::new(
            client,
            Arc::clone(&components.history),
            Arc::clone(&components.splits),
            Arc::clone(&components.bulk_transfers),
            Arc::clone(&components.identifiers),
        );
        push.startup()?;
        Ok(Self {
            config,
            components,
            push,
            bulk_transfers,
        })
    }

    /// Returns the push orchestrator.
    pub fn orchestrator(&self) -> &PushOrchestrator<C> {
        &self.push
    }

    /// Returns the bulk transfer coordinator.
    pub fn coordinator(&self) -> &BulkTransferCoordinator<C> {
        &self.bulk_transfers
    }

    /// Returns the shared components.
    pub fn components(&self) -> &SyncComponents {
        &self.components
    }
}

impl<C: HttpClient> RegistrySyncService for RegistrySync<C> {
    fn trigger_push(&self, branch: LayoutBranch, retry_failed: bool) -> SyncResult<PushOutcome> {
        self.push.trigger_push(branch, retry_failed)
    }

    fn online_status(&self) -> OnlineStatus {
        self.push.online_status()
    }

    fn push_error(&self, publication_id: PublicationId) -> SyncResult<Option<PushErrorRecord>> {
        Ok(self
            .components
            .history
            .latest_error_for_publication(publication_id)?)
    }

    fn push_status(&self, publication_id: PublicationId) -> SyncResult<Option<PushStatus>> {
        Ok(self.components.history.status_for_publication(publication_id)?)
    }

    fn trigger_bulk_transfer_management(
        &self,
        branch: LayoutBranch,
        timeout: Duration,
    ) -> SyncResult<BulkTransferOutcome> {
        let Some(_guard) = RunLockGuard::acquire(
            self.components.lock.as_ref(),
            BULK_TRANSFER_LOCK,
            timeout,
            self.config.bulk_transfer_lock_lease,
        )?
        else {
            debug!(%branch, "bulk transfer lock busy");
            return Ok(BulkTransferOutcome::LockBusy);
        };
        self.bulk_transfers.manage(branch)
    }

    fn set_bulk_transfer_expedited(&self, split_id: SplitId, expedited: bool) -> SyncResult<()> {
        self.bulk_transfers
            .set_expedited(self.config.branch, split_id, expedited)
    }
}

/// Stand-in used when the registry integration is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSyncService;

impl RegistrySyncService for DisabledSyncService {
    fn trigger_push(&self, _branch: LayoutBranch, _retry_failed: bool) -> SyncResult<PushOutcome> {
        Ok(PushOutcome::Disabled)
    }

    fn online_status(&self) -> OnlineStatus {
        OnlineStatus::NotConfigured
    }

    fn push_error(&self, _publication_id: PublicationId) -> SyncResult<Option<PushErrorRecord>> {
        Ok(None)
    }

    fn push_status(&self, _publication_id: PublicationId) -> SyncResult<Option<PushStatus>> {
        Ok(None)
    }

    fn trigger_bulk_transfer_management(
        &self,
        _branch: LayoutBranch,
        _timeout: Duration,
    ) -> SyncResult<BulkTransferOutcome> {
        Ok(BulkTransferOutcome::Disabled)
    }

    fn set_bulk_transfer_expedited(&self, _split_id: SplitId, _expedited: bool) -> SyncResult<()> {
        Ok(())
    }
}

/// Builds the service for a configuration: the HTTP-backed one when enabled,
/// [`DisabledSyncService`] otherwise.
pub fn connect(
    config: RegistryConfig,
    components: SyncComponents,
) -> SyncResult<Arc<dyn RegistrySyncService>> {
    if !config.enabled {
        info!("registry integration disabled");
        return Ok(Arc::new(DisabledSyncService));
    }
    let http = ReqwestClient::new(&config.base_url).map_err(|err| {
        SyncError::Configuration(format!("cannot build registry client: {err}"))
    })?;
    info!(base_url = %config.base_url, branch = %config.branch, "registry integration enabled");
    Ok(Arc::new(RegistrySync::new(http, config, components)?))
}

/// Name of the periodic push task.
pub const PUSH_TASK: &str = "registry-push";

/// Name of the periodic bulk transfer task.
pub const BULK_TRANSFER_TASK: &str = "registry-bulk-transfer";

/// Schedules periodic pushes and bulk transfer management.
///
/// A disabled configuration schedules nothing.
pub fn start_background_jobs(
    service: Arc<dyn RegistrySyncService>,
    config: &RegistryConfig,
) -> SyncResult<Scheduler> {
    let mut scheduler = Scheduler::new();
    if !config.enabled {
        return Ok(scheduler);
    }
    let branch = config.branch;
    let spawn_error =
        |err: std::io::Error| SyncError::Configuration(format!("cannot start background job: {err}"));

    let push_service = Arc::clone(&service);
    scheduler
        .schedule(PUSH_TASK, config.initial_delay, config.push_interval, move || {
            match push_service.trigger_push(branch, false) {
                Ok(outcome) => debug!(%branch, ?outcome, "scheduled push done"),
                Err(err) => error!(%branch, error = %err, "scheduled push failed"),
            }
        })
        .map_err(spawn_error)?;

    let lock_wait = config.lock_wait;
    scheduler
        .schedule(
            BULK_TRANSFER_TASK,
            config.initial_delay,
            config.bulk_transfer_interval,
            move || match service.trigger_bulk_transfer_management(branch, lock_wait) {
                Ok(outcome) => debug!(%branch, ?outcome, "scheduled bulk transfer management done"),
                Err(err) => error!(%branch, error = %err, "scheduled bulk transfer management failed"),
            },
        )
        .map_err(spawn_error)?;
    Ok(scheduler)
}
