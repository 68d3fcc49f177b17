//! A sync service wired to an in-process registry.
//!
//! [`SyncHarness`] owns the fake registry, the change and split sources, the
//! geocoder and the stores. Tests set up layout and registry state through it,
//! then drive [`SyncHarness::service`] and inspect what the registry saw.

use crate::geocoder::StraightLineGeocoder;
use crate::logging::init_test_tracing;
use crate::sources::{StaticChangeSource, StaticSplitSource};
use railsync_engine::{
    AssetRef, IdentifierStore, LayoutBranch, LoopbackClient, RegistryConfig, RegistrySync,
    SyncComponents, SyncResult,
};
use railsync_protocol::Oid;
use railsync_registry_server::{RegistryServer, ServerConfig};
use railsync_store_sqlite::{SqliteStore, SqliteStoreConfig};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Base URL used in harness configurations. Never contacted.
pub const HARNESS_BASE_URL: &str = "http://registry.test";

/// The client type of harness services.
pub type HarnessClient = LoopbackClient<Arc<RegistryServer>>;

/// Fake registry plus everything the engine needs around it.
pub struct SyncHarness {
    /// The registry.
    pub server: Arc<RegistryServer>,
    /// Published changes.
    pub changes: Arc<StaticChangeSource>,
    /// Published splits.
    pub splits: Arc<StaticSplitSource>,
    /// Geocoder.
    pub geocoder: Arc<StraightLineGeocoder>,
    components: SyncComponents,
    config: RegistryConfig,
    _dir: Option<TempDir>,
}

impl SyncHarness {
    /// A harness over in-memory stores.
    pub fn new() -> Self {
        Self::build(ServerConfig::default(), |changes, splits, geocoder| {
            (SyncComponents::in_memory(changes, splits, geocoder), None)
        })
    }

    /// A harness over a SQLite database in a temporary directory.
    pub fn with_sqlite() -> Self {
        Self::build(ServerConfig::default(), |changes, splits, geocoder| {
            let dir = TempDir::new().expect("temp dir");
            let store = SqliteStore::open(&SqliteStoreConfig::new(dir.path().join("sync.db")))
                .expect("open sqlite store");
            (store.components(changes, splits, geocoder), Some(dir))
        })
    }

    /// A harness over in-memory stores and a registry with the given config.
    pub fn with_server_config(server: ServerConfig) -> Self {
        Self::build(server, |changes, splits, geocoder| {
            (SyncComponents::in_memory(changes, splits, geocoder), None)
        })
    }

    fn build(
        server: ServerConfig,
        stores: impl FnOnce(
            Arc<StaticChangeSource>,
            Arc<StaticSplitSource>,
            Arc<StraightLineGeocoder>,
        ) -> (SyncComponents, Option<TempDir>),
    ) -> Self {
        init_test_tracing();
        let changes = Arc::new(StaticChangeSource::new());
        let splits = Arc::new(StaticSplitSource::new());
        let geocoder = Arc::new(StraightLineGeocoder::default());
        let (components, dir) = stores(
            Arc::clone(&changes),
            Arc::clone(&splits),
            Arc::clone(&geocoder),
        );
        Self {
            server: Arc::new(RegistryServer::new(server)),
            changes,
            splits,
            geocoder,
            components,
            config: RegistryConfig::new(HARNESS_BASE_URL)
                .with_online_status_ttl(Duration::ZERO)
                .with_lock_wait(Duration::from_millis(20)),
            _dir: dir,
        }
    }

    /// Replaces the service configuration.
    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Service configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Stores and collaborators.
    pub fn components(&self) -> &SyncComponents {
        &self.components
    }

    /// Creates a service over the harness state.
    ///
    /// Every call runs startup recovery, like a restarted process would.
    pub fn try_service(&self) -> SyncResult<RegistrySync<HarnessClient>> {
        RegistrySync::new(
            LoopbackClient::new(Arc::clone(&self.server)),
            self.config.clone(),
            self.components.clone(),
        )
    }

    /// Like [`try_service`](Self::try_service), panicking on failure.
    pub fn service(&self) -> RegistrySync<HarnessClient> {
        self.try_service().expect("start sync service")
    }

    /// Records an OID mapping on the main branch.
    pub fn map_oid(&self, asset: AssetRef, oid: &str) {
        self.components
            .identifiers
            .insert(LayoutBranch::Main, asset, &Oid::new(oid))
            .expect("record oid");
    }

    /// OID mapped to an asset on the main branch.
    pub fn oid(&self, asset: AssetRef) -> Option<Oid> {
        self.components
            .identifiers
            .external_id(LayoutBranch::Main, asset)
            .expect("read oid")
    }
}

impl Default for SyncHarness {
    fn default() -> Self {
        Self::new()
    }
}
