//! Engine wiring.
//!
//! [`SyncContext`] is built once at host startup. It owns every engine
//! component and the background tasks that drive them, and tears the whole
//! thing down cooperatively on [`shutdown`](SyncContext::shutdown).

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use tasksync_core::{CacheService, GraphClient, TenantId};

use crate::cache::MultiLevelCache;
use crate::config::EngineConfig;
use crate::conflict::ConflictManager;
use crate::delta::{BatchQueue, DeltaOptimizer, DeltaQueryClient};
use crate::health::{CheckContext, HealthMonitor, RecoveryExecutor};
use crate::status::SyncStatusTracker;
use crate::store::{
    ConflictStore, DeltaCacheStore, DeltaTokenStore, HealthStore, SyncStore,
};

/// The persistence backends the engine writes to.
///
/// One backend usually implements all five traits; keeping the slots
/// separate lets tests mix fakes freely.
#[derive(Clone)]
pub struct Stores {
    /// Sync operations and resource statuses.
    pub sync: Arc<dyn SyncStore>,
    /// Conflicts, resolutions, and branches.
    pub conflicts: Arc<dyn ConflictStore>,
    /// Health results, alerts, and recoveries.
    pub health: Arc<dyn HealthStore>,
    /// Delta checkpoint tokens.
    pub tokens: Arc<dyn DeltaTokenStore>,
    /// Persistent cache tier.
    pub delta_cache: Arc<dyn DeltaCacheStore>,
}

impl Stores {
    /// Back every slot with one store implementing all five traits.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: SyncStore + ConflictStore + HealthStore + DeltaTokenStore + DeltaCacheStore + 'static,
    {
        Self {
            sync: backend.clone(),
            conflicts: backend.clone(),
            health: backend.clone(),
            tokens: backend.clone(),
            delta_cache: backend,
        }
    }
}

/// Fully wired engine instance for one tenant.
pub struct SyncContext {
    config: EngineConfig,
    cache: Arc<MultiLevelCache>,
    optimizer: Arc<DeltaOptimizer>,
    tracker: Arc<SyncStatusTracker>,
    conflicts: Arc<ConflictManager>,
    monitor: Arc<HealthMonitor>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncContext {
    /// Wire the engine and spawn its background tasks.
    ///
    /// `shared_cache` is the optional cross-process cache tier; pass `None`
    /// to run with memory and persistent tiers only.
    pub fn start(
        config: EngineConfig,
        tenant_id: TenantId,
        graph: Arc<dyn GraphClient>,
        stores: Stores,
        shared_cache: Option<Arc<dyn CacheService>>,
    ) -> Arc<Self> {
        let cache = Arc::new(MultiLevelCache::new(
            &config.cache,
            shared_cache,
            Some(stores.delta_cache.clone()),
        ));

        let queue = Arc::new(BatchQueue::new(config.batch.clone()));
        let query = DeltaQueryClient::new(graph.clone(), stores.tokens.clone());
        let optimizer = Arc::new(DeltaOptimizer::new(
            queue,
            query,
            cache.clone(),
            config.optimizer.clone(),
            config.cache.clone(),
        ));

        let tracker = Arc::new(SyncStatusTracker::new(
            stores.sync.clone(),
            config.tracker.clone(),
        ));
        let conflicts = Arc::new(ConflictManager::new(stores.conflicts.clone()));

        let check_ctx = CheckContext {
            tenant_id,
            tracker: tracker.clone(),
            conflicts: conflicts.clone(),
            cache: cache.clone(),
            store: stores.sync.clone(),
            graph,
            config: config.monitor.clone(),
        };
        let (monitor, recovery_rx) =
            HealthMonitor::new(check_ctx, stores.health.clone(), config.monitor.clone());
        let monitor = Arc::new(monitor);
        let executor = Arc::new(RecoveryExecutor::new(
            tenant_id,
            cache.clone(),
            stores.tokens.clone(),
            conflicts.clone(),
            stores.health.clone(),
            config.monitor.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(optimizer.clone().run(shutdown_rx.clone())),
            tokio::spawn(SyncStatusTracker::run_sweeper(
                tracker.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(monitor.clone().run(shutdown_rx.clone())),
            tokio::spawn(executor.run(recovery_rx, shutdown_rx)),
        ];
        info!(tenant_id = %tenant_id, "Sync engine started");

        Arc::new(Self {
            config,
            cache,
            optimizer,
            tracker,
            conflicts,
            monitor,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    /// The configuration the engine was started with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The multi-level cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<MultiLevelCache> {
        &self.cache
    }

    /// The delta query optimizer.
    #[must_use]
    pub fn optimizer(&self) -> &Arc<DeltaOptimizer> {
        &self.optimizer
    }

    /// The sync status tracker.
    #[must_use]
    pub fn tracker(&self) -> &Arc<SyncStatusTracker> {
        &self.tracker
    }

    /// The conflict manager.
    #[must_use]
    pub fn conflicts(&self) -> &Arc<ConflictManager> {
        &self.conflicts
    }

    /// The health monitor.
    #[must_use]
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// Stop background tasks and wait for them to drain.
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send(true).is_err() {
            return;
        }
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(error = %e, "Background task panicked during shutdown");
                }
            }
        }
        info!("Sync engine stopped");
    }
}
