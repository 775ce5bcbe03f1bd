//! Recovery execution.
//!
//! Consumes queued [`RecoveryOperation`]s and performs the action each one
//! names. Failures are recorded on the operation and logged; they never take
//! the executor down.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, instrument, warn};

use tasksync_core::{ResourceType, TenantId};

use crate::cache::MultiLevelCache;
use crate::config::MonitorConfig;
use crate::conflict::ConflictManager;
use crate::error::SyncResult;
use crate::health::types::RecoveryOperation;
use crate::store::{DeltaTokenStore, HealthStore};
use crate::types::{RecoveryAction, RecoveryStatus, ResolutionStrategy};

/// Executes recovery actions queued by the health monitor.
pub struct RecoveryExecutor {
    tenant_id: TenantId,
    cache: Arc<MultiLevelCache>,
    tokens: Arc<dyn DeltaTokenStore>,
    conflicts: Arc<ConflictManager>,
    health_store: Arc<dyn HealthStore>,
    config: MonitorConfig,
}

impl RecoveryExecutor {
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        cache: Arc<MultiLevelCache>,
        tokens: Arc<dyn DeltaTokenStore>,
        conflicts: Arc<ConflictManager>,
        health_store: Arc<dyn HealthStore>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            tenant_id,
            cache,
            tokens,
            conflicts,
            health_store,
            config,
        }
    }

    /// Drain the queue until it closes or the shutdown flag flips.
    ///
    /// Recoveries left pending or running by an earlier process are resumed
    /// first; every action is idempotent.
    pub async fn run(
        self: Arc<Self>,
        mut queue: mpsc::Receiver<RecoveryOperation>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Recovery executor started");
        match self.health_store.in_flight_recoveries().await {
            Ok(stale) => {
                for op in stale {
                    info!(recovery_id = %op.id, action = %op.action, "Resuming recovery");
                    self.execute(op).await;
                }
            }
            Err(e) => warn!(error = %e, "Cannot load in-flight recoveries"),
        }
        loop {
            tokio::select! {
                op = queue.recv() => {
                    let Some(op) = op else { break };
                    self.execute(op).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        // Finish anything already queued before stopping.
        while let Ok(op) = queue.try_recv() {
            self.execute(op).await;
        }
        info!("Recovery executor stopped");
    }

    /// Execute one recovery, recording its lifecycle on the store.
    #[instrument(skip(self, op), fields(recovery_id = %op.id, action = %op.action))]
    pub async fn execute(&self, mut op: RecoveryOperation) {
        op.status = RecoveryStatus::Running;
        op.started_at = Some(Utc::now());
        self.save(&op).await;

        let outcome = self.perform(op.action).await;
        op.completed_at = Some(Utc::now());
        match outcome {
            Ok(()) => {
                op.status = RecoveryStatus::Completed;
                info!("Recovery completed");
            }
            Err(e) => {
                op.status = RecoveryStatus::Failed;
                op.error = Some(e.to_string());
                error!(error = %e, "Recovery failed");
            }
        }
        self.save(&op).await;
    }

    async fn perform(&self, action: RecoveryAction) -> SyncResult<()> {
        match action {
            RecoveryAction::ResetCache => {
                self.cache.clear().await;
                Ok(())
            }
            RecoveryAction::ForceFullSync => {
                // Dropping the delta tokens forces the next run of each
                // resource type down the full-resync path.
                for resource_type in [ResourceType::Plan, ResourceType::Task] {
                    self.tokens
                        .invalidate_token(self.tenant_id, resource_type)
                        .await?;
                }
                Ok(())
            }
            RecoveryAction::ResolvePendingConflicts => {
                let resolved = self
                    .conflicts
                    .resolve_pending(
                        self.tenant_id,
                        self.config.max_conflicts_per_recovery,
                        ResolutionStrategy::LastWriteWins,
                    )
                    .await?;
                info!(resolved, "Resolved pending conflicts");
                Ok(())
            }
        }
    }

    async fn save(&self, op: &RecoveryOperation) {
        if let Err(e) = self.health_store.save_recovery(op).await {
            warn!(recovery_id = %op.id, error = %e, "Failed to persist recovery state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::store::MemoryStore;
    use crate::types::HealthCheckKind;
    use serde_json::{json, Map};

    fn executor() -> (Arc<RecoveryExecutor>, Arc<MemoryStore>, TenantId) {
        let store = Arc::new(MemoryStore::new());
        let tenant = TenantId::new();
        let executor = RecoveryExecutor::new(
            tenant,
            Arc::new(MultiLevelCache::new(&CacheConfig::default(), None, None)),
            store.clone(),
            Arc::new(ConflictManager::new(store.clone())),
            store.clone(),
            MonitorConfig::default(),
        );
        (Arc::new(executor), store, tenant)
    }

    #[tokio::test]
    async fn test_reset_cache_clears_entries() {
        let (executor, store, _tenant) = executor();
        executor
            .cache
            .set("probe", json!(1), None, &[crate::cache::CacheTier::Memory])
            .await;

        let op = RecoveryOperation::new(
            RecoveryAction::ResetCache,
            HealthCheckKind::CacheAvailability,
            None,
            Map::new(),
        );
        executor.execute(op.clone()).await;

        assert!(executor.cache.get("probe").await.is_none());
        let saved = store
            .in_flight_recoveries()
            .await
            .unwrap()
            .into_iter()
            .find(|o| o.id == op.id);
        assert!(saved.is_none(), "completed recovery must not stay in flight");
    }

    #[tokio::test]
    async fn test_force_full_sync_invalidates_delta_tokens() {
        let (executor, store, tenant) = executor();
        store
            .save_token(tenant, ResourceType::Task, "https://delta/1")
            .await
            .unwrap();
        store
            .save_token(tenant, ResourceType::Plan, "https://delta/2")
            .await
            .unwrap();

        let op = RecoveryOperation::new(
            RecoveryAction::ForceFullSync,
            HealthCheckKind::SyncPerformance,
            None,
            Map::new(),
        );
        executor.execute(op).await;

        assert!(store.load_token(tenant, ResourceType::Task).await.unwrap().is_none());
        assert!(store.load_token(tenant, ResourceType::Plan).await.unwrap().is_none());
    }
}
