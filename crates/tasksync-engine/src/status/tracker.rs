//! Sync operation status tracking.
//!
//! Active operations live in memory behind per-operation locks; every
//! mutation is written through to the store, which stays the system of
//! record. Completion is idempotent and terminal states stick: the first
//! terminal transition wins and later ones are ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use tasksync_core::{OperationId, ResourceType, TenantId};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::TrackerConfig;
use crate::error::{ErrorCategory, SyncError, SyncResult};
use crate::status::model::{
    MetricsDelta, ResourceSyncStatus, SyncHealth, SyncOperation,
};
use crate::store::SyncStore;
use crate::types::{ResourceSyncState, SyncStatus};

/// Consecutive failures at which a tenant's health flips unhealthy.
const UNHEALTHY_FAILURE_STREAK: u32 = 3;

/// Success rate under which a tenant's health is flagged.
const UNHEALTHY_SUCCESS_RATE: f64 = 0.5;

/// Tracks active sync operations and derives tenant health.
pub struct SyncStatusTracker {
    store: Arc<dyn SyncStore>,
    config: TrackerConfig,
    active: RwLock<HashMap<OperationId, Arc<Mutex<SyncOperation>>>>,
    health_cache: Mutex<HashMap<TenantId, (SyncHealth, Instant)>>,
}

impl SyncStatusTracker {
    /// Wire a tracker over its store.
    #[must_use]
    pub fn new(store: Arc<dyn SyncStore>, config: TrackerConfig) -> Self {
        Self {
            store,
            config,
            active: RwLock::new(HashMap::new()),
            health_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Register and start an operation.
    ///
    /// The operation is persisted as running before the id is returned; a
    /// crash right after this call leaves a record the heartbeat sweep will
    /// eventually fail over.
    #[instrument(skip(self, op), fields(tenant = %op.tenant_id))]
    pub async fn start_sync_operation(&self, mut op: SyncOperation) -> SyncResult<OperationId> {
        let now = Utc::now();
        op.status = SyncStatus::Running;
        op.started_at = Some(now);
        op.last_heartbeat = Some(now);
        op.metrics.start_time = Some(now);

        self.store.save_operation(&op).await?;
        let id = op.id;
        self.active
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(op)));
        info!(operation_id = %id, "Sync operation started");
        Ok(id)
    }

    /// Update the status of an active operation.
    ///
    /// Terminal statuses are routed through [`complete_sync_operation`] so
    /// finalization happens exactly one way.
    ///
    /// [`complete_sync_operation`]: Self::complete_sync_operation
    pub async fn update_sync_status(
        &self,
        id: OperationId,
        status: SyncStatus,
    ) -> SyncResult<()> {
        if status.is_terminal() {
            return self.complete_sync_operation(id, status, None).await.map(|_| ());
        }

        let handle = self.active_handle(id).await?;
        let mut op = handle.lock().await;
        if op.is_terminal() {
            debug!(operation_id = %id, "Ignoring status update on terminal operation");
            return Ok(());
        }
        op.status = status;
        op.last_heartbeat = Some(Utc::now());
        self.store.save_operation(&op).await
    }

    /// Apply a cumulative metrics delta to an active operation.
    pub async fn update_metrics(&self, id: OperationId, delta: &MetricsDelta) -> SyncResult<()> {
        let handle = self.active_handle(id).await?;
        let mut op = handle.lock().await;
        if op.is_terminal() {
            return Ok(());
        }
        op.metrics.apply(delta);
        op.last_heartbeat = Some(Utc::now());
        self.store.save_operation(&op).await
    }

    /// Count an error against the operation's per-category counters.
    pub async fn record_error(&self, id: OperationId, error: &SyncError) -> SyncResult<()> {
        let mut delta = MetricsDelta::default();
        match error.category() {
            ErrorCategory::RateLimit => delta.rate_limit_errors = 1,
            ErrorCategory::Network => delta.network_errors = 1,
            ErrorCategory::Permission => delta.permission_errors = 1,
            ErrorCategory::Validation => delta.validation_errors = 1,
            ErrorCategory::Other => delta.other_errors = 1,
        }
        self.update_metrics(id, &delta).await
    }

    /// Record the outcome of one resource within an active operation.
    ///
    /// Updates the embedded status, keeps the matching metrics counter in
    /// step, and writes the durable per-resource row through the store.
    pub async fn update_resource_status(
        &self,
        id: OperationId,
        resource_type: ResourceType,
        resource_id: &str,
        state: ResourceSyncState,
    ) -> SyncResult<()> {
        let handle = self.active_handle(id).await?;
        let mut op = handle.lock().await;
        if op.is_terminal() {
            return Ok(());
        }

        let status = op
            .resources
            .entry(resource_id.to_string())
            .or_insert_with(|| {
                ResourceSyncStatus::new(id, resource_type, resource_id.to_string())
            });
        status.transition(state);
        let durable = status.clone();

        let mut delta = MetricsDelta {
            processed_resources: 1,
            ..MetricsDelta::default()
        };
        match state {
            ResourceSyncState::Synced => delta.successful_resources = 1,
            ResourceSyncState::Failed => delta.failed_resources = 1,
            ResourceSyncState::Skipped => delta.skipped_resources = 1,
            ResourceSyncState::Conflict => delta.conflicted_resources = 1,
            ResourceSyncState::Pending => delta.processed_resources = 0,
        }
        op.metrics.apply(&delta);
        op.last_heartbeat = Some(Utc::now());

        let tenant_id = op.tenant_id;
        self.store.save_operation(&op).await?;
        self.store.save_resource_status(tenant_id, &durable).await
    }

    /// Signal that an operation is still alive.
    pub async fn heartbeat(&self, id: OperationId) -> SyncResult<()> {
        let handle = self.active_handle(id).await?;
        let mut op = handle.lock().await;
        if op.is_terminal() {
            return Ok(());
        }
        op.last_heartbeat = Some(Utc::now());
        self.store.save_operation(&op).await
    }

    /// Finalize an operation. Idempotent: the first terminal status sticks.
    ///
    /// Returns the operation as finalized (or as previously finalized, when
    /// called again).
    #[instrument(skip(self))]
    pub async fn complete_sync_operation(
        &self,
        id: OperationId,
        status: SyncStatus,
        error: Option<String>,
    ) -> SyncResult<SyncOperation> {
        if !status.is_terminal() {
            return Err(SyncError::contract(format!(
                "completion status must be terminal, got {status}"
            )));
        }

        let handle = self.active.read().await.get(&id).cloned();
        let finalized = match handle {
            Some(handle) => {
                let mut op = handle.lock().await;
                if op.is_terminal() {
                    debug!(operation_id = %id, "Completion repeated, keeping first terminal state");
                    op.clone()
                } else {
                    let now = Utc::now();
                    op.status = status;
                    op.completed_at = Some(now);
                    op.metrics.end_time = Some(now);
                    op.error = error;
                    self.store.save_operation(&op).await?;
                    info!(operation_id = %id, %status, "Sync operation completed");
                    op.clone()
                }
            }
            None => {
                // Not in the active set: already completed, or orphaned by a
                // restart. The stored terminal state sticks either way.
                let mut op = self
                    .store
                    .load_operation(id)
                    .await?
                    .ok_or_else(|| SyncError::not_found("operation", id))?;
                if !op.is_terminal() {
                    let now = Utc::now();
                    op.status = status;
                    op.completed_at = Some(now);
                    op.metrics.end_time = Some(now);
                    op.error = error;
                    self.store.save_operation(&op).await?;
                    info!(operation_id = %id, %status, "Orphaned operation completed");
                }
                op
            }
        };

        self.active.write().await.remove(&id);
        // The next health read must see this completion.
        self.health_cache
            .lock()
            .await
            .remove(&finalized.tenant_id);
        Ok(finalized)
    }

    /// Fetch an operation, preferring the live copy over the store.
    pub async fn get_operation(&self, id: OperationId) -> SyncResult<SyncOperation> {
        if let Some(handle) = self.active.read().await.get(&id) {
            return Ok(handle.lock().await.clone());
        }
        self.store
            .load_operation(id)
            .await?
            .ok_or_else(|| SyncError::not_found("operation", id))
    }

    /// Number of operations currently active.
    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Fail every active operation whose heartbeat has gone stale.
    ///
    /// Returns the ids that were failed over.
    pub async fn sweep_stale_operations(&self) -> Vec<OperationId> {
        let now = Utc::now();
        let stale: Vec<OperationId> = {
            let active = self.active.read().await;
            let mut found = Vec::new();
            for (id, handle) in active.iter() {
                let op = handle.lock().await;
                if !op.is_terminal() && op.heartbeat_stale(self.config.heartbeat_timeout, now) {
                    found.push(*id);
                }
            }
            found
        };

        let mut failed = Vec::new();
        for id in stale {
            warn!(operation_id = %id, "Heartbeat stale, failing operation over");
            match self
                .complete_sync_operation(
                    id,
                    SyncStatus::Failed,
                    Some("no heartbeat within timeout".to_string()),
                )
                .await
            {
                Ok(_) => failed.push(id),
                Err(e) => warn!(operation_id = %id, error = %e, "Stale sweep failed"),
            }
        }
        failed
    }

    /// Periodic heartbeat sweep. Runs until the shutdown flag flips.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.sweep_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Heartbeat sweeper started");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let swept = self.sweep_stale_operations().await;
                    if !swept.is_empty() {
                        info!(count = swept.len(), "Swept stale operations");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Heartbeat sweeper stopped");
    }

    /// Tenant health over the trailing 24 hours, memoized briefly.
    pub async fn get_sync_health(&self, tenant_id: TenantId) -> SyncResult<SyncHealth> {
        {
            let cache = self.health_cache.lock().await;
            if let Some((health, at)) = cache.get(&tenant_id) {
                if at.elapsed() < self.config.health_ttl {
                    return Ok(health.clone());
                }
            }
        }

        let health = self.compute_health(tenant_id).await?;
        self.health_cache
            .lock()
            .await
            .insert(tenant_id, (health.clone(), Instant::now()));
        Ok(health)
    }

    async fn compute_health(&self, tenant_id: TenantId) -> SyncResult<SyncHealth> {
        let since = Utc::now() - ChronoDuration::hours(24);
        let mut operations = self
            .store
            .completed_operations_since(tenant_id, since)
            .await?;
        operations.sort_by_key(|op| op.completed_at);

        let operations_24h = operations.len() as u64;
        let successful_24h = operations
            .iter()
            .filter(|op| op.status == SyncStatus::Completed)
            .count() as u64;
        let success_rate_24h = if operations_24h == 0 {
            1.0
        } else {
            successful_24h as f64 / operations_24h as f64
        };

        let last_success_at = operations
            .iter()
            .filter(|op| op.status == SyncStatus::Completed)
            .filter_map(|op| op.completed_at)
            .max();
        let last_failure_at = operations
            .iter()
            .filter(|op| op.status == SyncStatus::Failed)
            .filter_map(|op| op.completed_at)
            .max();

        // Streak counts backwards from the most recent completion.
        let mut consecutive_failures = 0;
        for op in operations.iter().rev() {
            match op.status {
                SyncStatus::Failed => consecutive_failures += 1,
                SyncStatus::Completed => break,
                _ => {}
            }
        }

        let durations: Vec<f64> = operations
            .iter()
            .filter_map(|op| op.metrics.duration())
            .map(|d| d.num_milliseconds() as f64 / 1000.0)
            .collect();
        let mean_duration_secs = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        let resource_counts = self.store.resource_state_counts(tenant_id).await?;

        let mut issues = Vec::new();
        if operations_24h > 0 && success_rate_24h < UNHEALTHY_SUCCESS_RATE {
            issues.push(format!(
                "success rate {:.0}% over the last 24h",
                success_rate_24h * 100.0
            ));
        }
        if consecutive_failures >= UNHEALTHY_FAILURE_STREAK {
            issues.push(format!("{consecutive_failures} consecutive failed operations"));
        }
        let conflicted = resource_counts
            .get(&ResourceSyncState::Conflict)
            .copied()
            .unwrap_or(0);
        if conflicted > 0 {
            issues.push(format!("{conflicted} resources parked in conflict"));
        }

        Ok(SyncHealth {
            tenant_id,
            last_success_at,
            last_failure_at,
            consecutive_failures,
            operations_24h,
            successful_24h,
            success_rate_24h,
            mean_duration_secs,
            resource_counts,
            is_healthy: issues.is_empty(),
            issues,
            computed_at: Utc::now(),
        })
    }

    async fn active_handle(&self, id: OperationId) -> SyncResult<Arc<Mutex<SyncOperation>>> {
        self.active
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| SyncError::not_found("operation", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{SyncDirection, SyncType};
    use std::time::Duration;
    use tasksync_core::UserId;

    fn tracker_with(config: TrackerConfig) -> (SyncStatusTracker, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (SyncStatusTracker::new(store.clone(), config), store)
    }

    fn delta_op(tenant: TenantId) -> SyncOperation {
        SyncOperation::new(SyncType::Delta, SyncDirection::Inbound, tenant, UserId::new())
    }

    #[tokio::test]
    async fn test_start_update_complete_roundtrip() {
        let (tracker, store) = tracker_with(TrackerConfig::default());
        let tenant = TenantId::new();

        let id = tracker.start_sync_operation(delta_op(tenant)).await.unwrap();
        assert_eq!(tracker.active_count().await, 1);

        tracker
            .update_metrics(
                id,
                &MetricsDelta {
                    total_resources: 10,
                    api_calls: 2,
                    ..MetricsDelta::default()
                },
            )
            .await
            .unwrap();

        let finalized = tracker
            .complete_sync_operation(id, SyncStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(finalized.status, SyncStatus::Completed);
        assert!(finalized.completed_at.is_some());
        assert!(finalized.metrics.end_time.is_some());
        assert_eq!(tracker.active_count().await, 0);

        // The store carries the finalized copy for later reads.
        let stored = store.load_operation(id).await.unwrap().unwrap();
        assert_eq!(stored.metrics.api_calls, 2);
        assert!(stored.is_terminal());
    }

    #[tokio::test]
    async fn test_completion_is_idempotent() {
        let (tracker, _) = tracker_with(TrackerConfig::default());
        let id = tracker
            .start_sync_operation(delta_op(TenantId::new()))
            .await
            .unwrap();

        let first = tracker
            .complete_sync_operation(id, SyncStatus::Completed, None)
            .await
            .unwrap();

        // A later, different terminal status must not overwrite the first.
        let again = tracker
            .complete_sync_operation(id, SyncStatus::Failed, Some("late".into()))
            .await
            .unwrap();
        assert_eq!(again.status, first.status);
        assert_eq!(again.completed_at, first.completed_at);

        let stored = tracker.get_operation(id).await.unwrap();
        assert_eq!(stored.status, SyncStatus::Completed);
        assert!(stored.error.is_none());
    }

    #[tokio::test]
    async fn test_resource_status_updates_metrics_and_store() {
        let (tracker, store) = tracker_with(TrackerConfig::default());
        let tenant = TenantId::new();
        let id = tracker.start_sync_operation(delta_op(tenant)).await.unwrap();

        tracker
            .update_resource_status(id, ResourceType::Task, "t1", ResourceSyncState::Synced)
            .await
            .unwrap();
        tracker
            .update_resource_status(id, ResourceType::Task, "t2", ResourceSyncState::Failed)
            .await
            .unwrap();

        let op = tracker.get_operation(id).await.unwrap();
        assert_eq!(op.metrics.processed_resources, 2);
        assert_eq!(op.metrics.successful_resources, 1);
        assert_eq!(op.metrics.failed_resources, 1);
        assert_eq!(op.resources.len(), 2);

        let counts = store.resource_state_counts(tenant).await.unwrap();
        assert_eq!(counts.get(&ResourceSyncState::Synced), Some(&1));
        assert_eq!(counts.get(&ResourceSyncState::Failed), Some(&1));
    }

    #[tokio::test]
    async fn test_error_categories_feed_metrics() {
        let (tracker, _) = tracker_with(TrackerConfig::default());
        let id = tracker
            .start_sync_operation(delta_op(TenantId::new()))
            .await
            .unwrap();

        tracker
            .record_error(
                id,
                &SyncError::Graph(tasksync_core::GraphError::RateLimited { retry_after: None }),
            )
            .await
            .unwrap();
        tracker
            .record_error(id, &SyncError::contract("bad payload"))
            .await
            .unwrap();

        let op = tracker.get_operation(id).await.unwrap();
        assert_eq!(op.metrics.rate_limit_errors, 1);
        assert_eq!(op.metrics.validation_errors, 1);
    }

    #[tokio::test]
    async fn test_stale_operations_are_failed_over() {
        let config = TrackerConfig {
            heartbeat_timeout: Duration::from_secs(0),
            ..TrackerConfig::default()
        };
        let (tracker, _) = tracker_with(config);
        let id = tracker
            .start_sync_operation(delta_op(TenantId::new()))
            .await
            .unwrap();

        // Zero timeout: immediately stale.
        let swept = tracker.sweep_stale_operations().await;
        assert_eq!(swept, vec![id]);

        let op = tracker.get_operation(id).await.unwrap();
        assert_eq!(op.status, SyncStatus::Failed);
        assert_eq!(op.error.as_deref(), Some("no heartbeat within timeout"));
        assert_eq!(tracker.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_health_reflects_failure_streak() {
        let (tracker, _) = tracker_with(TrackerConfig::default());
        let tenant = TenantId::new();

        for _ in 0..3 {
            let id = tracker.start_sync_operation(delta_op(tenant)).await.unwrap();
            tracker
                .complete_sync_operation(id, SyncStatus::Failed, Some("remote down".into()))
                .await
                .unwrap();
        }

        let health = tracker.get_sync_health(tenant).await.unwrap();
        assert_eq!(health.consecutive_failures, 3);
        assert!(!health.is_healthy);
        assert!(!health.issues.is_empty());
        assert_eq!(health.operations_24h, 3);
    }

    #[tokio::test]
    async fn test_health_is_memoized_within_ttl() {
        let (tracker, _) = tracker_with(TrackerConfig {
            health_ttl: Duration::from_secs(60),
            ..TrackerConfig::default()
        });
        let tenant = TenantId::new();

        let first = tracker.get_sync_health(tenant).await.unwrap();
        let second = tracker.get_sync_health(tenant).await.unwrap();
        assert_eq!(first.computed_at, second.computed_at);
    }

    #[tokio::test]
    async fn test_completion_invalidates_health_cache() {
        let (tracker, _) = tracker_with(TrackerConfig {
            health_ttl: Duration::from_secs(60),
            ..TrackerConfig::default()
        });
        let tenant = TenantId::new();

        let before = tracker.get_sync_health(tenant).await.unwrap();
        assert_eq!(before.operations_24h, 0);

        let id = tracker.start_sync_operation(delta_op(tenant)).await.unwrap();
        tracker
            .complete_sync_operation(id, SyncStatus::Completed, None)
            .await
            .unwrap();

        let after = tracker.get_sync_health(tenant).await.unwrap();
        assert_eq!(after.operations_24h, 1);
    }

    #[tokio::test]
    async fn test_update_on_unknown_operation() {
        let (tracker, _) = tracker_with(TrackerConfig::default());
        let missing = tracker
            .update_sync_status(OperationId::new(), SyncStatus::Running)
            .await;
        assert!(matches!(missing, Err(SyncError::NotFound { .. })));
    }
}
