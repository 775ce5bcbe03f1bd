//! Health check evaluators.
//!
//! Each registered check kind has one evaluator that samples live engine
//! components and produces a [`HealthResult`]. Evaluators never return
//! errors; a probe that cannot run is itself an unhealthy finding.

use std::sync::Arc;

use serde_json::json;
use tasksync_core::{GraphClient, GraphError, TenantId};

use crate::cache::{CacheTier, MultiLevelCache};
use crate::config::MonitorConfig;
use crate::conflict::ConflictManager;
use crate::health::types::HealthResult;
use crate::status::SyncStatusTracker;
use crate::store::SyncStore;
use crate::types::{HealthCheckKind, HealthStatus, RecoveryAction};

/// Success rate under which sync performance is flagged as a warning.
const WARN_SUCCESS_RATE: f64 = 0.8;

/// Share of failed/conflicted resources that escalates integrity to error.
const INTEGRITY_ERROR_RATIO: f64 = 0.25;

/// Live engine components the evaluators sample.
pub struct CheckContext {
    /// Tenant this engine instance synchronizes.
    pub tenant_id: TenantId,
    /// Status tracker, for performance rollups.
    pub tracker: Arc<SyncStatusTracker>,
    /// Conflict manager, for backlog depth.
    pub conflicts: Arc<ConflictManager>,
    /// Cache front, for availability probes.
    pub cache: Arc<MultiLevelCache>,
    /// Sync store, for the database probe.
    pub store: Arc<dyn SyncStore>,
    /// Remote API handle, for the availability probe.
    pub graph: Arc<dyn GraphClient>,
    /// Monitor thresholds.
    pub config: MonitorConfig,
}

/// Evaluate one check kind against the live engine.
pub async fn evaluate(kind: HealthCheckKind, ctx: &CheckContext) -> HealthResult {
    match kind {
        HealthCheckKind::SyncPerformance => sync_performance(ctx).await,
        HealthCheckKind::ResourceIntegrity => resource_integrity(ctx).await,
        HealthCheckKind::CacheAvailability => cache_availability(ctx).await,
        HealthCheckKind::DatabaseAvailability => database_availability(ctx).await,
        HealthCheckKind::ApiAvailability => api_availability(ctx).await,
        HealthCheckKind::ConflictBacklog => conflict_backlog(ctx).await,
    }
}

async fn sync_performance(ctx: &CheckContext) -> HealthResult {
    let kind = HealthCheckKind::SyncPerformance;
    let health = match ctx.tracker.get_sync_health(ctx.tenant_id).await {
        Ok(health) => health,
        Err(e) => {
            return HealthResult::degraded(
                kind,
                HealthStatus::Error,
                format!("health rollup unavailable: {e}"),
                Vec::new(),
            )
        }
    };

    let result = if health.consecutive_failures >= ctx.config.failure_streak_threshold {
        HealthResult::degraded(
            kind,
            HealthStatus::Error,
            format!(
                "{} consecutive failed sync operations",
                health.consecutive_failures
            ),
            vec![RecoveryAction::ForceFullSync],
        )
    } else if health.operations_24h > 0 && health.success_rate_24h < WARN_SUCCESS_RATE {
        HealthResult::degraded(
            kind,
            HealthStatus::Warning,
            format!(
                "success rate {:.0}% over the last 24h",
                health.success_rate_24h * 100.0
            ),
            Vec::new(),
        )
    } else {
        HealthResult::healthy(kind, "sync performance nominal")
    };

    result
        .with_metric("success_rate_24h", json!(health.success_rate_24h))
        .with_metric("consecutive_failures", json!(health.consecutive_failures))
        .with_metric("mean_duration_secs", json!(health.mean_duration_secs))
}

async fn resource_integrity(ctx: &CheckContext) -> HealthResult {
    let kind = HealthCheckKind::ResourceIntegrity;
    let counts = match ctx.store.resource_state_counts(ctx.tenant_id).await {
        Ok(counts) => counts,
        Err(e) => {
            return HealthResult::degraded(
                kind,
                HealthStatus::Error,
                format!("resource counts unavailable: {e}"),
                Vec::new(),
            )
        }
    };

    let total: u64 = counts.values().sum();
    let troubled: u64 = counts
        .iter()
        .filter(|(state, _)| {
            matches!(
                state,
                crate::types::ResourceSyncState::Failed
                    | crate::types::ResourceSyncState::Conflict
            )
        })
        .map(|(_, count)| count)
        .sum();

    let result = if total > 0 && troubled as f64 / total as f64 > INTEGRITY_ERROR_RATIO {
        HealthResult::degraded(
            kind,
            HealthStatus::Error,
            format!("{troubled} of {total} resources failed or conflicted"),
            vec![RecoveryAction::ForceFullSync],
        )
    } else if troubled > 0 {
        HealthResult::degraded(
            kind,
            HealthStatus::Warning,
            format!("{troubled} resources failed or conflicted"),
            Vec::new(),
        )
    } else {
        HealthResult::healthy(kind, "resource states nominal")
    };

    result
        .with_metric("total_resources", json!(total))
        .with_metric("troubled_resources", json!(troubled))
}

async fn cache_availability(ctx: &CheckContext) -> HealthResult {
    let kind = HealthCheckKind::CacheAvailability;

    // Round-trip a probe key through the memory tier. The cache converts
    // backend failures into misses, so a failed round-trip means even the
    // in-process tier is unable to serve.
    let probe_key = format!("health:probe:{}", ctx.tenant_id);
    let probe_value = json!({"probe": true});
    ctx.cache
        .set(&probe_key, probe_value.clone(), None, &[CacheTier::Memory])
        .await;
    let read_back = ctx.cache.get(&probe_key).await;
    ctx.cache.invalidate(&probe_key).await;

    let stats = ctx.cache.stats();
    let result = if read_back.as_ref() == Some(&probe_value) {
        HealthResult::healthy(kind, "cache round-trip ok")
    } else {
        HealthResult::degraded(
            kind,
            HealthStatus::Error,
            "cache probe did not round-trip",
            vec![RecoveryAction::ResetCache],
        )
    };

    result
        .with_metric("memory_hits", json!(stats.memory_hits))
        .with_metric("memory_misses", json!(stats.memory_misses))
        .with_metric("hit_rate", json!(stats.hit_rate()))
}

async fn database_availability(ctx: &CheckContext) -> HealthResult {
    let kind = HealthCheckKind::DatabaseAvailability;
    match ctx.store.ping().await {
        Ok(()) => HealthResult::healthy(kind, "database reachable"),
        Err(e) => HealthResult::degraded(
            kind,
            HealthStatus::Critical,
            format!("database unreachable: {e}"),
            Vec::new(),
        ),
    }
}

async fn api_availability(ctx: &CheckContext) -> HealthResult {
    let kind = HealthCheckKind::ApiAvailability;
    // Cheapest read the remote offers; the body is irrelevant.
    match ctx.graph.get("/organization", &[]).await {
        Ok(_) => HealthResult::healthy(kind, "remote API reachable"),
        Err(GraphError::RateLimited { retry_after }) => HealthResult::degraded(
            kind,
            HealthStatus::Warning,
            "remote API throttling requests",
            Vec::new(),
        )
        .with_metric(
            "retry_after_secs",
            json!(retry_after.map(|d| d.as_secs())),
        ),
        Err(e) => HealthResult::degraded(
            kind,
            HealthStatus::Critical,
            format!("remote API unreachable: {e}"),
            Vec::new(),
        ),
    }
}

async fn conflict_backlog(ctx: &CheckContext) -> HealthResult {
    let kind = HealthCheckKind::ConflictBacklog;
    let pending = match ctx.conflicts.count_pending(ctx.tenant_id).await {
        Ok(pending) => pending,
        Err(e) => {
            return HealthResult::degraded(
                kind,
                HealthStatus::Error,
                format!("conflict backlog unavailable: {e}"),
                Vec::new(),
            )
        }
    };

    let error_threshold = (ctx.config.max_conflicts_per_recovery * 2) as i64;
    let result = if pending > error_threshold {
        HealthResult::degraded(
            kind,
            HealthStatus::Error,
            format!("{pending} conflicts pending manual resolution"),
            vec![RecoveryAction::ResolvePendingConflicts],
        )
    } else if pending > 0 {
        HealthResult::degraded(
            kind,
            HealthStatus::Warning,
            format!("{pending} conflicts pending manual resolution"),
            vec![RecoveryAction::ResolvePendingConflicts],
        )
    } else {
        HealthResult::healthy(kind, "no conflict backlog")
    };

    result.with_metric("pending_conflicts", json!(pending))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, TrackerConfig};
    use crate::store::MemoryStore;
    use crate::types::SyncStatus;
    use async_trait::async_trait;
    use serde_json::Value;
    use tasksync_core::UserId;

    struct HealthyGraph;

    #[async_trait]
    impl GraphClient for HealthyGraph {
        async fn get(
            &self,
            _path: &str,
            _params: &[(String, String)],
        ) -> Result<Value, GraphError> {
            Ok(json!({"value": []}))
        }
    }

    struct ThrottledGraph;

    #[async_trait]
    impl GraphClient for ThrottledGraph {
        async fn get(
            &self,
            _path: &str,
            _params: &[(String, String)],
        ) -> Result<Value, GraphError> {
            Err(GraphError::RateLimited {
                retry_after: Some(std::time::Duration::from_secs(30)),
            })
        }
    }

    fn context(graph: Arc<dyn GraphClient>) -> (CheckContext, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let tracker = Arc::new(SyncStatusTracker::new(
            store.clone(),
            TrackerConfig::default(),
        ));
        let conflicts = Arc::new(ConflictManager::new(store.clone()));
        let cache = Arc::new(MultiLevelCache::new(&CacheConfig::default(), None, None));
        (
            CheckContext {
                tenant_id: TenantId::new(),
                tracker,
                conflicts,
                cache,
                store: store.clone(),
                graph,
                config: MonitorConfig::default(),
            },
            store,
        )
    }

    #[tokio::test]
    async fn test_all_checks_healthy_on_idle_engine() {
        let (ctx, _) = context(Arc::new(HealthyGraph));
        for kind in [
            HealthCheckKind::SyncPerformance,
            HealthCheckKind::ResourceIntegrity,
            HealthCheckKind::CacheAvailability,
            HealthCheckKind::DatabaseAvailability,
            HealthCheckKind::ApiAvailability,
            HealthCheckKind::ConflictBacklog,
        ] {
            let result = evaluate(kind, &ctx).await;
            assert_eq!(result.status, HealthStatus::Healthy, "check {kind}");
        }
    }

    #[tokio::test]
    async fn test_failure_streak_degrades_performance_check() {
        let (ctx, _) = context(Arc::new(HealthyGraph));

        for _ in 0..3 {
            let op = crate::status::SyncOperation::new(
                crate::types::SyncType::Delta,
                crate::types::SyncDirection::Inbound,
                ctx.tenant_id,
                UserId::new(),
            );
            let id = ctx.tracker.start_sync_operation(op).await.unwrap();
            ctx.tracker
                .complete_sync_operation(id, SyncStatus::Failed, Some("boom".into()))
                .await
                .unwrap();
        }

        let result = evaluate(HealthCheckKind::SyncPerformance, &ctx).await;
        assert_eq!(result.status, HealthStatus::Error);
        assert!(result
            .suggested_actions
            .contains(&RecoveryAction::ForceFullSync));
    }

    #[tokio::test]
    async fn test_throttled_api_is_warning_not_critical() {
        let (ctx, _) = context(Arc::new(ThrottledGraph));
        let result = evaluate(HealthCheckKind::ApiAvailability, &ctx).await;
        assert_eq!(result.status, HealthStatus::Warning);
    }
}
