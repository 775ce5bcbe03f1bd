//! Health monitoring scheduler.
//!
//! Runs registered checks on their intervals, persists every result, raises
//! alerts with a per-(check, status) cooldown, and queues allow-listed
//! recovery actions. A recovery is never queued twice while an equivalent
//! one is still in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tasksync_core::AlertId;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::config::MonitorConfig;
use crate::error::{SyncError, SyncResult};
use crate::health::checks::{evaluate, CheckContext};
use crate::health::types::{Alert, HealthCheck, HealthResult, RecoveryOperation};
use crate::store::HealthStore;
use crate::types::{HealthCheckKind, HealthStatus, RecoveryAction};

/// Rolled-up verdict across every enabled check.
#[derive(Debug, Clone)]
pub struct OverallHealth {
    /// Worst status observed, with critical checks escalating.
    pub status: HealthStatus,
    /// Individual results backing the verdict.
    pub results: Vec<HealthResult>,
}

/// Schedules health checks, alerts on findings, queues recovery.
pub struct HealthMonitor {
    ctx: CheckContext,
    checks: Vec<HealthCheck>,
    health_store: Arc<dyn HealthStore>,
    config: MonitorConfig,
    recovery_tx: mpsc::Sender<RecoveryOperation>,
    last_run: Mutex<HashMap<HealthCheckKind, Instant>>,
    last_alert: Mutex<HashMap<(HealthCheckKind, HealthStatus), Instant>>,
}

impl HealthMonitor {
    /// Wire a monitor with the default check registry.
    ///
    /// Returns the monitor and the receiver the recovery executor consumes.
    #[must_use]
    pub fn new(
        ctx: CheckContext,
        health_store: Arc<dyn HealthStore>,
        config: MonitorConfig,
    ) -> (Self, mpsc::Receiver<RecoveryOperation>) {
        let (recovery_tx, recovery_rx) = mpsc::channel(64);
        let monitor = Self {
            ctx,
            checks: HealthCheck::defaults(),
            health_store,
            config,
            recovery_tx,
            last_run: Mutex::new(HashMap::new()),
            last_alert: Mutex::new(HashMap::new()),
        };
        (monitor, recovery_rx)
    }

    /// Run one check now, persist the result, and follow up on findings.
    #[instrument(skip(self))]
    pub async fn run_health_check(&self, kind: HealthCheckKind) -> SyncResult<HealthResult> {
        let check = self
            .checks
            .iter()
            .find(|c| c.kind == kind)
            .ok_or_else(|| SyncError::contract(format!("no check registered for {kind}")))?;

        let result = match tokio::time::timeout(check.timeout, evaluate(kind, &self.ctx)).await {
            Ok(result) => result,
            Err(_) => HealthResult::degraded(
                kind,
                HealthStatus::Error,
                "health check timed out",
                Vec::new(),
            ),
        };

        if let Err(e) = self.health_store.record_result(&result).await {
            warn!(check = %kind, error = %e, "Failed to persist health result");
        }

        if result.status != HealthStatus::Healthy {
            let alert_id = self.maybe_alert(&result).await;
            if self.config.auto_recovery {
                self.maybe_queue_recovery(check, &result, alert_id).await;
            }
        }

        self.last_run.lock().await.insert(kind, Instant::now());
        Ok(result)
    }

    /// Run every enabled check whose interval has elapsed.
    pub async fn run_due_checks(&self) -> Vec<HealthResult> {
        let now = Instant::now();
        let due: Vec<HealthCheckKind> = {
            let last_run = self.last_run.lock().await;
            self.checks
                .iter()
                .filter(|check| check.enabled)
                .filter(|check| {
                    last_run
                        .get(&check.kind)
                        .map_or(true, |at| now.duration_since(*at) >= check.interval)
                })
                .map(|check| check.kind)
                .collect()
        };

        let mut results = Vec::with_capacity(due.len());
        for kind in due {
            match self.run_health_check(kind).await {
                Ok(result) => results.push(result),
                Err(e) => warn!(check = %kind, error = %e, "Health check failed to run"),
            }
        }
        results
    }

    /// Evaluate every enabled check now and roll the statuses up.
    ///
    /// Any non-healthy critical check makes the overall verdict critical.
    pub async fn get_overall_health(&self) -> SyncResult<OverallHealth> {
        let mut results = Vec::with_capacity(self.checks.len());
        let mut overall = HealthStatus::Healthy;

        for check in self.checks.iter().filter(|c| c.enabled) {
            let result = self.run_health_check(check.kind).await?;
            let effective = if check.critical && result.status != HealthStatus::Healthy {
                HealthStatus::Critical
            } else {
                result.status
            };
            overall = worst(overall, effective);
            results.push(result);
        }

        Ok(OverallHealth {
            status: overall,
            results,
        })
    }

    /// Queue a recovery action manually, bypassing alerting and cooldowns.
    ///
    /// The action must still be allow-listed for the check it is attributed
    /// to; manual triggers do not widen what a check may do. `alert_id` ties
    /// the recovery to the alert that motivated it, `data` carries
    /// action-specific parameters; both land on the persisted record.
    #[instrument(skip(self, data))]
    pub async fn trigger_recovery(
        &self,
        kind: HealthCheckKind,
        action: RecoveryAction,
        alert_id: Option<AlertId>,
        data: Map<String, Value>,
    ) -> SyncResult<RecoveryOperation> {
        let check = self
            .checks
            .iter()
            .find(|c| c.kind == kind)
            .ok_or_else(|| SyncError::contract(format!("no check registered for {kind}")))?;
        if !check.allowed_recovery.contains(&action) {
            return Err(SyncError::contract(format!(
                "action {action} is not allowed for check {kind}"
            )));
        }

        let op = RecoveryOperation::new(action, kind, alert_id, data);
        self.enqueue_recovery(op.clone()).await?;
        Ok(op)
    }

    /// Scheduler loop. Runs until the shutdown flag flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Health monitor started");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let results = self.run_due_checks().await;
                    let unhealthy = results
                        .iter()
                        .filter(|r| r.status != HealthStatus::Healthy)
                        .count();
                    if unhealthy > 0 {
                        debug!(unhealthy, "Monitor pass found unhealthy checks");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Health monitor stopped");
    }

    /// Raise an alert unless one for the same (check, status) fired within
    /// the cooldown window. Returns the id of the alert that was raised.
    async fn maybe_alert(&self, result: &HealthResult) -> Option<AlertId> {
        let level = result.status.alert_level()?;

        let key = (result.check, result.status);
        {
            let mut last_alert = self.last_alert.lock().await;
            if let Some(at) = last_alert.get(&key) {
                if at.elapsed() < self.config.alert_cooldown {
                    debug!(check = %result.check, "Alert suppressed by cooldown");
                    return None;
                }
            }
            last_alert.insert(key, Instant::now());
        }

        let alert = Alert {
            id: AlertId::new(),
            check: result.check,
            level,
            message: result.message.clone(),
            tenant_id: Some(self.ctx.tenant_id),
            suggested_actions: result.suggested_actions.clone(),
            created_at: result.checked_at,
        };
        warn!(check = %alert.check, level = %alert.level, message = %alert.message, "Health alert");
        if let Err(e) = self.health_store.record_alert(&alert).await {
            warn!(error = %e, "Failed to persist alert");
        }
        Some(alert.id)
    }

    /// Queue suggested actions that the check allow-lists, skipping any with
    /// an equivalent recovery already in flight. Queued recoveries carry the
    /// id of the alert raised for this finding, when one was.
    async fn maybe_queue_recovery(
        &self,
        check: &HealthCheck,
        result: &HealthResult,
        alert_id: Option<AlertId>,
    ) {
        let in_flight = match self.health_store.in_flight_recoveries().await {
            Ok(in_flight) => in_flight,
            Err(e) => {
                warn!(error = %e, "Cannot read in-flight recoveries, skipping auto-recovery");
                return;
            }
        };

        for action in &result.suggested_actions {
            if !check.allowed_recovery.contains(action) {
                continue;
            }
            let duplicate = in_flight
                .iter()
                .any(|op| op.check == check.kind && op.action == *action);
            if duplicate {
                debug!(check = %check.kind, action = %action, "Recovery already in flight");
                continue;
            }

            let op = RecoveryOperation::new(*action, check.kind, alert_id, Map::new());
            if let Err(e) = self.enqueue_recovery(op).await {
                warn!(check = %check.kind, action = %action, error = %e, "Failed to queue recovery");
            }
        }
    }

    async fn enqueue_recovery(&self, op: RecoveryOperation) -> SyncResult<()> {
        // Persisted pending first so the in-flight dedup sees it even before
        // the executor picks it up.
        self.health_store.save_recovery(&op).await?;
        info!(recovery_id = %op.id, action = %op.action, "Recovery queued");
        self.recovery_tx
            .send(op)
            .await
            .map_err(|_| SyncError::internal("recovery executor is not running"))
    }
}

fn worst(a: HealthStatus, b: HealthStatus) -> HealthStatus {
    fn rank(status: HealthStatus) -> u8 {
        match status {
            HealthStatus::Healthy => 0,
            HealthStatus::Warning => 1,
            HealthStatus::Error => 2,
            HealthStatus::Critical => 3,
        }
    }
    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MultiLevelCache;
    use crate::config::{CacheConfig, TrackerConfig};
    use crate::conflict::ConflictManager;
    use crate::status::SyncStatusTracker;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tasksync_core::{GraphClient, GraphError, TenantId};

    struct DownGraph;

    #[async_trait]
    impl GraphClient for DownGraph {
        async fn get(
            &self,
            _path: &str,
            _params: &[(String, String)],
        ) -> Result<Value, GraphError> {
            Err(GraphError::Transport("connection refused".into()))
        }
    }

    struct UpGraph;

    #[async_trait]
    impl GraphClient for UpGraph {
        async fn get(
            &self,
            _path: &str,
            _params: &[(String, String)],
        ) -> Result<Value, GraphError> {
            Ok(json!({"value": []}))
        }
    }

    fn monitor_with(
        graph: Arc<dyn GraphClient>,
        config: MonitorConfig,
    ) -> (
        HealthMonitor,
        mpsc::Receiver<RecoveryOperation>,
        Arc<MemoryStore>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let ctx = CheckContext {
            tenant_id: TenantId::new(),
            tracker: Arc::new(SyncStatusTracker::new(
                store.clone(),
                TrackerConfig::default(),
            )),
            conflicts: Arc::new(ConflictManager::new(store.clone())),
            cache: Arc::new(MultiLevelCache::new(&CacheConfig::default(), None, None)),
            store: store.clone(),
            graph,
            config: config.clone(),
        };
        let (monitor, rx) = HealthMonitor::new(ctx, store.clone(), config);
        (monitor, rx, store)
    }

    #[tokio::test]
    async fn test_repeated_failures_alert_once_per_cooldown() {
        let config = MonitorConfig {
            alert_cooldown: Duration::from_secs(900),
            auto_recovery: false,
            ..MonitorConfig::default()
        };
        let (monitor, _rx, store) = monitor_with(Arc::new(DownGraph), config);

        for _ in 0..5 {
            let result = monitor
                .run_health_check(HealthCheckKind::ApiAvailability)
                .await
                .unwrap();
            assert_eq!(result.status, HealthStatus::Critical);
        }

        assert_eq!(store.alert_count().await, 1);
    }

    #[tokio::test]
    async fn test_auto_recovery_queued_and_deduplicated() {
        let config = MonitorConfig {
            auto_recovery: true,
            ..MonitorConfig::default()
        };
        let (monitor, mut rx, store) = monitor_with(Arc::new(UpGraph), config);

        // Seed a conflict backlog so the check suggests a recovery.
        seed_pending_conflict(&monitor.ctx).await;

        monitor
            .run_health_check(HealthCheckKind::ConflictBacklog)
            .await
            .unwrap();
        let queued = rx.try_recv().expect("recovery queued");
        assert_eq!(queued.action, RecoveryAction::ResolvePendingConflicts);
        // Auto-queued recoveries point back at the alert that raised them.
        assert!(queued.alert_id.is_some());
        assert_eq!(store.alert_count().await, 1);

        // Same finding again: the pending recovery suppresses a duplicate.
        monitor
            .run_health_check(HealthCheckKind::ConflictBacklog)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(store.in_flight_recoveries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_overall_health_escalates_critical_checks() {
        let config = MonitorConfig {
            auto_recovery: false,
            ..MonitorConfig::default()
        };
        let (monitor, _rx, _store) = monitor_with(Arc::new(DownGraph), config);

        let overall = monitor.get_overall_health().await.unwrap();
        assert_eq!(overall.status, HealthStatus::Critical);
        assert_eq!(overall.results.len(), 6);
    }

    #[tokio::test]
    async fn test_manual_trigger_respects_allow_list() {
        let (monitor, mut rx, _store) =
            monitor_with(Arc::new(UpGraph), MonitorConfig::default());

        let denied = monitor
            .trigger_recovery(
                HealthCheckKind::ApiAvailability,
                RecoveryAction::ResetCache,
                None,
                Map::new(),
            )
            .await;
        assert!(matches!(denied, Err(SyncError::Contract { .. })));

        let alert_id = AlertId::new();
        let mut data = Map::new();
        data.insert("reason".to_string(), json!("operator request"));
        let allowed = monitor
            .trigger_recovery(
                HealthCheckKind::CacheAvailability,
                RecoveryAction::ResetCache,
                Some(alert_id),
                data,
            )
            .await
            .unwrap();
        assert_eq!(allowed.action, RecoveryAction::ResetCache);
        assert_eq!(allowed.alert_id, Some(alert_id));
        assert_eq!(allowed.data.get("reason"), Some(&json!("operator request")));

        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.id, allowed.id);
        assert_eq!(queued.alert_id, Some(alert_id));
    }

    async fn seed_pending_conflict(ctx: &CheckContext) {
        use std::collections::BTreeMap;
        use tasksync_core::{ResourceVersion, TaskVersion, UserId};

        let base = TaskVersion {
            id: "t1".to_string(),
            etag: Some("v1".to_string()),
            plan_id: Some("p1".to_string()),
            bucket_id: Some("b1".to_string()),
            title: Some("Task".to_string()),
            description: None,
            percent_complete: Some(10),
            priority: Some(5),
            due_date: None,
            assignments: BTreeMap::new(),
            modified_at: None,
            extra: serde_json::Map::new(),
        };
        let mut remote = base.clone();
        remote.etag = Some("v2".to_string());
        remote.bucket_id = Some("b2".to_string());

        ctx.conflicts
            .handle_conflict(
                &ResourceVersion::Task(base),
                &ResourceVersion::Task(remote),
                ctx.tenant_id,
                UserId::new(),
            )
            .await
            .unwrap();
    }
}
