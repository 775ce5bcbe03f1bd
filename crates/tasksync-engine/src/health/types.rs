//! Health check, alert, and recovery models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tasksync_core::{AlertId, RecoveryId, TenantId};

use crate::types::{AlertLevel, HealthCheckKind, HealthStatus, RecoveryAction, RecoveryStatus};

/// Definition of a registered health check.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// What this check measures.
    pub kind: HealthCheckKind,
    /// How often it runs.
    pub interval: Duration,
    /// Upper bound on one evaluation.
    pub timeout: Duration,
    /// Whether failures of this check count as critical to the service.
    pub critical: bool,
    /// Recovery actions this check may trigger automatically.
    pub allowed_recovery: Vec<RecoveryAction>,
    /// Whether the scheduler runs this check.
    pub enabled: bool,
}

impl HealthCheck {
    /// Create a check with the given interval and no allowed recovery.
    #[must_use]
    pub fn new(kind: HealthCheckKind, interval: Duration) -> Self {
        Self {
            kind,
            interval,
            timeout: Duration::from_secs(30),
            critical: false,
            allowed_recovery: Vec::new(),
            enabled: true,
        }
    }

    /// Mark the check critical.
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Allow-list recovery actions.
    #[must_use]
    pub fn with_recovery(mut self, actions: Vec<RecoveryAction>) -> Self {
        self.allowed_recovery = actions;
        self
    }

    /// The default check registry.
    #[must_use]
    pub fn defaults() -> Vec<HealthCheck> {
        vec![
            HealthCheck::new(HealthCheckKind::SyncPerformance, Duration::from_secs(120))
                .with_recovery(vec![RecoveryAction::ForceFullSync]),
            HealthCheck::new(HealthCheckKind::ResourceIntegrity, Duration::from_secs(300))
                .with_recovery(vec![RecoveryAction::ForceFullSync]),
            HealthCheck::new(HealthCheckKind::CacheAvailability, Duration::from_secs(60))
                .with_recovery(vec![RecoveryAction::ResetCache]),
            HealthCheck::new(
                HealthCheckKind::DatabaseAvailability,
                Duration::from_secs(60),
            )
            .critical(),
            HealthCheck::new(HealthCheckKind::ApiAvailability, Duration::from_secs(60)).critical(),
            HealthCheck::new(HealthCheckKind::ConflictBacklog, Duration::from_secs(300))
                .with_recovery(vec![RecoveryAction::ResolvePendingConflicts]),
        ]
    }
}

/// Outcome of one health check evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    /// The check that produced this result.
    pub check: HealthCheckKind,
    /// Status verdict.
    pub status: HealthStatus,
    /// Human-readable summary.
    pub message: String,
    /// Measured values backing the verdict.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metrics: Map<String, Value>,
    /// Actions the check suggests to remediate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_actions: Vec<RecoveryAction>,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

impl HealthResult {
    /// A healthy result with a message.
    #[must_use]
    pub fn healthy(check: HealthCheckKind, message: impl Into<String>) -> Self {
        Self {
            check,
            status: HealthStatus::Healthy,
            message: message.into(),
            metrics: Map::new(),
            suggested_actions: Vec::new(),
            checked_at: Utc::now(),
        }
    }

    /// A degraded result with a status, message, and suggested actions.
    #[must_use]
    pub fn degraded(
        check: HealthCheckKind,
        status: HealthStatus,
        message: impl Into<String>,
        suggested_actions: Vec<RecoveryAction>,
    ) -> Self {
        Self {
            check,
            status,
            message: message.into(),
            metrics: Map::new(),
            suggested_actions,
            checked_at: Utc::now(),
        }
    }

    /// Attach a measured metric.
    #[must_use]
    pub fn with_metric(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.metrics.insert(name.to_string(), value.into());
        self
    }
}

/// An alert raised from a non-healthy check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Alert ID.
    pub id: AlertId,
    /// Source check.
    pub check: HealthCheckKind,
    /// Severity level.
    pub level: AlertLevel,
    /// Human-readable message.
    pub message: String,
    /// Tenant scope, when the finding is tenant-specific.
    pub tenant_id: Option<TenantId>,
    /// Recovery actions the alert carries forward.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_actions: Vec<RecoveryAction>,
    /// When the alert was raised.
    pub created_at: DateTime<Utc>,
}

/// An automated remediation queued from an alert or triggered manually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOperation {
    /// Recovery ID.
    pub id: RecoveryId,
    /// Action to perform.
    pub action: RecoveryAction,
    /// Check whose finding triggered the action.
    pub check: HealthCheckKind,
    /// Alert that queued the action, if any.
    pub alert_id: Option<AlertId>,
    /// Lifecycle status.
    pub status: RecoveryStatus,
    /// Action-specific parameters.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    /// Error message, if the action failed.
    pub error: Option<String>,
    /// When the recovery was queued.
    pub created_at: DateTime<Utc>,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution finished.
    pub completed_at: Option<DateTime<Utc>>,
}

impl RecoveryOperation {
    /// Queue a new pending recovery.
    #[must_use]
    pub fn new(
        action: RecoveryAction,
        check: HealthCheckKind,
        alert_id: Option<AlertId>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            id: RecoveryId::new(),
            action,
            check,
            alert_id,
            status: RecoveryStatus::Pending,
            data,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_checks_cover_all_kinds() {
        let checks = HealthCheck::defaults();
        assert_eq!(checks.len(), 6);
        let kinds: Vec<_> = checks.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&HealthCheckKind::SyncPerformance));
        assert!(kinds.contains(&HealthCheckKind::ConflictBacklog));
    }

    #[test]
    fn test_infrastructure_checks_are_critical() {
        let checks = HealthCheck::defaults();
        for check in checks {
            match check.kind {
                HealthCheckKind::DatabaseAvailability | HealthCheckKind::ApiAvailability => {
                    assert!(check.critical);
                }
                _ => assert!(!check.critical),
            }
        }
    }

    #[test]
    fn test_health_result_constructors() {
        let result = HealthResult::healthy(HealthCheckKind::CacheAvailability, "all tiers up");
        assert_eq!(result.status, HealthStatus::Healthy);
        assert!(result.suggested_actions.is_empty());

        let result = HealthResult::degraded(
            HealthCheckKind::ConflictBacklog,
            HealthStatus::Warning,
            "27 pending conflicts",
            vec![RecoveryAction::ResolvePendingConflicts],
        )
        .with_metric("pending", 27);
        assert_eq!(result.status, HealthStatus::Warning);
        assert_eq!(result.metrics["pending"], 27);
    }

    #[test]
    fn test_recovery_starts_pending() {
        let op = RecoveryOperation::new(
            RecoveryAction::ResetCache,
            HealthCheckKind::CacheAvailability,
            None,
            Map::new(),
        );
        assert_eq!(op.status, RecoveryStatus::Pending);
        assert!(op.status.is_in_flight());
    }
}
