//! Sync operation, metrics, and health models.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tasksync_core::{ConflictId, OperationId, ResourceType, TenantId, UserId};

use crate::types::{ResourceSyncState, SyncDirection, SyncStatus, SyncType};

/// Counters and timings embedded in a sync operation.
///
/// Counter fields are cumulative; derived values (duration, throughput) are
/// only meaningful once `end_time` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMetrics {
    /// Resources in scope for the operation.
    pub total_resources: u64,
    /// Resources processed so far.
    pub processed_resources: u64,
    /// Resources synced successfully.
    pub successful_resources: u64,
    /// Resources that failed.
    pub failed_resources: u64,
    /// Resources deliberately skipped.
    pub skipped_resources: u64,
    /// Resources parked in conflict.
    pub conflicted_resources: u64,
    /// Bytes moved over the wire.
    pub bytes_transferred: u64,
    /// Remote API calls issued.
    pub api_calls: u64,
    /// Cache hits observed.
    pub cache_hits: u64,
    /// Cache misses observed.
    pub cache_misses: u64,
    /// Rate-limit errors encountered.
    pub rate_limit_errors: u64,
    /// Network/timeout errors encountered.
    pub network_errors: u64,
    /// Permission errors encountered.
    pub permission_errors: u64,
    /// Validation errors encountered.
    pub validation_errors: u64,
    /// Uncategorized errors encountered.
    pub other_errors: u64,
    /// When processing began.
    pub start_time: Option<DateTime<Utc>>,
    /// When processing ended.
    pub end_time: Option<DateTime<Utc>>,
}

/// A cumulative update to [`SyncMetrics`] counters.
///
/// Every field adds to the prior value; absent fields leave it untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsDelta {
    pub total_resources: u64,
    pub processed_resources: u64,
    pub successful_resources: u64,
    pub failed_resources: u64,
    pub skipped_resources: u64,
    pub conflicted_resources: u64,
    pub bytes_transferred: u64,
    pub api_calls: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rate_limit_errors: u64,
    pub network_errors: u64,
    pub permission_errors: u64,
    pub validation_errors: u64,
    pub other_errors: u64,
}

impl SyncMetrics {
    /// Add a cumulative delta to the counters.
    pub fn apply(&mut self, delta: &MetricsDelta) {
        self.total_resources += delta.total_resources;
        self.processed_resources += delta.processed_resources;
        self.successful_resources += delta.successful_resources;
        self.failed_resources += delta.failed_resources;
        self.skipped_resources += delta.skipped_resources;
        self.conflicted_resources += delta.conflicted_resources;
        self.bytes_transferred += delta.bytes_transferred;
        self.api_calls += delta.api_calls;
        self.cache_hits += delta.cache_hits;
        self.cache_misses += delta.cache_misses;
        self.rate_limit_errors += delta.rate_limit_errors;
        self.network_errors += delta.network_errors;
        self.permission_errors += delta.permission_errors;
        self.validation_errors += delta.validation_errors;
        self.other_errors += delta.other_errors;
    }

    /// Wall-clock duration, available once `end_time` is set.
    #[must_use]
    pub fn duration(&self) -> Option<ChronoDuration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Resources per second, available once `end_time` is set.
    #[must_use]
    pub fn throughput(&self) -> Option<f64> {
        let duration = self.duration()?;
        let secs = duration.num_milliseconds() as f64 / 1000.0;
        if secs <= 0.0 {
            return None;
        }
        Some(self.processed_resources as f64 / secs)
    }

    /// Cache hit rate over hits + misses, if any lookups happened.
    #[must_use]
    pub fn cache_hit_rate(&self) -> Option<f64> {
        let lookups = self.cache_hits + self.cache_misses;
        (lookups > 0).then(|| self.cache_hits as f64 / lookups as f64)
    }
}

/// Per-resource outcome within a sync operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSyncStatus {
    /// Remote resource ID.
    pub resource_id: String,
    /// Resource type.
    pub resource_type: ResourceType,
    /// Current state.
    pub state: ResourceSyncState,
    /// When the resource last synced successfully.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Owning operation.
    pub operation_id: OperationId,
    /// Retries consumed; incremented only on failed -> pending.
    pub retry_count: u32,
    /// Etag of the local copy.
    pub local_etag: Option<String>,
    /// Etag of the remote copy.
    pub remote_etag: Option<String>,
    /// Conflict parked on this resource, if any.
    pub conflict_id: Option<ConflictId>,
}

impl ResourceSyncStatus {
    /// Create a fresh pending status for a resource.
    #[must_use]
    pub fn new(operation_id: OperationId, resource_type: ResourceType, resource_id: String) -> Self {
        Self {
            resource_id,
            resource_type,
            state: ResourceSyncState::Pending,
            last_synced_at: None,
            operation_id,
            retry_count: 0,
            local_etag: None,
            remote_etag: None,
            conflict_id: None,
        }
    }

    /// Transition to a new state, counting failed -> pending as a retry.
    pub fn transition(&mut self, state: ResourceSyncState) {
        if self.state == ResourceSyncState::Failed && state == ResourceSyncState::Pending {
            self.retry_count += 1;
        }
        if state == ResourceSyncState::Synced {
            self.last_synced_at = Some(Utc::now());
        }
        self.state = state;
    }
}

/// A tracked synchronization operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Operation ID.
    pub id: OperationId,
    /// Kind of run.
    pub sync_type: SyncType,
    /// Direction of data flow.
    pub direction: SyncDirection,
    /// Lifecycle status.
    pub status: SyncStatus,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Initiating user.
    pub user_id: UserId,
    /// Resource type in scope, if narrowed.
    pub resource_type: Option<ResourceType>,
    /// Explicit resource ids in scope, if narrowed.
    pub resource_ids: Option<Vec<String>>,
    /// When the operation was created.
    pub created_at: DateTime<Utc>,
    /// When processing started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the operation reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Last liveness signal.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Embedded metrics.
    pub metrics: SyncMetrics,
    /// Free-form run configuration.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
    /// Parent operation for nested sync.
    pub parent_id: Option<OperationId>,
    /// Child operations spawned by this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<OperationId>,
    /// Per-resource outcomes keyed by resource id.
    #[serde(default)]
    pub resources: HashMap<String, ResourceSyncStatus>,
    /// Terminal error message, if the operation failed.
    pub error: Option<String>,
}

impl SyncOperation {
    /// Create a new pending operation.
    #[must_use]
    pub fn new(
        sync_type: SyncType,
        direction: SyncDirection,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Self {
        Self {
            id: OperationId::new(),
            sync_type,
            direction,
            status: SyncStatus::Pending,
            tenant_id,
            user_id,
            resource_type: None,
            resource_ids: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_heartbeat: None,
            metrics: SyncMetrics::default(),
            config: Map::new(),
            parent_id: None,
            child_ids: Vec::new(),
            resources: HashMap::new(),
            error: None,
        }
    }

    /// Narrow the operation to a resource type.
    #[must_use]
    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(resource_type);
        self
    }

    /// Narrow the operation to explicit resource ids.
    #[must_use]
    pub fn with_resource_ids(mut self, ids: Vec<String>) -> Self {
        self.resource_ids = Some(ids);
        self
    }

    /// Link to a parent operation.
    #[must_use]
    pub fn with_parent(mut self, parent: OperationId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    /// Whether the operation has reached a terminal status.
    ///
    /// Invariant: once `completed_at` is set the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some() || self.status.is_terminal()
    }

    /// Whether the last heartbeat is older than the given timeout.
    #[must_use]
    pub fn heartbeat_stale(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        let reference = self.last_heartbeat.or(self.started_at).unwrap_or(self.created_at);
        let age = now - reference;
        age > ChronoDuration::from_std(timeout).unwrap_or_else(|_| ChronoDuration::seconds(300))
    }
}

/// Per-tenant health rollup derived from recent operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHealth {
    /// Tenant this snapshot describes.
    pub tenant_id: TenantId,
    /// Last successful operation completion.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Last failed operation completion.
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Current consecutive-failure streak.
    pub consecutive_failures: u32,
    /// Operations completed in the last 24h.
    pub operations_24h: u64,
    /// Successful operations in the last 24h.
    pub successful_24h: u64,
    /// Success rate over the last 24h, 0.0-1.0.
    pub success_rate_24h: f64,
    /// Mean operation duration over the last 24h, seconds.
    pub mean_duration_secs: f64,
    /// Resource counts per health bucket.
    pub resource_counts: HashMap<ResourceSyncState, u64>,
    /// Overall verdict.
    pub is_healthy: bool,
    /// Human-readable issues backing the verdict.
    pub issues: Vec<String>,
    /// When this snapshot was computed.
    pub computed_at: DateTime<Utc>,
}
