//! Persistence traits for the engine.
//!
//! Every component persists through one of these traits; the database is the
//! system of record and in-memory state is only a performance cache over it.
//! [`postgres::PgStore`] is the production implementation;
//! [`memory::MemoryStore`] backs tests and ephemeral embedding.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tasksync_core::{ConflictId, OperationId, ResourceType, TenantId};
use uuid::Uuid;

use crate::conflict::context::{ConflictContext, ResolutionResult};
use crate::error::SyncResult;
use crate::health::types::{Alert, HealthResult, RecoveryOperation};
use crate::status::model::{ResourceSyncStatus, SyncOperation};
use crate::types::ResourceSyncState;

/// Storage for sync operations and per-resource status.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Insert or update an operation, including embedded metrics/resources.
    async fn save_operation(&self, op: &SyncOperation) -> SyncResult<()>;

    /// Load an operation by id.
    async fn load_operation(&self, id: OperationId) -> SyncResult<Option<SyncOperation>>;

    /// Upsert the durable copy of one resource's sync status.
    async fn save_resource_status(
        &self,
        tenant_id: TenantId,
        status: &ResourceSyncStatus,
    ) -> SyncResult<()>;

    /// Operations for a tenant completed at or after the given time.
    async fn completed_operations_since(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<SyncOperation>>;

    /// Resource counts per state for a tenant.
    async fn resource_state_counts(
        &self,
        tenant_id: TenantId,
    ) -> SyncResult<HashMap<ResourceSyncState, u64>>;

    /// Liveness probe used by the database availability check.
    async fn ping(&self) -> SyncResult<()>;
}

/// Storage for conflicts, resolutions, and version branches.
#[async_trait]
pub trait ConflictStore: Send + Sync {
    /// Persist a freshly detected conflict.
    async fn insert_conflict(&self, ctx: &ConflictContext) -> SyncResult<()>;

    /// Update a conflict's strategy/resolution fields.
    async fn update_conflict(&self, ctx: &ConflictContext) -> SyncResult<()>;

    /// Load a conflict by id.
    async fn load_conflict(&self, id: ConflictId) -> SyncResult<Option<ConflictContext>>;

    /// Append a resolution outcome to the audit history.
    async fn record_resolution(
        &self,
        tenant_id: TenantId,
        result: &ResolutionResult,
    ) -> SyncResult<()>;

    /// Materialize both versions of a conflict under a shared branch id.
    async fn record_branch(&self, branch_id: Uuid, ctx: &ConflictContext) -> SyncResult<()>;

    /// Unresolved conflicts awaiting manual intervention, oldest first.
    async fn pending_manual(
        &self,
        tenant_id: TenantId,
        limit: i64,
    ) -> SyncResult<Vec<ConflictContext>>;

    /// Count of unresolved conflicts for a tenant.
    async fn count_pending(&self, tenant_id: TenantId) -> SyncResult<i64>;
}

/// Storage for health results, alerts, and recovery operations.
#[async_trait]
pub trait HealthStore: Send + Sync {
    /// Append a check result to the history.
    async fn record_result(&self, result: &HealthResult) -> SyncResult<()>;

    /// Append a raised alert.
    async fn record_alert(&self, alert: &Alert) -> SyncResult<()>;

    /// Insert or update a recovery operation.
    async fn save_recovery(&self, op: &RecoveryOperation) -> SyncResult<()>;

    /// Recovery operations still pending or running, oldest first.
    async fn in_flight_recoveries(&self) -> SyncResult<Vec<RecoveryOperation>>;
}

/// Storage for per-(tenant, resource type) delta checkpoints.
#[async_trait]
pub trait DeltaTokenStore: Send + Sync {
    /// The valid checkpoint token, if one exists.
    async fn load_token(
        &self,
        tenant_id: TenantId,
        resource_type: ResourceType,
    ) -> SyncResult<Option<String>>;

    /// Store the checkpoint token captured by the latest delta query.
    async fn save_token(
        &self,
        tenant_id: TenantId,
        resource_type: ResourceType,
        token: &str,
    ) -> SyncResult<()>;

    /// Invalidate the checkpoint, forcing the next sync to run full.
    async fn invalidate_token(
        &self,
        tenant_id: TenantId,
        resource_type: ResourceType,
    ) -> SyncResult<()>;
}

/// Persistent tier of the multi-level cache.
#[async_trait]
pub trait DeltaCacheStore: Send + Sync {
    /// Fetch a cached value, dropping it if expired.
    async fn get_entry(&self, key: &str) -> SyncResult<Option<Value>>;

    /// Upsert a cached value with an absolute expiry.
    async fn put_entry(
        &self,
        key: &str,
        value: &Value,
        expires_at: DateTime<Utc>,
    ) -> SyncResult<()>;

    /// Remove one cached value.
    async fn delete_entry(&self, key: &str) -> SyncResult<()>;

    /// Remove every entry whose key matches the glob, returning the count.
    async fn delete_entries_matching(&self, pattern: &str) -> SyncResult<u64>;
}
