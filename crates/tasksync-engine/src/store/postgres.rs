//! Postgres-backed persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use tasksync_core::{
    ConflictId, OperationId, ResourceType, ResourceVersion, TenantId, UserId,
};
use tracing::instrument;
use uuid::Uuid;

use crate::conflict::context::{ConflictContext, ResolutionResult};
use crate::error::{SyncError, SyncResult};
use crate::health::types::{Alert, HealthResult, RecoveryOperation};
use crate::status::model::{ResourceSyncStatus, SyncMetrics, SyncOperation};
use crate::types::{
    ConflictSeverity, ConflictType, RecoveryStatus, ResolutionStrategy, ResourceSyncState,
    SyncDirection, SyncStatus, SyncType,
};

use super::{ConflictStore, DeltaCacheStore, DeltaTokenStore, HealthStore, SyncStore};

/// Postgres implementation of every engine store trait.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool for multi-statement transactions.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SyncStore for PgStore {
    #[instrument(skip(self, op), fields(operation_id = %op.id))]
    async fn save_operation(&self, op: &SyncOperation) -> SyncResult<()> {
        sqlx::query(
            r"
            INSERT INTO sync_operations (
                id, tenant_id, user_id, sync_type, direction, status,
                resource_type, resource_ids, created_at, started_at,
                completed_at, last_heartbeat, metrics, config, parent_id,
                child_ids, resources, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                last_heartbeat = EXCLUDED.last_heartbeat,
                metrics = EXCLUDED.metrics,
                child_ids = EXCLUDED.child_ids,
                resources = EXCLUDED.resources,
                error = EXCLUDED.error
            ",
        )
        .bind(op.id.as_uuid())
        .bind(op.tenant_id.as_uuid())
        .bind(op.user_id.as_uuid())
        .bind(op.sync_type.as_str())
        .bind(op.direction.as_str())
        .bind(op.status.as_str())
        .bind(op.resource_type.map(|rt| rt.as_str()))
        .bind(op.resource_ids.as_deref())
        .bind(op.created_at)
        .bind(op.started_at)
        .bind(op.completed_at)
        .bind(op.last_heartbeat)
        .bind(serde_json::to_value(&op.metrics)?)
        .bind(Value::Object(op.config.clone()))
        .bind(op.parent_id.map(|p| *p.as_uuid()))
        .bind(serde_json::to_value(&op.child_ids)?)
        .bind(serde_json::to_value(&op.resources)?)
        .bind(op.error.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_operation(&self, id: OperationId) -> SyncResult<Option<SyncOperation>> {
        let row = sqlx::query_as::<_, SyncOperationRow>(
            r"
            SELECT id, tenant_id, user_id, sync_type, direction, status,
                   resource_type, resource_ids, created_at, started_at,
                   completed_at, last_heartbeat, metrics, config, parent_id,
                   child_ids, resources, error
            FROM sync_operations
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncOperationRow::into_operation).transpose()
    }

    #[instrument(skip(self, status), fields(resource_id = %status.resource_id))]
    async fn save_resource_status(
        &self,
        tenant_id: TenantId,
        status: &ResourceSyncStatus,
    ) -> SyncResult<()> {
        sqlx::query(
            r"
            INSERT INTO resource_sync_status (
                tenant_id, resource_id, resource_type, state, last_synced_at,
                operation_id, retry_count, local_etag, remote_etag, conflict_id,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            ON CONFLICT (tenant_id, resource_id) DO UPDATE SET
                state = EXCLUDED.state,
                last_synced_at = EXCLUDED.last_synced_at,
                operation_id = EXCLUDED.operation_id,
                retry_count = EXCLUDED.retry_count,
                local_etag = EXCLUDED.local_etag,
                remote_etag = EXCLUDED.remote_etag,
                conflict_id = EXCLUDED.conflict_id,
                updated_at = NOW()
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(&status.resource_id)
        .bind(status.resource_type.as_str())
        .bind(status.state.as_str())
        .bind(status.last_synced_at)
        .bind(status.operation_id.as_uuid())
        .bind(status.retry_count as i32)
        .bind(status.local_etag.as_deref())
        .bind(status.remote_etag.as_deref())
        .bind(status.conflict_id.map(|c| *c.as_uuid()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn completed_operations_since(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<SyncOperation>> {
        let rows = sqlx::query_as::<_, SyncOperationRow>(
            r"
            SELECT id, tenant_id, user_id, sync_type, direction, status,
                   resource_type, resource_ids, created_at, started_at,
                   completed_at, last_heartbeat, metrics, config, parent_id,
                   child_ids, resources, error
            FROM sync_operations
            WHERE tenant_id = $1 AND completed_at >= $2
            ORDER BY completed_at DESC
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(SyncOperationRow::into_operation)
            .collect()
    }

    #[instrument(skip(self))]
    async fn resource_state_counts(
        &self,
        tenant_id: TenantId,
    ) -> SyncResult<HashMap<ResourceSyncState, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r"
            SELECT state, COUNT(*)
            FROM resource_sync_status
            WHERE tenant_id = $1
            GROUP BY state
            ",
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for (state, count) in rows {
            if let Ok(state) = state.parse::<ResourceSyncState>() {
                counts.insert(state, count.max(0) as u64);
            }
        }
        Ok(counts)
    }

    async fn ping(&self) -> SyncResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConflictStore for PgStore {
    #[instrument(skip(self, ctx), fields(conflict_id = %ctx.id))]
    async fn insert_conflict(&self, ctx: &ConflictContext) -> SyncResult<()> {
        sqlx::query(
            r"
            INSERT INTO conflict_resolutions (
                id, tenant_id, user_id, resource_type, resource_id,
                conflict_type, severity, local_version, remote_version,
                local_etag, remote_etag, local_modified_at, remote_modified_at,
                conflicting_fields, strategy, resolved, resolved_at,
                resolution_metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ",
        )
        .bind(ctx.id.as_uuid())
        .bind(ctx.tenant_id.as_uuid())
        .bind(ctx.user_id.as_uuid())
        .bind(ctx.resource_type.as_str())
        .bind(&ctx.resource_id)
        .bind(ctx.conflict_type.as_str())
        .bind(ctx.severity.as_str())
        .bind(serde_json::to_value(&ctx.local_version)?)
        .bind(serde_json::to_value(&ctx.remote_version)?)
        .bind(ctx.local_etag.as_deref())
        .bind(ctx.remote_etag.as_deref())
        .bind(ctx.local_modified_at)
        .bind(ctx.remote_modified_at)
        .bind(&ctx.conflicting_fields)
        .bind(ctx.strategy.map(|s| s.as_str()))
        .bind(ctx.resolved)
        .bind(ctx.resolved_at)
        .bind(Value::Object(ctx.resolution_metadata.clone()))
        .bind(ctx.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, ctx), fields(conflict_id = %ctx.id))]
    async fn update_conflict(&self, ctx: &ConflictContext) -> SyncResult<()> {
        // Resolved conflicts are immutable; the guard is in the WHERE clause.
        sqlx::query(
            r"
            UPDATE conflict_resolutions
            SET strategy = $2,
                resolved = $3,
                resolved_at = $4,
                resolution_metadata = $5
            WHERE id = $1 AND resolved = FALSE
            ",
        )
        .bind(ctx.id.as_uuid())
        .bind(ctx.strategy.map(|s| s.as_str()))
        .bind(ctx.resolved)
        .bind(ctx.resolved_at)
        .bind(Value::Object(ctx.resolution_metadata.clone()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_conflict(&self, id: ConflictId) -> SyncResult<Option<ConflictContext>> {
        let row = sqlx::query_as::<_, ConflictRow>(
            r"
            SELECT id, tenant_id, user_id, resource_type, resource_id,
                   conflict_type, severity, local_version, remote_version,
                   local_etag, remote_etag, local_modified_at, remote_modified_at,
                   conflicting_fields, strategy, resolved, resolved_at,
                   resolution_metadata, created_at
            FROM conflict_resolutions
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ConflictRow::into_context).transpose()
    }

    #[instrument(skip(self, result), fields(conflict_id = %result.conflict_id))]
    async fn record_resolution(
        &self,
        tenant_id: TenantId,
        result: &ResolutionResult,
    ) -> SyncResult<()> {
        sqlx::query(
            r"
            INSERT INTO conflict_resolution_history (
                conflict_id, tenant_id, strategy, resolved_version, success,
                error, requires_manual_intervention, backup_local,
                backup_remote, branch_id, resolved_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(result.conflict_id.as_uuid())
        .bind(tenant_id.as_uuid())
        .bind(result.strategy.as_str())
        .bind(serde_json::to_value(&result.resolved_version)?)
        .bind(result.success)
        .bind(result.error.as_deref())
        .bind(result.requires_manual_intervention)
        .bind(serde_json::to_value(&result.backup_local)?)
        .bind(serde_json::to_value(&result.backup_remote)?)
        .bind(result.branch_id)
        .bind(result.resolved_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, ctx), fields(conflict_id = %ctx.id))]
    async fn record_branch(&self, branch_id: Uuid, ctx: &ConflictContext) -> SyncResult<()> {
        // Both sides land under the same branch id for later reconciliation.
        let mut tx = self.pool.begin().await?;
        for (side, version) in [("local", &ctx.local_version), ("remote", &ctx.remote_version)] {
            sqlx::query(
                r"
                INSERT INTO conflict_branches (
                    branch_id, conflict_id, tenant_id, side, version, created_at
                )
                VALUES ($1, $2, $3, $4, $5, NOW())
                ",
            )
            .bind(branch_id)
            .bind(ctx.id.as_uuid())
            .bind(ctx.tenant_id.as_uuid())
            .bind(side)
            .bind(serde_json::to_value(version)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn pending_manual(
        &self,
        tenant_id: TenantId,
        limit: i64,
    ) -> SyncResult<Vec<ConflictContext>> {
        let rows = sqlx::query_as::<_, ConflictRow>(
            r"
            SELECT id, tenant_id, user_id, resource_type, resource_id,
                   conflict_type, severity, local_version, remote_version,
                   local_etag, remote_etag, local_modified_at, remote_modified_at,
                   conflicting_fields, strategy, resolved, resolved_at,
                   resolution_metadata, created_at
            FROM conflict_resolutions
            WHERE tenant_id = $1
                AND resolved = FALSE
                AND strategy IN ('manual_resolution', 'branch_version')
            ORDER BY created_at ASC
            LIMIT $2
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ConflictRow::into_context).collect()
    }

    #[instrument(skip(self))]
    async fn count_pending(&self, tenant_id: TenantId) -> SyncResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM conflict_resolutions
            WHERE tenant_id = $1 AND resolved = FALSE
            ",
        )
        .bind(tenant_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[async_trait]
impl HealthStore for PgStore {
    #[instrument(skip(self, result))]
    async fn record_result(&self, result: &HealthResult) -> SyncResult<()> {
        sqlx::query(
            r"
            INSERT INTO health_check_results (check_kind, status, message, metrics, checked_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(result.check.as_str())
        .bind(result.status.as_str())
        .bind(&result.message)
        .bind(Value::Object(result.metrics.clone()))
        .bind(result.checked_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, alert), fields(alert_id = %alert.id))]
    async fn record_alert(&self, alert: &Alert) -> SyncResult<()> {
        sqlx::query(
            r"
            INSERT INTO health_alerts (id, check_kind, level, message, tenant_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(alert.id.as_uuid())
        .bind(alert.check.as_str())
        .bind(alert.level.as_str())
        .bind(&alert.message)
        .bind(alert.tenant_id.map(|t| *t.as_uuid()))
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, op), fields(recovery_id = %op.id))]
    async fn save_recovery(&self, op: &RecoveryOperation) -> SyncResult<()> {
        sqlx::query(
            r"
            INSERT INTO recovery_operations (
                id, action, check_kind, alert_id, status, data, error,
                created_at, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                error = EXCLUDED.error,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at
            ",
        )
        .bind(op.id.as_uuid())
        .bind(op.action.as_str())
        .bind(op.check.as_str())
        .bind(op.alert_id.map(|a| *a.as_uuid()))
        .bind(op.status.as_str())
        .bind(Value::Object(op.data.clone()))
        .bind(op.error.as_deref())
        .bind(op.created_at)
        .bind(op.started_at)
        .bind(op.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn in_flight_recoveries(&self) -> SyncResult<Vec<RecoveryOperation>> {
        let rows = sqlx::query_as::<_, RecoveryRow>(
            r"
            SELECT id, action, check_kind, alert_id, status, data, error,
                   created_at, started_at, completed_at
            FROM recovery_operations
            WHERE status IN ('pending', 'running')
            ORDER BY created_at ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RecoveryRow::into_operation).collect()
    }
}

#[async_trait]
impl DeltaTokenStore for PgStore {
    #[instrument(skip(self))]
    async fn load_token(
        &self,
        tenant_id: TenantId,
        resource_type: ResourceType,
    ) -> SyncResult<Option<String>> {
        let token: Option<String> = sqlx::query_scalar(
            r"
            SELECT token_value FROM delta_tokens
            WHERE tenant_id = $1 AND resource_type = $2 AND is_valid = TRUE
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(resource_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    #[instrument(skip(self, token))]
    async fn save_token(
        &self,
        tenant_id: TenantId,
        resource_type: ResourceType,
        token: &str,
    ) -> SyncResult<()> {
        sqlx::query(
            r"
            INSERT INTO delta_tokens (tenant_id, resource_type, token_value, is_valid, updated_at)
            VALUES ($1, $2, $3, TRUE, NOW())
            ON CONFLICT (tenant_id, resource_type) DO UPDATE SET
                token_value = EXCLUDED.token_value,
                is_valid = TRUE,
                updated_at = NOW()
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(resource_type.as_str())
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn invalidate_token(
        &self,
        tenant_id: TenantId,
        resource_type: ResourceType,
    ) -> SyncResult<()> {
        sqlx::query(
            r"
            UPDATE delta_tokens
            SET is_valid = FALSE, updated_at = NOW()
            WHERE tenant_id = $1 AND resource_type = $2
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(resource_type.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DeltaCacheStore for PgStore {
    async fn get_entry(&self, key: &str) -> SyncResult<Option<Value>> {
        // Expired rows are purged lazily on read.
        sqlx::query("DELETE FROM delta_cache WHERE cache_key = $1 AND expires_at <= NOW()")
            .bind(key)
            .execute(&self.pool)
            .await?;

        let value: Option<Value> = sqlx::query_scalar(
            r"
            SELECT value FROM delta_cache
            WHERE cache_key = $1 AND expires_at > NOW()
            ",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    async fn put_entry(
        &self,
        key: &str,
        value: &Value,
        expires_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        sqlx::query(
            r"
            INSERT INTO delta_cache (cache_key, value, expires_at, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (cache_key) DO UPDATE SET
                value = EXCLUDED.value,
                expires_at = EXCLUDED.expires_at
            ",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_entry(&self, key: &str) -> SyncResult<()> {
        sqlx::query("DELETE FROM delta_cache WHERE cache_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_entries_matching(&self, pattern: &str) -> SyncResult<u64> {
        // Glob to SQL LIKE: * -> %, ? -> _.
        let like = pattern.replace('%', "\\%").replace('_', "\\_")
            .replace('*', "%")
            .replace('?', "_");
        let result = sqlx::query("DELETE FROM delta_cache WHERE cache_key LIKE $1")
            .bind(like)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Database row for sync operations.
#[derive(Debug, sqlx::FromRow)]
struct SyncOperationRow {
    id: Uuid,
    tenant_id: Uuid,
    user_id: Uuid,
    sync_type: String,
    direction: String,
    status: String,
    resource_type: Option<String>,
    resource_ids: Option<Vec<String>>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    last_heartbeat: Option<DateTime<Utc>>,
    metrics: Value,
    config: Value,
    parent_id: Option<Uuid>,
    child_ids: Value,
    resources: Value,
    error: Option<String>,
}

impl SyncOperationRow {
    fn into_operation(self) -> SyncResult<SyncOperation> {
        let metrics: SyncMetrics = serde_json::from_value(self.metrics)?;
        let config: Map<String, Value> = match self.config {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Ok(SyncOperation {
            id: OperationId::from_uuid(self.id),
            sync_type: self
                .sync_type
                .parse::<SyncType>()
                .map_err(SyncError::contract)?,
            direction: self
                .direction
                .parse::<SyncDirection>()
                .map_err(SyncError::contract)?,
            status: self
                .status
                .parse::<SyncStatus>()
                .map_err(SyncError::contract)?,
            tenant_id: TenantId::from_uuid(self.tenant_id),
            user_id: UserId::from_uuid(self.user_id),
            resource_type: self
                .resource_type
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(SyncError::contract)?,
            resource_ids: self.resource_ids,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            last_heartbeat: self.last_heartbeat,
            metrics,
            config,
            parent_id: self.parent_id.map(OperationId::from_uuid),
            child_ids: serde_json::from_value(self.child_ids).unwrap_or_default(),
            resources: serde_json::from_value(self.resources).unwrap_or_default(),
            error: self.error,
        })
    }
}

/// Database row for conflicts.
#[derive(Debug, sqlx::FromRow)]
struct ConflictRow {
    id: Uuid,
    tenant_id: Uuid,
    user_id: Uuid,
    resource_type: String,
    resource_id: String,
    conflict_type: String,
    severity: String,
    local_version: Value,
    remote_version: Value,
    local_etag: Option<String>,
    remote_etag: Option<String>,
    local_modified_at: Option<DateTime<Utc>>,
    remote_modified_at: Option<DateTime<Utc>>,
    conflicting_fields: Vec<String>,
    strategy: Option<String>,
    resolved: bool,
    resolved_at: Option<DateTime<Utc>>,
    resolution_metadata: Value,
    created_at: DateTime<Utc>,
}

impl ConflictRow {
    fn into_context(self) -> SyncResult<ConflictContext> {
        Ok(ConflictContext {
            id: ConflictId::from_uuid(self.id),
            conflict_type: self
                .conflict_type
                .parse::<ConflictType>()
                .map_err(SyncError::contract)?,
            severity: self
                .severity
                .parse::<ConflictSeverity>()
                .map_err(SyncError::contract)?,
            resource_type: self
                .resource_type
                .parse::<ResourceType>()
                .map_err(SyncError::contract)?,
            resource_id: self.resource_id,
            tenant_id: TenantId::from_uuid(self.tenant_id),
            user_id: UserId::from_uuid(self.user_id),
            local_version: serde_json::from_value::<ResourceVersion>(self.local_version)?,
            remote_version: serde_json::from_value::<ResourceVersion>(self.remote_version)?,
            local_etag: self.local_etag,
            remote_etag: self.remote_etag,
            local_modified_at: self.local_modified_at,
            remote_modified_at: self.remote_modified_at,
            conflicting_fields: self.conflicting_fields,
            strategy: self
                .strategy
                .as_deref()
                .map(str::parse::<ResolutionStrategy>)
                .transpose()
                .map_err(SyncError::contract)?,
            resolved: self.resolved,
            resolved_at: self.resolved_at,
            resolution_metadata: match self.resolution_metadata {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            created_at: self.created_at,
        })
    }
}

/// Database row for recovery operations.
#[derive(Debug, sqlx::FromRow)]
struct RecoveryRow {
    id: Uuid,
    action: String,
    check_kind: String,
    alert_id: Option<Uuid>,
    status: String,
    data: Value,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl RecoveryRow {
    fn into_operation(self) -> SyncResult<RecoveryOperation> {
        Ok(RecoveryOperation {
            id: tasksync_core::RecoveryId::from_uuid(self.id),
            action: self.action.parse().map_err(SyncError::contract)?,
            check: self.check_kind.parse().map_err(SyncError::contract)?,
            alert_id: self.alert_id.map(tasksync_core::AlertId::from_uuid),
            status: self
                .status
                .parse::<RecoveryStatus>()
                .map_err(SyncError::contract)?,
            data: match self.data {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            error: self.error,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}
