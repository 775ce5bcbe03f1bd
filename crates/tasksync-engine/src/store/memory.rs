//! In-memory persistence for tests and ephemeral embedding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::Glob;
use serde_json::Value;
use std::collections::HashMap;
use tasksync_core::{ConflictId, OperationId, ResourceType, TenantId};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::conflict::context::{ConflictContext, ResolutionResult};
use crate::error::{SyncError, SyncResult};
use crate::health::types::{Alert, HealthResult, RecoveryOperation};
use crate::status::model::{ResourceSyncStatus, SyncOperation};
use crate::types::ResourceSyncState;

use super::{ConflictStore, DeltaCacheStore, DeltaTokenStore, HealthStore, SyncStore};

/// Hash-map backed implementation of every engine store trait.
///
/// Loses everything on drop; use [`super::PgStore`] for durable deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    operations: RwLock<HashMap<OperationId, SyncOperation>>,
    resource_status: RwLock<HashMap<(TenantId, String), ResourceSyncStatus>>,
    conflicts: RwLock<HashMap<ConflictId, ConflictContext>>,
    resolutions: RwLock<Vec<(TenantId, ResolutionResult)>>,
    branches: RwLock<Vec<(Uuid, ConflictId)>>,
    results: RwLock<Vec<HealthResult>>,
    alerts: RwLock<Vec<Alert>>,
    recoveries: RwLock<HashMap<tasksync_core::RecoveryId, RecoveryOperation>>,
    tokens: RwLock<HashMap<(TenantId, ResourceType), String>>,
    cache: RwLock<HashMap<String, (Value, DateTime<Utc>)>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded alerts (test observability).
    pub async fn alert_count(&self) -> usize {
        self.alerts.read().await.len()
    }

    /// Recorded resolution outcomes for a tenant (test observability).
    pub async fn resolutions_for(&self, tenant_id: TenantId) -> Vec<ResolutionResult> {
        self.resolutions
            .read()
            .await
            .iter()
            .filter(|(t, _)| *t == tenant_id)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Branch rows recorded for a conflict (test observability).
    pub async fn branches_for(&self, conflict_id: ConflictId) -> Vec<Uuid> {
        self.branches
            .read()
            .await
            .iter()
            .filter(|(_, c)| *c == conflict_id)
            .map(|(b, _)| *b)
            .collect()
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn save_operation(&self, op: &SyncOperation) -> SyncResult<()> {
        self.operations.write().await.insert(op.id, op.clone());
        Ok(())
    }

    async fn load_operation(&self, id: OperationId) -> SyncResult<Option<SyncOperation>> {
        Ok(self.operations.read().await.get(&id).cloned())
    }

    async fn save_resource_status(
        &self,
        tenant_id: TenantId,
        status: &ResourceSyncStatus,
    ) -> SyncResult<()> {
        self.resource_status
            .write()
            .await
            .insert((tenant_id, status.resource_id.clone()), status.clone());
        Ok(())
    }

    async fn completed_operations_since(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<SyncOperation>> {
        Ok(self
            .operations
            .read()
            .await
            .values()
            .filter(|op| {
                op.tenant_id == tenant_id && op.completed_at.is_some_and(|at| at >= since)
            })
            .cloned()
            .collect())
    }

    async fn resource_state_counts(
        &self,
        tenant_id: TenantId,
    ) -> SyncResult<HashMap<ResourceSyncState, u64>> {
        let mut counts = HashMap::new();
        for ((tenant, _), status) in self.resource_status.read().await.iter() {
            if *tenant == tenant_id {
                *counts.entry(status.state).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn ping(&self) -> SyncResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ConflictStore for MemoryStore {
    async fn insert_conflict(&self, ctx: &ConflictContext) -> SyncResult<()> {
        self.conflicts.write().await.insert(ctx.id, ctx.clone());
        Ok(())
    }

    async fn update_conflict(&self, ctx: &ConflictContext) -> SyncResult<()> {
        let mut conflicts = self.conflicts.write().await;
        match conflicts.get(&ctx.id) {
            // Resolved conflicts are immutable.
            Some(existing) if existing.resolved => Ok(()),
            Some(_) => {
                conflicts.insert(ctx.id, ctx.clone());
                Ok(())
            }
            None => Err(SyncError::not_found("conflict", ctx.id)),
        }
    }

    async fn load_conflict(&self, id: ConflictId) -> SyncResult<Option<ConflictContext>> {
        Ok(self.conflicts.read().await.get(&id).cloned())
    }

    async fn record_resolution(
        &self,
        tenant_id: TenantId,
        result: &ResolutionResult,
    ) -> SyncResult<()> {
        self.resolutions
            .write()
            .await
            .push((tenant_id, result.clone()));
        Ok(())
    }

    async fn record_branch(&self, branch_id: Uuid, ctx: &ConflictContext) -> SyncResult<()> {
        self.branches.write().await.push((branch_id, ctx.id));
        Ok(())
    }

    async fn pending_manual(
        &self,
        tenant_id: TenantId,
        limit: i64,
    ) -> SyncResult<Vec<ConflictContext>> {
        let mut pending: Vec<_> = self
            .conflicts
            .read()
            .await
            .values()
            .filter(|c| {
                c.tenant_id == tenant_id
                    && !c.resolved
                    && c.strategy.is_some_and(|s| s.requires_manual_intervention())
            })
            .cloned()
            .collect();
        pending.sort_by_key(|c| c.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn count_pending(&self, tenant_id: TenantId) -> SyncResult<i64> {
        Ok(self
            .conflicts
            .read()
            .await
            .values()
            .filter(|c| c.tenant_id == tenant_id && !c.resolved)
            .count() as i64)
    }
}

#[async_trait]
impl HealthStore for MemoryStore {
    async fn record_result(&self, result: &HealthResult) -> SyncResult<()> {
        self.results.write().await.push(result.clone());
        Ok(())
    }

    async fn record_alert(&self, alert: &Alert) -> SyncResult<()> {
        self.alerts.write().await.push(alert.clone());
        Ok(())
    }

    async fn save_recovery(&self, op: &RecoveryOperation) -> SyncResult<()> {
        self.recoveries.write().await.insert(op.id, op.clone());
        Ok(())
    }

    async fn in_flight_recoveries(&self) -> SyncResult<Vec<RecoveryOperation>> {
        let mut pending: Vec<_> = self
            .recoveries
            .read()
            .await
            .values()
            .filter(|op| op.status.is_in_flight())
            .cloned()
            .collect();
        pending.sort_by_key(|op| op.created_at);
        Ok(pending)
    }
}

#[async_trait]
impl DeltaTokenStore for MemoryStore {
    async fn load_token(
        &self,
        tenant_id: TenantId,
        resource_type: ResourceType,
    ) -> SyncResult<Option<String>> {
        Ok(self
            .tokens
            .read()
            .await
            .get(&(tenant_id, resource_type))
            .cloned())
    }

    async fn save_token(
        &self,
        tenant_id: TenantId,
        resource_type: ResourceType,
        token: &str,
    ) -> SyncResult<()> {
        self.tokens
            .write()
            .await
            .insert((tenant_id, resource_type), token.to_string());
        Ok(())
    }

    async fn invalidate_token(
        &self,
        tenant_id: TenantId,
        resource_type: ResourceType,
    ) -> SyncResult<()> {
        self.tokens.write().await.remove(&(tenant_id, resource_type));
        Ok(())
    }
}

#[async_trait]
impl DeltaCacheStore for MemoryStore {
    async fn get_entry(&self, key: &str) -> SyncResult<Option<Value>> {
        let now = Utc::now();
        let mut cache = self.cache.write().await;
        match cache.get(key) {
            Some((_, expires)) if *expires <= now => {
                cache.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn put_entry(
        &self,
        key: &str,
        value: &Value,
        expires_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        self.cache
            .write()
            .await
            .insert(key.to_string(), (value.clone(), expires_at));
        Ok(())
    }

    async fn delete_entry(&self, key: &str) -> SyncResult<()> {
        self.cache.write().await.remove(key);
        Ok(())
    }

    async fn delete_entries_matching(&self, pattern: &str) -> SyncResult<u64> {
        let matcher = Glob::new(pattern)
            .map_err(|e| SyncError::contract(format!("bad glob pattern: {e}")))?
            .compile_matcher();
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|key, _| !matcher.is_match(key.as_str()));
        Ok((before - cache.len()) as u64)
    }
}
