//! Conflict lifecycle management.
//!
//! Detection, persistence, resolution, and audit live behind one façade. A
//! conflict is persisted the moment it is detected, before any resolution
//! runs, so a crash mid-resolution never loses the evidence. Resolved
//! conflicts are immutable.

use std::sync::Arc;

use serde_json::Value;
use tasksync_core::{ConflictId, ResourceVersion, TenantId, UserId};
use tracing::{debug, info, instrument, warn};

use crate::conflict::context::{ConflictContext, ResolutionResult};
use crate::conflict::detector::ConflictDetector;
use crate::conflict::resolver::ConflictResolver;
use crate::error::{SyncError, SyncResult};
use crate::store::ConflictStore;
use crate::types::ResolutionStrategy;

/// Coordinates conflict detection, resolution, and persistence.
pub struct ConflictManager {
    detector: ConflictDetector,
    resolver: ConflictResolver,
    store: Arc<dyn ConflictStore>,
}

impl ConflictManager {
    /// Wire a manager over a conflict store.
    #[must_use]
    pub fn new(store: Arc<dyn ConflictStore>) -> Self {
        Self {
            detector: ConflictDetector::new(),
            resolver: ConflictResolver::new(),
            store,
        }
    }

    /// Detect and, when possible, resolve a conflict between two versions.
    ///
    /// Returns `None` when the versions agree. When a conflict is found it is
    /// persisted first, then the default strategy for its classification
    /// runs; conflicts the strategy cannot finalize stay pending for manual
    /// review.
    #[instrument(skip(self, local, remote), fields(resource_id = local.id()))]
    pub async fn handle_conflict(
        &self,
        local: &ResourceVersion,
        remote: &ResourceVersion,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> SyncResult<Option<ResolutionResult>> {
        let Some(mut ctx) = self
            .detector
            .detect_conflict(local, remote, tenant_id, user_id)
        else {
            return Ok(None);
        };

        // Persist before resolving; the conflict record must survive a crash
        // during resolution.
        self.store.insert_conflict(&ctx).await?;
        info!(
            conflict_id = %ctx.id,
            conflict_type = %ctx.conflict_type,
            severity = %ctx.severity,
            "Conflict detected and recorded"
        );

        let result = self.resolver.resolve_conflict(&ctx, None)?;
        self.record_outcome(&mut ctx, &result).await?;
        Ok(Some(result))
    }

    /// Re-run resolution for a stored conflict, optionally forcing a
    /// strategy. Used for manual review decisions and recovery sweeps.
    #[instrument(skip(self))]
    pub async fn resolve_existing(
        &self,
        conflict_id: ConflictId,
        strategy_override: Option<ResolutionStrategy>,
    ) -> SyncResult<ResolutionResult> {
        let mut ctx = self
            .store
            .load_conflict(conflict_id)
            .await?
            .ok_or_else(|| SyncError::not_found("conflict", conflict_id))?;

        if ctx.resolved {
            return Err(SyncError::contract(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }

        let result = self.resolver.resolve_conflict(&ctx, strategy_override)?;
        self.record_outcome(&mut ctx, &result).await?;
        Ok(result)
    }

    /// Conflicts waiting on a human, oldest first.
    pub async fn pending_manual(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> SyncResult<Vec<ConflictContext>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.store.pending_manual(tenant_id, limit).await
    }

    /// Number of unresolved conflicts for a tenant.
    pub async fn count_pending(&self, tenant_id: TenantId) -> SyncResult<i64> {
        self.store.count_pending(tenant_id).await
    }

    /// Resolve up to `max` pending manual conflicts with a forced strategy.
    ///
    /// Recovery uses this to drain a conflict backlog; individual failures
    /// are logged and skipped so one poisoned conflict cannot stall the
    /// sweep. Returns how many conflicts were finalized.
    #[instrument(skip(self))]
    pub async fn resolve_pending(
        &self,
        tenant_id: TenantId,
        max: usize,
        strategy: ResolutionStrategy,
    ) -> SyncResult<usize> {
        let max = i64::try_from(max).unwrap_or(i64::MAX);
        let pending = self.store.pending_manual(tenant_id, max).await?;
        let total = pending.len();
        let mut resolved = 0;

        for ctx in pending {
            match self.resolve_existing(ctx.id, Some(strategy)).await {
                Ok(result) if result.success => resolved += 1,
                Ok(_) => debug!(conflict_id = %ctx.id, "Conflict still needs manual review"),
                Err(e) => {
                    warn!(conflict_id = %ctx.id, error = %e, "Backlog resolution failed")
                }
            }
        }

        info!(tenant = %tenant_id, resolved, total, "Conflict backlog sweep finished");
        Ok(resolved)
    }

    /// Persist a resolution outcome and update the conflict record.
    async fn record_outcome(
        &self,
        ctx: &mut ConflictContext,
        result: &ResolutionResult,
    ) -> SyncResult<()> {
        ctx.strategy = Some(result.strategy);
        ctx.resolution_metadata = result.metadata.clone();
        if let Some(error) = &result.error {
            ctx.resolution_metadata
                .insert("error".to_string(), Value::String(error.clone()));
        }
        if result.success {
            ctx.resolved = true;
            ctx.resolved_at = Some(result.resolved_at);
        }

        if let Some(branch_id) = result.branch_id {
            self.store.record_branch(branch_id, ctx).await?;
        }
        self.store.record_resolution(ctx.tenant_id, result).await?;
        self.store.update_conflict(ctx).await?;
        Ok(())
    }
}
