//! Delta query execution against the remote API.
//!
//! Follows `@odata.nextLink` pagination, captures the closing
//! `@odata.deltaLink`, and persists it per (tenant, resource type) so the
//! next query is incremental even across process restarts.

use std::sync::Arc;

use serde_json::Value;
use tasksync_core::{GraphClient, GraphError, ResourceType, TenantId};
use tracing::{debug, info, instrument, warn};

use crate::error::SyncResult;
use crate::store::DeltaTokenStore;

/// Changes returned by one full delta query (all pages).
#[derive(Debug, Clone, Default)]
pub struct DeltaQueryResult {
    /// Changed resources, raw remote payloads.
    pub changes: Vec<Value>,
    /// Ids the remote marked `@removed`.
    pub deleted_ids: Vec<String>,
    /// Whether this query ran without a checkpoint (full enumeration).
    pub full_resync: bool,
    /// Pages fetched.
    pub pages: usize,
}

/// Executes delta queries and manages the per-scope checkpoint tokens.
pub struct DeltaQueryClient {
    graph: Arc<dyn GraphClient>,
    tokens: Arc<dyn DeltaTokenStore>,
}

impl DeltaQueryClient {
    /// Create a client over a remote API handle and a token store.
    #[must_use]
    pub fn new(graph: Arc<dyn GraphClient>, tokens: Arc<dyn DeltaTokenStore>) -> Self {
        Self { graph, tokens }
    }

    /// Base delta path for a resource type.
    fn delta_path(resource_type: ResourceType) -> &'static str {
        match resource_type {
            ResourceType::Plan => "/planner/plans/delta",
            ResourceType::Task => "/planner/tasks/delta",
        }
    }

    /// Fetch all changes for a (tenant, resource type) scope.
    ///
    /// Resumes from the stored checkpoint when one exists. When the remote
    /// rejects the checkpoint as expired, the token is invalidated and the
    /// query reruns as a full enumeration.
    #[instrument(skip(self))]
    pub async fn fetch_changes(
        &self,
        tenant_id: TenantId,
        resource_type: ResourceType,
    ) -> SyncResult<DeltaQueryResult> {
        let token = self.tokens.load_token(tenant_id, resource_type).await?;

        match self.run_query(tenant_id, resource_type, token.as_deref()).await {
            Ok(result) => Ok(result),
            Err(e) if token.is_some() && Self::is_resync_required(&e) => {
                warn!(
                    %tenant_id,
                    %resource_type,
                    "Delta checkpoint rejected by remote, falling back to full resync"
                );
                self.tokens.invalidate_token(tenant_id, resource_type).await?;
                Ok(self.run_query(tenant_id, resource_type, None).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the stored checkpoint so the next query enumerates from scratch.
    #[instrument(skip(self))]
    pub async fn invalidate_token(
        &self,
        tenant_id: TenantId,
        resource_type: ResourceType,
    ) -> SyncResult<()> {
        self.tokens.invalidate_token(tenant_id, resource_type).await
    }

    async fn run_query(
        &self,
        tenant_id: TenantId,
        resource_type: ResourceType,
        token: Option<&str>,
    ) -> Result<DeltaQueryResult, GraphError> {
        let full_resync = token.is_none();
        let mut result = DeltaQueryResult {
            full_resync,
            ..DeltaQueryResult::default()
        };

        // A stored checkpoint is a complete delta link; follow it verbatim.
        // Without one, start a fresh delta enumeration with a minimized
        // projection.
        let (mut url, mut params): (String, Vec<(String, String)>) = match token {
            Some(link) => (link.to_string(), Vec::new()),
            None => (
                Self::delta_path(resource_type).to_string(),
                vec![("$select".to_string(), resource_type.select_fields().to_string())],
            ),
        };

        loop {
            let body = self.graph.get(&url, &params).await?;
            result.pages += 1;

            let page = body
                .get("value")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            debug!(page = result.pages, items = page.len(), "Processing delta page");

            for item in page {
                if item.get("@removed").is_some() {
                    if let Some(id) = item.get("id").and_then(Value::as_str) {
                        result.deleted_ids.push(id.to_string());
                    }
                    continue;
                }
                result.changes.push(item);
            }

            if let Some(next) = body.get("@odata.nextLink").and_then(Value::as_str) {
                url = next.to_string();
                params = Vec::new();
                continue;
            }

            if let Some(delta_link) = body.get("@odata.deltaLink").and_then(Value::as_str) {
                if let Err(e) = self
                    .tokens
                    .save_token(tenant_id, resource_type, delta_link)
                    .await
                {
                    // Losing the checkpoint costs a resync, not correctness.
                    warn!(%tenant_id, %resource_type, error = %e, "Failed to persist delta checkpoint");
                }
            }
            break;
        }

        info!(
            %tenant_id,
            %resource_type,
            changes = result.changes.len(),
            deleted = result.deleted_ids.len(),
            pages = result.pages,
            full_resync,
            "Delta query completed"
        );
        Ok(result)
    }

    /// Whether the remote is telling us the checkpoint expired.
    fn is_resync_required(error: &GraphError) -> bool {
        matches!(
            error,
            GraphError::Api { code, .. }
                if code == "resyncRequired" || code == "syncStateNotFound"
        )
    }
}
