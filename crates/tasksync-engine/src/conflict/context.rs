//! Conflict context and resolution result models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tasksync_core::{ConflictId, ResourceType, ResourceVersion, TenantId, UserId};
use uuid::Uuid;

use crate::types::{ConflictSeverity, ConflictType, ResolutionStrategy};

/// A detected conflict between two competing versions of one resource.
///
/// Persisted immediately after detection, before any resolution is attempted.
/// Immutable once `resolved` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictContext {
    /// Conflict ID.
    pub id: ConflictId,
    /// Classification.
    pub conflict_type: ConflictType,
    /// Assigned severity.
    pub severity: ConflictSeverity,
    /// Resource type.
    pub resource_type: ResourceType,
    /// Remote resource ID.
    pub resource_id: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// User on whose behalf the colliding write ran.
    pub user_id: UserId,
    /// The locally-held version.
    pub local_version: ResourceVersion,
    /// The remote version.
    pub remote_version: ResourceVersion,
    /// Etag of the local version, if carried.
    pub local_etag: Option<String>,
    /// Etag of the remote version, if carried.
    pub remote_etag: Option<String>,
    /// Local modification timestamp, if known.
    pub local_modified_at: Option<DateTime<Utc>>,
    /// Remote modification timestamp, if known.
    pub remote_modified_at: Option<DateTime<Utc>>,
    /// Names of the fields found in conflict.
    pub conflicting_fields: Vec<String>,
    /// Strategy chosen or assigned, once known.
    pub strategy: Option<ResolutionStrategy>,
    /// Whether the conflict has been resolved.
    pub resolved: bool,
    /// When the conflict was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Outcome metadata recorded by the resolution.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub resolution_metadata: Map<String, Value>,
    /// When the conflict was detected.
    pub created_at: DateTime<Utc>,
}

impl ConflictContext {
    /// Whether this conflict is still waiting for a human.
    #[must_use]
    pub fn needs_manual_resolution(&self) -> bool {
        !self.resolved
            && self
                .strategy
                .is_some_and(|s| s.requires_manual_intervention())
    }
}

/// Outcome of applying a resolution strategy to a conflict.
///
/// Both original versions are always retained as backups so every resolution
/// stays auditable and reversible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    /// Conflict this result belongs to.
    pub conflict_id: ConflictId,
    /// Strategy that ran.
    pub strategy: ResolutionStrategy,
    /// The version accepted or produced by the strategy.
    pub resolved_version: ResourceVersion,
    /// Whether the strategy produced a final outcome.
    pub success: bool,
    /// Error message, if the strategy failed.
    pub error: Option<String>,
    /// Whether a human still has to intervene.
    pub requires_manual_intervention: bool,
    /// Backup of the original local version.
    pub backup_local: ResourceVersion,
    /// Backup of the original remote version.
    pub backup_remote: ResourceVersion,
    /// Shared branch id when both versions were materialized.
    pub branch_id: Option<Uuid>,
    /// Outcome details recorded by the strategy (winning side, merged fields).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// When the resolution ran.
    pub resolved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksync_core::{PlanVersion, ResourceVersion};

    fn plan(id: &str, etag: &str) -> ResourceVersion {
        ResourceVersion::Plan(PlanVersion {
            id: id.to_string(),
            etag: Some(etag.to_string()),
            title: None,
            owner: None,
            description: None,
            shared_with: Default::default(),
            created_at: None,
            modified_at: None,
            extra: Map::new(),
        })
    }

    #[test]
    fn test_needs_manual_resolution() {
        let mut ctx = ConflictContext {
            id: ConflictId::new(),
            conflict_type: ConflictType::ConcurrentEdit,
            severity: ConflictSeverity::High,
            resource_type: ResourceType::Plan,
            resource_id: "p1".to_string(),
            tenant_id: TenantId::new(),
            user_id: UserId::new(),
            local_version: plan("p1", "a"),
            remote_version: plan("p1", "b"),
            local_etag: Some("a".to_string()),
            remote_etag: Some("b".to_string()),
            local_modified_at: None,
            remote_modified_at: None,
            conflicting_fields: vec!["title".to_string()],
            strategy: None,
            resolved: false,
            resolved_at: None,
            resolution_metadata: Map::new(),
            created_at: Utc::now(),
        };

        assert!(!ctx.needs_manual_resolution());

        ctx.strategy = Some(ResolutionStrategy::ManualResolution);
        assert!(ctx.needs_manual_resolution());

        ctx.resolved = true;
        ctx.resolved_at = Some(Utc::now());
        assert!(!ctx.needs_manual_resolution());
    }
}
