//! Conflict detection.
//!
//! Compares a locally-held version against the remote version of the same
//! resource and classifies any divergence. Matching version tokens mean the
//! sides agree and comparison is skipped entirely.

use chrono::Utc;
use tasksync_core::{ConflictId, ResourceVersion, TenantId, UserId};
use tracing::{debug, instrument};

use crate::conflict::context::ConflictContext;
use crate::types::{ConflictSeverity, ConflictType};

/// Detects and classifies conflicts between resource versions.
#[derive(Debug, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    /// Create a detector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Compare two versions of one resource.
    ///
    /// Returns `None` when the sides agree: equal etags, or no sensitive
    /// field differs. Dependency violations (a task detached from its plan)
    /// are reported even when field values agree.
    #[instrument(skip(self, local, remote), fields(resource_id = local.id()))]
    pub fn detect_conflict(
        &self,
        local: &ResourceVersion,
        remote: &ResourceVersion,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Option<ConflictContext> {
        let resource_type = local.resource_type();

        if remote.resource_type() != resource_type || remote.id() != local.id() {
            // The sides do not even describe the same resource.
            return Some(self.build_context(
                ConflictType::Schema,
                ConflictSeverity::Critical,
                local,
                remote,
                tenant_id,
                user_id,
                Vec::new(),
            ));
        }

        // Matching version tokens mean the remote has not moved; local edits
        // layered on top are ordinary writes, not conflicts.
        if let (Some(local_etag), Some(remote_etag)) = (local.etag(), remote.etag()) {
            if local_etag == remote_etag {
                return None;
            }
        }

        if let Some(dependency) = resource_type.required_dependency() {
            if remote.field_value(dependency).is_none() || local.field_value(dependency).is_none()
            {
                debug!(dependency, "Required dependency missing on one side");
                return Some(self.build_context(
                    ConflictType::Dependency,
                    ConflictSeverity::High,
                    local,
                    remote,
                    tenant_id,
                    user_id,
                    vec![dependency.to_string()],
                ));
            }
        }

        let conflicting = Self::differing_fields(local, remote);
        if conflicting.is_empty() {
            return None;
        }

        let severity = Self::classify_severity(local, &conflicting);
        let conflict_type = if local.etag().is_some() && remote.etag().is_some() {
            ConflictType::ConcurrentEdit
        } else {
            ConflictType::Field
        };

        debug!(
            ?conflict_type,
            ?severity,
            fields = conflicting.len(),
            "Conflict detected"
        );
        Some(self.build_context(
            conflict_type,
            severity,
            local,
            remote,
            tenant_id,
            user_id,
            conflicting,
        ))
    }

    /// Sensitive fields whose values differ between the sides.
    ///
    /// Values are compared as JSON, so object-valued fields (assignments,
    /// share grants) compare by content regardless of key order.
    #[must_use]
    pub fn differing_fields(local: &ResourceVersion, remote: &ResourceVersion) -> Vec<String> {
        local
            .resource_type()
            .sensitive_fields()
            .iter()
            .filter(|field| local.field_value(field) != remote.field_value(field))
            .map(|field| (*field).to_string())
            .collect()
    }

    /// Severity from the conflicting field set.
    ///
    /// Any critical field makes the conflict critical; two or more
    /// high-impact fields make it high; exactly one makes it medium;
    /// anything else is low.
    fn classify_severity(local: &ResourceVersion, conflicting: &[String]) -> ConflictSeverity {
        let resource_type = local.resource_type();
        let critical = resource_type.critical_fields();
        let high_impact = resource_type.high_impact_fields();

        if conflicting.iter().any(|f| critical.contains(&f.as_str())) {
            return ConflictSeverity::Critical;
        }
        let high_hits = conflicting
            .iter()
            .filter(|f| high_impact.contains(&f.as_str()))
            .count();
        match high_hits {
            0 => ConflictSeverity::Low,
            1 => ConflictSeverity::Medium,
            _ => ConflictSeverity::High,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_context(
        &self,
        conflict_type: ConflictType,
        severity: ConflictSeverity,
        local: &ResourceVersion,
        remote: &ResourceVersion,
        tenant_id: TenantId,
        user_id: UserId,
        conflicting_fields: Vec<String>,
    ) -> ConflictContext {
        ConflictContext {
            id: ConflictId::new(),
            conflict_type,
            severity,
            resource_type: local.resource_type(),
            resource_id: local.id().to_string(),
            tenant_id,
            user_id,
            local_version: local.clone(),
            remote_version: remote.clone(),
            local_etag: local.etag().map(String::from),
            remote_etag: remote.etag().map(String::from),
            local_modified_at: local.modified_at(),
            remote_modified_at: remote.modified_at(),
            conflicting_fields,
            strategy: None,
            resolved: false,
            resolved_at: None,
            resolution_metadata: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tasksync_core::{PlanVersion, ResourceType, TaskVersion};

    fn task(etag: &str) -> TaskVersion {
        TaskVersion {
            id: "t1".to_string(),
            etag: Some(etag.to_string()),
            plan_id: Some("p1".to_string()),
            bucket_id: Some("b1".to_string()),
            title: Some("Write report".to_string()),
            description: None,
            percent_complete: Some(25),
            priority: Some(5),
            due_date: None,
            assignments: BTreeMap::new(),
            modified_at: None,
            extra: serde_json::Map::new(),
        }
    }

    fn detect(local: TaskVersion, remote: TaskVersion) -> Option<ConflictContext> {
        ConflictDetector::new().detect_conflict(
            &ResourceVersion::Task(local),
            &ResourceVersion::Task(remote),
            TenantId::new(),
            UserId::new(),
        )
    }

    #[test]
    fn test_equal_etags_never_conflict() {
        let local = task("v1");
        let mut remote = task("v1");
        remote.title = Some("Completely different".to_string());

        assert!(detect(local, remote).is_none());
    }

    #[test]
    fn test_identical_content_with_new_etag_is_benign() {
        let local = task("v1");
        let remote = task("v2");

        assert!(detect(local, remote).is_none());
    }

    #[test]
    fn test_single_high_impact_field_is_medium() {
        let local = task("v1");
        let mut remote = task("v2");
        remote.percent_complete = Some(70);

        let ctx = detect(local, remote).expect("conflict");
        assert_eq!(ctx.conflict_type, ConflictType::ConcurrentEdit);
        assert_eq!(ctx.severity, ConflictSeverity::Medium);
        assert_eq!(ctx.conflicting_fields, vec!["percentComplete".to_string()]);
    }

    #[test]
    fn test_two_high_impact_fields_are_high() {
        let local = task("v1");
        let mut remote = task("v2");
        remote.title = Some("Renamed".to_string());
        remote.due_date = Some(Utc::now());

        let ctx = detect(local, remote).expect("conflict");
        assert_eq!(ctx.severity, ConflictSeverity::High);
        assert_eq!(ctx.conflicting_fields.len(), 2);
    }

    #[test]
    fn test_critical_field_wins_over_impact_count() {
        let local = task("v1");
        let mut remote = task("v2");
        remote.bucket_id = Some("b2".to_string());

        let ctx = detect(local, remote).expect("conflict");
        assert_eq!(ctx.severity, ConflictSeverity::Critical);
    }

    #[test]
    fn test_detached_task_is_dependency_conflict() {
        let local = task("v1");
        let mut remote = task("v2");
        remote.plan_id = None;

        let ctx = detect(local, remote).expect("conflict");
        assert_eq!(ctx.conflict_type, ConflictType::Dependency);
        assert_eq!(ctx.severity, ConflictSeverity::High);
        assert_eq!(ctx.conflicting_fields, vec!["planId".to_string()]);
    }

    #[test]
    fn test_assignment_order_does_not_conflict() {
        let mut local = task("v1");
        local.assignments.insert("alice".into(), json!({"order": 1}));
        local.assignments.insert("bob".into(), json!({"order": 2}));

        let mut remote = task("v2");
        remote.assignments.insert("bob".into(), json!({"order": 2}));
        remote.assignments.insert("alice".into(), json!({"order": 1}));

        assert!(detect(local, remote).is_none());
    }

    #[test]
    fn test_plan_owner_change_is_critical() {
        let local = ResourceVersion::Plan(PlanVersion {
            id: "p1".to_string(),
            etag: Some("v1".to_string()),
            title: Some("Roadmap".to_string()),
            owner: Some("alice".to_string()),
            description: None,
            shared_with: BTreeMap::new(),
            created_at: None,
            modified_at: None,
            extra: serde_json::Map::new(),
        });
        let mut remote = local.clone();
        remote.set_etag("v2");
        if let ResourceVersion::Plan(p) = &mut remote {
            p.owner = Some("mallory".to_string());
        }

        let ctx = ConflictDetector::new()
            .detect_conflict(&local, &remote, TenantId::new(), UserId::new())
            .expect("conflict");
        assert_eq!(ctx.resource_type, ResourceType::Plan);
        assert_eq!(ctx.severity, ConflictSeverity::Critical);
    }

    #[test]
    fn test_mismatched_resource_ids_are_schema_conflicts() {
        let local = task("v1");
        let mut remote = task("v2");
        remote.id = "t2".to_string();

        let ctx = detect(local, remote).expect("conflict");
        assert_eq!(ctx.conflict_type, ConflictType::Schema);
        assert_eq!(ctx.severity, ConflictSeverity::Critical);
    }
}
