//! Conflict resolution strategies.
//!
//! Each strategy is a trait object registered at construction, keyed by its
//! `ResolutionStrategy` tag. Every resolution keeps both original versions as
//! backups; a strategy decides the outcome, it never destroys the inputs.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::{Map, Value};
use tasksync_core::{PlanVersion, ResourceVersion, TaskVersion};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::conflict::context::{ConflictContext, ResolutionResult};
use crate::error::{SyncError, SyncResult};
use crate::types::{ConflictSeverity, ConflictType, ResolutionStrategy};

/// What a strategy produced, before it is wrapped into a full result.
struct StrategyOutcome {
    resolved_version: ResourceVersion,
    success: bool,
    requires_manual_intervention: bool,
    branch_id: Option<Uuid>,
    metadata: Map<String, Value>,
}

/// A deterministic rule producing one outcome from a conflict.
trait ResolutionRule: Send + Sync {
    fn apply(&self, ctx: &ConflictContext) -> SyncResult<StrategyOutcome>;
}

/// Applies resolution strategies to detected conflicts.
pub struct ConflictResolver {
    rules: HashMap<ResolutionStrategy, Box<dyn ResolutionRule>>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictResolver {
    /// Build a resolver with every strategy registered.
    #[must_use]
    pub fn new() -> Self {
        let mut rules: HashMap<ResolutionStrategy, Box<dyn ResolutionRule>> = HashMap::new();
        rules.insert(ResolutionStrategy::LastWriteWins, Box::new(LastWriteWins));
        rules.insert(ResolutionStrategy::FirstWriteWins, Box::new(FirstWriteWins));
        rules.insert(ResolutionStrategy::MergeFields, Box::new(MergeFields));
        rules.insert(
            ResolutionStrategy::ManualResolution,
            Box::new(ParkForManualReview),
        );
        rules.insert(ResolutionStrategy::Rollback, Box::new(Rollback));
        rules.insert(ResolutionStrategy::BranchVersion, Box::new(BranchVersion));
        Self { rules }
    }

    /// Default strategy for a conflict's (type, severity) pair.
    #[must_use]
    pub fn default_strategy(ctx: &ConflictContext) -> ResolutionStrategy {
        match ctx.conflict_type {
            ConflictType::Dependency => ResolutionStrategy::Rollback,
            ConflictType::Permission | ConflictType::Schema => {
                ResolutionStrategy::ManualResolution
            }
            ConflictType::ConcurrentEdit | ConflictType::Field => match ctx.severity {
                ConflictSeverity::Low => ResolutionStrategy::LastWriteWins,
                ConflictSeverity::Medium => ResolutionStrategy::MergeFields,
                ConflictSeverity::High | ConflictSeverity::Critical => {
                    ResolutionStrategy::ManualResolution
                }
            },
        }
    }

    /// Resolve a conflict with the given strategy, or the default for its
    /// classification.
    ///
    /// A failing strategy is reported inside the result, flagged for manual
    /// intervention; it does not propagate as an error.
    #[instrument(skip(self, ctx), fields(conflict_id = %ctx.id))]
    pub fn resolve_conflict(
        &self,
        ctx: &ConflictContext,
        strategy_override: Option<ResolutionStrategy>,
    ) -> SyncResult<ResolutionResult> {
        let strategy = strategy_override.unwrap_or_else(|| Self::default_strategy(ctx));
        let rule = self
            .rules
            .get(&strategy)
            .ok_or_else(|| SyncError::contract(format!("no rule registered for {strategy}")))?;

        let result = match rule.apply(ctx) {
            Ok(outcome) => {
                debug!(%strategy, success = outcome.success, "Strategy applied");
                ResolutionResult {
                    conflict_id: ctx.id,
                    strategy,
                    resolved_version: outcome.resolved_version,
                    success: outcome.success,
                    error: None,
                    requires_manual_intervention: outcome.requires_manual_intervention,
                    backup_local: ctx.local_version.clone(),
                    backup_remote: ctx.remote_version.clone(),
                    branch_id: outcome.branch_id,
                    metadata: outcome.metadata,
                    resolved_at: Utc::now(),
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(%strategy, error = %e, "Strategy failed, parking for manual review");
                ResolutionResult {
                    conflict_id: ctx.id,
                    strategy,
                    resolved_version: ctx.local_version.clone(),
                    success: false,
                    error: Some(e.to_string()),
                    requires_manual_intervention: true,
                    backup_local: ctx.local_version.clone(),
                    backup_remote: ctx.remote_version.clone(),
                    branch_id: None,
                    metadata: Map::new(),
                    resolved_at: Utc::now(),
                }
            }
        };
        Ok(result)
    }
}

/// The side with the later modification timestamp wins.
///
/// When timestamps are incomplete the remote wins; the remote store is the
/// system of record.
struct LastWriteWins;

impl ResolutionRule for LastWriteWins {
    fn apply(&self, ctx: &ConflictContext) -> SyncResult<StrategyOutcome> {
        let (winner, side) = match (ctx.local_modified_at, ctx.remote_modified_at) {
            (Some(local), Some(remote)) if local > remote => (&ctx.local_version, "local"),
            (Some(_), Some(_)) => (&ctx.remote_version, "remote"),
            _ => (&ctx.remote_version, "remote"),
        };
        Ok(StrategyOutcome {
            resolved_version: winner.clone(),
            success: true,
            requires_manual_intervention: false,
            branch_id: None,
            metadata: winning_side(side),
        })
    }
}

/// The side with the earlier modification timestamp wins.
///
/// When timestamps are incomplete the local side wins; first-write semantics
/// protect what this system already committed.
struct FirstWriteWins;

impl ResolutionRule for FirstWriteWins {
    fn apply(&self, ctx: &ConflictContext) -> SyncResult<StrategyOutcome> {
        let (winner, side) = match (ctx.local_modified_at, ctx.remote_modified_at) {
            (Some(local), Some(remote)) if remote < local => (&ctx.remote_version, "remote"),
            _ => (&ctx.local_version, "local"),
        };
        Ok(StrategyOutcome {
            resolved_version: winner.clone(),
            success: true,
            requires_manual_intervention: false,
            branch_id: None,
            metadata: winning_side(side),
        })
    }
}

/// Type-aware field-by-field merge.
struct MergeFields;

impl ResolutionRule for MergeFields {
    fn apply(&self, ctx: &ConflictContext) -> SyncResult<StrategyOutcome> {
        let merged = match (&ctx.local_version, &ctx.remote_version) {
            (ResourceVersion::Task(local), ResourceVersion::Task(remote)) => {
                ResourceVersion::Task(merge_tasks(local, remote, &ctx.conflicting_fields))
            }
            (ResourceVersion::Plan(local), ResourceVersion::Plan(remote)) => {
                ResourceVersion::Plan(merge_plans(local, remote, &ctx.conflicting_fields))
            }
            _ => {
                return Err(SyncError::contract(
                    "cannot merge versions of different resource types",
                ))
            }
        };

        let mut metadata = Map::new();
        metadata.insert(
            "merged_fields".to_string(),
            Value::Array(
                ctx.conflicting_fields
                    .iter()
                    .map(|f| Value::String(f.clone()))
                    .collect(),
            ),
        );
        Ok(StrategyOutcome {
            resolved_version: merged,
            success: true,
            requires_manual_intervention: false,
            branch_id: None,
            metadata,
        })
    }
}

/// Park the conflict for a human; local stays in place as the interim state.
struct ParkForManualReview;

impl ResolutionRule for ParkForManualReview {
    fn apply(&self, ctx: &ConflictContext) -> SyncResult<StrategyOutcome> {
        Ok(StrategyOutcome {
            resolved_version: ctx.local_version.clone(),
            success: false,
            requires_manual_intervention: true,
            branch_id: None,
            metadata: Map::new(),
        })
    }
}

/// Reject the remote change and keep the local version.
struct Rollback;

impl ResolutionRule for Rollback {
    fn apply(&self, ctx: &ConflictContext) -> SyncResult<StrategyOutcome> {
        Ok(StrategyOutcome {
            resolved_version: ctx.local_version.clone(),
            success: true,
            requires_manual_intervention: false,
            branch_id: None,
            metadata: winning_side("local"),
        })
    }
}

/// Keep both versions alive under a shared branch id.
///
/// Branching defers the decision, it does not make one: the conflict stays
/// unresolved and flagged for a human until the branches are reconciled.
struct BranchVersion;

impl ResolutionRule for BranchVersion {
    fn apply(&self, ctx: &ConflictContext) -> SyncResult<StrategyOutcome> {
        let branch_id = Uuid::new_v4();
        let mut metadata = Map::new();
        metadata.insert(
            "branch_id".to_string(),
            Value::String(branch_id.to_string()),
        );
        Ok(StrategyOutcome {
            resolved_version: ctx.local_version.clone(),
            success: false,
            requires_manual_intervention: true,
            branch_id: Some(branch_id),
            metadata,
        })
    }
}

fn winning_side(side: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("winner".to_string(), Value::String(side.to_string()));
    metadata
}

/// Stamp a merged version as a new write: fresh etag, current timestamp.
fn stamp_merged(version: &mut ResourceVersion) {
    version.set_etag(format!("W/\"merged-{}\"", Uuid::new_v4()));
    version.set_modified_at(Utc::now());
}

fn merge_tasks(local: &TaskVersion, remote: &TaskVersion, conflicting: &[String]) -> TaskVersion {
    let in_conflict = |field: &str| conflicting.iter().any(|f| f == field);
    let mut merged = local.clone();

    // Fields both sides agree on, or only the remote changed, take the
    // remote value; the remote store is the system of record.
    if !in_conflict("title") {
        merged.title = remote.title.clone();
    }
    if !in_conflict("planId") {
        merged.plan_id = remote.plan_id.clone();
    }
    if !in_conflict("bucketId") {
        merged.bucket_id = remote.bucket_id.clone();
    }
    if !in_conflict("priority") {
        merged.priority = remote.priority;
    }
    if !in_conflict("description") {
        merged.description = remote.description.clone();
    }
    if !in_conflict("percentComplete") {
        merged.percent_complete = remote.percent_complete;
    }
    if !in_conflict("dueDateTime") {
        merged.due_date = remote.due_date;
    }
    if !in_conflict("assignments") {
        merged.assignments = remote.assignments.clone();
    }
    // Unmodeled fields are never part of the conflict set; union them with
    // the remote winning per key.
    for (key, value) in &remote.extra {
        merged.extra.insert(key.clone(), value.clone());
    }

    // Conflicting fields with a type-aware rule; the rest keep local.
    if in_conflict("percentComplete") {
        // Progress never moves backwards across a merge.
        merged.percent_complete = match (local.percent_complete, remote.percent_complete) {
            (Some(l), Some(r)) => Some(l.max(r)),
            (l, r) => l.or(r),
        };
    }
    if in_conflict("dueDateTime") {
        // The later due date wins; a slip on either side is respected.
        merged.due_date = match (local.due_date, remote.due_date) {
            (Some(l), Some(r)) => Some(l.max(r)),
            (l, r) => l.or(r),
        };
    }
    if in_conflict("assignments") {
        // Assignments union; on the same assignee, local wins.
        merged.assignments = local.assignments.clone();
        for (assignee, assignment) in &remote.assignments {
            merged
                .assignments
                .entry(assignee.clone())
                .or_insert_with(|| assignment.clone());
        }
    }
    if in_conflict("description") {
        merged.description = merge_descriptions(&local.description, &remote.description);
    }

    let mut version = ResourceVersion::Task(merged);
    stamp_merged(&mut version);
    match version {
        ResourceVersion::Task(task) => task,
        ResourceVersion::Plan(_) => unreachable!(),
    }
}

fn merge_plans(local: &PlanVersion, remote: &PlanVersion, conflicting: &[String]) -> PlanVersion {
    let in_conflict = |field: &str| conflicting.iter().any(|f| f == field);
    let mut merged = local.clone();

    if !in_conflict("title") {
        merged.title = remote.title.clone();
    }
    if !in_conflict("owner") {
        merged.owner = remote.owner.clone();
    }
    if !in_conflict("description") {
        merged.description = remote.description.clone();
    }
    if !in_conflict("sharedWith") {
        merged.shared_with = remote.shared_with.clone();
    }
    for (key, value) in &remote.extra {
        merged.extra.insert(key.clone(), value.clone());
    }

    if in_conflict("sharedWith") {
        // Share grants union; on the same principal, local wins.
        merged.shared_with = local.shared_with.clone();
        for (principal, grant) in &remote.shared_with {
            merged
                .shared_with
                .entry(principal.clone())
                .or_insert_with(|| grant.clone());
        }
    }
    if in_conflict("description") {
        merged.description = merge_descriptions(&local.description, &remote.description);
    }

    let mut version = ResourceVersion::Plan(merged);
    stamp_merged(&mut version);
    match version {
        ResourceVersion::Plan(plan) => plan,
        ResourceVersion::Task(_) => unreachable!(),
    }
}

/// Concatenate diverging descriptions, marking the seam.
fn merge_descriptions(local: &Option<String>, remote: &Option<String>) -> Option<String> {
    match (local, remote) {
        (Some(l), Some(r)) if l != r => Some(format!("{l} [Merged] {r}")),
        (Some(l), _) => Some(l.clone()),
        (None, r) => r.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;
    use tasksync_core::{ConflictId, ResourceType, TenantId, UserId};

    fn task_version(etag: &str) -> TaskVersion {
        TaskVersion {
            id: "t1".to_string(),
            etag: Some(etag.to_string()),
            plan_id: Some("p1".to_string()),
            bucket_id: Some("b1".to_string()),
            title: Some("Write report".to_string()),
            description: Some("draft".to_string()),
            percent_complete: Some(30),
            priority: Some(5),
            due_date: None,
            assignments: BTreeMap::new(),
            modified_at: Some(Utc::now()),
            extra: Map::new(),
        }
    }

    fn ctx_for(
        local: TaskVersion,
        remote: TaskVersion,
        conflict_type: ConflictType,
        severity: ConflictSeverity,
        fields: &[&str],
    ) -> ConflictContext {
        let local = ResourceVersion::Task(local);
        let remote = ResourceVersion::Task(remote);
        ConflictContext {
            id: ConflictId::new(),
            conflict_type,
            severity,
            resource_type: ResourceType::Task,
            resource_id: "t1".to_string(),
            tenant_id: TenantId::new(),
            user_id: UserId::new(),
            local_etag: local.etag().map(String::from),
            remote_etag: remote.etag().map(String::from),
            local_modified_at: local.modified_at(),
            remote_modified_at: remote.modified_at(),
            local_version: local,
            remote_version: remote,
            conflicting_fields: fields.iter().map(|f| (*f).to_string()).collect(),
            strategy: None,
            resolved: false,
            resolved_at: None,
            resolution_metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_default_strategy_table() {
        let mut ctx = ctx_for(
            task_version("a"),
            task_version("b"),
            ConflictType::ConcurrentEdit,
            ConflictSeverity::Low,
            &[],
        );
        assert_eq!(
            ConflictResolver::default_strategy(&ctx),
            ResolutionStrategy::LastWriteWins
        );

        ctx.severity = ConflictSeverity::Medium;
        assert_eq!(
            ConflictResolver::default_strategy(&ctx),
            ResolutionStrategy::MergeFields
        );

        ctx.severity = ConflictSeverity::Critical;
        assert_eq!(
            ConflictResolver::default_strategy(&ctx),
            ResolutionStrategy::ManualResolution
        );

        ctx.conflict_type = ConflictType::Dependency;
        assert_eq!(
            ConflictResolver::default_strategy(&ctx),
            ResolutionStrategy::Rollback
        );
    }

    #[test]
    fn test_last_write_wins_prefers_later_side() {
        let mut local = task_version("a");
        local.modified_at = Some(Utc::now());
        let mut remote = task_version("b");
        remote.modified_at = Some(Utc::now() - Duration::minutes(10));
        remote.title = Some("Old title".to_string());

        let ctx = ctx_for(
            local,
            remote,
            ConflictType::ConcurrentEdit,
            ConflictSeverity::Low,
            &["title"],
        );
        let result = ConflictResolver::new()
            .resolve_conflict(&ctx, Some(ResolutionStrategy::LastWriteWins))
            .unwrap();

        assert!(result.success);
        assert_eq!(result.resolved_version, ctx.local_version);
    }

    #[test]
    fn test_last_write_wins_falls_back_to_remote() {
        let mut local = task_version("a");
        local.modified_at = None;
        let mut remote = task_version("b");
        remote.modified_at = None;
        remote.title = Some("Remote title".to_string());

        let ctx = ctx_for(
            local,
            remote,
            ConflictType::ConcurrentEdit,
            ConflictSeverity::Low,
            &["title"],
        );
        let result = ConflictResolver::new()
            .resolve_conflict(&ctx, Some(ResolutionStrategy::LastWriteWins))
            .unwrap();

        assert_eq!(result.resolved_version, ctx.remote_version);
    }

    #[test]
    fn test_first_write_wins_falls_back_to_local() {
        let mut local = task_version("a");
        local.modified_at = None;
        let mut remote = task_version("b");
        remote.modified_at = None;

        let ctx = ctx_for(
            local,
            remote,
            ConflictType::ConcurrentEdit,
            ConflictSeverity::Low,
            &[],
        );
        let result = ConflictResolver::new()
            .resolve_conflict(&ctx, Some(ResolutionStrategy::FirstWriteWins))
            .unwrap();

        assert_eq!(result.resolved_version, ctx.local_version);
    }

    #[test]
    fn test_merge_takes_max_progress() {
        let mut local = task_version("a");
        local.percent_complete = Some(70);
        let mut remote = task_version("b");
        remote.percent_complete = Some(40);

        let ctx = ctx_for(
            local,
            remote,
            ConflictType::ConcurrentEdit,
            ConflictSeverity::Medium,
            &["percentComplete"],
        );
        let result = ConflictResolver::new().resolve_conflict(&ctx, None).unwrap();

        assert_eq!(result.strategy, ResolutionStrategy::MergeFields);
        match &result.resolved_version {
            ResourceVersion::Task(task) => {
                assert_eq!(task.percent_complete, Some(70));
                // The merge is a new write with its own version token.
                assert_ne!(task.etag.as_deref(), Some("a"));
                assert!(task.modified_at.is_some());
            }
            ResourceVersion::Plan(_) => panic!("expected task"),
        }
    }

    #[test]
    fn test_merge_unions_assignments() {
        let mut local = task_version("a");
        local
            .assignments
            .insert("alice".into(), serde_json::json!({"order": 1}));
        let mut remote = task_version("b");
        remote
            .assignments
            .insert("bob".into(), serde_json::json!({"order": 2}));

        let ctx = ctx_for(
            local,
            remote,
            ConflictType::ConcurrentEdit,
            ConflictSeverity::Medium,
            &["assignments"],
        );
        let result = ConflictResolver::new().resolve_conflict(&ctx, None).unwrap();

        match &result.resolved_version {
            ResourceVersion::Task(task) => {
                assert_eq!(task.assignments.len(), 2);
                assert!(task.assignments.contains_key("alice"));
                assert!(task.assignments.contains_key("bob"));
            }
            ResourceVersion::Plan(_) => panic!("expected task"),
        }
    }

    #[test]
    fn test_merge_concatenates_descriptions() {
        let mut local = task_version("a");
        local.description = Some("local notes".to_string());
        let mut remote = task_version("b");
        remote.description = Some("remote notes".to_string());

        let ctx = ctx_for(
            local,
            remote,
            ConflictType::ConcurrentEdit,
            ConflictSeverity::Medium,
            &["description"],
        );
        let result = ConflictResolver::new().resolve_conflict(&ctx, None).unwrap();

        match &result.resolved_version {
            ResourceVersion::Task(task) => {
                assert_eq!(
                    task.description.as_deref(),
                    Some("local notes [Merged] remote notes")
                );
            }
            ResourceVersion::Plan(_) => panic!("expected task"),
        }
    }

    #[test]
    fn test_merge_copies_non_conflicting_fields_from_remote() {
        let mut local = task_version("a");
        local.percent_complete = Some(40);
        local.description = Some("stale local notes".to_string());
        let mut remote = task_version("b");
        remote.percent_complete = Some(70);
        remote.description = None;
        remote
            .extra
            .insert("customField".to_string(), serde_json::json!("remote-only"));

        // Only percentComplete is in conflict; everything else follows the
        // remote, including fields the schema does not model.
        let ctx = ctx_for(
            local,
            remote,
            ConflictType::ConcurrentEdit,
            ConflictSeverity::Medium,
            &["percentComplete"],
        );
        let result = ConflictResolver::new().resolve_conflict(&ctx, None).unwrap();

        match &result.resolved_version {
            ResourceVersion::Task(task) => {
                assert_eq!(task.percent_complete, Some(70));
                assert_eq!(task.description, None);
                assert_eq!(
                    task.extra.get("customField"),
                    Some(&serde_json::json!("remote-only"))
                );
            }
            ResourceVersion::Plan(_) => panic!("expected task"),
        }
    }

    #[test]
    fn test_backups_always_retained() {
        let ctx = ctx_for(
            task_version("a"),
            task_version("b"),
            ConflictType::ConcurrentEdit,
            ConflictSeverity::Medium,
            &["title"],
        );
        let result = ConflictResolver::new().resolve_conflict(&ctx, None).unwrap();

        assert_eq!(result.backup_local, ctx.local_version);
        assert_eq!(result.backup_remote, ctx.remote_version);
    }

    #[test]
    fn test_manual_resolution_is_not_final() {
        let ctx = ctx_for(
            task_version("a"),
            task_version("b"),
            ConflictType::ConcurrentEdit,
            ConflictSeverity::Critical,
            &["planId"],
        );
        let result = ConflictResolver::new().resolve_conflict(&ctx, None).unwrap();

        assert_eq!(result.strategy, ResolutionStrategy::ManualResolution);
        assert!(!result.success);
        assert!(result.requires_manual_intervention);
        assert_eq!(result.resolved_version, ctx.local_version);
    }

    #[test]
    fn test_branch_version_assigns_shared_id() {
        let ctx = ctx_for(
            task_version("a"),
            task_version("b"),
            ConflictType::ConcurrentEdit,
            ConflictSeverity::High,
            &["title"],
        );
        let result = ConflictResolver::new()
            .resolve_conflict(&ctx, Some(ResolutionStrategy::BranchVersion))
            .unwrap();

        assert!(result.branch_id.is_some());
        // Branching parks the conflict like manual resolution does.
        assert!(!result.success);
        assert!(result.requires_manual_intervention);
        assert_eq!(result.resolved_version, ctx.local_version);
    }
}
