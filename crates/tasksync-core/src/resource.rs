//! Resource payload types for the synchronized task-management domain.
//!
//! The remote API exposes two resource kinds, plans and the tasks that live
//! inside them. Versions are carried as typed payloads with a small opaque
//! `extra` map for fields the schema does not model yet; field projection for
//! conflict comparison goes through [`ResourceVersion::field_value`] so the
//! detector never reaches into struct internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Plan fields selected on delta queries.
const PLAN_SELECT_FIELDS: &str = "id,title,owner,description,sharedWith,createdDateTime";

/// Task fields selected on delta queries.
const TASK_SELECT_FIELDS: &str = "id,planId,bucketId,title,description,percentComplete,\
    priority,dueDateTime,assignments,completedDateTime";

/// Kind of synchronized resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// A plan owning a set of tasks.
    Plan,
    /// A task belonging to a plan.
    Task,
}

impl ResourceType {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Plan => "plan",
            ResourceType::Task => "task",
        }
    }

    /// Minimized `$select` projection used for delta queries of this type.
    #[must_use]
    pub fn select_fields(&self) -> &'static str {
        match self {
            ResourceType::Plan => PLAN_SELECT_FIELDS,
            ResourceType::Task => TASK_SELECT_FIELDS,
        }
    }

    /// Fields whose divergence constitutes a real conflict.
    #[must_use]
    pub fn sensitive_fields(&self) -> &'static [&'static str] {
        match self {
            ResourceType::Plan => &["title", "owner", "description", "sharedWith"],
            ResourceType::Task => &[
                "title",
                "planId",
                "bucketId",
                "description",
                "percentComplete",
                "priority",
                "dueDateTime",
                "assignments",
            ],
        }
    }

    /// Fields that escalate a conflict straight to critical severity.
    #[must_use]
    pub fn critical_fields(&self) -> &'static [&'static str] {
        match self {
            ResourceType::Plan => &["owner"],
            ResourceType::Task => &["planId", "bucketId"],
        }
    }

    /// Fields that weigh toward high severity when several conflict at once.
    #[must_use]
    pub fn high_impact_fields(&self) -> &'static [&'static str] {
        match self {
            ResourceType::Plan => &["title", "sharedWith"],
            ResourceType::Task => &[
                "title",
                "percentComplete",
                "dueDateTime",
                "assignments",
                "priority",
            ],
        }
    }

    /// Field naming the dependency this resource cannot exist without.
    #[must_use]
    pub fn required_dependency(&self) -> Option<&'static str> {
        match self {
            ResourceType::Plan => None,
            ResourceType::Task => Some("planId"),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plan" => Ok(ResourceType::Plan),
            "task" => Ok(ResourceType::Task),
            _ => Err(format!("Unknown resource type: {s}")),
        }
    }
}

/// A version of a plan as held locally or fetched remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanVersion {
    /// Remote object ID.
    pub id: String,
    /// Opaque version token.
    pub etag: Option<String>,
    /// Plan title.
    pub title: Option<String>,
    /// Owning group/user identifier.
    pub owner: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Share grants keyed by principal id.
    #[serde(default)]
    pub shared_with: BTreeMap<String, Value>,
    /// Creation timestamp.
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification timestamp.
    pub modified_at: Option<DateTime<Utc>>,
    /// Fields the schema does not model.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// A version of a task as held locally or fetched remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskVersion {
    /// Remote object ID.
    pub id: String,
    /// Opaque version token.
    pub etag: Option<String>,
    /// Owning plan ID.
    pub plan_id: Option<String>,
    /// Bucket the task sits in.
    pub bucket_id: Option<String>,
    /// Task title.
    pub title: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Completion progress, 0-100.
    pub percent_complete: Option<u8>,
    /// Priority, lower is more urgent.
    pub priority: Option<u8>,
    /// Due date.
    pub due_date: Option<DateTime<Utc>>,
    /// Assignments keyed by assignee user id.
    #[serde(default)]
    pub assignments: BTreeMap<String, Value>,
    /// Last modification timestamp.
    pub modified_at: Option<DateTime<Utc>>,
    /// Fields the schema does not model.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// A typed resource version, tagged by resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resource_type", rename_all = "snake_case")]
pub enum ResourceVersion {
    /// Plan payload.
    Plan(PlanVersion),
    /// Task payload.
    Task(TaskVersion),
}

impl ResourceVersion {
    /// The resource type of this version.
    #[must_use]
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ResourceVersion::Plan(_) => ResourceType::Plan,
            ResourceVersion::Task(_) => ResourceType::Task,
        }
    }

    /// Remote object ID.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            ResourceVersion::Plan(p) => &p.id,
            ResourceVersion::Task(t) => &t.id,
        }
    }

    /// Version token, if the side carries one.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        match self {
            ResourceVersion::Plan(p) => p.etag.as_deref(),
            ResourceVersion::Task(t) => t.etag.as_deref(),
        }
    }

    /// Replace the version token.
    pub fn set_etag(&mut self, etag: impl Into<String>) {
        match self {
            ResourceVersion::Plan(p) => p.etag = Some(etag.into()),
            ResourceVersion::Task(t) => t.etag = Some(etag.into()),
        }
    }

    /// Last modification timestamp, if known.
    #[must_use]
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ResourceVersion::Plan(p) => p.modified_at,
            ResourceVersion::Task(t) => t.modified_at,
        }
    }

    /// Stamp the modification timestamp.
    pub fn set_modified_at(&mut self, at: DateTime<Utc>) {
        match self {
            ResourceVersion::Plan(p) => p.modified_at = Some(at),
            ResourceVersion::Task(t) => t.modified_at = Some(at),
        }
    }

    /// Project a named field (remote API naming) as JSON for comparison.
    ///
    /// Unknown names fall through to the `extra` map, so forward-compatible
    /// fields still participate in comparison.
    #[must_use]
    pub fn field_value(&self, name: &str) -> Option<Value> {
        fn json_opt<T: Serialize>(v: &Option<T>) -> Option<Value> {
            v.as_ref().map(|v| serde_json::json!(v))
        }

        match self {
            ResourceVersion::Plan(p) => match name {
                "title" => json_opt(&p.title),
                "owner" => json_opt(&p.owner),
                "description" => json_opt(&p.description),
                "sharedWith" => {
                    (!p.shared_with.is_empty()).then(|| serde_json::json!(p.shared_with))
                }
                "createdDateTime" => json_opt(&p.created_at),
                other => p.extra.get(other).cloned(),
            },
            ResourceVersion::Task(t) => match name {
                "title" => json_opt(&t.title),
                "planId" => json_opt(&t.plan_id),
                "bucketId" => json_opt(&t.bucket_id),
                "description" => json_opt(&t.description),
                "percentComplete" => json_opt(&t.percent_complete),
                "priority" => json_opt(&t.priority),
                "dueDateTime" => json_opt(&t.due_date),
                "assignments" => {
                    (!t.assignments.is_empty()).then(|| serde_json::json!(t.assignments))
                }
                other => t.extra.get(other).cloned(),
            },
        }
    }

    /// Parses a version from a remote delta-query JSON object.
    pub fn from_json(resource_type: ResourceType, value: &Value) -> Result<Self, String> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("missing id on {resource_type} payload"))?
            .to_string();
        let etag = value
            .get("@odata.etag")
            .or_else(|| value.get("etag"))
            .and_then(Value::as_str)
            .map(String::from);
        let str_field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .map(String::from)
        };
        let date_field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };
        let map_field = |name: &str| -> BTreeMap<String, Value> {
            value
                .get(name)
                .and_then(Value::as_object)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default()
        };

        match resource_type {
            ResourceType::Plan => Ok(ResourceVersion::Plan(PlanVersion {
                id,
                etag,
                title: str_field("title"),
                owner: str_field("owner"),
                description: str_field("description"),
                shared_with: map_field("sharedWith"),
                created_at: date_field("createdDateTime"),
                modified_at: date_field("lastModifiedDateTime"),
                extra: Map::new(),
            })),
            ResourceType::Task => Ok(ResourceVersion::Task(TaskVersion {
                id,
                etag,
                plan_id: str_field("planId"),
                bucket_id: str_field("bucketId"),
                title: str_field("title"),
                description: str_field("description"),
                percent_complete: value
                    .get("percentComplete")
                    .and_then(Value::as_u64)
                    .map(|v| v.min(100) as u8),
                priority: value
                    .get("priority")
                    .and_then(Value::as_u64)
                    .map(|v| v.min(10) as u8),
                due_date: date_field("dueDateTime"),
                assignments: map_field("assignments"),
                modified_at: date_field("lastModifiedDateTime"),
                extra: Map::new(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_roundtrip() {
        for rt in [ResourceType::Plan, ResourceType::Task] {
            let parsed: ResourceType = rt.as_str().parse().unwrap();
            assert_eq!(rt, parsed);
        }
    }

    #[test]
    fn test_select_fields_are_minimized() {
        assert!(ResourceType::Task.select_fields().contains("percentComplete"));
        assert!(!ResourceType::Plan.select_fields().contains("assignments"));
    }

    #[test]
    fn test_severity_field_sets_are_sensitive() {
        for rt in [ResourceType::Plan, ResourceType::Task] {
            for f in rt.critical_fields() {
                assert!(rt.sensitive_fields().contains(f), "{f} not sensitive");
            }
            for f in rt.high_impact_fields() {
                assert!(rt.sensitive_fields().contains(f), "{f} not sensitive");
            }
        }
    }

    #[test]
    fn test_task_dependency_is_plan() {
        assert_eq!(ResourceType::Task.required_dependency(), Some("planId"));
        assert_eq!(ResourceType::Plan.required_dependency(), None);
    }

    #[test]
    fn test_task_from_json() {
        let json = serde_json::json!({
            "id": "task-1",
            "@odata.etag": "W/\"abc\"",
            "planId": "plan-1",
            "title": "Write report",
            "percentComplete": 40,
            "dueDateTime": "2026-03-01T12:00:00Z",
            "assignments": {"u1": {"orderHint": " !"}}
        });

        let version = ResourceVersion::from_json(ResourceType::Task, &json).unwrap();
        let ResourceVersion::Task(task) = &version else {
            panic!("expected task");
        };
        assert_eq!(task.id, "task-1");
        assert_eq!(task.etag.as_deref(), Some("W/\"abc\""));
        assert_eq!(task.plan_id.as_deref(), Some("plan-1"));
        assert_eq!(task.percent_complete, Some(40));
        assert!(task.assignments.contains_key("u1"));
        assert_eq!(version.id(), "task-1");
    }

    #[test]
    fn test_from_json_requires_id() {
        let json = serde_json::json!({"title": "missing id"});
        assert!(ResourceVersion::from_json(ResourceType::Plan, &json).is_err());
    }

    #[test]
    fn test_field_value_projection() {
        let version = ResourceVersion::Task(TaskVersion {
            id: "t".into(),
            etag: None,
            plan_id: Some("p".into()),
            bucket_id: None,
            title: Some("Title".into()),
            description: None,
            percent_complete: Some(70),
            priority: None,
            due_date: None,
            assignments: BTreeMap::new(),
            modified_at: None,
            extra: Map::new(),
        });

        assert_eq!(
            version.field_value("percentComplete"),
            Some(serde_json::json!(70))
        );
        assert_eq!(version.field_value("planId"), Some(serde_json::json!("p")));
        assert_eq!(version.field_value("assignments"), None);
        assert_eq!(version.field_value("nonexistent"), None);
    }

    #[test]
    fn test_version_serde_tagging() {
        let version = ResourceVersion::Plan(PlanVersion {
            id: "p1".into(),
            etag: Some("e1".into()),
            title: Some("Roadmap".into()),
            owner: None,
            description: None,
            shared_with: BTreeMap::new(),
            created_at: None,
            modified_at: None,
            extra: Map::new(),
        });

        let json = serde_json::to_value(&version).unwrap();
        assert_eq!(json["resource_type"], "plan");
        let back: ResourceVersion = serde_json::from_value(json).unwrap();
        assert_eq!(version, back);
    }
}
