//! Common enums for synchronization, conflicts, and health.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Convert to string representation.
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text, )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $( $text => Ok($name::$variant), )+
                    _ => Err(format!(concat!("Unknown ", stringify!($name), ": {}"), s)),
                }
            }
        }
    };
}

string_enum! {
    /// Kind of synchronization run.
    SyncType {
        /// Full resync of every resource in scope.
        Full => "full",
        /// Incremental sync from a delta checkpoint.
        Delta => "delta",
        /// Operator-initiated run.
        Manual => "manual",
        /// Run triggered by an inbound webhook notification.
        Webhook => "webhook",
        /// Run spawned to apply conflict resolutions.
        ConflictResolution => "conflict_resolution",
    }
}

string_enum! {
    /// Direction of data flow for a sync run.
    SyncDirection {
        /// Remote changes applied locally.
        Inbound => "inbound",
        /// Local changes pushed to the remote API.
        Outbound => "outbound",
        /// Both directions in one run.
        Bidirectional => "bidirectional",
    }
}

string_enum! {
    /// Lifecycle status of a sync operation.
    SyncStatus {
        /// Created, not yet running.
        Pending => "pending",
        /// Actively processing.
        Running => "running",
        /// Finished successfully.
        Completed => "completed",
        /// Finished with an unrecoverable error.
        Failed => "failed",
        /// Finished with some resources failed.
        Partial => "partial",
        /// Cancelled cooperatively.
        Cancelled => "cancelled",
        /// Awaiting a retry after a transient failure.
        Retrying => "retrying",
    }
}

impl SyncStatus {
    /// Whether this status ends the operation's lifecycle.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Partial | SyncStatus::Cancelled
        )
    }

    /// Whether the operation is in flight.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncStatus::Pending | SyncStatus::Running | SyncStatus::Retrying
        )
    }
}

string_enum! {
    /// Outcome state of one resource within an operation.
    ResourceSyncState {
        /// In sync with the remote.
        Synced => "synced",
        /// Waiting to be processed (or re-processed).
        Pending => "pending",
        /// Last attempt failed.
        Failed => "failed",
        /// A conflict is pending resolution.
        Conflict => "conflict",
        /// Deliberately not processed.
        Skipped => "skipped",
    }
}

string_enum! {
    /// Classification of a detected conflict.
    ConflictType {
        /// Both sides edited the same resource concurrently.
        ConcurrentEdit => "concurrent_edit",
        /// Specific fields diverge.
        Field => "field",
        /// A required dependency is missing or deleted.
        Dependency => "dependency",
        /// Permission or scope disagreement between sides.
        Permission => "permission",
        /// Payload shape disagreement between sides.
        Schema => "schema",
    }
}

string_enum! {
    /// Severity of a detected conflict.
    ConflictSeverity {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

string_enum! {
    /// Deterministic rule producing one outcome from two versions.
    ResolutionStrategy {
        /// The later write wins.
        LastWriteWins => "last_write_wins",
        /// The earlier write wins.
        FirstWriteWins => "first_write_wins",
        /// Field-by-field type-aware merge.
        MergeFields => "merge_fields",
        /// Park for human review; local stays interim.
        ManualResolution => "manual_resolution",
        /// Reject the remote write, keep local.
        Rollback => "rollback",
        /// Keep both versions under a shared branch id.
        BranchVersion => "branch_version",
    }
}

impl ResolutionStrategy {
    /// Whether this strategy leaves the conflict awaiting a human.
    #[must_use]
    pub fn requires_manual_intervention(&self) -> bool {
        matches!(
            self,
            ResolutionStrategy::ManualResolution | ResolutionStrategy::BranchVersion
        )
    }
}

string_enum! {
    /// Result status of a health check.
    HealthStatus {
        Healthy => "healthy",
        Warning => "warning",
        Error => "error",
        Critical => "critical",
    }
}

impl HealthStatus {
    /// Alert level raised for this status, if any.
    #[must_use]
    pub fn alert_level(&self) -> Option<AlertLevel> {
        match self {
            HealthStatus::Healthy => None,
            HealthStatus::Warning => Some(AlertLevel::Warning),
            HealthStatus::Error => Some(AlertLevel::Error),
            HealthStatus::Critical => Some(AlertLevel::Critical),
        }
    }
}

string_enum! {
    /// Severity of a raised alert.
    AlertLevel {
        Info => "info",
        Warning => "warning",
        Error => "error",
        Critical => "critical",
    }
}

string_enum! {
    /// Registered health check kinds.
    HealthCheckKind {
        /// Sync duration/success-rate degradation.
        SyncPerformance => "sync_performance",
        /// Resources stuck in failed/conflict states.
        ResourceIntegrity => "resource_integrity",
        /// Distributed cache reachability.
        CacheAvailability => "cache_availability",
        /// Database reachability.
        DatabaseAvailability => "database_availability",
        /// Remote API reachability.
        ApiAvailability => "api_availability",
        /// Pending manual conflicts piling up.
        ConflictBacklog => "conflict_backlog",
    }
}

string_enum! {
    /// Automated remediation actions a check may allow-list.
    RecoveryAction {
        /// Invalidate all cache tiers.
        ResetCache => "reset_cache",
        /// Schedule a full synchronization.
        ForceFullSync => "force_full_sync",
        /// Batch-resolve a bounded number of pending manual conflicts.
        ResolvePendingConflicts => "resolve_pending_conflicts",
    }
}

string_enum! {
    /// Lifecycle of a recovery operation.
    RecoveryStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
}

impl RecoveryStatus {
    /// Whether the recovery is still occupying the in-flight set.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, RecoveryStatus::Pending | RecoveryStatus::Running)
    }
}
