//! tasksync engine.
//!
//! Keeps a local relational store eventually consistent with a remote,
//! rate-limited task-management API. Delta queries are batched and cached,
//! conflicting concurrent edits are detected and resolved, every sync run is
//! tracked, and a health monitor watches the whole pipeline and drives
//! automated recovery.
//!
//! # Modules
//!
//! - [`cache`] - Multi-level cache (memory, shared, persistent tiers)
//! - [`delta`] - Delta request batching, querying, and optimization
//! - [`conflict`] - Conflict detection and resolution
//! - [`status`] - Sync operation tracking and tenant health
//! - [`health`] - Health checks, alerting, and recovery
//! - [`store`] - Persistence traits plus Postgres and in-memory backends
//! - [`context`] - One-stop wiring of the above
//!
//! The remote API transport and the shared cache service are injected via
//! the [`tasksync_core::GraphClient`] and [`tasksync_core::CacheService`]
//! traits; the engine never owns a network stack.

pub mod cache;
pub mod config;
pub mod conflict;
pub mod context;
pub mod delta;
pub mod error;
pub mod health;
pub mod status;
pub mod store;
pub mod types;

pub use cache::{CacheStats, CacheTier, MultiLevelCache};
pub use config::{
    BatchConfig, CacheConfig, EngineConfig, MonitorConfig, OptimizerConfig, TrackerConfig,
};
pub use conflict::{
    ConflictContext, ConflictDetector, ConflictManager, ConflictResolver, ResolutionResult,
};
pub use context::{Stores, SyncContext};
pub use delta::{DeltaOptimizer, DeltaQueryClient, DeltaResult, OptimizerStats};
pub use error::{ErrorCategory, SyncError, SyncResult};
pub use health::{Alert, HealthMonitor, HealthResult, OverallHealth, RecoveryExecutor};
pub use status::{SyncHealth, SyncOperation, SyncStatusTracker};
pub use store::{MemoryStore, PgStore};
pub use types::{
    ConflictSeverity, ConflictType, HealthCheckKind, HealthStatus, RecoveryAction,
    ResolutionStrategy, ResourceSyncState, SyncDirection, SyncStatus, SyncType,
};
