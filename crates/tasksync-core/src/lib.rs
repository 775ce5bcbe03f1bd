//! tasksync core library.
//!
//! Shared types and collaborator traits for the tasksync engine.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (`TenantId`, `OperationId`, ...)
//! - [`resource`] - Resource payload types (`ResourceVersion`, `ResourceType`)
//! - [`traits`] - Collaborator traits (`GraphClient`, `CacheService`)

pub mod ids;
pub mod resource;
pub mod traits;

pub use ids::{
    AlertId, BatchId, ConflictId, OperationId, ParseIdError, RecoveryId, TenantId, UserId,
};
pub use resource::{PlanVersion, ResourceType, ResourceVersion, TaskVersion};
pub use traits::{CacheError, CacheService, GraphClient, GraphError};
