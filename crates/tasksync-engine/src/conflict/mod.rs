//! Conflict detection, resolution, and lifecycle management.

pub mod context;
pub mod detector;
pub mod manager;
pub mod resolver;

pub use context::{ConflictContext, ResolutionResult};
pub use detector::ConflictDetector;
pub use manager::ConflictManager;
pub use resolver::ConflictResolver;
