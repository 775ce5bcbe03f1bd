//! Sync operation status tracking and tenant health rollups.

pub mod model;
pub mod tracker;

pub use model::{MetricsDelta, ResourceSyncStatus, SyncHealth, SyncMetrics, SyncOperation};
pub use tracker::SyncStatusTracker;
