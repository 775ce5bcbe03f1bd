//! Delta query batching, caching, and optimization.

pub mod batch;
pub mod optimizer;
pub mod query;

pub use batch::{BatchQueue, BatchRequest, DeltaBatch, DeltaResult, MergedRequest, SubmitOutcome};
pub use optimizer::{DeltaOptimizer, OptimizerStats};
pub use query::{DeltaQueryClient, DeltaQueryResult};
