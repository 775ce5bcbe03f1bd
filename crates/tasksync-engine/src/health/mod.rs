//! Health monitoring and automated recovery.
//!
//! [`HealthMonitor`] schedules the checks in [`checks`], records results and
//! alerts through the [`HealthStore`](crate::store::HealthStore), and queues
//! [`RecoveryOperation`]s that the [`RecoveryExecutor`] performs.

pub mod checks;
pub mod monitor;
pub mod recovery;
pub mod types;

pub use checks::CheckContext;
pub use monitor::{HealthMonitor, OverallHealth};
pub use recovery::RecoveryExecutor;
pub use types::{Alert, HealthCheck, HealthResult, RecoveryOperation};
