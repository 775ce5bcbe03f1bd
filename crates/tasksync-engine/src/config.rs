//! Engine configuration.
//!
//! The engine is embedded in a host process; configuration is plain structs
//! injected at construction, not read from files here.

use std::time::Duration;

/// Configuration for the multi-level cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries held in the in-process tier.
    pub memory_capacity: u64,
    /// Default TTL applied when a caller does not specify one.
    pub default_ttl: Duration,
    /// TTL used for cached delta query results.
    pub delta_result_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 10_000,
            default_ttl: Duration::from_secs(300),
            delta_result_ttl: Duration::from_secs(120),
        }
    }
}

/// Configuration for delta request batching.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// A batch is ready once it holds this many requests.
    pub max_batch_size: usize,
    /// A batch is ready once its oldest member is this old.
    pub batch_timeout: Duration,
    /// A batch is ready once its efficiency score reaches this threshold.
    pub efficiency_threshold: f64,
    /// Weight of the fill ratio in the efficiency score.
    pub fill_weight: f64,
    /// Weight of the inverse estimated cost in the efficiency score.
    pub cost_weight: f64,
    /// Weight of the mean priority in the efficiency score.
    pub priority_weight: f64,
    /// Priority at or above which requests are grouped per tenant.
    pub high_priority: u8,
    /// Maximum pending requests across all batches.
    pub max_queue_depth: usize,
    /// How long `execute_optimized_delta_query` waits for a batched result.
    pub result_wait_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 20,
            batch_timeout: Duration::from_millis(500),
            efficiency_threshold: 0.75,
            fill_weight: 0.5,
            cost_weight: 0.2,
            priority_weight: 0.3,
            high_priority: 8,
            max_queue_depth: 1_000,
            result_wait_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration for the optimizer's self-tuning loop.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Interval between flush/tuning passes.
    pub tick_interval: Duration,
    /// Weight of the cache hit rate in the optimization score.
    pub cache_weight: f64,
    /// Weight of batch efficiency in the optimization score.
    pub batch_weight: f64,
    /// Scores below this trigger adaptive tuning.
    pub degraded_threshold: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            cache_weight: 0.6,
            batch_weight: 0.4,
            degraded_threshold: 0.5,
        }
    }
}

/// Configuration for the status tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Heartbeats older than this mark an operation as stalled.
    pub heartbeat_timeout: Duration,
    /// Interval between heartbeat sweeps.
    pub sweep_interval: Duration,
    /// TTL for memoized tenant health snapshots.
    pub health_ttl: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            health_ttl: Duration::from_secs(30),
        }
    }
}

/// Configuration for health monitoring and recovery.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between scheduler passes over registered checks.
    pub tick_interval: Duration,
    /// Cooldown per (check, status) before another alert may fire.
    pub alert_cooldown: Duration,
    /// Whether allow-listed recovery actions queue automatically.
    pub auto_recovery: bool,
    /// Upper bound on conflicts resolved per recovery run.
    pub max_conflicts_per_recovery: usize,
    /// Consecutive-failure streak that flags a tenant unhealthy.
    pub failure_streak_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            alert_cooldown: Duration::from_secs(900),
            auto_recovery: true,
            max_conflicts_per_recovery: 50,
            failure_streak_threshold: 3,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Cache tier settings.
    pub cache: CacheConfig,
    /// Batching settings.
    pub batch: BatchConfig,
    /// Optimizer loop settings.
    pub optimizer: OptimizerConfig,
    /// Status tracker settings.
    pub tracker: TrackerConfig,
    /// Health monitor settings.
    pub monitor: MonitorConfig,
}

impl EngineConfig {
    /// Override batch settings.
    #[must_use]
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Override tracker settings.
    #[must_use]
    pub fn with_tracker(mut self, tracker: TrackerConfig) -> Self {
        self.tracker = tracker;
        self
    }

    /// Override monitor settings.
    #[must_use]
    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }
}
