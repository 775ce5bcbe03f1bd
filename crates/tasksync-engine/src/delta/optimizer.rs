//! Delta query optimizer.
//!
//! Front door of the delta pipeline: callers submit requests, the optimizer
//! coalesces them into batches, serves repeats from the multi-level cache,
//! executes one merged remote query per batch, and fans the results back out
//! to every waiter. A periodic loop flushes aged batches and retunes batching
//! parameters when the combined cache/batching score degrades.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tasksync_core::{BatchId, GraphError, ResourceType, TenantId, UserId};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, instrument, warn};

use crate::cache::{MultiLevelCache, ALL_TIERS};
use crate::config::{BatchConfig, CacheConfig, OptimizerConfig};
use crate::delta::batch::{BatchQueue, DeltaBatch, DeltaResult};
use crate::delta::query::DeltaQueryClient;
use crate::error::{SyncError, SyncResult};

/// Point-in-time optimizer counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerStats {
    /// Batches dispatched so far.
    pub batches_processed: u64,
    /// Individual requests served through those batches.
    pub requests_served: u64,
    /// Mean efficiency of dispatched batches.
    pub mean_batch_efficiency: f64,
    /// Current optimization score.
    pub optimization_score: f64,
}

#[derive(Debug, Default)]
struct EfficiencyWindow {
    sum: f64,
    count: u64,
}

/// Batches, caches, and executes delta queries.
pub struct DeltaOptimizer {
    queue: Arc<BatchQueue>,
    query: DeltaQueryClient,
    cache: Arc<MultiLevelCache>,
    config: OptimizerConfig,
    cache_config: CacheConfig,
    base_batch: BatchConfig,
    batches_processed: AtomicU64,
    requests_served: AtomicU64,
    efficiency: std::sync::Mutex<EfficiencyWindow>,
}

impl DeltaOptimizer {
    /// Wire an optimizer over its queue, query client, and cache.
    #[must_use]
    pub fn new(
        queue: Arc<BatchQueue>,
        query: DeltaQueryClient,
        cache: Arc<MultiLevelCache>,
        config: OptimizerConfig,
        cache_config: CacheConfig,
    ) -> Self {
        let base_batch = queue.config();
        Self {
            queue,
            query,
            cache,
            config,
            cache_config,
            base_batch,
            batches_processed: AtomicU64::new(0),
            requests_served: AtomicU64::new(0),
            efficiency: std::sync::Mutex::new(EfficiencyWindow::default()),
        }
    }

    /// Submit a delta request for batching.
    ///
    /// Returns the id of the batch the request joined and the receiver its
    /// result will arrive on. When the append completes a batch, it is
    /// dispatched before this call returns.
    #[instrument(skip(self, resource_ids), fields(ids = resource_ids.len()))]
    pub async fn submit_delta_request(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        resource_type: ResourceType,
        resource_ids: Vec<String>,
        priority: u8,
    ) -> SyncResult<(BatchId, oneshot::Receiver<SyncResult<DeltaResult>>)> {
        let outcome = self
            .queue
            .submit(tenant_id, user_id, resource_type, resource_ids, priority)
            .await?;

        if let Some(batch) = outcome.ready {
            self.process_batch(batch).await;
        }

        Ok((outcome.batch_id, outcome.receiver))
    }

    /// Submit and wait, bounded by the configured result timeout.
    ///
    /// A timeout means the outcome is unknown and the caller should retry
    /// later; it is reported as a retryable `BatchTimeout`, never a failure
    /// of the underlying query.
    pub async fn execute_optimized_delta_query(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        resource_type: ResourceType,
        resource_ids: Vec<String>,
        priority: u8,
    ) -> SyncResult<DeltaResult> {
        let wait = self.queue.config().result_wait_timeout;
        let (batch_id, receiver) = self
            .submit_delta_request(tenant_id, user_id, resource_type, resource_ids, priority)
            .await?;

        match tokio::time::timeout(wait, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SyncError::internal("batch dispatcher dropped the request")),
            Err(_) => Err(SyncError::BatchTimeout {
                batch_id: *batch_id.as_uuid(),
            }),
        }
    }

    /// Dispatch every batch that is ready. Returns how many were dispatched.
    pub async fn process_batches(&self) -> usize {
        let ready = self.queue.take_ready().await;
        let count = ready.len();
        for batch in ready {
            self.process_batch(batch).await;
        }
        count
    }

    /// Combined cache/batching health on the unit interval.
    #[must_use]
    pub fn optimization_score(&self) -> f64 {
        let window = self.efficiency.lock().unwrap_or_else(|e| e.into_inner());
        let batch_efficiency = if window.count == 0 {
            // No dispatches yet; assume nominal so an idle engine is not
            // flagged degraded.
            self.queue.config().efficiency_threshold
        } else {
            window.sum / window.count as f64
        };
        self.config.cache_weight * self.cache.hit_rate()
            + self.config.batch_weight * batch_efficiency
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> OptimizerStats {
        let mean = {
            let window = self.efficiency.lock().unwrap_or_else(|e| e.into_inner());
            if window.count == 0 {
                0.0
            } else {
                window.sum / window.count as f64
            }
        };
        OptimizerStats {
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            requests_served: self.requests_served.load(Ordering::Relaxed),
            mean_batch_efficiency: mean,
            optimization_score: self.optimization_score(),
        }
    }

    /// Periodic flush/retune loop. Runs until the shutdown flag flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Delta optimizer loop started");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let dispatched = self.process_batches().await;
                    if dispatched > 0 {
                        debug!(dispatched, "Optimizer tick dispatched batches");
                    }
                    self.retune();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Drain stragglers so no waiter is left hanging at shutdown.
        for batch in self.queue.take_all().await {
            self.process_batch(batch).await;
        }
        info!("Delta optimizer loop stopped");
    }

    /// Dispatch one batch: cache lookup, at most one remote query per
    /// resource type in scope, then fan-out to every member.
    async fn process_batch(&self, batch: DeltaBatch) {
        let config = self.queue.config();
        let efficiency = batch.efficiency(&config);
        {
            let mut window = self.efficiency.lock().unwrap_or_else(|e| e.into_inner());
            window.sum += efficiency.min(1.0);
            window.count += 1;
        }
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.requests_served
            .fetch_add(batch.requests.len() as u64, Ordering::Relaxed);

        let merged = batch.merged();
        let cache_key = merged.cache_key();

        if let Some(cached) = self.cache.get(&cache_key).await {
            debug!(batch_id = %batch.id, "Serving batch from cache");
            Self::fan_out(batch, &cached, true);
            return;
        }

        let mut combined = serde_json::Map::new();
        for resource_type in merged.scopes.keys() {
            match self.query.fetch_changes(merged.tenant_id, *resource_type).await {
                Ok(result) => {
                    combined.insert(
                        resource_type.as_str().to_string(),
                        json!({
                            "changes": result.changes,
                            "deleted_ids": result.deleted_ids,
                        }),
                    );
                }
                Err(e) => {
                    warn!(batch_id = %batch.id, error = %e, "Batch delta query failed");
                    Self::fan_out_error(batch, &e);
                    return;
                }
            }
        }

        let combined = Value::Object(combined);
        self.cache
            .set(
                &cache_key,
                combined.clone(),
                Some(self.cache_config.delta_result_ttl),
                ALL_TIERS,
            )
            .await;
        Self::fan_out(batch, &combined, false);
    }

    /// Deliver a combined result to each member, filtered to its scope.
    fn fan_out(batch: DeltaBatch, combined: &Value, from_cache: bool) {
        // Pre-split per resource type once.
        let mut per_type: HashMap<&str, (&Vec<Value>, Vec<String>)> = HashMap::new();
        static EMPTY: Vec<Value> = Vec::new();
        if let Some(map) = combined.as_object() {
            for (type_name, section) in map {
                let changes = section
                    .get("changes")
                    .and_then(Value::as_array)
                    .unwrap_or(&EMPTY);
                let deleted = section
                    .get("deleted_ids")
                    .and_then(Value::as_array)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                per_type.insert(type_name.as_str(), (changes, deleted));
            }
        }

        for request in batch.requests {
            let (changes, deleted) = match per_type.get(request.resource_type.as_str()) {
                Some((changes, deleted)) => {
                    let filtered: Vec<Value> = changes
                        .iter()
                        .filter(|item| {
                            item.get("id")
                                .and_then(Value::as_str)
                                .is_some_and(|id| request.wants(id))
                        })
                        .cloned()
                        .collect();
                    let deleted: Vec<String> = deleted
                        .iter()
                        .filter(|id| request.wants(id))
                        .cloned()
                        .collect();
                    (filtered, deleted)
                }
                None => (Vec::new(), Vec::new()),
            };

            let result = DeltaResult {
                changes,
                deleted_ids: deleted,
                from_cache,
            };
            if request.response_tx.send(Ok(result)).is_err() {
                debug!("Batch waiter dropped before delivery");
            }
        }
    }

    /// Deliver a failure to each member, preserving retryability.
    fn fan_out_error(batch: DeltaBatch, error: &SyncError) {
        for request in batch.requests {
            let per_waiter = match error {
                SyncError::Graph(GraphError::RateLimited { retry_after }) => {
                    SyncError::Graph(GraphError::RateLimited {
                        retry_after: *retry_after,
                    })
                }
                e if e.is_retryable() => {
                    SyncError::Graph(GraphError::Transport(e.to_string()))
                }
                e => SyncError::internal(e.to_string()),
            };
            let _ = request.response_tx.send(Err(per_waiter));
        }
    }

    /// Widen batching when the score degrades, relax back when it recovers.
    fn retune(&self) {
        let score = self.optimization_score();
        let base = &self.base_batch;

        if score < self.config.degraded_threshold {
            self.queue.tune(|config| {
                let widened = config.batch_timeout.mul_f64(1.5);
                config.batch_timeout = widened.min(base.batch_timeout * 4);
                config.max_batch_size = (config.max_batch_size + 5).min(100);
            });
            debug!(score, "Optimization score degraded, widening batch window");
        } else {
            self.queue.tune(|config| {
                if config.batch_timeout > base.batch_timeout {
                    config.batch_timeout = base.batch_timeout.max(config.batch_timeout / 2);
                }
                if config.max_batch_size > base.max_batch_size {
                    config.max_batch_size =
                        base.max_batch_size.max(config.max_batch_size - 5);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tasksync_core::GraphClient;

    /// Graph fake counting calls and returning a fixed task page.
    struct CountingGraph {
        calls: AtomicUsize,
    }

    impl CountingGraph {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GraphClient for CountingGraph {
        async fn get(
            &self,
            _path: &str,
            _params: &[(String, String)],
        ) -> Result<Value, GraphError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(json!({
                "value": [
                    {"id": "t1", "title": "alpha", "percentComplete": 50},
                    {"id": "t2", "title": "beta", "percentComplete": 10},
                    {"id": "t3", "@removed": {"reason": "deleted"}}
                ],
                "@odata.deltaLink": "/planner/tasks/delta?$deltatoken=tok"
            }))
        }
    }

    fn build_optimizer(graph: Arc<CountingGraph>, batch: BatchConfig) -> Arc<DeltaOptimizer> {
        let store = Arc::new(MemoryStore::new());
        let cache_config = CacheConfig::default();
        let cache = Arc::new(MultiLevelCache::new(&cache_config, None, None));
        let queue = Arc::new(BatchQueue::new(batch));
        let query = DeltaQueryClient::new(graph, store);
        Arc::new(DeltaOptimizer::new(
            queue,
            query,
            cache,
            OptimizerConfig::default(),
            cache_config,
        ))
    }

    fn fill_on_three() -> BatchConfig {
        BatchConfig {
            max_batch_size: 3,
            batch_timeout: Duration::from_secs(3600),
            efficiency_threshold: 10.0,
            ..BatchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_remote_call() {
        let graph = Arc::new(CountingGraph::new());
        let optimizer = build_optimizer(graph.clone(), fill_on_three());
        let tenant = TenantId::new();

        let (_, rx1) = optimizer
            .submit_delta_request(tenant, UserId::new(), ResourceType::Task, vec!["t1".into()], 5)
            .await
            .unwrap();
        let (_, rx2) = optimizer
            .submit_delta_request(tenant, UserId::new(), ResourceType::Task, vec!["t2".into()], 5)
            .await
            .unwrap();
        let (_, rx3) = optimizer
            .submit_delta_request(tenant, UserId::new(), ResourceType::Task, vec!["t1".into(), "t2".into()], 5)
            .await
            .unwrap();

        let r1 = rx1.await.unwrap().unwrap();
        let r2 = rx2.await.unwrap().unwrap();
        let r3 = rx3.await.unwrap().unwrap();

        assert_eq!(graph.calls.load(Ordering::Relaxed), 1);

        // Each waiter sees only its own scope.
        assert_eq!(r1.changes.len(), 1);
        assert_eq!(r1.changes[0]["id"], "t1");
        assert_eq!(r2.changes.len(), 1);
        assert_eq!(r2.changes[0]["id"], "t2");
        assert_eq!(r3.changes.len(), 2);
        assert!(!r1.from_cache);
    }

    #[tokio::test]
    async fn test_repeat_batch_served_from_cache() {
        let graph = Arc::new(CountingGraph::new());
        let config = BatchConfig {
            max_batch_size: 1,
            ..fill_on_three()
        };
        let optimizer = build_optimizer(graph.clone(), config);
        let tenant = TenantId::new();

        let first = optimizer
            .execute_optimized_delta_query(tenant, UserId::new(), ResourceType::Task, vec!["t1".into()], 5)
            .await
            .unwrap();
        let second = optimizer
            .execute_optimized_delta_query(tenant, UserId::new(), ResourceType::Task, vec!["t1".into()], 5)
            .await
            .unwrap();

        assert_eq!(graph.calls.load(Ordering::Relaxed), 1);
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.changes, second.changes);
    }

    #[tokio::test]
    async fn test_wait_timeout_reports_unknown_outcome() {
        let graph = Arc::new(CountingGraph::new());
        let config = BatchConfig {
            result_wait_timeout: Duration::from_millis(20),
            ..fill_on_three()
        };
        let optimizer = build_optimizer(graph.clone(), config);

        // One request in a never-ready batch: the wait must time out.
        let result = optimizer
            .execute_optimized_delta_query(
                TenantId::new(),
                UserId::new(),
                ResourceType::Task,
                vec!["t1".into()],
                5,
            )
            .await;

        match result {
            Err(e @ SyncError::BatchTimeout { .. }) => assert!(e.is_retryable()),
            other => panic!("expected batch timeout, got {other:?}"),
        }
        assert_eq!(graph.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_deleted_ids_fan_out_with_scope() {
        let graph = Arc::new(CountingGraph::new());
        let config = BatchConfig {
            max_batch_size: 1,
            ..fill_on_three()
        };
        let optimizer = build_optimizer(graph, config);

        let result = optimizer
            .execute_optimized_delta_query(
                TenantId::new(),
                UserId::new(),
                ResourceType::Task,
                vec![],
                5,
            )
            .await
            .unwrap();

        assert_eq!(result.deleted_ids, vec!["t3".to_string()]);
        assert_eq!(result.changes.len(), 2);
    }

    #[tokio::test]
    async fn test_process_batches_drains_aged_batches() {
        let graph = Arc::new(CountingGraph::new());
        let config = BatchConfig {
            max_batch_size: 100,
            batch_timeout: Duration::from_millis(0),
            efficiency_threshold: 10.0,
            ..BatchConfig::default()
        };
        let optimizer = build_optimizer(graph, config);
        let tenant = TenantId::new();

        // Zero timeout: ready at submit, dispatched inline.
        let (_, rx) = optimizer
            .submit_delta_request(tenant, UserId::new(), ResourceType::Task, vec![], 5)
            .await
            .unwrap();
        let result = rx.await.unwrap().unwrap();
        assert_eq!(result.changes.len(), 2);

        let stats = optimizer.stats();
        assert_eq!(stats.batches_processed, 1);
        assert_eq!(stats.requests_served, 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_batches() {
        let graph = Arc::new(CountingGraph::new());
        let optimizer = build_optimizer(graph.clone(), fill_on_three());
        let tenant = TenantId::new();

        let (_, rx) = optimizer
            .submit_delta_request(tenant, UserId::new(), ResourceType::Task, vec!["t1".into()], 5)
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loop_handle = tokio::spawn(optimizer.clone().run(shutdown_rx));
        shutdown_tx.send(true).unwrap();
        loop_handle.await.unwrap();

        // The straggler was dispatched during shutdown drain.
        let result = rx.await.unwrap().unwrap();
        assert_eq!(result.changes.len(), 1);
        assert_eq!(graph.calls.load(Ordering::Relaxed), 1);
    }
}
