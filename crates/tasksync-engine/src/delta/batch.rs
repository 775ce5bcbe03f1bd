//! Delta request batching.
//!
//! Concurrent callers asking for changes to overlapping resource sets are
//! coalesced into batches so the rate-limited remote API sees one request
//! where it would otherwise see many. Queue append and readiness evaluation
//! happen under one lock per grouping key, so a request is never stranded in
//! a batch that was already drained.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tasksync_core::{BatchId, ResourceType, TenantId, UserId};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::config::BatchConfig;
use crate::error::{SyncError, SyncResult};

/// The outcome handed to each waiter when its batch completes.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaResult {
    /// Changed resources, already filtered to the waiter's resource-id scope.
    pub changes: Vec<Value>,
    /// Ids of resources the remote reports as removed.
    pub deleted_ids: Vec<String>,
    /// Whether the result was served from cache without a remote call.
    pub from_cache: bool,
}

/// A single caller's delta request, waiting inside a batch.
#[derive(Debug)]
pub struct BatchRequest {
    /// Requesting tenant.
    pub tenant_id: TenantId,
    /// Requesting user.
    pub user_id: UserId,
    /// Resource type the caller wants changes for.
    pub resource_type: ResourceType,
    /// Specific resource ids of interest; empty means all of the type.
    pub resource_ids: Vec<String>,
    /// Priority 1 (lowest) to 10 (highest).
    pub priority: u8,
    /// Relative cost estimate of serving this request alone.
    pub estimated_cost: f64,
    /// When the request was queued.
    pub queued_at: Instant,
    /// Channel the batch result is delivered on.
    pub response_tx: oneshot::Sender<SyncResult<DeltaResult>>,
}

impl BatchRequest {
    /// Whether `id` falls inside this request's resource scope.
    #[must_use]
    pub fn wants(&self, id: &str) -> bool {
        self.resource_ids.is_empty() || self.resource_ids.iter().any(|r| r == id)
    }
}

/// A group of requests that will be served by one merged remote query.
#[derive(Debug)]
pub struct DeltaBatch {
    /// Batch identifier, assigned at creation.
    pub id: BatchId,
    /// Grouping key the batch accumulated under.
    pub key: String,
    /// Member requests in arrival order.
    pub requests: Vec<BatchRequest>,
    /// When the first member arrived.
    pub created_at: Instant,
}

impl DeltaBatch {
    fn new(key: String) -> Self {
        Self {
            id: BatchId::new(),
            key,
            requests: Vec::new(),
            created_at: Instant::now(),
        }
    }

    /// Fraction of the configured batch size currently filled.
    #[must_use]
    pub fn fill_ratio(&self, config: &BatchConfig) -> f64 {
        if config.max_batch_size == 0 {
            return 1.0;
        }
        (self.requests.len() as f64 / config.max_batch_size as f64).min(1.0)
    }

    /// Fraction of the members' combined cost saved by merging into one call.
    #[must_use]
    pub fn cost_savings(&self) -> f64 {
        let total: f64 = self.requests.iter().map(|r| r.estimated_cost.max(1.0)).sum();
        if total <= 1.0 {
            return 0.0;
        }
        // One merged call replaces `total` worth of individual calls.
        (1.0 - 1.0 / total).clamp(0.0, 1.0)
    }

    /// Mean member priority scaled to the unit interval.
    #[must_use]
    pub fn priority_factor(&self) -> f64 {
        if self.requests.is_empty() {
            return 0.0;
        }
        let sum: u32 = self.requests.iter().map(|r| u32::from(r.priority)).sum();
        f64::from(sum) / (self.requests.len() as f64 * 10.0)
    }

    /// Weighted efficiency score deciding early dispatch.
    #[must_use]
    pub fn efficiency(&self, config: &BatchConfig) -> f64 {
        config.fill_weight * self.fill_ratio(config)
            + config.cost_weight * self.cost_savings()
            + config.priority_weight * self.priority_factor()
    }

    /// Whether the batch should be dispatched now.
    ///
    /// Ready when full, when its oldest member has waited past the batch
    /// timeout, or when the efficiency score clears the threshold.
    #[must_use]
    pub fn is_ready(&self, config: &BatchConfig, now: Instant) -> bool {
        if self.requests.is_empty() {
            return false;
        }
        self.requests.len() >= config.max_batch_size
            || now.duration_since(self.created_at) >= config.batch_timeout
            || self.efficiency(config) >= config.efficiency_threshold
    }

    /// Merge the members into one super-request.
    #[must_use]
    pub fn merged(&self) -> MergedRequest {
        let mut scopes: BTreeMap<ResourceType, Option<BTreeSet<String>>> = BTreeMap::new();
        let mut max_priority = 0;
        let mut tenant_id = None;

        for request in &self.requests {
            tenant_id.get_or_insert(request.tenant_id);
            max_priority = max_priority.max(request.priority);
            let scope = scopes.entry(request.resource_type).or_insert_with(|| Some(BTreeSet::new()));
            if request.resource_ids.is_empty() {
                // One unbounded member widens the whole type to "all".
                *scope = None;
            } else if let Some(ids) = scope {
                ids.extend(request.resource_ids.iter().cloned());
            }
        }

        MergedRequest {
            tenant_id: tenant_id.unwrap_or_else(TenantId::new),
            scopes,
            max_priority,
        }
    }
}

/// The union of a batch's members: what actually goes to the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRequest {
    /// Tenant all members belong to.
    pub tenant_id: TenantId,
    /// Per resource type, the union of requested ids; `None` means all.
    pub scopes: BTreeMap<ResourceType, Option<BTreeSet<String>>>,
    /// Highest member priority.
    pub max_priority: u8,
}

impl MergedRequest {
    /// Deterministic cache key: sha256 of the canonical merged request.
    ///
    /// Two batches asking for the same tenant/type/id union hash identically
    /// regardless of member arrival order.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut canonical = format!("delta:{}", self.tenant_id);
        for (resource_type, scope) in &self.scopes {
            canonical.push('|');
            canonical.push_str(resource_type.as_str());
            canonical.push(':');
            match scope {
                None => canonical.push('*'),
                Some(ids) => {
                    let joined: Vec<&str> = ids.iter().map(String::as_str).collect();
                    canonical.push_str(&joined.join(","));
                }
            }
        }
        let digest = Sha256::digest(canonical.as_bytes());
        format!("delta:{}:{:x}", self.tenant_id, digest)
    }
}

/// Result of submitting a request to the queue.
pub struct SubmitOutcome {
    /// The batch the request joined.
    pub batch_id: BatchId,
    /// Receiver the batch result will arrive on.
    pub receiver: oneshot::Receiver<SyncResult<DeltaResult>>,
    /// The batch itself, when the append made it ready for dispatch.
    pub ready: Option<DeltaBatch>,
}

/// Pending batches keyed by their grouping key.
pub struct BatchQueue {
    config: std::sync::RwLock<BatchConfig>,
    batches: Mutex<HashMap<String, DeltaBatch>>,
    depth: AtomicUsize,
}

impl BatchQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config: std::sync::RwLock::new(config),
            batches: Mutex::new(HashMap::new()),
            depth: AtomicUsize::new(0),
        }
    }

    /// Current batching parameters.
    #[must_use]
    pub fn config(&self) -> BatchConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Adjust batching parameters in place. Used by the optimizer's tuner.
    pub fn tune(&self, f: impl FnOnce(&mut BatchConfig)) {
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        f(&mut config);
    }

    /// Pending requests across all batches.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Grouping key for a request.
    ///
    /// High-priority requests group per tenant so they are not held behind
    /// unrelated traffic; scoped requests group per (tenant, type); the rest
    /// group per (tenant, type, priority band).
    fn grouping_key(&self, request: &BatchRequest, config: &BatchConfig) -> String {
        if request.priority >= config.high_priority {
            format!("prio:{}", request.tenant_id)
        } else if !request.resource_ids.is_empty() {
            format!("scoped:{}:{}", request.tenant_id, request.resource_type)
        } else {
            let band = (request.priority.clamp(1, 10) - 1) / 3;
            format!(
                "adaptive:{}:{}:{}",
                request.tenant_id, request.resource_type, band
            )
        }
    }

    /// Append a request and evaluate readiness atomically.
    ///
    /// Returns `QueueFull` when the total pending depth is at capacity.
    pub async fn submit(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        resource_type: ResourceType,
        resource_ids: Vec<String>,
        priority: u8,
    ) -> SyncResult<SubmitOutcome> {
        let config = self.config();

        let current = self.depth.load(Ordering::Relaxed);
        if current >= config.max_queue_depth {
            warn!(depth = current, "Batch queue full, rejecting delta request");
            return Err(SyncError::QueueFull { depth: current });
        }

        let (response_tx, receiver) = oneshot::channel();
        let estimated_cost = 1.0 + 0.1 * resource_ids.len() as f64;
        let request = BatchRequest {
            tenant_id,
            user_id,
            resource_type,
            resource_ids,
            priority: priority.clamp(1, 10),
            estimated_cost,
            queued_at: Instant::now(),
            response_tx,
        };
        let key = self.grouping_key(&request, &config);

        let mut batches = self.batches.lock().await;
        let batch = batches
            .entry(key.clone())
            .or_insert_with(|| DeltaBatch::new(key.clone()));
        batch.requests.push(request);
        self.depth.fetch_add(1, Ordering::Relaxed);
        let batch_id = batch.id;

        let ready = if batch.is_ready(&config, Instant::now()) {
            let batch = batches.remove(&key);
            if let Some(b) = &batch {
                self.depth.fetch_sub(b.requests.len(), Ordering::Relaxed);
                debug!(batch_id = %b.id, size = b.requests.len(), "Batch ready at submit");
            }
            batch
        } else {
            None
        };

        Ok(SubmitOutcome {
            batch_id,
            receiver,
            ready,
        })
    }

    /// Remove and return every batch that is ready for dispatch.
    pub async fn take_ready(&self) -> Vec<DeltaBatch> {
        let config = self.config();
        let now = Instant::now();
        let mut batches = self.batches.lock().await;

        let ready_keys: Vec<String> = batches
            .iter()
            .filter(|(_, batch)| batch.is_ready(&config, now))
            .map(|(key, _)| key.clone())
            .collect();

        let mut ready = Vec::with_capacity(ready_keys.len());
        for key in ready_keys {
            if let Some(batch) = batches.remove(&key) {
                self.depth.fetch_sub(batch.requests.len(), Ordering::Relaxed);
                ready.push(batch);
            }
        }
        ready
    }

    /// Remove and return every pending batch, ready or not. Used at shutdown.
    pub async fn take_all(&self) -> Vec<DeltaBatch> {
        let mut batches = self.batches.lock().await;
        let drained: Vec<DeltaBatch> = batches.drain().map(|(_, batch)| batch).collect();
        let total: usize = drained.iter().map(|b| b.requests.len()).sum();
        self.depth.fetch_sub(total, Ordering::Relaxed);
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quiet_config() -> BatchConfig {
        // High thresholds so nothing becomes ready by accident.
        BatchConfig {
            max_batch_size: 100,
            batch_timeout: Duration::from_secs(3600),
            efficiency_threshold: 10.0,
            ..BatchConfig::default()
        }
    }

    async fn submit_one(
        queue: &BatchQueue,
        tenant: TenantId,
        resource_type: ResourceType,
        ids: Vec<String>,
        priority: u8,
    ) -> SubmitOutcome {
        queue
            .submit(tenant, UserId::new(), resource_type, ids, priority)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_same_scope_requests_share_a_batch() {
        let queue = BatchQueue::new(quiet_config());
        let tenant = TenantId::new();

        let a = submit_one(&queue, tenant, ResourceType::Task, vec!["t1".into()], 5).await;
        let b = submit_one(&queue, tenant, ResourceType::Task, vec!["t2".into()], 5).await;

        assert_eq!(a.batch_id, b.batch_id);
        assert_eq!(queue.depth(), 2);
    }

    #[tokio::test]
    async fn test_high_priority_groups_per_tenant() {
        let queue = BatchQueue::new(quiet_config());
        let tenant = TenantId::new();

        let plan = submit_one(&queue, tenant, ResourceType::Plan, vec!["p".into()], 9).await;
        let task = submit_one(&queue, tenant, ResourceType::Task, vec!["t".into()], 9).await;
        let low = submit_one(&queue, tenant, ResourceType::Task, vec!["t".into()], 3).await;

        assert_eq!(plan.batch_id, task.batch_id);
        assert_ne!(plan.batch_id, low.batch_id);
    }

    #[tokio::test]
    async fn test_batch_ready_when_full() {
        let config = BatchConfig {
            max_batch_size: 2,
            ..quiet_config()
        };
        let queue = BatchQueue::new(config);
        let tenant = TenantId::new();

        let first = submit_one(&queue, tenant, ResourceType::Task, vec!["a".into()], 5).await;
        assert!(first.ready.is_none());

        let second = submit_one(&queue, tenant, ResourceType::Task, vec!["b".into()], 5).await;
        let ready = second.ready.expect("second append fills the batch");
        assert_eq!(ready.requests.len(), 2);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_queue_full_rejection() {
        let config = BatchConfig {
            max_queue_depth: 2,
            ..quiet_config()
        };
        let queue = BatchQueue::new(config);
        let tenant = TenantId::new();

        submit_one(&queue, tenant, ResourceType::Task, vec![], 5).await;
        submit_one(&queue, tenant, ResourceType::Task, vec![], 5).await;

        let result = queue
            .submit(tenant, UserId::new(), ResourceType::Task, vec![], 5)
            .await;
        assert!(matches!(result, Err(SyncError::QueueFull { depth: 2 })));
    }

    #[tokio::test]
    async fn test_take_ready_respects_timeout() {
        let config = BatchConfig {
            batch_timeout: Duration::from_millis(0),
            max_batch_size: 100,
            efficiency_threshold: 10.0,
            ..BatchConfig::default()
        };
        let queue = BatchQueue::new(config);
        let outcome = submit_one(&queue, TenantId::new(), ResourceType::Plan, vec![], 5).await;

        // Zero timeout makes the batch ready immediately at submit.
        assert!(outcome.ready.is_some());
        assert!(queue.take_ready().await.is_empty());
    }

    #[tokio::test]
    async fn test_merged_request_unions_scopes() {
        let queue = BatchQueue::new(quiet_config());
        let tenant = TenantId::new();

        submit_one(&queue, tenant, ResourceType::Task, vec!["t2".into()], 5).await;
        submit_one(&queue, tenant, ResourceType::Task, vec!["t1".into(), "t2".into()], 5).await;

        let batches = queue.take_all().await;
        assert_eq!(batches.len(), 1);
        let merged = batches[0].merged();

        let scope = merged.scopes.get(&ResourceType::Task).unwrap().as_ref().unwrap();
        assert_eq!(scope.len(), 2);
        assert!(scope.contains("t1") && scope.contains("t2"));
    }

    #[tokio::test]
    async fn test_unbounded_member_widens_scope() {
        let queue = BatchQueue::new(quiet_config());
        let tenant = TenantId::new();

        // Same priority band so both land in one batch despite different scoping.
        submit_one(&queue, tenant, ResourceType::Task, vec![], 5).await;
        submit_one(&queue, tenant, ResourceType::Task, vec![], 5).await;

        let batches = queue.take_all().await;
        let merged = batches[0].merged();
        assert!(merged.scopes.get(&ResourceType::Task).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_key_is_order_independent() {
        let tenant = TenantId::new();
        let queue_a = BatchQueue::new(quiet_config());
        let queue_b = BatchQueue::new(quiet_config());

        submit_one(&queue_a, tenant, ResourceType::Task, vec!["x".into()], 5).await;
        submit_one(&queue_a, tenant, ResourceType::Task, vec!["y".into()], 5).await;

        submit_one(&queue_b, tenant, ResourceType::Task, vec!["y".into()], 5).await;
        submit_one(&queue_b, tenant, ResourceType::Task, vec!["x".into()], 5).await;

        let merged_a = queue_a.take_all().await.pop().unwrap().merged();
        let merged_b = queue_b.take_all().await.pop().unwrap().merged();
        assert_eq!(merged_a.cache_key(), merged_b.cache_key());
    }

    #[test]
    fn test_efficiency_score_components() {
        let config = BatchConfig::default();
        let mut batch = DeltaBatch::new("k".into());
        for priority in [10, 10] {
            let (tx, _rx) = oneshot::channel();
            batch.requests.push(BatchRequest {
                tenant_id: TenantId::new(),
                user_id: UserId::new(),
                resource_type: ResourceType::Task,
                resource_ids: vec![],
                priority,
                estimated_cost: 1.0,
                queued_at: Instant::now(),
                response_tx: tx,
            });
        }

        assert!((batch.fill_ratio(&config) - 0.1).abs() < 1e-9);
        assert!((batch.priority_factor() - 1.0).abs() < 1e-9);
        assert!((batch.cost_savings() - 0.5).abs() < 1e-9);
        let expected = 0.5 * 0.1 + 0.2 * 0.5 + 0.3 * 1.0;
        assert!((batch.efficiency(&config) - expected).abs() < 1e-9);
    }
}
