//! Multi-level cache: in-process tier, shared distributed tier, persistent tier.
//!
//! Lookup walks memory -> shared -> persistent and promotes hits upward.
//! Tier failures never propagate; a cache outage slows synchronization down
//! but must not block it, so every backend error degrades to a miss.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use globset::Glob;
use moka::future::Cache as MokaCache;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasksync_core::CacheService;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::store::DeltaCacheStore;

/// The three cache tiers, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// In-process moka tier.
    Memory,
    /// Shared distributed tier.
    Shared,
    /// Database-backed tier.
    Persistent,
}

/// All tiers, the default write distribution.
pub const ALL_TIERS: &[CacheTier] = &[CacheTier::Memory, CacheTier::Shared, CacheTier::Persistent];

/// An entry held in the memory tier.
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TierCounters {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time hit/miss counters per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub shared_hits: u64,
    pub shared_misses: u64,
    pub persistent_hits: u64,
    pub persistent_misses: u64,
}

impl CacheStats {
    /// Overall hit rate across tiers; a hit at any tier counts.
    ///
    /// Every lookup touches the memory tier first, so memory traffic is the
    /// total lookup count.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.shared_hits + self.persistent_hits;
        let lookups = self.memory_hits + self.memory_misses;
        if lookups == 0 {
            return 0.0;
        }
        (hits as f64 / lookups as f64).min(1.0)
    }
}

/// Three-tier cache with promotion and glob invalidation.
pub struct MultiLevelCache {
    memory: MokaCache<String, MemoryEntry>,
    shared: Option<Arc<dyn CacheService>>,
    persistent: Option<Arc<dyn DeltaCacheStore>>,
    default_ttl: Duration,
    memory_counters: TierCounters,
    shared_counters: TierCounters,
    persistent_counters: TierCounters,
}

impl MultiLevelCache {
    /// Build a cache over the configured tiers.
    ///
    /// `shared` and `persistent` are optional; a tier that is absent simply
    /// never hits.
    #[must_use]
    pub fn new(
        config: &CacheConfig,
        shared: Option<Arc<dyn CacheService>>,
        persistent: Option<Arc<dyn DeltaCacheStore>>,
    ) -> Self {
        let memory = MokaCache::builder()
            .max_capacity(config.memory_capacity)
            .time_to_live(config.default_ttl.max(Duration::from_secs(1)) * 4)
            .build();

        Self {
            memory,
            shared,
            persistent,
            default_ttl: config.default_ttl,
            memory_counters: TierCounters::default(),
            shared_counters: TierCounters::default(),
            persistent_counters: TierCounters::default(),
        }
    }

    /// Look a key up, fastest tier first, promoting slow-tier hits upward.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let now = Utc::now();

        if let Some(entry) = self.memory.get(key).await {
            if entry.expires_at > now {
                self.memory_counters.hit();
                return Some(entry.value);
            }
            self.memory.invalidate(key).await;
        }
        self.memory_counters.miss();

        if let Some(shared) = &self.shared {
            match shared.get(key).await {
                Ok(Some(value)) => {
                    self.shared_counters.hit();
                    self.promote_to_memory(key, value.clone()).await;
                    return Some(value);
                }
                Ok(None) => self.shared_counters.miss(),
                Err(e) => {
                    self.shared_counters.miss();
                    warn!(key, error = %e, "Shared cache tier degraded, treating as miss");
                }
            }
        }

        if let Some(persistent) = &self.persistent {
            match persistent.get_entry(key).await {
                Ok(Some(value)) => {
                    self.persistent_counters.hit();
                    self.promote_to_memory(key, value.clone()).await;
                    if let Some(shared) = &self.shared {
                        if let Err(e) = shared.set(key, value.clone(), self.default_ttl).await {
                            debug!(key, error = %e, "Promotion to shared tier failed");
                        }
                    }
                    return Some(value);
                }
                Ok(None) => self.persistent_counters.miss(),
                Err(e) => {
                    self.persistent_counters.miss();
                    warn!(key, error = %e, "Persistent cache tier degraded, treating as miss");
                }
            }
        }

        None
    }

    /// Store a value in the requested tiers (default: all).
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>, tiers: &[CacheTier]) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let expires_at = Utc::now()
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(300));

        if tiers.contains(&CacheTier::Memory) {
            self.memory
                .insert(
                    key.to_string(),
                    MemoryEntry {
                        value: value.clone(),
                        expires_at,
                    },
                )
                .await;
        }

        if tiers.contains(&CacheTier::Shared) {
            if let Some(shared) = &self.shared {
                if let Err(e) = shared.set(key, value.clone(), ttl).await {
                    warn!(key, error = %e, "Shared cache tier write failed");
                }
            }
        }

        if tiers.contains(&CacheTier::Persistent) {
            if let Some(persistent) = &self.persistent {
                if let Err(e) = persistent.put_entry(key, &value, expires_at).await {
                    warn!(key, error = %e, "Persistent cache tier write failed");
                }
            }
        }
    }

    /// Remove a key from every tier.
    pub async fn invalidate(&self, key: &str) {
        self.memory.invalidate(key).await;

        if let Some(shared) = &self.shared {
            if let Err(e) = shared.delete(key).await {
                warn!(key, error = %e, "Shared cache tier delete failed");
            }
        }

        if let Some(persistent) = &self.persistent {
            if let Err(e) = persistent.delete_entry(key).await {
                warn!(key, error = %e, "Persistent cache tier delete failed");
            }
        }
    }

    /// Remove every key matching a glob from every tier.
    ///
    /// Returns the number of entries removed from the tiers that reported one.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let mut removed = 0u64;

        match Glob::new(pattern) {
            Ok(glob) => {
                let matcher = glob.compile_matcher();
                let matching: Vec<String> = self
                    .memory
                    .iter()
                    .filter(|(key, _)| matcher.is_match(key.as_str()))
                    .map(|(key, _)| key.as_ref().clone())
                    .collect();
                for key in matching {
                    self.memory.invalidate(&key).await;
                    removed += 1;
                }
            }
            Err(e) => warn!(pattern, error = %e, "Invalid glob pattern for memory tier"),
        }

        if let Some(shared) = &self.shared {
            match shared.delete_pattern(pattern).await {
                Ok(count) => removed += count,
                Err(e) => warn!(pattern, error = %e, "Shared cache pattern delete failed"),
            }
        }

        if let Some(persistent) = &self.persistent {
            match persistent.delete_entries_matching(pattern).await {
                Ok(count) => removed += count,
                Err(e) => warn!(pattern, error = %e, "Persistent cache pattern delete failed"),
            }
        }

        removed
    }

    /// Drop everything from every tier. Used by cache-reset recovery.
    pub async fn clear(&self) {
        self.invalidate_pattern("*").await;
        self.memory.invalidate_all();
    }

    /// Current hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_counters.hits.load(Ordering::Relaxed),
            memory_misses: self.memory_counters.misses.load(Ordering::Relaxed),
            shared_hits: self.shared_counters.hits.load(Ordering::Relaxed),
            shared_misses: self.shared_counters.misses.load(Ordering::Relaxed),
            persistent_hits: self.persistent_counters.hits.load(Ordering::Relaxed),
            persistent_misses: self.persistent_counters.misses.load(Ordering::Relaxed),
        }
    }

    /// Hit rate for the optimizer score: hits at any tier over all lookups.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        self.stats().hit_rate()
    }

    async fn promote_to_memory(&self, key: &str, value: Value) {
        let expires_at = Utc::now()
            + ChronoDuration::from_std(self.default_ttl)
                .unwrap_or_else(|_| ChronoDuration::seconds(300));
        self.memory
            .insert(key.to_string(), MemoryEntry { value, expires_at })
            .await;
    }
}
