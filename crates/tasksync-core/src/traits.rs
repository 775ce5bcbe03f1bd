//! Collaborator traits consumed by the sync engine.
//!
//! The concrete remote-API transport and the distributed cache service live
//! outside this workspace; the engine only ever sees these object-safe
//! traits, which keeps every component testable against in-memory fakes.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the remote API client.
///
/// Transport-level retry and backoff are the client's own responsibility;
/// what reaches the engine is already post-retry.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Network-level failure (DNS, connect, read).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Authentication or token acquisition failure.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The remote API throttled the request.
    #[error("Rate limited by remote API")]
    RateLimited {
        /// Server-suggested wait before retrying.
        retry_after: Option<Duration>,
    },

    /// The remote API rejected the request.
    #[error("Remote API error {code}: {message}")]
    Api { code: String, message: String },

    /// The response body could not be interpreted.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl GraphError {
    /// Whether the caller may retry later with the same request.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GraphError::Transport(_) | GraphError::RateLimited { .. }
        )
    }
}

/// Client for the remote task-management API.
///
/// Implementations own HTTP transport, auth, and transport-level retries.
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// Performs a GET against the given API path with query parameters,
    /// returning the parsed JSON body.
    async fn get(&self, path: &str, params: &[(String, String)]) -> Result<Value, GraphError>;
}

/// Errors surfaced by the distributed cache service.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache backend is unreachable.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// The cache backend failed the operation.
    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Shared distributed cache (e.g. a Redis-backed service).
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Fetch a value by key.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store a value with a time-to-live.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a single key.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every key matching a glob pattern, returning the count removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_error_transience() {
        assert!(GraphError::Transport("reset".into()).is_transient());
        assert!(GraphError::RateLimited { retry_after: None }.is_transient());
        assert!(!GraphError::Auth("expired".into()).is_transient());
        assert!(!GraphError::Api {
            code: "404".into(),
            message: "gone".into()
        }
        .is_transient());
    }
}
