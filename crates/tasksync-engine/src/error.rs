//! Engine error types.

use tasksync_core::{CacheError, GraphError};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur inside the sync engine.
///
/// Infrastructure failures (database, cache, remote API) are retryable;
/// contract violations (unknown strategy, missing required field) are fatal
/// and must fail the enclosing operation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Remote API error.
    #[error("Remote API error: {0}")]
    Graph(#[from] GraphError),

    /// Distributed cache error.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Waiting on a batched result timed out; outcome unknown, retry later.
    #[error("Timed out waiting for batch {batch_id}")]
    BatchTimeout { batch_id: Uuid },

    /// Batch queue rejected the request.
    #[error("Batch queue full ({depth} pending requests)")]
    QueueFull { depth: usize },

    /// Operation not found in the active set or the store.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A contract violation: proceeding would corrupt sync state.
    #[error("Contract violation: {message}")]
    Contract { message: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Create a not found error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a contract violation error.
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller may retry later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Database(_) | SyncError::Cache(_) => true,
            SyncError::Graph(e) => e.is_transient(),
            SyncError::BatchTimeout { .. } | SyncError::QueueFull { .. } => true,
            SyncError::NotFound { .. }
            | SyncError::Contract { .. }
            | SyncError::Serialization(_)
            | SyncError::Internal { .. } => false,
        }
    }

    /// Whether this error must fail the enclosing operation outright.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Contract { .. })
    }

    /// The metrics error-category bucket this error increments.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Graph(GraphError::RateLimited { .. }) => ErrorCategory::RateLimit,
            SyncError::Graph(GraphError::Transport(_))
            | SyncError::BatchTimeout { .. }
            | SyncError::QueueFull { .. } => ErrorCategory::Network,
            SyncError::Graph(GraphError::Auth(_)) => ErrorCategory::Permission,
            SyncError::Contract { .. } | SyncError::Serialization(_) => ErrorCategory::Validation,
            _ => ErrorCategory::Other,
        }
    }
}

/// Buckets for per-operation error counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Remote API throttling.
    RateLimit,
    /// Network and timeout failures.
    Network,
    /// Authentication/authorization failures.
    Permission,
    /// Malformed or contract-violating data.
    Validation,
    /// Everything else.
    Other,
}

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;
