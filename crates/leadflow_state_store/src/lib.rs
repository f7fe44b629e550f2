//! Shared coordination store behind a swappable backend.
//!
//! Queue state, rate-limit counters, and idempotency records all live in one
//! Redis-like store - the only cross-process coordination point. Backends are
//! swappable behind [`KvBackend`]: Redis for production, in-memory for tests
//! and local development.

mod memory;
mod redis_backend;

pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;

use std::sync::Arc;
use thiserror::Error;

/// Store operation result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Coordination store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable; callers decide between retry and fail-open.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store protocol error: {0}")]
    Protocol(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Minimal key-value + list + sorted-set surface the pipeline needs.
///
/// Lists back the queue wait/active lanes, sorted sets back the delayed lane,
/// plain keys back counters and idempotency records.
#[async_trait::async_trait]
pub trait KvBackend: Send + Sync {
    /// Atomically increment an integer key, returning the new value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set a key's time-to-live in seconds.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Push to the head of a list.
    async fn lpush(&self, key: &str, value: &str) -> Result<()>;

    /// Atomically move the tail of `src` to the head of `dst`.
    async fn move_tail_to_head(&self, src: &str, dst: &str) -> Result<Option<String>>;

    /// Remove all occurrences of `value` from a list, returning the count.
    async fn lrem(&self, key: &str, value: &str) -> Result<usize>;

    async fn lrange(&self, key: &str) -> Result<Vec<String>>;

    async fn llen(&self, key: &str) -> Result<usize>;

    /// Add a member to a sorted set with the given score.
    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<()>;

    /// Remove and return every member with score <= `max_score`.
    async fn zpop_due(&self, key: &str, max_score: i64) -> Result<Vec<String>>;

    async fn ping(&self) -> Result<()>;
}

/// Open a backend from a URL.
///
/// `redis://` and `rediss://` select the Redis backend; `memory:` selects the
/// in-process backend (tests, local development).
pub async fn connect(url: &str) -> Result<Arc<dyn KvBackend>> {
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        let backend = RedisBackend::connect(url).await?;
        return Ok(Arc::new(backend));
    }
    if url == "memory:" || url.starts_with("memory:") {
        return Ok(Arc::new(MemoryBackend::new()));
    }
    Err(StoreError::Protocol(format!(
        "Unsupported store URL: {url}. Expected redis://, rediss://, or memory:"
    )))
}
