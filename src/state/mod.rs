//! Shared key-value state: block pointers, the indexing lock, error state,
//! cache invalidation and downstream queues.

pub mod keys;
#[cfg(test)]
pub mod memory;
mod redis_state;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
pub use memory::MemoryState;
pub use redis_state::RedisState;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Failed to encode state value: {0}")]
    Encode(String),
}

#[async_trait]
pub trait SharedState: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError>;

    /// Write `value`, expiring after `ttl` when given.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StateError>;

    async fn delete(&self, keys: &[String]) -> Result<(), StateError>;

    /// Append to the list at `key`.
    async fn push(&self, key: &str, values: &[String]) -> Result<(), StateError>;

    /// Atomic set-if-absent with expiry. Returns whether the key was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StateError>;

    /// Atomic delete that only fires when the stored value equals `value`.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StateError>;
}
