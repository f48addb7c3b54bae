//! Key/value store adapter
//!
//! Every piece of cross-replica state (cached rates, the key registry,
//! lock entries, the quota and hit counters) lives behind the [`KvStore`]
//! trait. Production wiring uses [`RedisStore`]; tests drive the same
//! engine code through the in-process [`MemoryStore`].

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;

/// Transport-level store failure.
///
/// Never surfaced to HTTP clients; callers decide per call site whether a
/// failure degrades to a cache miss, a skipped write, or a 503.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("kv transport error: {0}")]
    Transport(String),
}

/// Minimal command surface the cache engine needs from the store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a string value. Missing keys are `None`, not an error.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomic set with expiry.
    async fn set_with_ttl(&self, key: &str, ttl: Duration, value: &str) -> Result<(), StoreError>;

    /// Increment a counter by one, initializing to zero if absent.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Increment a counter by `delta`, initializing to zero if absent.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Read a counter; missing keys read as 0.
    async fn get_counter(&self, key: &str) -> Result<i64, StoreError>;

    /// Add a member to a set.
    async fn sadd(&self, set: &str, member: &str) -> Result<(), StoreError>;

    /// All members of a set; missing sets read as empty.
    async fn smembers(&self, set: &str) -> Result<Vec<String>, StoreError>;

    /// Atomic set-if-absent with expiry (`SET NX PX`). Returns whether the
    /// key was written.
    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Delete `key` iff its current value equals `expected`, in a single
    /// server-side round trip. Returns whether a deletion happened.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Reachability probe. Never errors.
    async fn ping(&self) -> bool;
}
