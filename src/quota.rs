//! Upstream call quota accounting
//!
//! One monotonic counter in the shared store tracks every upstream call
//! the whole fleet has made in the current accounting window. The counter
//! is never decremented here; an external operator job resets or windows
//! it daily.
//!
//! Calls are counted after a successful upstream response with a non-empty
//! payload, never on cache hits, lock contention or upstream failure. The
//! counter therefore slightly under-counts wire traffic when the upstream
//! answers with an empty payload; the overshoot is bounded by the rate of
//! such calls.

use crate::store::{KvStore, StoreError};
use std::sync::Arc;

/// Counter key shared by every replica.
pub const QUOTA_COUNTER_KEY: &str = "rate_api:calls";

pub struct QuotaAccountant {
    store: Arc<dyn KvStore>,
    limit: i64,
}

impl QuotaAccountant {
    pub fn new(store: Arc<dyn KvStore>, limit: i64) -> Self {
        Self { store, limit }
    }

    /// Configured quota ceiling.
    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Record one upstream call. Returns the new total.
    pub async fn increment(&self) -> Result<i64, StoreError> {
        self.store.incr(QUOTA_COUNTER_KEY).await
    }

    /// Calls recorded so far; 0 when the counter does not exist yet.
    pub async fn count(&self) -> Result<i64, StoreError> {
        self.store.get_counter(QUOTA_COUNTER_KEY).await
    }

    /// Calls left before the ceiling. Negative when the counter has been
    /// pushed past the limit externally.
    pub async fn remaining(&self) -> Result<i64, StoreError> {
        Ok(self.limit - self.count().await?)
    }

    pub async fn has_remaining(&self) -> Result<bool, StoreError> {
        Ok(self.remaining().await? > 0)
    }
}
