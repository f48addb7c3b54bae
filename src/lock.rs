//! Per-key distributed lock
//!
//! Mutual exclusion across the whole fleet for one cache key at a time,
//! built on the store's NX+PX primitive. Each acquire writes a unique
//! token; release is a compare-and-delete on that token, so a holder whose
//! lock already expired can never delete a successor's lock. A crashed
//! holder frees the lock by TTL expiry at the latest.
//!
//! This is bounded-waiting mutual exclusion, not consensus: the
//! at-most-one-holder guarantee assumes clock skew between the store and
//! its clients stays well under the lock TTL.

use crate::store::KvStore;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::{debug, warn};

fn lock_key(resource: &str) -> String {
    format!("lock:{resource}")
}

/// Token distinct across concurrent acquirers anywhere in the fleet with
/// overwhelming probability: 128 random bits plus the acquire timestamp.
fn new_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{:032x}{:x}", rand::random::<u128>(), nanos)
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Try to take the lock on `resource`, retrying up to `retries` extra
    /// times with `retry_delay` between attempts.
    ///
    /// The total sleep budget is capped by `ttl`: each inter-attempt sleep
    /// is clamped to the time remaining before a hypothetical holder's
    /// lock would have expired anyway, and there is no sleep after the
    /// final attempt. Store transport errors count as failed attempts.
    ///
    /// Returns the release token, or `None` once attempts are exhausted.
    pub async fn acquire(
        &self,
        resource: &str,
        ttl: Duration,
        retries: u32,
        retry_delay: Duration,
    ) -> Option<String> {
        let key = lock_key(resource);
        let token = new_token();
        let started = Instant::now();

        for attempt in 0..=retries {
            match self
                .store
                .set_if_absent_with_ttl(&key, &token, ttl)
                .await
            {
                Ok(true) => return Some(token),
                Ok(false) => {}
                Err(err) => {
                    warn!(resource, error = %err, "lock acquire attempt failed");
                }
            }

            if attempt < retries {
                let budget = ttl.saturating_sub(started.elapsed());
                let pause = retry_delay.min(budget);
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }
        }

        debug!(resource, "lock attempts exhausted");
        None
    }

    /// Release the lock if we still hold it. Returns whether the lock
    /// entry was deleted; `false` means it had already expired and may be
    /// held by someone else now.
    pub async fn release(&self, resource: &str, token: &str) -> bool {
        match self
            .store
            .compare_and_delete(&lock_key(resource), token)
            .await
        {
            Ok(deleted) => {
                if !deleted {
                    debug!(resource, "lock was no longer ours at release");
                }
                deleted
            }
            Err(err) => {
                warn!(resource, error = %err, "lock release failed");
                false
            }
        }
    }

    /// Run `body` while holding the lock on `resource`.
    ///
    /// Returns `None` without running `body` when the lock cannot be
    /// acquired. The lock is released on every exit path: after `body`
    /// resolves (to either variant), and, via a drop guard, when the
    /// caller's future is cancelled mid-body. Body errors pass through
    /// untouched.
    pub async fn with_lock<T, E, F, Fut>(
        &self,
        resource: &str,
        ttl: Duration,
        retries: u32,
        retry_delay: Duration,
        body: F,
    ) -> Option<Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let token = self.acquire(resource, ttl, retries, retry_delay).await?;
        let mut guard = ReleaseGuard {
            store: self.store.clone(),
            key: lock_key(resource),
            token: Some(token),
        };

        let result = body().await;
        guard.release().await;
        Some(result)
    }
}

struct ReleaseGuard {
    store: Arc<dyn KvStore>,
    key: String,
    token: Option<String>,
}

impl ReleaseGuard {
    async fn release(&mut self) {
        if let Some(token) = self.token.take()
            && let Err(err) = self.store.compare_and_delete(&self.key, &token).await
        {
            warn!(key = %self.key, error = %err, "lock release failed");
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        // Reached only when the owning future was cancelled mid-body; the
        // release has to be handed to the runtime because Drop cannot await.
        if let Some(token) = self.token.take() {
            let store = self.store.clone();
            let key = std::mem::take(&mut self.key);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = store.compare_and_delete(&key, &token).await;
                });
            }
        }
    }
}
