//! The rate cache engine
//!
//! Owns the two protocols that make the proxy correct:
//!
//! - [`RateCacheEngine::get_rate`]: the request path. A lock-free fast
//!   read, then a per-key distributed critical section that coalesces
//!   concurrent misses into a single upstream call.
//! - [`RateCacheEngine::refresh_all`]: the revalidation path. One batched
//!   upstream call re-fetches every key in the shared registry and writes
//!   the results back with a fresh TTL.
//!
//! The engine is liberal inward and conservative outward: store read
//! failures degrade to cache misses and write failures are logged without
//! penalizing the request in flight, but when neither the cache nor the
//! upstream can vouch for a value the caller gets an error, never a guess.

use crate::lock::DistributedLock;
use crate::quota::QuotaAccountant;
use crate::store::KvStore;
use crate::types::RateQuery;
use crate::upstream::RateApiClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Set of every cache key ever populated, shared by all replicas. The
/// revalidator refreshes exactly this set.
pub const REGISTRY_KEY: &str = "rate_cache_keys";

/// Tunables for the cache and its critical section.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Lifetime of a cached rate.
    pub cache_ttl: Duration,
    /// Lifetime of a per-key lock entry; must exceed the upstream timeout.
    pub lock_ttl: Duration,
    /// Extra lock attempts after the first.
    pub lock_retries: u32,
    /// Pause between lock attempts.
    pub lock_retry_delay: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            lock_ttl: Duration::from_secs(30),
            lock_retries: 2,
            lock_retry_delay: Duration::from_millis(100),
        }
    }
}

/// Why a rate could not be served. Both variants map to 503 at the edge.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("upstream call quota exhausted")]
    NoQuota,
    #[error("rate lock unavailable")]
    LockUnavailable,
}

/// Tally of one revalidation cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub updated: usize,
    pub errors: usize,
}

pub struct RateCacheEngine {
    store: Arc<dyn KvStore>,
    lock: DistributedLock,
    upstream: RateApiClient,
    quota: Arc<QuotaAccountant>,
    settings: CacheSettings,
}

impl RateCacheEngine {
    pub fn new(
        store: Arc<dyn KvStore>,
        upstream: RateApiClient,
        quota: Arc<QuotaAccountant>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            lock: DistributedLock::new(store.clone()),
            store,
            upstream,
            quota,
            settings,
        }
    }

    /// Serve the rate for `query`, fetching it from the upstream at most
    /// once per cache lifetime across the entire fleet.
    ///
    /// `Ok(None)` means the upstream was asked and knows no rate for this
    /// tuple; that answer is cached like any other so unknown tuples do
    /// not hammer the upstream.
    pub async fn get_rate(&self, query: &RateQuery) -> Result<Option<String>, EngineError> {
        let key = query.cache_key();

        // Fast path: no lock is ever held for a cache hit.
        if let Some(rate) = self.read_cached(&key).await {
            return Ok(rate);
        }

        // Advisory gate. Saves lock traffic once the fleet is saturated;
        // the check that counts runs again inside the critical section.
        if !self.quota_available().await {
            return Err(EngineError::NoQuota);
        }

        let outcome = self
            .lock
            .with_lock(
                &key,
                self.settings.lock_ttl,
                self.settings.lock_retries,
                self.settings.lock_retry_delay,
                || async {
                    // Another replica may have filled the cache while we
                    // waited on the lock.
                    if let Some(rate) = self.read_cached(&key).await {
                        return Ok(rate);
                    }

                    if !self.quota_available().await {
                        return Err(EngineError::NoQuota);
                    }

                    let rate = self.upstream.fetch_single(query).await;
                    if rate.is_some()
                        && let Err(err) = self.quota.increment().await
                    {
                        warn!(error = %err, "failed to record upstream call against the quota");
                    }

                    self.write_through(&key, &rate).await;
                    Ok(rate)
                },
            )
            .await;

        match outcome {
            Some(result) => result,
            None => Err(EngineError::LockUnavailable),
        }
    }

    /// Re-fetch every registered key in one upstream batch.
    ///
    /// Never fails: every problem is folded into the report, so a bad
    /// cycle cannot kill the revalidator loop. An empty registry costs
    /// nothing upstream.
    pub async fn refresh_all(&self) -> RefreshReport {
        let members = match self.store.smembers(REGISTRY_KEY).await {
            Ok(members) => members,
            Err(err) => {
                warn!(error = %err, "could not read the refresh registry");
                return RefreshReport::default();
            }
        };
        if members.is_empty() {
            return RefreshReport::default();
        }

        let mut errors = 0;
        let mut entries = Vec::with_capacity(members.len());
        for key in members {
            // Members are written by cache_key(), so this only fires on a
            // tampered or corrupted registry.
            match RateQuery::from_cache_key(&key) {
                Ok(query) => entries.push((key, query)),
                Err(err) => {
                    warn!(key = %key, error = %err, "malformed registry member skipped");
                    errors += 1;
                }
            }
        }
        if entries.is_empty() {
            return RefreshReport { updated: 0, errors };
        }

        let queries: Vec<RateQuery> = entries.iter().map(|(_, query)| *query).collect();
        let rates = self.upstream.fetch_batch(&queries).await;
        if rates.is_empty() {
            // Existing entries are left to age out; a later cycle or a
            // request-path miss will repopulate them.
            return RefreshReport {
                updated: 0,
                errors: errors + entries.len(),
            };
        }

        // One batch, one quota tick, regardless of how many keys it fed.
        if let Err(err) = self.quota.increment().await {
            warn!(error = %err, "failed to record upstream call against the quota");
        }

        let mut updated = 0;
        for (key, query) in &entries {
            match rates.lookup(query) {
                Some(rate) => {
                    let encoded = encode_entry(&Some(rate.to_owned()));
                    match self
                        .store
                        .set_with_ttl(key, self.settings.cache_ttl, &encoded)
                        .await
                    {
                        Ok(()) => updated += 1,
                        Err(err) => {
                            warn!(key = %key, error = %err, "refresh write failed");
                            errors += 1;
                        }
                    }
                }
                None => {
                    debug!(key = %key, "upstream dropped a registered key from the batch");
                    errors += 1;
                }
            }
        }

        RefreshReport { updated, errors }
    }

    /// Fast read of a cached entry. Transport failures and undecodable
    /// entries degrade to a miss.
    async fn read_cached(&self, key: &str) -> Option<Option<String>> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                debug!(key = %key, error = %err, "cache read failed, treating as miss");
                return None;
            }
        };
        match decode_entry(&raw) {
            Some(rate) => Some(rate),
            None => {
                warn!(key = %key, "undecodable cache entry, treating as miss");
                None
            }
        }
    }

    /// Quota gate. A gate that cannot be read does not block the request;
    /// the store being down will surface through the lock path instead.
    async fn quota_available(&self) -> bool {
        match self.quota.has_remaining().await {
            Ok(available) => available,
            Err(err) => {
                warn!(error = %err, "quota gate unreadable, letting the request through");
                true
            }
        }
    }

    /// Write a freshly fetched rate and enroll its key in the registry.
    ///
    /// Failures here are cache-plane flakiness and must not penalize the
    /// request that did the fetching; the value is returned upstream of
    /// this call either way.
    async fn write_through(&self, key: &str, rate: &Option<String>) {
        let encoded = encode_entry(rate);
        if let Err(err) = self
            .store
            .set_with_ttl(key, self.settings.cache_ttl, &encoded)
            .await
        {
            warn!(key = %key, error = %err, "failed to write rate to cache");
        }
        if let Err(err) = self.store.sadd(REGISTRY_KEY, key).await {
            warn!(key = %key, error = %err, "failed to enroll key in the refresh registry");
        }
    }
}

/// Cached entries are the JSON encoding of `Option<String>`: a known rate
/// as a JSON string, a known-empty upstream answer as `null`.
pub(crate) fn encode_entry(rate: &Option<String>) -> String {
    serde_json::to_string(rate).expect("rate entry always encodes")
}

pub(crate) fn decode_entry(raw: &str) -> Option<Option<String>> {
    serde_json::from_str(raw).ok()
}
