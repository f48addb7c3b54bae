//! In-process [`KvStore`] implementation
//!
//! Mirrors the Redis semantics the engine relies on (TTL expiry,
//! initialize-to-zero counters, NX+PX, compare-and-delete) so unit and
//! scenario tests exercise the real engine code without a Redis server.
//! It stands in for the remote store; production wiring never uses it.

use super::{KvStore, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    sets: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, ttl: Duration, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.incr_by(key, 1).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let current = entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.value.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + delta;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn get_counter(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self
            .get(key)
            .await?
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(0))
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut sets = self.sets.write().await;
        sets.entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>, StoreError> {
        let sets = self.sets.read().await;
        Ok(sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let matches = entries
            .get(key)
            .is_some_and(|entry| entry.is_live(now) && entry.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", Duration::from_secs(60), "v")
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", Duration::from_secs(5), "v")
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_counter_initializes_to_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.get_counter("calls").await.unwrap(), 0);
        assert_eq!(store.incr("calls").await.unwrap(), 1);
        assert_eq!(store.incr_by("calls", 5).await.unwrap(), 6);
        assert_eq!(store.get_counter("calls").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_smembers_missing_set_is_empty() {
        let store = MemoryStore::new();
        assert!(store.smembers("keys").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sadd_is_idempotent() {
        let store = MemoryStore::new();
        store.sadd("keys", "a").await.unwrap();
        store.sadd("keys", "a").await.unwrap();
        store.sadd("keys", "b").await.unwrap();
        assert_eq!(store.smembers("keys").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_set_if_absent_blocks_second_writer() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(30);
        assert!(store.set_if_absent_with_ttl("lock", "t1", ttl).await.unwrap());
        assert!(!store.set_if_absent_with_ttl("lock", "t2", ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some("t1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_succeeds_after_expiry() {
        let store = MemoryStore::new();
        store
            .set_if_absent_with_ttl("lock", "t1", Duration::from_millis(50))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(
            store
                .set_if_absent_with_ttl("lock", "t2", Duration::from_secs(30))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_compare_and_delete_checks_value() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(30);
        store.set_if_absent_with_ttl("lock", "t1", ttl).await.unwrap();

        assert!(!store.compare_and_delete("lock", "other").await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some("t1".to_string()));

        assert!(store.compare_and_delete("lock", "t1").await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), None);
        assert!(!store.compare_and_delete("lock", "t1").await.unwrap());
    }
}
