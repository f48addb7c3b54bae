use std::sync::Arc;
use std::time::Duration;

use crate::engine::{self, CacheSettings, EngineError, RateCacheEngine, REGISTRY_KEY, RefreshReport};
use crate::quota::{QUOTA_COUNTER_KEY, QuotaAccountant};
use crate::store::{KvStore, MemoryStore};
use crate::types::{Hotel, Period, RateQuery, Room};
use crate::upstream::RateApiClient;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUOTA: i64 = 1000;

fn summer_single() -> RateQuery {
    RateQuery::new(
        Period::Summer,
        Hotel::FloatingPointResort,
        Room::SingletonRoom,
    )
}

fn engine_over(store: Arc<MemoryStore>, upstream_url: &str) -> RateCacheEngine {
    let store = store as Arc<dyn KvStore>;
    let upstream = RateApiClient::new(upstream_url, "test-token", Duration::from_secs(5)).unwrap();
    let quota = Arc::new(QuotaAccountant::new(store.clone(), QUOTA));
    RateCacheEngine::new(
        store,
        upstream,
        quota,
        CacheSettings {
            cache_ttl: Duration::from_secs(300),
            lock_ttl: Duration::from_secs(30),
            lock_retries: 2,
            lock_retry_delay: Duration::from_millis(10),
        },
    )
}

fn rate_response(rate: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "rates": [{
            "period": "Summer",
            "hotel": "FloatingPointResort",
            "room": "SingletonRoom",
            "rate": rate
        }]
    }))
}

#[test]
fn test_entry_codec_round_trips() {
    let known = Some("12000".to_string());
    assert_eq!(engine::encode_entry(&known), r#""12000""#);
    assert_eq!(engine::decode_entry(r#""12000""#), Some(known));

    assert_eq!(engine::encode_entry(&None), "null");
    assert_eq!(engine::decode_entry("null"), Some(None));

    assert_eq!(engine::decode_entry("{broken"), None);
}

#[tokio::test]
async fn test_cached_rate_skips_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pricing"))
        .respond_with(rate_response("12000"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let engine = engine_over(store.clone(), &server.uri());
    let query = summer_single();

    assert_eq!(
        engine.get_rate(&query).await.unwrap(),
        Some("12000".to_string())
    );
    // Second call is a pure cache hit; the mock's expect(1) enforces it.
    assert_eq!(
        engine.get_rate(&query).await.unwrap(),
        Some("12000".to_string())
    );
    assert_eq!(store.get_counter(QUOTA_COUNTER_KEY).await.unwrap(), 1);
}

#[tokio::test]
async fn test_miss_enrolls_key_in_registry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pricing"))
        .respond_with(rate_response("12000"))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let engine = engine_over(store.clone(), &server.uri());
    let query = summer_single();

    engine.get_rate(&query).await.unwrap();
    assert_eq!(
        store.smembers(REGISTRY_KEY).await.unwrap(),
        vec![query.cache_key()]
    );
}

#[tokio::test]
async fn test_empty_upstream_answer_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pricing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "rates": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let engine = engine_over(store.clone(), &server.uri());
    let query = summer_single();

    assert_eq!(engine.get_rate(&query).await.unwrap(), None);
    // The empty answer was cached, so this does not reach the upstream.
    assert_eq!(engine.get_rate(&query).await.unwrap(), None);
    // An empty payload is not counted against the quota.
    assert_eq!(store.get_counter(QUOTA_COUNTER_KEY).await.unwrap(), 0);
}

#[tokio::test]
async fn test_exhausted_quota_blocks_miss_without_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pricing"))
        .respond_with(rate_response("12000"))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    store.incr_by(QUOTA_COUNTER_KEY, QUOTA).await.unwrap();
    let engine = engine_over(store.clone(), &server.uri());

    let err = engine.get_rate(&summer_single()).await.unwrap_err();
    assert!(matches!(err, EngineError::NoQuota));
    assert_eq!(store.get_counter(QUOTA_COUNTER_KEY).await.unwrap(), QUOTA);
}

#[tokio::test]
async fn test_exhausted_quota_still_serves_cached_rates() {
    let store = Arc::new(MemoryStore::new());
    store.incr_by(QUOTA_COUNTER_KEY, QUOTA).await.unwrap();

    let query = summer_single();
    store
        .set_with_ttl(
            &query.cache_key(),
            Duration::from_secs(300),
            &engine::encode_entry(&Some("9500".to_string())),
        )
        .await
        .unwrap();

    let engine = engine_over(store.clone(), "http://127.0.0.1:9");
    assert_eq!(
        engine.get_rate(&query).await.unwrap(),
        Some("9500".to_string())
    );
}

#[tokio::test]
async fn test_held_lock_exhausts_into_service_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pricing"))
        .respond_with(rate_response("12000"))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let query = summer_single();
    // Park a foreign lock on the key so every acquire attempt loses.
    store
        .set_if_absent_with_ttl(
            &format!("lock:{}", query.cache_key()),
            "foreign-holder",
            Duration::from_secs(30),
        )
        .await
        .unwrap();

    let engine = engine_over(store.clone(), &server.uri());
    let err = engine.get_rate(&query).await.unwrap_err();
    assert!(matches!(err, EngineError::LockUnavailable));
}

#[tokio::test]
async fn test_refresh_counts_malformed_registry_member() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pricing"))
        .respond_with(rate_response("12000"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    store
        .sadd(REGISTRY_KEY, &summer_single().cache_key())
        .await
        .unwrap();
    store.sadd(REGISTRY_KEY, "not a cache key").await.unwrap();

    let engine = engine_over(store.clone(), &server.uri());
    let report = engine.refresh_all().await;
    assert_eq!(
        report,
        RefreshReport {
            updated: 1,
            errors: 1
        }
    );
}

#[tokio::test]
async fn test_refresh_with_only_malformed_members_skips_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pricing"))
        .respond_with(rate_response("12000"))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    store.sadd(REGISTRY_KEY, "garbage").await.unwrap();

    let engine = engine_over(store.clone(), &server.uri());
    let report = engine.refresh_all().await;
    assert_eq!(
        report,
        RefreshReport {
            updated: 0,
            errors: 1
        }
    );
    assert_eq!(store.get_counter(QUOTA_COUNTER_KEY).await.unwrap(), 0);
}

#[tokio::test]
async fn test_refresh_failure_leaves_existing_entries() {
    let store = Arc::new(MemoryStore::new());
    let query = summer_single();
    let key = query.cache_key();
    store
        .set_with_ttl(
            &key,
            Duration::from_secs(300),
            &engine::encode_entry(&Some("9500".to_string())),
        )
        .await
        .unwrap();
    store.sadd(REGISTRY_KEY, &key).await.unwrap();

    // Unreachable upstream: the batch collapses to an empty map.
    let engine = engine_over(store.clone(), "http://127.0.0.1:9");
    let report = engine.refresh_all().await;
    assert_eq!(
        report,
        RefreshReport {
            updated: 0,
            errors: 1
        }
    );
    // The stale-but-valid entry is untouched and still served.
    assert_eq!(
        engine.get_rate(&query).await.unwrap(),
        Some("9500".to_string())
    );
    assert_eq!(store.get_counter(QUOTA_COUNTER_KEY).await.unwrap(), 0);
}

#[tokio::test]
async fn test_refresh_overwrites_with_upstream_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pricing"))
        .respond_with(rate_response("13500"))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let query = summer_single();
    let key = query.cache_key();
    store
        .set_with_ttl(
            &key,
            Duration::from_secs(300),
            &engine::encode_entry(&Some("12000".to_string())),
        )
        .await
        .unwrap();
    store.sadd(REGISTRY_KEY, &key).await.unwrap();

    let engine = engine_over(store.clone(), &server.uri());
    let report = engine.refresh_all().await;
    assert_eq!(
        report,
        RefreshReport {
            updated: 1,
            errors: 0
        }
    );
    assert_eq!(
        engine.get_rate(&query).await.unwrap(),
        Some("13500".to_string())
    );
}
