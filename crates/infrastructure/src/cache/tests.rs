use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use orchestrator_core::CacheConfig;
use async_trait::async_trait;
use orchestrator_domain::{CounterOutcome, Expiry, KeyValueStore};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use orchestrator_testing_utils::UnavailableStore;

use super::*;
use crate::store::{InMemoryStore, StoreLock};

fn memory_cache(config: CacheConfig) -> (Arc<dyn KeyValueStore>, CacheLayer) {
    let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
    (Arc::clone(&store), CacheLayer::new(store, config))
}

fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_miss_then_hit() {
    let (_, cache) = memory_cache(CacheConfig::default());
    let calls = AtomicUsize::new(0);
    let ttl = Duration::from_secs(60);

    for _ in 0..3 {
        let value: u32 = cache
            .get_or_compute("answer", ttl, &[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = cache.stats().await;
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.computes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_compute_once() {
    let (_, cache) = memory_cache(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_secs(60);

    let callers = (0..16).map(|_| {
        let calls = Arc::clone(&calls);
        let cache = &cache;
        async move {
            cache
                .get_or_compute("report:g1", ttl, &[], move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok("computed".to_string())
                })
                .await
        }
    });

    let results = join_all(callers).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap(), "computed");
    }
    assert_eq!(cache.stats().await.fallbacks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_value_served_while_lock_is_held() {
    let config = CacheConfig {
        stale_grace_seconds: 60,
        ..CacheConfig::default()
    };
    let (store, cache) = memory_cache(config);
    cache
        .put("k", &"old", Duration::from_secs(10), &[])
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(cache.get::<String>("k").await.unwrap(), None);

    let holder = StoreLock::try_acquire(store, "cache:lock:k", Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let value: String = cache
        .get_or_compute("k", Duration::from_secs(10), &[], || async {
            Ok("new".to_string())
        })
        .await
        .unwrap();
    assert_eq!(value, "old");
    assert_eq!(cache.stats().await.stale_hits, 1);
    holder.release().await;
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_recomputed() {
    let config = CacheConfig {
        stale_grace_seconds: 5,
        ..CacheConfig::default()
    };
    let (_, cache) = memory_cache(config);
    cache
        .put("k", &1u32, Duration::from_secs(10), &[])
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(16)).await;
    let value: u32 = cache
        .get_or_compute("k", Duration::from_secs(10), &[], || async { Ok(2) })
        .await
        .unwrap();
    assert_eq!(value, 2);
    assert_eq!(cache.get::<u32>("k").await.unwrap(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_falls_back_to_uncached_compute_after_retries() {
    let (store, cache) = memory_cache(CacheConfig::default());
    let _holder = StoreLock::try_acquire(store, "cache:lock:slow", Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let value: u32 = cache
        .get_or_compute("slow", Duration::from_secs(10), &[], || async { Ok(7) })
        .await
        .unwrap();

    assert_eq!(value, 7);
    assert_eq!(cache.stats().await.fallbacks, 1);
    assert_eq!(cache.get::<u32>("slow").await.unwrap(), None);
}

#[tokio::test]
async fn test_compute_error_is_not_cached() {
    let (_, cache) = memory_cache(CacheConfig::default());
    let result: OrchestratorResult<u32> = cache
        .get_or_compute("bad", Duration::from_secs(10), &[], || async {
            Err(OrchestratorError::EngineFailure("boom".into()))
        })
        .await;
    assert!(result.is_err());

    let value: u32 = cache
        .get_or_compute("bad", Duration::from_secs(10), &[], || async { Ok(1) })
        .await
        .unwrap();
    assert_eq!(value, 1);
}

#[tokio::test]
async fn test_get_allow_stale_serves_grace_period_entries() {
    let (_, cache) = memory_cache(CacheConfig::default());
    cache.put("ageing", &7, Duration::ZERO, &[]).await.unwrap();

    assert_eq!(cache.get::<i32>("ageing").await.unwrap(), None);
    assert_eq!(cache.get_allow_stale::<i32>("ageing").await.unwrap(), Some(7));
    assert_eq!(cache.get_allow_stale::<i32>("absent").await.unwrap(), None);
    assert_eq!(cache.stats().await.stale_hits, 1);
}

#[tokio::test]
async fn test_invalidate_tag_removes_exactly_tagged_entries() {
    let (_, cache) = memory_cache(CacheConfig::default());
    let ttl = Duration::from_secs(60);
    cache.put("a", &1, ttl, &tags(&["owner:u1"])).await.unwrap();
    cache
        .put("b", &2, ttl, &tags(&["owner:u1", "target:g1"]))
        .await
        .unwrap();
    cache.put("c", &3, ttl, &tags(&["owner:u2"])).await.unwrap();

    let removed = cache
        .invalidate(InvalidationTarget::Tag("owner:u1".into()))
        .await
        .unwrap();
    assert_eq!(removed, 2);

    assert_eq!(cache.get::<i32>("a").await.unwrap(), None);
    assert_eq!(cache.get::<i32>("b").await.unwrap(), None);
    assert_eq!(cache.get::<i32>("c").await.unwrap(), Some(3));
}

#[tokio::test]
async fn test_retagged_entry_survives_stale_index() {
    let (_, cache) = memory_cache(CacheConfig::default());
    let ttl = Duration::from_secs(60);
    cache.put("a", &1, ttl, &tags(&["owner:u1"])).await.unwrap();
    cache.put("a", &2, ttl, &tags(&["owner:u2"])).await.unwrap();

    let removed = cache.invalidate_tag("owner:u1").await.unwrap();
    assert_eq!(removed, 0);
    assert_eq!(cache.get::<i32>("a").await.unwrap(), Some(2));
}

#[tokio::test]
async fn test_invalidate_pattern_uses_global_index() {
    let (_, cache) = memory_cache(CacheConfig::default());
    let ttl = Duration::from_secs(60);
    cache.put("analysis:g1:h1", &1, ttl, &[]).await.unwrap();
    cache.put("analysis:g2:h1", &2, ttl, &[]).await.unwrap();
    cache.put("view:owner:u1", &3, ttl, &[]).await.unwrap();

    let removed = cache
        .invalidate(InvalidationTarget::Pattern("analysis:*".into()))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(cache.get::<i32>("view:owner:u1").await.unwrap(), Some(3));
}

#[tokio::test]
async fn test_invalidate_key() {
    let (_, cache) = memory_cache(CacheConfig::default());
    cache
        .put("k", &1, Duration::from_secs(60), &[])
        .await
        .unwrap();
    assert_eq!(cache.invalidate_key("k").await.unwrap(), 1);
    assert_eq!(cache.invalidate_key("k").await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_global_invalidation_is_rate_limited() {
    let (_, cache) = memory_cache(CacheConfig::default());
    let ttl = Duration::from_secs(600);
    cache.put("a", &1, ttl, &[]).await.unwrap();
    cache.put("b", &2, ttl, &tags(&["x"])).await.unwrap();

    let removed = cache
        .invalidate(InvalidationTarget::Tag(GLOBAL_TAG.into()))
        .await
        .unwrap();
    assert_eq!(removed, 2);

    match cache.invalidate_all().await {
        Err(OrchestratorError::RateLimitExceeded {
            retry_after_seconds,
        }) => assert!(retry_after_seconds > 0),
        other => panic!("expected rate limit, got {other:?}"),
    }

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(cache.invalidate_all().await.is_ok());
}

#[tokio::test]
async fn test_degrades_to_direct_compute_when_store_is_down() {
    let store: Arc<dyn KeyValueStore> = Arc::new(UnavailableStore::new());
    let cache = CacheLayer::new(store, CacheConfig::default());

    let value: u32 = cache
        .get_or_compute("k", Duration::from_secs(10), &[], || async { Ok(5) })
        .await
        .unwrap();
    assert_eq!(value, 5);
    assert!(cache.stats().await.errors >= 1);
}

#[tokio::test]
async fn test_disabled_cache_always_computes() {
    let config = CacheConfig {
        enabled: false,
        ..CacheConfig::default()
    };
    let (_, cache) = memory_cache(config);
    let calls = AtomicUsize::new(0);
    for _ in 0..2 {
        let _: u32 = cache
            .get_or_compute("k", Duration::from_secs(10), &[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await
            .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Store that lets a second node write a tagged entry right after the first
/// read of `watched`'s index.
struct InterleavedPutStore {
    inner: Arc<dyn KeyValueStore>,
    watched: String,
    armed: AtomicBool,
    other_node: CacheLayer,
}

impl InterleavedPutStore {
    fn new(inner: Arc<dyn KeyValueStore>, tag: &str) -> Self {
        Self {
            other_node: CacheLayer::new(Arc::clone(&inner), CacheConfig::default()),
            inner,
            watched: format!("cache:tag:{tag}"),
            armed: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl KeyValueStore for InterleavedPutStore {
    fn backend(&self) -> &'static str {
        "interleaved"
    }

    async fn get(&self, key: &str) -> OrchestratorResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn get_with_ttl(
        &self,
        key: &str,
    ) -> OrchestratorResult<Option<(Vec<u8>, Option<Duration>)>> {
        self.inner.get_with_ttl(key).await
    }

    async fn set(&self, key: &str, value: &[u8], expiry: Expiry) -> OrchestratorResult<()> {
        self.inner.set(key, value, expiry).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> OrchestratorResult<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
        expiry: Expiry,
    ) -> OrchestratorResult<bool> {
        self.inner.compare_and_swap(key, expected, new, expiry).await
    }

    async fn delete(&self, key: &str) -> OrchestratorResult<bool> {
        self.inner.delete(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> OrchestratorResult<u64> {
        self.inner.delete_many(keys).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> OrchestratorResult<bool> {
        self.inner.delete_if_equals(key, expected).await
    }

    async fn ttl(&self, key: &str) -> OrchestratorResult<Option<Duration>> {
        self.inner.ttl(key).await
    }

    async fn increment_below(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> OrchestratorResult<CounterOutcome> {
        self.inner.increment_below(key, limit, window).await
    }

    async fn set_add(
        &self,
        key: &str,
        members: &[String],
        ttl: Option<Duration>,
    ) -> OrchestratorResult<()> {
        self.inner.set_add(key, members, ttl).await
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> OrchestratorResult<()> {
        self.inner.set_remove(key, members).await
    }

    async fn set_members(&self, key: &str) -> OrchestratorResult<Vec<String>> {
        let members = self.inner.set_members(key).await?;
        if key == self.watched && self.armed.swap(false, Ordering::SeqCst) {
            let tag = key.trim_start_matches("cache:tag:").to_string();
            self.other_node
                .put("late", &9, Duration::from_secs(60), &[tag])
                .await?;
        }
        Ok(members)
    }

    async fn list_push(&self, key: &str, value: &[u8]) -> OrchestratorResult<()> {
        self.inner.list_push(key, value).await
    }

    async fn list_pop(&self, key: &str, timeout: Duration) -> OrchestratorResult<Option<Vec<u8>>> {
        self.inner.list_pop(key, timeout).await
    }

    async fn list_len(&self, key: &str) -> OrchestratorResult<u64> {
        self.inner.list_len(key).await
    }

    async fn health_check(&self) -> OrchestratorResult<bool> {
        self.inner.health_check().await
    }

    async fn close(&self) -> OrchestratorResult<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_put_during_tag_invalidation_stays_indexed() {
    let inner: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
    let store: Arc<dyn KeyValueStore> =
        Arc::new(InterleavedPutStore::new(Arc::clone(&inner), "owner:u1"));
    let cache = CacheLayer::new(store, CacheConfig::default());
    let ttl = Duration::from_secs(60);
    cache.put("early", &1, ttl, &tags(&["owner:u1"])).await.unwrap();

    assert_eq!(cache.invalidate_tag("owner:u1").await.unwrap(), 1);
    assert_eq!(cache.get::<i32>("late").await.unwrap(), Some(9));

    assert_eq!(cache.invalidate_tag("owner:u1").await.unwrap(), 1);
    assert_eq!(cache.get::<i32>("late").await.unwrap(), None);
}

#[tokio::test]
async fn test_put_during_global_invalidation_stays_indexed() {
    let inner: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
    let store: Arc<dyn KeyValueStore> =
        Arc::new(InterleavedPutStore::new(Arc::clone(&inner), GLOBAL_TAG));
    let config = CacheConfig {
        global_invalidation_interval_seconds: 0,
        ..CacheConfig::default()
    };
    let cache = CacheLayer::new(store, config);
    let ttl = Duration::from_secs(60);
    cache.put("early", &1, ttl, &[]).await.unwrap();

    assert_eq!(cache.invalidate_all().await.unwrap(), 1);
    assert_eq!(cache.get::<i32>("late").await.unwrap(), Some(9));

    assert_eq!(cache.invalidate_all().await.unwrap(), 1);
    assert_eq!(cache.get::<i32>("late").await.unwrap(), None);
}
