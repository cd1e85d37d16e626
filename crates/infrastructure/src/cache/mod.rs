//! Cache layer with tag invalidation and stampede prevention
//!
//! Entries live under `cache:{key}` as a JSON envelope. The physical TTL is
//! the logical TTL plus the stale grace period; an entry whose remaining TTL
//! has dropped into the grace period is stale and only served to callers that
//! lose the recompute lock.

mod invalidation;
mod stats;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use orchestrator_core::CacheConfig;
use orchestrator_domain::{Expiry, KeyValueStore};
use orchestrator_errors::OrchestratorResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::store::StoreLock;

pub use invalidation::{glob_match, InvalidationTarget};
pub use stats::CacheStats;

/// Reserved tag every entry is registered under.
pub const GLOBAL_TAG: &str = "global";

#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope {
    value: serde_json::Value,
    tags: Vec<String>,
}

enum Lookup<T> {
    Fresh(T),
    Stale(T),
    Miss,
}

pub struct CacheLayer {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
    stats: Arc<RwLock<CacheStats>>,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    fn entry_key(key: &str) -> String {
        format!("cache:{key}")
    }

    fn lock_key(key: &str) -> String {
        format!("cache:lock:{key}")
    }

    fn tag_key(tag: &str) -> String {
        format!("cache:tag:{tag}")
    }

    async fn record<F: FnOnce(&mut CacheStats)>(&self, update: F) {
        let mut stats = self.stats.write().await;
        update(&mut stats);
    }

    async fn record_error(&self, key: &str, err: &(dyn std::fmt::Display + Sync)) {
        warn!("Cache backend unavailable for key {}: {}", key, err);
        counter!("orchestrator_cache_errors_total").increment(1);
        self.record(|s| s.errors += 1).await;
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> OrchestratorResult<Lookup<T>> {
        let Some((raw, remaining)) = self.store.get_with_ttl(&Self::entry_key(key)).await? else {
            return Ok(Lookup::Miss);
        };

        let envelope: CacheEnvelope = match serde_json::from_slice(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Discarding unreadable cache entry {}: {}", key, e);
                return Ok(Lookup::Miss);
            }
        };
        let value: T = match serde_json::from_value(envelope.value) {
            Ok(value) => value,
            Err(e) => {
                warn!("Cache entry {} has unexpected shape: {}", key, e);
                return Ok(Lookup::Miss);
            }
        };

        let grace = self.config.stale_grace();
        match remaining {
            Some(left) if left <= grace => Ok(Lookup::Stale(value)),
            _ => Ok(Lookup::Fresh(value)),
        }
    }

    /// Plain lookup; returns fresh entries only.
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> OrchestratorResult<Option<T>> {
        if !self.config.enabled {
            return Ok(None);
        }
        match self.lookup(key).await? {
            Lookup::Fresh(value) => {
                self.record(|s| s.hits += 1).await;
                counter!("orchestrator_cache_hits_total").increment(1);
                Ok(Some(value))
            }
            Lookup::Stale(_) | Lookup::Miss => {
                self.record(|s| s.misses += 1).await;
                counter!("orchestrator_cache_misses_total").increment(1);
                Ok(None)
            }
        }
    }

    /// Like [`get`](Self::get), but also serves entries inside the stale
    /// grace period. Used where an ageing value beats no value at all.
    #[instrument(skip(self))]
    pub async fn get_allow_stale<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> OrchestratorResult<Option<T>> {
        if !self.config.enabled {
            return Ok(None);
        }
        match self.lookup(key).await? {
            Lookup::Fresh(value) => {
                self.record(|s| s.hits += 1).await;
                counter!("orchestrator_cache_hits_total").increment(1);
                Ok(Some(value))
            }
            Lookup::Stale(value) => {
                self.record(|s| s.stale_hits += 1).await;
                counter!("orchestrator_cache_stale_hits_total").increment(1);
                Ok(Some(value))
            }
            Lookup::Miss => {
                self.record(|s| s.misses += 1).await;
                counter!("orchestrator_cache_misses_total").increment(1);
                Ok(None)
            }
        }
    }

    /// Stores `value` and registers the key under each tag plus the global tag.
    #[instrument(skip(self, value))]
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        tags: &[String],
    ) -> OrchestratorResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut all_tags: Vec<String> = tags.to_vec();
        if !all_tags.iter().any(|t| t == GLOBAL_TAG) {
            all_tags.push(GLOBAL_TAG.to_string());
        }

        let envelope = CacheEnvelope {
            value: serde_json::to_value(value)?,
            tags: all_tags.clone(),
        };
        let physical_ttl = ttl + self.config.stale_grace();
        self.store
            .set(
                &Self::entry_key(key),
                &serde_json::to_vec(&envelope)?,
                Expiry::After(physical_ttl),
            )
            .await?;

        let member = [key.to_string()];
        for tag in &all_tags {
            self.store
                .set_add(&Self::tag_key(tag), &member, Some(physical_ttl))
                .await?;
        }

        self.record(|s| s.sets += 1).await;
        debug!("Cache SET {} with tags {:?}", key, all_tags);
        Ok(())
    }

    /// Returns the cached value for `key`, computing it at most once across
    /// all concurrent callers while the lock holder is alive.
    ///
    /// Store failures degrade to calling `compute` directly.
    #[instrument(skip(self, tags, compute))]
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        tags: &[String],
        compute: F,
    ) -> OrchestratorResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        if !self.config.enabled {
            return compute().await;
        }

        let stale = match self.lookup::<T>(key).await {
            Ok(Lookup::Fresh(value)) => {
                self.record(|s| s.hits += 1).await;
                counter!("orchestrator_cache_hits_total").increment(1);
                return Ok(value);
            }
            Ok(Lookup::Stale(value)) => Some(value),
            Ok(Lookup::Miss) => None,
            Err(e) => {
                self.record_error(key, &e).await;
                return compute().await;
            }
        };
        self.record(|s| s.misses += 1).await;
        counter!("orchestrator_cache_misses_total").increment(1);

        let lock = match StoreLock::try_acquire(
            Arc::clone(&self.store),
            Self::lock_key(key),
            self.config.lock_ttl(),
        )
        .await
        {
            Ok(lock) => lock,
            Err(e) => {
                self.record_error(key, &e).await;
                return compute().await;
            }
        };

        if let Some(lock) = lock {
            // Another holder may have finished between our lookup and the lock.
            if let Ok(Lookup::Fresh(value)) = self.lookup::<T>(key).await {
                lock.release().await;
                return Ok(value);
            }

            self.record(|s| s.computes += 1).await;
            counter!("orchestrator_cache_computes_total").increment(1);
            let result = compute().await;
            if let Ok(value) = &result {
                if let Err(e) = self.put(key, value, ttl, tags).await {
                    self.record_error(key, &e).await;
                }
            }
            lock.release().await;
            return result;
        }

        if let Some(value) = stale {
            self.record(|s| s.stale_hits += 1).await;
            counter!("orchestrator_cache_stale_hits_total").increment(1);
            debug!("Serving stale value for {} while it is recomputed", key);
            return Ok(value);
        }

        let mut backoff = self.config.lock_retry_backoff();
        for attempt in 1..=self.config.lock_retry_attempts {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.lock_retry_backoff_max());
            match self.lookup::<T>(key).await {
                Ok(Lookup::Fresh(value)) | Ok(Lookup::Stale(value)) => {
                    debug!("Cache {} filled by lock holder after {} retries", key, attempt);
                    return Ok(value);
                }
                Ok(Lookup::Miss) => {}
                Err(e) => {
                    self.record_error(key, &e).await;
                    break;
                }
            }
        }

        warn!("Cache {} still unresolved after retries, computing uncached", key);
        self.record(|s| s.fallbacks += 1).await;
        counter!("orchestrator_cache_fallbacks_total").increment(1);
        compute().await
    }
}

#[cfg(test)]
mod tests;
