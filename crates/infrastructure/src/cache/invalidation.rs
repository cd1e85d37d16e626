//! Tag, key and pattern invalidation through the reverse index

use metrics::counter;
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::{CacheEnvelope, CacheLayer, GLOBAL_TAG};

const GLOBAL_GUARD_KEY: &str = "cache:global-invalidation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InvalidationTarget {
    Key(String),
    Tag(String),
    /// `*` matches any run of characters, `?` exactly one
    Pattern(String),
}

/// Glob match over the whole of `text`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

impl CacheLayer {
    #[instrument(skip(self))]
    pub async fn invalidate(&self, target: InvalidationTarget) -> OrchestratorResult<u64> {
        match target {
            InvalidationTarget::Key(key) => self.invalidate_key(&key).await,
            InvalidationTarget::Tag(tag) => self.invalidate_tag(&tag).await,
            InvalidationTarget::Pattern(pattern) => self.invalidate_pattern(&pattern).await,
        }
    }

    pub async fn invalidate_key(&self, key: &str) -> OrchestratorResult<u64> {
        self.store
            .set_remove(&Self::tag_key(GLOBAL_TAG), &[key.to_string()])
            .await?;
        let removed = self.store.delete(&Self::entry_key(key)).await?;
        let removed = u64::from(removed);
        self.record(|s| s.invalidated += removed).await;
        Ok(removed)
    }

    /// Removes every entry registered under `tag`. Work is proportional to
    /// the number of keys in the tag's index.
    pub async fn invalidate_tag(&self, tag: &str) -> OrchestratorResult<u64> {
        if tag == GLOBAL_TAG {
            return self.invalidate_all().await;
        }

        // Only the members read here leave the index; a concurrent put keeps
        // its registration.
        let tag_key = Self::tag_key(tag);
        let members = self.store.set_members(&tag_key).await?;
        self.store.set_remove(&tag_key, &members).await?;

        let mut doomed = Vec::with_capacity(members.len());
        for key in members {
            // The index may outlive a re-put without this tag.
            if self.entry_has_tag(&key, tag).await? {
                doomed.push(key);
            }
        }

        let removed = self.delete_entries(&doomed).await?;
        info!("Invalidated {} cache entries for tag {}", removed, tag);
        Ok(removed)
    }

    /// Matches `pattern` against the global index, never the keyspace.
    pub async fn invalidate_pattern(&self, pattern: &str) -> OrchestratorResult<u64> {
        if pattern.chars().all(|c| c == '*') {
            return self.invalidate_all().await;
        }

        let members = self.store.set_members(&Self::tag_key(GLOBAL_TAG)).await?;
        let doomed: Vec<String> = members
            .into_iter()
            .filter(|key| glob_match(pattern, key))
            .collect();

        let removed = self.delete_entries(&doomed).await?;
        info!("Invalidated {} cache entries matching {}", removed, pattern);
        Ok(removed)
    }

    /// Drops every cache entry. Allowed at most once per configured interval.
    pub async fn invalidate_all(&self) -> OrchestratorResult<u64> {
        let interval = self.config.global_invalidation_interval();
        if !interval.is_zero()
            && !self
                .store
                .set_if_absent(GLOBAL_GUARD_KEY, b"1", Some(interval))
                .await?
        {
            let retry_after = self
                .store
                .ttl(GLOBAL_GUARD_KEY)
                .await?
                .map_or(1, |ttl| ttl.as_secs().max(1));
            warn!("Global cache invalidation rejected, retry in {}s", retry_after);
            return Err(OrchestratorError::RateLimitExceeded {
                retry_after_seconds: retry_after,
            });
        }

        let global_key = Self::tag_key(GLOBAL_TAG);
        let members = self.store.set_members(&global_key).await?;
        self.store.set_remove(&global_key, &members).await?;
        let entry_keys: Vec<String> = members.iter().map(|k| Self::entry_key(k)).collect();
        let removed = self.store.delete_many(&entry_keys).await?;

        self.record(|s| s.invalidated += removed).await;
        counter!("orchestrator_cache_invalidated_total").increment(removed);
        info!("Global cache invalidation removed {} entries", removed);
        Ok(removed)
    }

    async fn entry_has_tag(&self, key: &str, tag: &str) -> OrchestratorResult<bool> {
        let Some(raw) = self.store.get(&Self::entry_key(key)).await? else {
            return Ok(false);
        };
        Ok(serde_json::from_slice::<CacheEnvelope>(&raw)
            .map(|envelope| envelope.tags.iter().any(|t| t == tag))
            .unwrap_or(true))
    }

    async fn delete_entries(&self, keys: &[String]) -> OrchestratorResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.store
            .set_remove(&Self::tag_key(GLOBAL_TAG), keys)
            .await?;
        let entry_keys: Vec<String> = keys.iter().map(|k| Self::entry_key(k)).collect();
        let removed = self.store.delete_many(&entry_keys).await?;
        self.record(|s| s.invalidated += removed).await;
        counter!("orchestrator_cache_invalidated_total").increment(removed);
        Ok(removed)
    }
}
