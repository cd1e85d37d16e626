//! Fixed-window rate limiter
//!
//! One counter per (endpoint class, identity, window index). The counter is
//! only incremented when the request is admitted and expires with its window.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use orchestrator_core::RateLimitConfig;
use orchestrator_domain::{EndpointClass, KeyValueStore, RateLimitDecision};
use orchestrator_errors::OrchestratorResult;
use tracing::{debug, warn};

pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn limit_for(&self, class: EndpointClass) -> u64 {
        match class {
            EndpointClass::Submission => self.config.submission_limit,
            EndpointClass::Status => self.config.status_limit,
            EndpointClass::Admin => self.config.admin_limit,
        }
    }

    pub async fn check_and_increment(
        &self,
        identity: &str,
        class: EndpointClass,
    ) -> OrchestratorResult<RateLimitDecision> {
        let now = Utc::now().timestamp().max(0) as u64;
        self.check_and_increment_at(identity, class, now).await
    }

    /// Same as [`check_and_increment`](Self::check_and_increment) with an
    /// explicit unix timestamp in seconds.
    pub async fn check_and_increment_at(
        &self,
        identity: &str,
        class: EndpointClass,
        now_seconds: u64,
    ) -> OrchestratorResult<RateLimitDecision> {
        let limit = self.limit_for(class);
        let window = self.config.window_seconds;
        let window_index = now_seconds / window;
        let reset_in_seconds = window - now_seconds % window;

        if !self.config.enabled {
            return Ok(RateLimitDecision::Allowed {
                limit,
                remaining: limit,
                reset_in_seconds,
            });
        }

        let key = format!("ratelimit:{class}:{identity}:{window_index}");
        let outcome = match self
            .store
            .increment_below(&key, limit, self.config.window())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                // Counter store down: admit rather than reject every request.
                warn!("Rate limit store unavailable, admitting {}: {}", identity, e);
                return Ok(RateLimitDecision::Allowed {
                    limit,
                    remaining: limit,
                    reset_in_seconds,
                });
            }
        };

        if outcome.applied {
            Ok(RateLimitDecision::Allowed {
                limit,
                remaining: limit.saturating_sub(outcome.count),
                reset_in_seconds,
            })
        } else {
            debug!("Rate limit exceeded for {} on {}", identity, class);
            counter!("orchestrator_rate_limited_total", "class" => class.as_str()).increment(1);
            Ok(RateLimitDecision::Denied {
                limit,
                reset_in_seconds,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use orchestrator_testing_utils::UnavailableStore;

    fn limiter(config: RateLimitConfig) -> RateLimiter {
        RateLimiter::new(Arc::new(InMemoryStore::new()), config)
    }

    #[tokio::test]
    async fn test_n_plus_one_is_denied_until_next_window() {
        let limiter = limiter(RateLimitConfig {
            window_seconds: 60,
            submission_limit: 3,
            ..RateLimitConfig::default()
        });
        let now = 1_200;

        for expected_remaining in [2, 1, 0] {
            let decision = limiter
                .check_and_increment_at("u1", EndpointClass::Submission, now)
                .await
                .unwrap();
            assert_eq!(decision.remaining(), expected_remaining);
            assert!(decision.is_allowed());
        }

        let denied = limiter
            .check_and_increment_at("u1", EndpointClass::Submission, now + 10)
            .await
            .unwrap();
        assert!(!denied.is_allowed());
        assert_eq!(denied.reset_in_seconds(), 50);

        let next_window = limiter
            .check_and_increment_at("u1", EndpointClass::Submission, now + 60)
            .await
            .unwrap();
        assert!(next_window.is_allowed());
    }

    #[tokio::test]
    async fn test_classes_and_identities_are_independent() {
        let limiter = limiter(RateLimitConfig {
            submission_limit: 1,
            status_limit: 5,
            ..RateLimitConfig::default()
        });
        let now = 0;

        assert!(limiter
            .check_and_increment_at("u1", EndpointClass::Submission, now)
            .await
            .unwrap()
            .is_allowed());
        assert!(!limiter
            .check_and_increment_at("u1", EndpointClass::Submission, now)
            .await
            .unwrap()
            .is_allowed());
        assert!(limiter
            .check_and_increment_at("u1", EndpointClass::Status, now)
            .await
            .unwrap()
            .is_allowed());
        assert!(limiter
            .check_and_increment_at("u2", EndpointClass::Submission, now)
            .await
            .unwrap()
            .is_allowed());
    }

    #[tokio::test]
    async fn test_denied_request_does_not_consume_quota() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let limiter = RateLimiter::new(
            Arc::clone(&store),
            RateLimitConfig {
                submission_limit: 1,
                ..RateLimitConfig::default()
            },
        );
        for _ in 0..5 {
            limiter
                .check_and_increment_at("u1", EndpointClass::Submission, 0)
                .await
                .unwrap();
        }
        let raw = store.get("ratelimit:submission:u1:0").await.unwrap().unwrap();
        assert_eq!(raw, b"1".to_vec());
    }

    #[tokio::test]
    async fn test_disabled_limiter_always_allows() {
        let limiter = limiter(RateLimitConfig {
            enabled: false,
            submission_limit: 1,
            ..RateLimitConfig::default()
        });
        for _ in 0..3 {
            assert!(limiter
                .check_and_increment("u1", EndpointClass::Submission)
                .await
                .unwrap()
                .is_allowed());
        }
    }

    #[tokio::test]
    async fn test_store_outage_admits() {
        let limiter = RateLimiter::new(
            Arc::new(UnavailableStore::new()),
            RateLimitConfig::default(),
        );
        let decision = limiter
            .check_and_increment("u1", EndpointClass::Admin)
            .await
            .unwrap();
        assert!(decision.is_allowed());
    }
}
