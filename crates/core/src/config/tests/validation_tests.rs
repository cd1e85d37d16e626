use crate::config::models::{
    AppConfig, CacheConfig, RateLimitConfig, ReaperConfig, StoreBackend, StoreConfig,
    WorkerConfig,
};

#[test]
fn test_store_validation() {
    let mut config = StoreConfig::default();
    assert!(config.validate().is_ok());

    config.backend = StoreBackend::Redis;
    config.url = "http://localhost:6379".to_string();
    assert!(config.validate().is_err());

    config.url = "redis://localhost:6379".to_string();
    assert!(config.validate().is_ok());

    config.key_prefix = "has space".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_cache_validation() {
    let mut config = CacheConfig::default();
    assert!(config.validate().is_ok());

    config.lock_retry_backoff_max_ms = config.lock_retry_backoff_ms - 1;
    assert!(config.validate().is_err());

    let config = CacheConfig {
        default_ttl_seconds: 0,
        ..CacheConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_rate_limit_validation() {
    let config = RateLimitConfig {
        window_seconds: 0,
        ..RateLimitConfig::default()
    };
    assert!(config.validate().is_err());

    let config = RateLimitConfig {
        admin_limit: 0,
        ..RateLimitConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_worker_validation() {
    let mut config = WorkerConfig::default();
    assert!(config.validate().is_ok());

    config.engine.command = String::new();
    assert!(config.validate().is_err());

    let config = WorkerConfig {
        progress_min_delta: 101,
        ..WorkerConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_reaper_timeout_must_exceed_heartbeat() {
    let mut config = AppConfig::default();
    config.reaper = ReaperConfig {
        progress_timeout_seconds: 1,
        ..ReaperConfig::default()
    };
    config.worker.heartbeat_interval_ms = 5_000;
    assert!(config.validate().is_err());
}

#[test]
fn test_api_bind_address_validation() {
    let mut config = AppConfig::default();
    config.api.bind_address = "not-an-address".to_string();
    assert!(config.validate().is_err());
}
