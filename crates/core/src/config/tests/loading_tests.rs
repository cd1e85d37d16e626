use crate::config::models::{AppConfig, StoreBackend};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_default_config_is_valid() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.registry.terminal_ttl_seconds, 86_400);
}

#[test]
fn test_load_partial_file_keeps_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[worker]
pool_size = 8

[rate_limit]
submission_limit = 3
"#
    )
    .unwrap();

    let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
    assert_eq!(config.worker.pool_size, 8);
    assert_eq!(config.rate_limit.submission_limit, 3);
    assert_eq!(config.rate_limit.status_limit, 120);
    assert_eq!(config.cache.lock_retry_attempts, 5);
}

#[test]
fn test_load_missing_file_fails() {
    let result = AppConfig::load(Some("/definitely/not/here/orchestrator.toml"));
    assert!(result.is_err());
}

#[test]
fn test_load_rejects_invalid_values() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[worker]
pool_size = 0
"#
    )
    .unwrap();

    assert!(AppConfig::load(Some(file.path().to_str().unwrap())).is_err());
}

#[test]
fn test_toml_round_trip() {
    let mut config = AppConfig::default();
    config.store.backend = StoreBackend::Redis;
    config.batch.max_batch_size = 7;

    let toml_str = config.to_toml().unwrap();
    let parsed = AppConfig::from_toml(&toml_str).unwrap();
    assert_eq!(parsed.store.backend, StoreBackend::Redis);
    assert_eq!(parsed.batch.max_batch_size, 7);
}

#[test]
fn test_from_toml_with_redis_backend() {
    let config = AppConfig::from_toml(
        r#"
[store]
backend = "redis"
url = "redis://cache:6379/2"
"#,
    )
    .unwrap();
    assert_eq!(config.store.backend, StoreBackend::Redis);
    assert_eq!(config.store.url, "redis://cache:6379/2");
}
