use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 缓存层配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_seconds: u64,
    /// 分析结果的缓存时间
    pub result_ttl_seconds: u64,
    /// 过期后仍可作为陈旧值返回的宽限期
    pub stale_grace_seconds: u64,
    pub lock_ttl_ms: u64,
    pub lock_retry_attempts: u32,
    pub lock_retry_backoff_ms: u64,
    pub lock_retry_backoff_max_ms: u64,
    /// 两次全局失效之间的最小间隔
    pub global_invalidation_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: 300,
            result_ttl_seconds: 24 * 60 * 60,
            stale_grace_seconds: 60,
            lock_ttl_ms: 30_000,
            lock_retry_attempts: 5,
            lock_retry_backoff_ms: 50,
            lock_retry_backoff_max_ms: 800,
            global_invalidation_interval_seconds: 60,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("缓存默认TTL必须大于0"));
        }
        if self.result_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("结果缓存TTL必须大于0"));
        }
        if self.lock_ttl_ms == 0 {
            return Err(anyhow::anyhow!("缓存锁有效期必须大于0"));
        }
        if self.lock_retry_backoff_ms == 0 {
            return Err(anyhow::anyhow!("缓存锁重试间隔必须大于0"));
        }
        if self.lock_retry_backoff_max_ms < self.lock_retry_backoff_ms {
            return Err(anyhow::anyhow!("缓存锁最大重试间隔不能小于初始间隔"));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_seconds)
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_seconds)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn lock_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.lock_retry_backoff_ms)
    }

    pub fn lock_retry_backoff_max(&self) -> Duration {
        Duration::from_millis(self.lock_retry_backoff_max_ms)
    }

    pub fn global_invalidation_interval(&self) -> Duration {
        Duration::from_secs(self.global_invalidation_interval_seconds)
    }
}

/// 固定窗口限流配置，每个端点分类一个配额
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window_seconds: u64,
    pub submission_limit: u64,
    pub status_limit: u64,
    pub admin_limit: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: 60,
            submission_limit: 10,
            status_limit: 120,
            admin_limit: 5,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_seconds == 0 {
            return Err(anyhow::anyhow!("限流窗口必须大于0"));
        }
        if self.submission_limit == 0 || self.status_limit == 0 || self.admin_limit == 0 {
            return Err(anyhow::anyhow!("限流配额必须大于0"));
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}
