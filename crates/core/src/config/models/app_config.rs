use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    cache_rate_limit::{CacheConfig, RateLimitConfig},
    registry_batch::{BatchConfig, RegistryConfig},
    store_queue::{QueueConfig, StoreConfig},
    worker_reaper::{ReaperConfig, WorkerConfig},
};

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub registry: RegistryConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub worker: WorkerConfig,
    pub reaper: ReaperConfig,
    pub batch: BatchConfig,
    pub api: ApiConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 未指定路径时依次尝试默认位置；都不存在则只使用内置默认值。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/orchestrator.toml",
                "orchestrator.toml",
                "/etc/orchestrator/config.toml",
            ];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ORCHESTRATOR")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("api.cors_origins")
                .with_list_parse_key("worker.engine.args")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置，缺省的字段取默认值
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate().context("存储配置验证失败")?;
        self.queue.validate().context("队列配置验证失败")?;
        self.registry.validate().context("注册表配置验证失败")?;
        self.cache.validate().context("缓存配置验证失败")?;
        self.rate_limit.validate().context("限流配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.reaper.validate().context("回收器配置验证失败")?;
        self.batch.validate().context("批次配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        if self.reaper.progress_timeout() <= self.worker.heartbeat_interval() {
            return Err(anyhow::anyhow!("进度超时时间必须大于Worker心跳间隔"));
        }

        Ok(())
    }
}
