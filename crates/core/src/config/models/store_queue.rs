use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

/// 共享键值存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
    /// 所有键的统一前缀，便于多个部署共用一个Redis
    pub key_prefix: String,
    pub connection_timeout_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "orchestrator".to_string(),
            connection_timeout_seconds: 5,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend == StoreBackend::Redis {
            if self.url.is_empty() {
                return Err(anyhow::anyhow!("存储URL不能为空"));
            }
            if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
                return Err(anyhow::anyhow!(
                    "Redis URL必须以redis://或rediss://开头: {}",
                    self.url
                ));
            }
        }

        if self.key_prefix.contains(char::is_whitespace) {
            return Err(anyhow::anyhow!("键前缀不能包含空白字符"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }
}

/// 作业队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,
    pub dequeue_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "analysis-jobs".to_string(),
            dequeue_timeout_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(anyhow::anyhow!("队列名称不能为空"));
        }
        if self.dequeue_timeout_ms == 0 {
            return Err(anyhow::anyhow!("出队超时时间必须大于0"));
        }
        Ok(())
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }
}
