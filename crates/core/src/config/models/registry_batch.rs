use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 任务注册表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 终态任务记录的保留时间
    pub terminal_ttl_seconds: u64,
    /// 单次状态变更的比较并交换最大尝试次数
    pub cas_max_attempts: u32,
    /// 清理失效去重槽位后重新声明的最大次数
    pub slot_claim_attempts: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            terminal_ttl_seconds: 24 * 60 * 60,
            cas_max_attempts: 16,
            slot_claim_attempts: 3,
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.terminal_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("终态任务保留时间必须大于0"));
        }
        if self.cas_max_attempts == 0 {
            return Err(anyhow::anyhow!("CAS尝试次数必须大于0"));
        }
        if self.slot_claim_attempts == 0 {
            return Err(anyhow::anyhow!("槽位声明次数必须大于0"));
        }
        Ok(())
    }

    pub fn terminal_ttl(&self) -> Duration {
        Duration::from_secs(self.terminal_ttl_seconds)
    }
}

/// 批量分析配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub batch_ttl_seconds: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            batch_ttl_seconds: 24 * 60 * 60,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_batch_size == 0 {
            return Err(anyhow::anyhow!("批次最大数量必须大于0"));
        }
        if self.batch_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("批次保留时间必须大于0"));
        }
        Ok(())
    }

    pub fn batch_ttl(&self) -> Duration {
        Duration::from_secs(self.batch_ttl_seconds)
    }
}
