use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 外部分析引擎命令
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: "chess-analyzer".to_string(),
            args: Vec::new(),
            working_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_id: String,
    /// 同时运行的引擎数量上限
    pub pool_size: usize,
    pub job_timeout_seconds: u64,
    /// 两次进度写入之间的最小百分比差
    pub progress_min_delta: u8,
    /// 两次进度写入之间的最小时间间隔
    pub progress_min_interval_ms: u64,
    /// 检查取消标志并刷新存活时间的间隔
    pub heartbeat_interval_ms: u64,
    pub engine: EngineConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_id: "worker-001".to_string(),
            pool_size: 4,
            job_timeout_seconds: 600,
            progress_min_delta: 5,
            progress_min_interval_ms: 1000,
            heartbeat_interval_ms: 1000,
            engine: EngineConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            return Err(anyhow::anyhow!("Worker ID不能为空"));
        }
        if self.pool_size == 0 {
            return Err(anyhow::anyhow!("Worker池大小必须大于0"));
        }
        if self.job_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("作业超时时间必须大于0"));
        }
        if self.progress_min_delta > 100 {
            return Err(anyhow::anyhow!("进度最小差值不能超过100"));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }
        if self.engine.command.is_empty() {
            return Err(anyhow::anyhow!("引擎命令不能为空"));
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }

    pub fn progress_min_interval(&self) -> Duration {
        Duration::from_millis(self.progress_min_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// 失联任务回收配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub enabled: bool,
    pub scan_interval_seconds: u64,
    /// 执行中任务多久没有更新视为Worker丢失
    pub progress_timeout_seconds: u64,
    /// 排队中任务多久没有被取走视为丢失
    pub pending_timeout_seconds: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_seconds: 30,
            progress_timeout_seconds: 120,
            pending_timeout_seconds: 3600,
        }
    }
}

impl ReaperConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scan_interval_seconds == 0 {
            return Err(anyhow::anyhow!("回收扫描间隔必须大于0"));
        }
        if self.progress_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("进度超时时间必须大于0"));
        }
        if self.pending_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("排队超时时间必须大于0"));
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds)
    }

    pub fn progress_timeout(&self) -> Duration {
        Duration::from_secs(self.progress_timeout_seconds)
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_seconds)
    }
}
