//! 领域仓储抽象
//!
//! 注册表与批次记录都保存在共享存储中，具体实现位于基础设施层

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_errors::OrchestratorResult;

use crate::entities::{
    AnalysisTask, BatchTask, ProgressUpdate, TaskError, TaskHandle, TaskStatus,
};

/// 任务注册表与状态机
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// 为任务的 (owner, target) 声明去重槽位并写入记录；
    /// 槽位已被进行中的任务占用时返回该任务的句柄（`deduplicated = true`）
    async fn submit(&self, task: AnalysisTask) -> OrchestratorResult<TaskHandle>;

    /// 写入一个已终结的任务（缓存命中时直接以 SUCCESS 创建），不占用槽位
    async fn record_terminal(&self, task: AnalysisTask) -> OrchestratorResult<TaskHandle>;

    /// 撤销刚提交的任务：删除记录并释放其持有的槽位
    async fn rollback(&self, task_id: &str) -> OrchestratorResult<()>;

    async fn get_task(&self, task_id: &str) -> OrchestratorResult<Option<AnalysisTask>>;

    /// 从未提交或已过期的任务返回 UNKNOWN，而不是错误
    async fn get_status(&self, task_id: &str) -> OrchestratorResult<TaskStatus>;

    async fn mark_started(&self, task_id: &str) -> OrchestratorResult<AnalysisTask>;

    async fn update_progress(
        &self,
        task_id: &str,
        percent: u8,
        message: Option<String>,
    ) -> OrchestratorResult<ProgressUpdate>;

    async fn complete(&self, task_id: &str, result_ref: &str) -> OrchestratorResult<AnalysisTask>;

    async fn fail(&self, task_id: &str, error: TaskError) -> OrchestratorResult<AnalysisTask>;

    /// 仅当记录的 `updated_at` 仍等于 `observed_updated_at` 时置为失败；
    /// 期间有过心跳或进度写入则不做修改并返回 `None`
    async fn fail_if_unchanged(
        &self,
        task_id: &str,
        observed_updated_at: DateTime<Utc>,
        error: TaskError,
    ) -> OrchestratorResult<Option<AnalysisTask>>;

    /// 设置协作式取消标志；尚未启动的任务直接进入 FAILURE("cancelled")
    async fn request_cancel(&self, task_id: &str) -> OrchestratorResult<TaskStatus>;

    async fn is_cancel_requested(&self, task_id: &str) -> OrchestratorResult<bool>;

    /// 刷新执行中任务的存活时间戳，并返回取消标志
    async fn heartbeat(&self, task_id: &str) -> OrchestratorResult<bool>;

    /// 所有非终态任务，供回收器扫描
    async fn list_live(&self) -> OrchestratorResult<Vec<AnalysisTask>>;

    async fn find_live(&self, owner: &str, target: &str)
        -> OrchestratorResult<Option<AnalysisTask>>;
}

/// 批次记录仓储
#[async_trait]
pub trait BatchRepository: Send + Sync {
    async fn create(&self, batch: &BatchTask) -> OrchestratorResult<()>;

    async fn find_by_id(&self, batch_id: &str) -> OrchestratorResult<Option<BatchTask>>;

    /// 仅当批次还没有聚合指标时写入；返回最终保存的批次
    async fn store_metrics(
        &self,
        batch_id: &str,
        metrics: serde_json::Value,
    ) -> OrchestratorResult<BatchTask>;
}
