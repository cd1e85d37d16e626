use std::time::Duration;

use async_trait::async_trait;
use orchestrator_errors::OrchestratorResult;

use crate::entities::JobDescriptor;

/// 分析作业队列
///
/// 投递失败必须以 `QueueUnavailable` 返回，提交方据此回滚任务记录。
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &JobDescriptor) -> OrchestratorResult<()>;

    /// 最多等待 `timeout`，超时返回 `None`
    async fn dequeue(&self, timeout: Duration) -> OrchestratorResult<Option<JobDescriptor>>;

    async fn len(&self) -> OrchestratorResult<u64>;
}
