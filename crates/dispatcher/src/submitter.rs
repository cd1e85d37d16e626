use std::sync::Arc;

use metrics::counter;
use orchestrator_domain::{
    result_ref, validate_owner, validate_params, validate_target, AnalysisTask, JobDescriptor,
    JobQueue, ParamsHash, TaskHandle, TaskRegistry, TaskStatus,
};
use orchestrator_errors::OrchestratorResult;
use orchestrator_infrastructure::CacheLayer;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

/// 单个分析请求
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub target: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// 忽略已缓存的结果，强制重新分析
    #[serde(default)]
    pub force: bool,
}

impl SubmitRequest {
    pub fn new(target: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            target: target.into(),
            params,
            force: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// 作业提交器
///
/// 提交顺序：校验 → 结果缓存短路 → 注册表去重 → 入队；入队失败时回滚注册记录。
pub struct JobSubmitter {
    registry: Arc<dyn TaskRegistry>,
    queue: Arc<dyn JobQueue>,
    cache: Arc<CacheLayer>,
}

impl JobSubmitter {
    pub fn new(
        registry: Arc<dyn TaskRegistry>,
        queue: Arc<dyn JobQueue>,
        cache: Arc<CacheLayer>,
    ) -> Self {
        Self {
            registry,
            queue,
            cache,
        }
    }

    #[instrument(skip(self, request), fields(target = %request.target, force = request.force))]
    pub async fn submit(&self, owner: &str, request: SubmitRequest) -> OrchestratorResult<TaskHandle> {
        validate_owner(owner)?;
        validate_target(&request.target)?;
        validate_params(&request.params)?;

        let params_hash = ParamsHash::of(&request.params).into_inner();
        let result_key = result_ref(&request.target, &params_hash);

        if !request.force {
            if let Some(handle) = self
                .complete_from_cache(owner, &request, &params_hash, &result_key)
                .await?
            {
                return Ok(handle);
            }
        }

        let task = AnalysisTask::new(owner, request.target.as_str(), request.params, params_hash);
        let handle = self.registry.submit(task.clone()).await?;
        if handle.deduplicated {
            info!("目标 {} 已有进行中的任务 {}，复用现有句柄", task.target, handle.task_id);
            return Ok(handle);
        }

        let job = JobDescriptor::for_task(&task);
        if let Err(e) = self.queue.enqueue(&job).await {
            error!("任务 {} 入队失败，回滚注册记录: {}", task.id, e);
            counter!("orchestrator_enqueue_failures_total").increment(1);
            if let Err(rollback_err) = self.registry.rollback(&task.id).await {
                error!("回滚任务 {} 失败: {}", task.id, rollback_err);
            }
            return Err(e);
        }

        info!("任务 {} 已入队 (owner: {}, target: {})", task.id, task.owner, task.target);
        Ok(handle)
    }

    /// 请求取消任务；未知任务返回 `TaskNotFound`
    #[instrument(skip(self))]
    pub async fn cancel(&self, task_id: &str) -> OrchestratorResult<TaskStatus> {
        self.registry.request_cancel(task_id).await
    }

    /// 缓存中已有同一目标、同一参数的结果时，直接创建 SUCCESS 任务，不入队
    async fn complete_from_cache(
        &self,
        owner: &str,
        request: &SubmitRequest,
        params_hash: &str,
        result_key: &str,
    ) -> OrchestratorResult<Option<TaskHandle>> {
        let cached = match self.cache.get::<serde_json::Value>(result_key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!("结果缓存不可用，按未命中处理: {}", e);
                None
            }
        };
        if cached.is_none() {
            return Ok(None);
        }

        let mut task = AnalysisTask::new(
            owner,
            request.target.as_str(),
            request.params.clone(),
            params_hash,
        );
        task.start()?;
        task.succeed(result_key)?;
        let handle = self.registry.record_terminal(task).await?;

        counter!("orchestrator_tasks_served_from_cache_total").increment(1);
        info!("目标 {} 命中结果缓存，任务 {} 直接完成", request.target, handle.task_id);
        Ok(Some(handle))
    }
}
