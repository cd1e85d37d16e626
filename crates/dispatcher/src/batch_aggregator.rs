use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use orchestrator_core::BatchConfig;
use orchestrator_domain::{
    validate_owner, validate_params, validate_target, AnalysisArtifact, BatchHandle,
    BatchRepository, BatchStatus, BatchStatusCalculator, BatchTask, MetricsAggregator,
    ParamsHash, StatusState, TaskRegistry,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use orchestrator_infrastructure::CacheLayer;
use tracing::{info, instrument, warn};

use crate::submitter::{JobSubmitter, SubmitRequest};

/// 批次聚合器
///
/// 创建时为每个目标提交一个单任务（沿用提交器的去重与缓存短路），
/// 查询时从子任务状态重新推导批次视图。已终结批次的视图连同聚合指标
/// 作为派生视图缓存在 `view:batch:{batch_id}`，带 owner 和各 target 的视图标签。
pub struct BatchAggregator {
    submitter: Arc<JobSubmitter>,
    registry: Arc<dyn TaskRegistry>,
    batches: Arc<dyn BatchRepository>,
    cache: Arc<CacheLayer>,
    metrics: Arc<dyn MetricsAggregator>,
    config: BatchConfig,
}

impl BatchAggregator {
    pub fn new(
        submitter: Arc<JobSubmitter>,
        registry: Arc<dyn TaskRegistry>,
        batches: Arc<dyn BatchRepository>,
        cache: Arc<CacheLayer>,
        metrics: Arc<dyn MetricsAggregator>,
        config: BatchConfig,
    ) -> Self {
        Self {
            submitter,
            registry,
            batches,
            cache,
            metrics,
            config,
        }
    }

    pub fn view_key(batch_id: &str) -> String {
        format!("view:batch:{batch_id}")
    }

    fn view_tags(batch: &BatchTask) -> Vec<String> {
        std::iter::once(format!("view:owner:{}", batch.owner))
            .chain(batch.targets.iter().map(|t| format!("view:target:{t}")))
            .collect()
    }

    fn validate_targets(&self, targets: &[String]) -> OrchestratorResult<()> {
        if targets.is_empty() {
            return Err(OrchestratorError::validation("批次至少需要一个目标"));
        }
        if targets.len() > self.config.max_batch_size {
            return Err(OrchestratorError::validation(format!(
                "批次目标数 {} 超过上限 {}",
                targets.len(),
                self.config.max_batch_size
            )));
        }
        let mut seen = HashSet::with_capacity(targets.len());
        for target in targets {
            validate_target(target)?;
            if !seen.insert(target.as_str()) {
                return Err(OrchestratorError::validation(format!(
                    "批次中目标重复: {target}"
                )));
            }
        }
        Ok(())
    }

    /// 已提交的子任务在后续目标失败时不会撤销
    #[instrument(skip(self, targets, params), fields(targets = targets.len()))]
    pub async fn create_batch(
        &self,
        owner: &str,
        targets: Vec<String>,
        params: serde_json::Value,
        force: bool,
    ) -> OrchestratorResult<BatchHandle> {
        validate_owner(owner)?;
        validate_params(&params)?;
        self.validate_targets(&targets)?;

        let mut task_ids = Vec::with_capacity(targets.len());
        for target in &targets {
            let mut request = SubmitRequest::new(target.as_str(), params.clone());
            request.force = force;
            let handle = self.submitter.submit(owner, request).await?;
            task_ids.push(handle.task_id);
        }

        let params_hash = ParamsHash::of(&params).into_inner();
        let batch = BatchTask::new(owner, targets, task_ids, params_hash);
        self.batches.create(&batch).await?;

        info!("创建批次 {}，共 {} 个子任务", batch.id, batch.total());
        Ok(batch.handle())
    }

    #[instrument(skip(self))]
    pub async fn get_batch_status(&self, batch_id: &str) -> OrchestratorResult<BatchStatus> {
        let batch = self
            .batches
            .find_by_id(batch_id)
            .await?
            .ok_or_else(|| OrchestratorError::batch_not_found(batch_id))?;

        let view_key = Self::view_key(&batch.id);
        match self.cache.get::<BatchStatus>(&view_key).await {
            Ok(Some(view)) => return Ok(view),
            Ok(None) => {}
            Err(e) => warn!("读取批次 {} 的缓存视图失败: {}", batch.id, e),
        }

        let statuses = try_join_all(
            batch
                .task_ids
                .iter()
                .map(|task_id| self.registry.get_status(task_id)),
        )
        .await?;

        let status = BatchStatusCalculator::summarize(&batch, &statuses);
        if !status.is_terminal() {
            return Ok(status);
        }

        // 缓存锁保证并发轮询者中只有一个计算指标；指标以写一次的方式落到批次记录
        let batch = &batch;
        self.cache
            .get_or_compute(
                &view_key,
                self.cache.config().default_ttl(),
                &Self::view_tags(batch),
                move || async move {
                    let mut view = status;
                    if view.aggregate_metrics.is_none() {
                        view.aggregate_metrics = Some(self.compute_and_store(batch, &view).await?);
                    }
                    Ok(view)
                },
            )
            .await
    }

    async fn compute_and_store(
        &self,
        batch: &BatchTask,
        status: &BatchStatus,
    ) -> OrchestratorResult<serde_json::Value> {
        // 锁释放前可能已有其他请求写入
        if let Some(stored) = self
            .batches
            .find_by_id(&batch.id)
            .await?
            .and_then(|b| b.aggregate_metrics)
        {
            return Ok(stored);
        }

        let mut artifacts: Vec<(String, AnalysisArtifact)> = Vec::new();
        for child in &status.children {
            if child.state != StatusState::Success {
                continue;
            }
            let Some(result_ref) = &child.result_ref else {
                continue;
            };
            match self.cache.get::<AnalysisArtifact>(result_ref).await {
                Ok(Some(artifact)) => artifacts.push((child.target.clone(), artifact)),
                Ok(None) => warn!("批次 {} 的结果 {} 已不在缓存中", batch.id, result_ref),
                Err(e) => warn!("读取结果 {} 失败: {}", result_ref, e),
            }
        }

        let metrics = self.metrics.aggregate(status, &artifacts);
        let stored = self.batches.store_metrics(&batch.id, metrics).await?;
        info!("批次 {} 聚合指标已生成", batch.id);
        Ok(stored.aggregate_metrics.unwrap_or(serde_json::Value::Null))
    }
}
