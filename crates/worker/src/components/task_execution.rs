use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use orchestrator_core::WorkerConfig;
use orchestrator_domain::{
    result_ref, AnalysisArtifact, AnalysisEngine, AnalysisInput, EngineError, JobDescriptor,
    ProgressReporter, TaskError, TaskRegistry,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use orchestrator_infrastructure::CacheLayer;
use tokio::task::JoinError;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::ProgressThrottle;

/// 单个作业的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded { result_ref: String },
    Failed { code: String },
    /// 任务在被取走前已结束（取消、回收或过期），没有运行引擎
    Skipped,
}

enum EngineExit {
    Finished(Result<Result<AnalysisArtifact, EngineError>, JoinError>),
    CancelRequested,
    TimedOut,
}

/// 任务执行器
///
/// 引擎在独立的tokio任务中运行，panic会被捕获并记为引擎失败。
/// 执行期间按心跳间隔刷新注册表中的存活时间并轮询取消标志。
pub struct TaskExecutor {
    worker_id: String,
    registry: Arc<dyn TaskRegistry>,
    cache: Arc<CacheLayer>,
    engine: Arc<dyn AnalysisEngine>,
    config: WorkerConfig,
    result_ttl: Duration,
}

impl TaskExecutor {
    pub fn new(
        registry: Arc<dyn TaskRegistry>,
        cache: Arc<CacheLayer>,
        engine: Arc<dyn AnalysisEngine>,
        config: WorkerConfig,
    ) -> Self {
        let result_ttl = cache.config().result_ttl();
        Self {
            worker_id: config.worker_id.clone(),
            registry,
            cache,
            engine,
            config,
            result_ttl,
        }
    }

    #[instrument(skip(self, job), fields(task_id = %job.task_id, worker_id = %self.worker_id))]
    pub async fn execute(&self, job: JobDescriptor) -> OrchestratorResult<ExecutionOutcome> {
        match self.registry.mark_started(&job.task_id).await {
            Ok(_) => {}
            Err(OrchestratorError::InvalidTransition { from, .. }) => {
                info!("任务 {} 已处于 {}，跳过执行", job.task_id, from);
                return Ok(ExecutionOutcome::Skipped);
            }
            Err(OrchestratorError::TaskNotFound { .. }) => {
                warn!("任务 {} 的记录已不存在，丢弃作业", job.task_id);
                return Ok(ExecutionOutcome::Skipped);
            }
            Err(e) => return Err(e),
        }

        info!(
            "开始执行任务: task_id={}, target={}, engine={}",
            job.task_id,
            job.target,
            self.engine.name()
        );
        let started = Instant::now();
        let exit = self.run_engine(&job).await;
        histogram!("orchestrator_job_duration_seconds").record(started.elapsed().as_secs_f64());

        let outcome = match exit {
            EngineExit::Finished(Ok(Ok(artifact))) => self.finish_success(&job, artifact).await?,
            EngineExit::Finished(Ok(Err(EngineError::Cancelled))) | EngineExit::CancelRequested => {
                self.finish_failure(&job, TaskError::cancelled()).await?
            }
            EngineExit::Finished(Ok(Err(e))) => {
                warn!("任务 {} 引擎执行失败: {}", job.task_id, e);
                self.finish_failure(&job, TaskError::engine_failure(e.to_string()))
                    .await?
            }
            EngineExit::Finished(Err(join_err)) => {
                error!("任务 {} 引擎崩溃: {}", job.task_id, join_err);
                self.finish_failure(&job, TaskError::engine_failure("分析引擎异常退出"))
                    .await?
            }
            EngineExit::TimedOut => {
                warn!(
                    "任务 {} 超过执行时限 {:?}",
                    job.task_id,
                    self.config.job_timeout()
                );
                self.finish_failure(
                    &job,
                    TaskError::timeout(format!(
                        "分析超过 {} 秒未完成",
                        self.config.job_timeout_seconds
                    )),
                )
                .await?
            }
        };

        let label = match &outcome {
            ExecutionOutcome::Succeeded { .. } => "success".to_string(),
            ExecutionOutcome::Failed { code } => code.to_lowercase(),
            ExecutionOutcome::Skipped => "skipped".to_string(),
        };
        counter!("orchestrator_jobs_executed_total", "outcome" => label).increment(1);
        Ok(outcome)
    }

    async fn run_engine(&self, job: &JobDescriptor) -> EngineExit {
        let (reporter, mut ticks) = ProgressReporter::channel();
        let input = AnalysisInput {
            task_id: job.task_id.clone(),
            owner: job.owner.clone(),
            target: job.target.clone(),
            params: job.params.clone(),
        };

        let engine = Arc::clone(&self.engine);
        let engine_reporter = reporter.clone();
        let mut handle = tokio::spawn(async move { engine.analyze(input, engine_reporter).await });

        let mut throttle = ProgressThrottle::new(
            self.config.progress_min_delta,
            self.config.progress_min_interval(),
        );
        let period = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep(self.config.job_timeout());
        tokio::pin!(deadline);

        let exit = loop {
            tokio::select! {
                result = &mut handle => break EngineExit::Finished(result),
                Some(tick) = ticks.recv() => {
                    if throttle.should_emit(tick.percent) {
                        if let Err(e) = self
                            .registry
                            .update_progress(&job.task_id, tick.percent, tick.message)
                            .await
                        {
                            warn!("写入任务 {} 进度失败: {}", job.task_id, e);
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    match self.registry.heartbeat(&job.task_id).await {
                        Ok(true) => {
                            info!("任务 {} 收到取消请求，停止引擎", job.task_id);
                            break EngineExit::CancelRequested;
                        }
                        Ok(false) => debug!("任务 {} 心跳已刷新", job.task_id),
                        Err(e) => warn!("任务 {} 心跳失败: {}", job.task_id, e),
                    }
                }
                _ = &mut deadline => break EngineExit::TimedOut,
            }
        };

        if !matches!(exit, EngineExit::Finished(_)) {
            reporter.cancel();
            handle.abort();
        }
        exit
    }

    async fn finish_success(
        &self,
        job: &JobDescriptor,
        artifact: AnalysisArtifact,
    ) -> OrchestratorResult<ExecutionOutcome> {
        let reference = result_ref(&job.target, &job.params_hash);
        let tags = vec![
            "result".to_string(),
            format!("target:{}", job.target),
            format!("owner:{}", job.owner),
        ];

        if let Err(e) = self
            .cache
            .put(&reference, &artifact, self.result_ttl, &tags)
            .await
        {
            error!("任务 {} 结果写入缓存失败: {}", job.task_id, e);
            let unavailable = OrchestratorError::CacheBackendUnavailable(e.to_string());
            return self.finish_failure(job, TaskError::from(&unavailable)).await;
        }

        match self.registry.complete(&job.task_id, &reference).await {
            Ok(_) => info!("任务 {} 完成，结果 {}", job.task_id, reference),
            Err(OrchestratorError::InvalidTransition { from, .. }) => {
                warn!("任务 {} 已被置为 {}，丢弃完成状态", job.task_id, from);
                let code = self
                    .registry
                    .get_status(&job.task_id)
                    .await?
                    .error
                    .map(|e| e.code)
                    .unwrap_or_else(|| "WORKER_LOST".to_string());
                return Ok(ExecutionOutcome::Failed { code });
            }
            Err(e) => return Err(e),
        }

        for tag in [
            format!("view:owner:{}", job.owner),
            format!("view:target:{}", job.target),
        ] {
            if let Err(e) = self.cache.invalidate_tag(&tag).await {
                warn!("失效派生视图 {} 失败: {}", tag, e);
            }
        }

        Ok(ExecutionOutcome::Succeeded {
            result_ref: reference,
        })
    }

    async fn finish_failure(
        &self,
        job: &JobDescriptor,
        error: TaskError,
    ) -> OrchestratorResult<ExecutionOutcome> {
        let code = error.code.clone();
        match self.registry.fail(&job.task_id, error).await {
            Ok(_) => {}
            Err(OrchestratorError::InvalidTransition { from, .. }) => {
                warn!("任务 {} 已处于 {}，忽略失败状态", job.task_id, from);
            }
            Err(e) => return Err(e),
        }
        Ok(ExecutionOutcome::Failed { code })
    }
}
