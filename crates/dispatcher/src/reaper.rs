use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use orchestrator_core::ReaperConfig;
use orchestrator_domain::{AnalysisTask, TaskError, TaskRegistry, TaskState};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// 丢失任务回收器
///
/// 执行中的任务由Worker周期性刷新 `updated_at`；超过进度超时仍未刷新的任务，
/// 以及长时间未被取走的 PENDING 任务，会被强制置为 FAILURE(WORKER_LOST)。
pub struct Reaper {
    registry: Arc<dyn TaskRegistry>,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(registry: Arc<dyn TaskRegistry>, config: ReaperConfig) -> Self {
        Self { registry, config }
    }

    /// 检查任务是否已失联
    pub fn is_task_stale(&self, task: &AnalysisTask, now: DateTime<Utc>) -> bool {
        let silence = (now - task.updated_at).to_std().unwrap_or_default();
        match task.state {
            TaskState::Pending => silence > self.config.pending_timeout(),
            TaskState::Started | TaskState::Progress => silence > self.config.progress_timeout(),
            TaskState::Success | TaskState::Failure => false,
        }
    }

    /// 检测失联的任务
    pub async fn detect_stale_tasks(&self) -> OrchestratorResult<Vec<AnalysisTask>> {
        let now = Utc::now();
        let stale: Vec<AnalysisTask> = self
            .registry
            .list_live()
            .await?
            .into_iter()
            .filter(|task| self.is_task_stale(task, now))
            .collect();

        for task in &stale {
            warn!(
                "检测到失联任务: {} ({}, 上次更新: {})",
                task.id,
                task.state,
                task.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        Ok(stale)
    }

    /// 执行一轮回收，返回被置为失败的任务数
    pub async fn reap_once(&self) -> OrchestratorResult<usize> {
        let stale = self.detect_stale_tasks().await?;
        Ok(self.reap(stale).await)
    }

    /// 把检测到的失联任务置为失败
    ///
    /// 只有 `updated_at` 与检测时一致的任务才会被回收；
    /// 检测之后又收到心跳或进度的任务保持原样。
    pub async fn reap(&self, stale: Vec<AnalysisTask>) -> usize {
        let mut reaped = 0;

        for task in stale {
            let reason = match task.state {
                TaskState::Pending => "任务长时间未被Worker领取",
                _ => "Worker失联，任务进度超时",
            };
            match self
                .registry
                .fail_if_unchanged(&task.id, task.updated_at, TaskError::worker_lost(reason))
                .await
            {
                Ok(Some(_)) => {
                    reaped += 1;
                    counter!("orchestrator_tasks_reaped_total").increment(1);
                }
                Ok(None) => debug!("任务 {} 在检测后恢复活动，跳过回收", task.id),
                // 检测与回收之间任务已自行结束
                Err(OrchestratorError::InvalidTransition { .. })
                | Err(OrchestratorError::TaskNotFound { .. }) => {
                    debug!("任务 {} 已结束，跳过回收", task.id);
                }
                Err(e) => error!("回收任务 {} 时出错: {}", task.id, e),
            }
        }

        reaped
    }

    /// 周期性回收，直到收到停止信号
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "启动任务回收循环，扫描间隔 {:?}",
            self.config.scan_interval()
        );
        let mut ticker = tokio::time::interval(self.config.scan_interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reap_once().await {
                        Ok(0) => {}
                        Ok(count) => info!("回收了 {} 个失联任务", count),
                        Err(e) => error!("任务回收时出错: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    info!("收到停止信号，退出任务回收循环");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_testing_utils::AnalysisTaskBuilder;

    fn reaper() -> Reaper {
        let store: Arc<dyn orchestrator_domain::KeyValueStore> =
            Arc::new(orchestrator_infrastructure::InMemoryStore::new());
        let registry = Arc::new(orchestrator_infrastructure::StoreTaskRegistry::new(
            store,
            Default::default(),
        ));
        Reaper::new(registry, ReaperConfig::default())
    }

    #[test]
    fn test_running_task_stale_after_progress_timeout() {
        let reaper = reaper();
        let now = Utc::now();
        let fresh = AnalysisTaskBuilder::new()
            .running()
            .aged(chrono::Duration::seconds(30))
            .build();
        let silent = AnalysisTaskBuilder::new()
            .running()
            .aged(chrono::Duration::seconds(121))
            .build();

        assert!(!reaper.is_task_stale(&fresh, now));
        assert!(reaper.is_task_stale(&silent, now));
    }

    #[test]
    fn test_pending_task_uses_pending_timeout() {
        let reaper = reaper();
        let now = Utc::now();
        let waiting = AnalysisTaskBuilder::new()
            .aged(chrono::Duration::minutes(10))
            .build();
        let abandoned = AnalysisTaskBuilder::new()
            .aged(chrono::Duration::hours(2))
            .build();

        assert!(!reaper.is_task_stale(&waiting, now));
        assert!(reaper.is_task_stale(&abandoned, now));
    }

    #[test]
    fn test_terminal_task_never_stale() {
        let reaper = reaper();
        let done = AnalysisTaskBuilder::new()
            .succeeded()
            .aged(chrono::Duration::days(3))
            .build();
        assert!(!reaper.is_task_stale(&done, Utc::now()));
    }

    #[test]
    fn test_future_timestamp_is_not_stale() {
        let reaper = reaper();
        let task = AnalysisTaskBuilder::new()
            .running()
            .with_updated_at(Utc::now() + chrono::Duration::seconds(5))
            .build();
        assert!(!reaper.is_task_stale(&task, Utc::now()));
    }
}
