use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use orchestrator_core::WorkerConfig;
use orchestrator_domain::JobQueue;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::TaskExecutor;

const QUEUE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// 固定大小的Worker池
///
/// 每个槽位独立地从队列取作业并同步执行，池大小即引擎的并发上限；
/// 多出的作业留在队列中等待。
pub struct WorkerPool {
    executor: Arc<TaskExecutor>,
    queue: Arc<dyn JobQueue>,
    config: WorkerConfig,
    dequeue_timeout: Duration,
}

impl WorkerPool {
    pub fn new(
        executor: Arc<TaskExecutor>,
        queue: Arc<dyn JobQueue>,
        config: WorkerConfig,
        dequeue_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            queue,
            config,
            dequeue_timeout,
        }
    }

    /// 运行所有槽位直到收到停止信号；正在执行的作业会先跑完
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) {
        info!(
            "启动Worker池 {}，槽位数 {}",
            self.config.worker_id, self.config.pool_size
        );

        let mut slots = JoinSet::new();
        for slot in 0..self.config.pool_size {
            let executor = Arc::clone(&self.executor);
            let queue = Arc::clone(&self.queue);
            let shutdown = shutdown.resubscribe();
            let timeout = self.dequeue_timeout;
            slots.spawn(async move { Self::slot_loop(slot, executor, queue, timeout, shutdown).await });
        }

        while let Some(joined) = slots.join_next().await {
            if let Err(e) = joined {
                error!("Worker槽位异常退出: {}", e);
            }
        }
        info!("Worker池 {} 已停止", self.config.worker_id);
    }

    async fn slot_loop(
        slot: usize,
        executor: Arc<TaskExecutor>,
        queue: Arc<dyn JobQueue>,
        dequeue_timeout: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            let next = tokio::select! {
                _ = shutdown.recv() => break,
                next = queue.dequeue(dequeue_timeout) => next,
            };

            match next {
                Ok(Some(job)) => {
                    gauge!("orchestrator_worker_busy_slots").increment(1.0);
                    let task_id = job.task_id.clone();
                    if let Err(e) = executor.execute(job).await {
                        error!("槽位 {} 执行任务 {} 时出错: {}", slot, task_id, e);
                    }
                    gauge!("orchestrator_worker_busy_slots").decrement(1.0);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("槽位 {} 读取队列失败: {}", slot, e);
                    tokio::time::sleep(QUEUE_ERROR_BACKOFF).await;
                }
            }
        }
        info!("槽位 {} 收到停止信号，退出", slot);
    }
}
