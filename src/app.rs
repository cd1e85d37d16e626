use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use orchestrator_api::{create_app, AppState};
use orchestrator_core::AppConfig;
use orchestrator_dispatcher::{BatchAggregator, JobSubmitter, Reaper};
use orchestrator_domain::{
    AnalysisEngine, JobQueue, KeyValueStore, SummaryMetricsAggregator, TaskRegistry,
};
use orchestrator_infrastructure::{
    open_store, CacheLayer, RateLimiter, StoreBatchRepository, StoreJobQueue, StoreTaskRegistry,
};
use orchestrator_worker::{ProcessEngine, TaskExecutor, WorkerPool};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行API服务器
    Api,
    /// 仅运行Worker池
    Worker,
    /// 仅运行丢失任务回收器
    Reaper,
    /// 运行所有组件
    All,
}

/// 共享存储之上的全部组件，各运行模式共用
#[derive(Clone)]
pub struct Components {
    pub store: Arc<dyn KeyValueStore>,
    pub registry: Arc<dyn TaskRegistry>,
    pub cache: Arc<CacheLayer>,
    pub queue: Arc<dyn JobQueue>,
    pub rate_limiter: Arc<RateLimiter>,
    pub submitter: Arc<JobSubmitter>,
    pub aggregator: Arc<BatchAggregator>,
}

impl Components {
    pub fn wire(config: &AppConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let registry: Arc<dyn TaskRegistry> = Arc::new(StoreTaskRegistry::new(
            Arc::clone(&store),
            config.registry.clone(),
        ));
        let cache = Arc::new(CacheLayer::new(Arc::clone(&store), config.cache.clone()));
        let queue: Arc<dyn JobQueue> =
            Arc::new(StoreJobQueue::new(Arc::clone(&store), &config.queue.name));
        let rate_limiter = Arc::new(RateLimiter::new(
            Arc::clone(&store),
            config.rate_limit.clone(),
        ));
        let submitter = Arc::new(JobSubmitter::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            Arc::clone(&cache),
        ));
        let aggregator = Arc::new(BatchAggregator::new(
            Arc::clone(&submitter),
            Arc::clone(&registry),
            Arc::new(StoreBatchRepository::new(
                Arc::clone(&store),
                config.batch.clone(),
            )),
            Arc::clone(&cache),
            Arc::new(SummaryMetricsAggregator),
            config.batch.clone(),
        ));

        Self {
            store,
            registry,
            cache,
            queue,
            rate_limiter,
            submitter,
            aggregator,
        }
    }

    pub fn executor(&self, config: &AppConfig, engine: Arc<dyn AnalysisEngine>) -> TaskExecutor {
        TaskExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.cache),
            engine,
            config.worker.clone(),
        )
    }
}

/// 安装全局Prometheus记录器，整个进程只能调用一次
pub fn install_metrics_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("安装Prometheus指标记录器失败")
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    components: Components,
    engine: Arc<dyn AnalysisEngine>,
    metrics_handle: Option<PrometheusHandle>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let store = open_store(&config.store)
            .await
            .with_context(|| format!("打开存储失败: {:?}", config.store.backend))?;
        let components = Components::wire(&config, store);
        let engine: Arc<dyn AnalysisEngine> =
            Arc::new(ProcessEngine::new(config.worker.engine.clone()));

        Ok(Self {
            config,
            mode,
            components,
            engine,
            metrics_handle: None,
        })
    }

    /// 替换分析引擎（默认是配置中的子进程引擎）
    pub fn with_engine(mut self, engine: Arc<dyn AnalysisEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    pub fn router(&self) -> axum::Router {
        let state = AppState {
            submitter: Arc::clone(&self.components.submitter),
            aggregator: Arc::clone(&self.components.aggregator),
            registry: Arc::clone(&self.components.registry),
            cache: Arc::clone(&self.components.cache),
            rate_limiter: Arc::clone(&self.components.rate_limiter),
            store: Arc::clone(&self.components.store),
            metrics_handle: self
                .metrics_handle
                .clone()
                .filter(|_| self.config.observability.metrics_enabled),
        };
        create_app(
            state,
            &self.config.api,
            &self.config.observability.metrics_endpoint,
        )
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        let result = match self.mode {
            AppMode::Api => self.run_api(shutdown_rx).await,
            AppMode::Worker => self.run_worker(shutdown_rx).await,
            AppMode::Reaper => self.run_reaper(shutdown_rx).await,
            AppMode::All => self.run_all_components(shutdown_rx).await,
        };

        if let Err(e) = self.components.store.close().await {
            error!("关闭存储失败: {}", e);
        }
        result
    }

    async fn run_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;

        info!("API服务器启动在 http://{}", self.config.api.bind_address);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            })
            .await
            .context("API服务器运行失败")?;

        info!("API服务器已停止");
        Ok(())
    }

    async fn run_worker(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动Worker服务: {}", self.config.worker.worker_id);

        let executor = Arc::new(
            self.components
                .executor(&self.config, Arc::clone(&self.engine)),
        );
        let pool = WorkerPool::new(
            executor,
            Arc::clone(&self.components.queue),
            self.config.worker.clone(),
            self.config.queue.dequeue_timeout(),
        );
        pool.run(shutdown_rx).await;

        info!("Worker服务已停止");
        Ok(())
    }

    async fn run_reaper(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let reaper = Reaper::new(
            Arc::clone(&self.components.registry),
            self.config.reaper.clone(),
        );
        reaper.run(shutdown_rx).await;
        Ok(())
    }

    async fn run_all_components(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动所有组件");

        let api = async {
            if self.config.api.enabled {
                self.run_api(shutdown_rx.resubscribe()).await
            } else {
                Ok(())
            }
        };
        let worker = async {
            if self.config.worker.enabled {
                self.run_worker(shutdown_rx.resubscribe()).await
            } else {
                Ok(())
            }
        };
        let reaper = async {
            if self.config.reaper.enabled {
                self.run_reaper(shutdown_rx.resubscribe()).await
            } else {
                Ok(())
            }
        };

        let (api, worker, reaper) = tokio::join!(api, worker, reaper);
        for (name, result) in [("API服务器", api), ("Worker", worker), ("回收器", reaper)] {
            if let Err(e) = result {
                error!("{}运行失败: {:#}", name, e);
            }
        }

        info!("所有组件已停止");
        Ok(())
    }
}
