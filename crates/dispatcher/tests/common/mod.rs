#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::{BatchConfig, CacheConfig, RegistryConfig};
use orchestrator_dispatcher::{BatchAggregator, JobSubmitter};
use orchestrator_domain::{
    KeyValueStore, MetricsAggregator, SummaryMetricsAggregator, TaskRegistry,
};
use orchestrator_infrastructure::{CacheLayer, InMemoryStore, StoreBatchRepository, StoreTaskRegistry};
use orchestrator_testing_utils::MockJobQueue;

pub struct Harness {
    pub store: Arc<dyn KeyValueStore>,
    pub registry: Arc<dyn TaskRegistry>,
    pub queue: MockJobQueue,
    pub cache: Arc<CacheLayer>,
    pub submitter: Arc<JobSubmitter>,
}

impl Harness {
    pub fn new() -> Self {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let registry: Arc<dyn TaskRegistry> = Arc::new(StoreTaskRegistry::new(
            Arc::clone(&store),
            RegistryConfig::default(),
        ));
        let queue = MockJobQueue::new();
        let cache = Arc::new(CacheLayer::new(Arc::clone(&store), CacheConfig::default()));
        let submitter = Arc::new(JobSubmitter::new(
            Arc::clone(&registry),
            Arc::new(queue.clone()),
            Arc::clone(&cache),
        ));
        Self {
            store,
            registry,
            queue,
            cache,
            submitter,
        }
    }

    pub fn aggregator(&self) -> BatchAggregator {
        self.aggregator_with(Arc::new(SummaryMetricsAggregator), BatchConfig::default())
    }

    pub fn aggregator_with(
        &self,
        metrics: Arc<dyn MetricsAggregator>,
        config: BatchConfig,
    ) -> BatchAggregator {
        BatchAggregator::new(
            Arc::clone(&self.submitter),
            Arc::clone(&self.registry),
            Arc::new(StoreBatchRepository::new(Arc::clone(&self.store), config.clone())),
            Arc::clone(&self.cache),
            metrics,
            config,
        )
    }

    /// 模拟Worker完成任务：写入结果缓存并置为 SUCCESS
    pub async fn finish(&self, task_id: &str, artifact: serde_json::Value) {
        let task = self.registry.get_task(task_id).await.unwrap().unwrap();
        let result_ref = orchestrator_domain::result_ref(&task.target, &task.params_hash);
        self.cache
            .put(&result_ref, &artifact, Duration::from_secs(3600), &[])
            .await
            .unwrap();
        self.registry.mark_started(task_id).await.unwrap();
        self.registry.complete(task_id, &result_ref).await.unwrap();
    }
}
