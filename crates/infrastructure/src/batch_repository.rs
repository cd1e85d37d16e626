use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use orchestrator_core::BatchConfig;
use orchestrator_domain::{BatchRepository, BatchTask, Expiry, KeyValueStore};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tracing::debug;

/// Batch records under `batch:{id}`
pub struct StoreBatchRepository {
    store: Arc<dyn KeyValueStore>,
    config: BatchConfig,
}

impl StoreBatchRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, config: BatchConfig) -> Self {
        Self { store, config }
    }

    fn batch_key(batch_id: &str) -> String {
        format!("batch:{batch_id}")
    }
}

#[async_trait]
impl BatchRepository for StoreBatchRepository {
    async fn create(&self, batch: &BatchTask) -> OrchestratorResult<()> {
        let created = self
            .store
            .set_if_absent(
                &Self::batch_key(&batch.id),
                &serde_json::to_vec(batch)?,
                Some(self.config.batch_ttl()),
            )
            .await?;
        if !created {
            return Err(OrchestratorError::Internal(format!(
                "批次 {} 已存在",
                batch.id
            )));
        }
        Ok(())
    }

    async fn find_by_id(&self, batch_id: &str) -> OrchestratorResult<Option<BatchTask>> {
        match self.store.get(&Self::batch_key(batch_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn store_metrics(
        &self,
        batch_id: &str,
        metrics: serde_json::Value,
    ) -> OrchestratorResult<BatchTask> {
        let key = Self::batch_key(batch_id);
        loop {
            let Some(raw) = self.store.get(&key).await? else {
                return Err(OrchestratorError::batch_not_found(batch_id));
            };
            let mut batch: BatchTask = serde_json::from_slice(&raw)?;
            if batch.aggregate_metrics.is_some() {
                debug!("Batch {} already has aggregate metrics", batch_id);
                return Ok(batch);
            }

            batch.aggregate_metrics = Some(metrics.clone());
            batch.metrics_computed_at = Some(Utc::now());
            if self
                .store
                .compare_and_swap(&key, &raw, &serde_json::to_vec(&batch)?, Expiry::Keep)
                .await?
            {
                return Ok(batch);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn repository() -> StoreBatchRepository {
        StoreBatchRepository::new(Arc::new(InMemoryStore::new()), BatchConfig::default())
    }

    fn batch() -> BatchTask {
        BatchTask::new(
            "u1",
            vec!["g1".into(), "g2".into()],
            vec!["t1".into(), "t2".into()],
            "h",
        )
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repository = repository();
        let batch = batch();
        repository.create(&batch).await.unwrap();

        let found = repository.find_by_id(&batch.id).await.unwrap().unwrap();
        assert_eq!(found, batch);
        assert!(repository.find_by_id("missing").await.unwrap().is_none());
        assert!(repository.create(&batch).await.is_err());
    }

    #[tokio::test]
    async fn test_metrics_are_written_once() {
        let repository = repository();
        let batch = batch();
        repository.create(&batch).await.unwrap();

        let first = repository
            .store_metrics(&batch.id, json!({"total": 2}))
            .await
            .unwrap();
        let second = repository
            .store_metrics(&batch.id, json!({"total": 99}))
            .await
            .unwrap();

        assert_eq!(first.aggregate_metrics, Some(json!({"total": 2})));
        assert_eq!(second.aggregate_metrics, Some(json!({"total": 2})));
    }

    #[tokio::test]
    async fn test_metrics_for_missing_batch() {
        let err = repository()
            .store_metrics("missing", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::BatchNotFound { .. }));
    }
}
