//! Job queue on top of the shared store's list operations

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use orchestrator_domain::{JobDescriptor, JobQueue, KeyValueStore};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tracing::{debug, error, warn};

pub struct StoreJobQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl StoreJobQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, name: &str) -> Self {
        Self {
            store,
            key: format!("queue:{name}"),
        }
    }
}

#[async_trait]
impl JobQueue for StoreJobQueue {
    async fn enqueue(&self, job: &JobDescriptor) -> OrchestratorResult<()> {
        let payload = serde_json::to_vec(job)?;
        self.store
            .list_push(&self.key, &payload)
            .await
            .map_err(|e| {
                error!("Failed to enqueue job for task {}: {}", job.task_id, e);
                OrchestratorError::QueueUnavailable(e.to_string())
            })?;
        counter!("orchestrator_jobs_enqueued_total").increment(1);
        debug!("Enqueued job for task {}", job.task_id);
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> OrchestratorResult<Option<JobDescriptor>> {
        let Some(payload) = self
            .store
            .list_pop(&self.key, timeout)
            .await
            .map_err(|e| OrchestratorError::QueueUnavailable(e.to_string()))?
        else {
            return Ok(None);
        };

        match serde_json::from_slice::<JobDescriptor>(&payload) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                warn!("Dropping malformed job payload: {}", e);
                counter!("orchestrator_jobs_malformed_total").increment(1);
                Ok(None)
            }
        }
    }

    async fn len(&self) -> OrchestratorResult<u64> {
        self.store
            .list_len(&self.key)
            .await
            .map_err(|e| OrchestratorError::QueueUnavailable(e.to_string()))
    }
}
