//! Task registry on the shared store
//!
//! Keys:
//! - `task:{id}` the serialized task; no expiry while live, terminal TTL after
//! - `task-slot:{owner_len}:{owner}:{target}` id of the live task holding the dedup slot
//! - `tasks:live` index of non-terminal task ids, scanned by the reaper

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use orchestrator_core::RegistryConfig;
use orchestrator_domain::{
    AnalysisTask, DedupKey, Expiry, KeyValueStore, ProgressUpdate, TaskError, TaskHandle,
    TaskRegistry, TaskState, TaskStatus,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tracing::{debug, info, instrument, warn};

const LIVE_INDEX_KEY: &str = "tasks:live";

/// Outcome of a mutation closure: write the modified task back, or leave
/// the stored record untouched.
enum Change<R> {
    Write(R),
    Skip(R),
}

pub struct StoreTaskRegistry {
    store: Arc<dyn KeyValueStore>,
    config: RegistryConfig,
}

impl StoreTaskRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, config: RegistryConfig) -> Self {
        Self { store, config }
    }

    fn task_key(task_id: &str) -> String {
        format!("task:{task_id}")
    }

    fn slot_key(task: &AnalysisTask) -> String {
        DedupKey::new(task.owner.as_str(), task.target.as_str()).slot_key()
    }

    async fn load(&self, task_id: &str) -> OrchestratorResult<Option<(Vec<u8>, AnalysisTask)>> {
        match self.store.get(&Self::task_key(task_id)).await? {
            Some(raw) => {
                let task = serde_json::from_slice(&raw)?;
                Ok(Some((raw, task)))
            }
            None => Ok(None),
        }
    }

    fn expiry_for(&self, task: &AnalysisTask) -> Expiry {
        if task.is_terminal() {
            Expiry::After(self.config.terminal_ttl())
        } else {
            Expiry::Never
        }
    }

    /// Read-modify-compare-and-swap loop. `change` runs against a freshly
    /// decoded task on every attempt.
    async fn mutate<R, F>(&self, task_id: &str, mut change: F) -> OrchestratorResult<(AnalysisTask, R)>
    where
        F: FnMut(&mut AnalysisTask) -> OrchestratorResult<Change<R>> + Send,
        R: Send,
    {
        let key = Self::task_key(task_id);
        for attempt in 1..=self.config.cas_max_attempts {
            let Some((raw, mut task)) = self.load(task_id).await? else {
                return Err(OrchestratorError::task_not_found(task_id));
            };

            let result = match change(&mut task)? {
                Change::Skip(result) => return Ok((task, result)),
                Change::Write(result) => result,
            };

            let encoded = serde_json::to_vec(&task)?;
            if self
                .store
                .compare_and_swap(&key, &raw, &encoded, self.expiry_for(&task))
                .await?
            {
                if task.is_terminal() {
                    self.release_slot(&task).await;
                }
                return Ok((task, result));
            }
            debug!("CAS conflict on task {} (attempt {})", task_id, attempt);
        }

        warn!("Giving up on task {} after {} CAS conflicts", task_id, self.config.cas_max_attempts);
        Err(OrchestratorError::store(format!(
            "任务 {task_id} 并发更新冲突"
        )))
    }

    /// Frees the dedup slot and live index entry held by a task. Failures are
    /// logged; a stale slot is cleared on the next submission.
    async fn release_slot(&self, task: &AnalysisTask) {
        if let Err(e) = self
            .store
            .delete_if_equals(&Self::slot_key(task), task.id.as_bytes())
            .await
        {
            warn!("Failed to release dedup slot for task {}: {}", task.id, e);
        }
        if let Err(e) = self
            .store
            .set_remove(LIVE_INDEX_KEY, &[task.id.clone()])
            .await
        {
            warn!("Failed to drop task {} from live index: {}", task.id, e);
        }
    }
}

#[async_trait]
impl TaskRegistry for StoreTaskRegistry {
    #[instrument(skip(self, task), fields(owner = %task.owner, target = %task.target))]
    async fn submit(&self, task: AnalysisTask) -> OrchestratorResult<TaskHandle> {
        let slot_key = Self::slot_key(&task);
        let task_key = Self::task_key(&task.id);
        let encoded = serde_json::to_vec(&task)?;

        for attempt in 1..=self.config.slot_claim_attempts {
            // Record first: whoever sees the slot can always resolve the holder.
            self.store.set(&task_key, &encoded, Expiry::Never).await?;

            if self
                .store
                .set_if_absent(&slot_key, task.id.as_bytes(), None)
                .await?
            {
                self.store
                    .set_add(LIVE_INDEX_KEY, &[task.id.clone()], None)
                    .await?;
                counter!("orchestrator_tasks_submitted_total").increment(1);
                info!("Registered task {}", task.id);
                return Ok(task.handle(false));
            }

            self.store.delete(&task_key).await?;

            let Some(holder) = self.store.get(&slot_key).await? else {
                continue;
            };
            let holder_id = String::from_utf8_lossy(&holder).into_owned();
            match self.get_task(&holder_id).await? {
                Some(existing) if !existing.is_terminal() => {
                    counter!("orchestrator_tasks_deduplicated_total").increment(1);
                    debug!("Deduplicated submission onto live task {}", existing.id);
                    return Ok(existing.handle(true));
                }
                _ => {
                    warn!(
                        "Clearing stale dedup slot {} held by {} (attempt {})",
                        slot_key, holder_id, attempt
                    );
                    self.store.delete_if_equals(&slot_key, &holder).await?;
                }
            }
        }

        Err(OrchestratorError::store(format!(
            "无法声明去重槽位: {slot_key}"
        )))
    }

    async fn record_terminal(&self, task: AnalysisTask) -> OrchestratorResult<TaskHandle> {
        if !task.is_terminal() {
            return Err(OrchestratorError::Internal(format!(
                "任务 {} 不是终态",
                task.id
            )));
        }
        self.store
            .set(
                &Self::task_key(&task.id),
                &serde_json::to_vec(&task)?,
                self.expiry_for(&task),
            )
            .await?;
        Ok(task.handle(false))
    }

    async fn rollback(&self, task_id: &str) -> OrchestratorResult<()> {
        if let Some((_, task)) = self.load(task_id).await? {
            self.store
                .delete_if_equals(&Self::slot_key(&task), task.id.as_bytes())
                .await?;
        }
        self.store.delete(&Self::task_key(task_id)).await?;
        self.store
            .set_remove(LIVE_INDEX_KEY, &[task_id.to_string()])
            .await?;
        info!("Rolled back task {}", task_id);
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> OrchestratorResult<Option<AnalysisTask>> {
        Ok(self.load(task_id).await?.map(|(_, task)| task))
    }

    async fn get_status(&self, task_id: &str) -> OrchestratorResult<TaskStatus> {
        Ok(match self.get_task(task_id).await? {
            Some(task) => task.status(),
            None => TaskStatus::unknown(task_id),
        })
    }

    async fn mark_started(&self, task_id: &str) -> OrchestratorResult<AnalysisTask> {
        let (task, ()) = self
            .mutate(task_id, |task| {
                task.start()?;
                Ok(Change::Write(()))
            })
            .await?;
        Ok(task)
    }

    async fn update_progress(
        &self,
        task_id: &str,
        percent: u8,
        message: Option<String>,
    ) -> OrchestratorResult<ProgressUpdate> {
        let (_, update) = self
            .mutate(task_id, |task| match task.apply_progress(percent, message.clone())? {
                update @ ProgressUpdate::Applied { .. } => Ok(Change::Write(update)),
                update @ ProgressUpdate::Rejected { current, requested } => {
                    warn!(
                        "Rejected progress regression for task {}: {} -> {}",
                        task.id, current, requested
                    );
                    Ok(Change::Skip(update))
                }
            })
            .await?;
        Ok(update)
    }

    async fn complete(&self, task_id: &str, result_ref: &str) -> OrchestratorResult<AnalysisTask> {
        let (task, ()) = self
            .mutate(task_id, |task| {
                task.succeed(result_ref)?;
                Ok(Change::Write(()))
            })
            .await?;
        counter!("orchestrator_tasks_completed_total", "state" => "success").increment(1);
        Ok(task)
    }

    async fn fail(&self, task_id: &str, error: TaskError) -> OrchestratorResult<AnalysisTask> {
        let code = error.code.clone();
        let (task, ()) = self
            .mutate(task_id, |task| {
                task.fail(error.clone())?;
                Ok(Change::Write(()))
            })
            .await?;
        counter!("orchestrator_tasks_completed_total", "state" => "failure", "code" => code)
            .increment(1);
        Ok(task)
    }

    async fn fail_if_unchanged(
        &self,
        task_id: &str,
        observed_updated_at: DateTime<Utc>,
        error: TaskError,
    ) -> OrchestratorResult<Option<AnalysisTask>> {
        let code = error.code.clone();
        let (task, applied) = self
            .mutate(task_id, |task| {
                if task.updated_at != observed_updated_at {
                    return Ok(Change::Skip(false));
                }
                task.fail(error.clone())?;
                Ok(Change::Write(true))
            })
            .await?;
        if !applied {
            debug!("Task {} was touched since {}, leaving it alone", task_id, observed_updated_at);
            return Ok(None);
        }
        counter!("orchestrator_tasks_completed_total", "state" => "failure", "code" => code)
            .increment(1);
        Ok(Some(task))
    }

    async fn request_cancel(&self, task_id: &str) -> OrchestratorResult<TaskStatus> {
        let (task, ()) = self
            .mutate(task_id, |task| {
                if task.is_terminal() || task.cancel_requested {
                    return Ok(Change::Skip(()));
                }
                task.cancel_requested = true;
                if task.state == TaskState::Pending {
                    task.fail(TaskError::cancelled())?;
                }
                Ok(Change::Write(()))
            })
            .await?;
        info!("Cancellation requested for task {} ({})", task.id, task.state);
        Ok(task.status())
    }

    async fn is_cancel_requested(&self, task_id: &str) -> OrchestratorResult<bool> {
        Ok(self
            .get_task(task_id)
            .await?
            .is_some_and(|task| task.cancel_requested))
    }

    async fn heartbeat(&self, task_id: &str) -> OrchestratorResult<bool> {
        let (_, cancel_requested) = self
            .mutate(task_id, |task| {
                if task.is_terminal() {
                    return Ok(Change::Skip(task.cancel_requested));
                }
                task.touch();
                Ok(Change::Write(task.cancel_requested))
            })
            .await?;
        Ok(cancel_requested)
    }

    async fn list_live(&self) -> OrchestratorResult<Vec<AnalysisTask>> {
        let ids = self.store.set_members(LIVE_INDEX_KEY).await?;
        let mut live = Vec::with_capacity(ids.len());
        let mut gone = Vec::new();
        for id in ids {
            match self.get_task(&id).await? {
                Some(task) if !task.is_terminal() => live.push(task),
                _ => gone.push(id),
            }
        }
        if !gone.is_empty() {
            debug!("Pruning {} finished ids from live index", gone.len());
            self.store.set_remove(LIVE_INDEX_KEY, &gone).await?;
        }
        Ok(live)
    }

    async fn find_live(
        &self,
        owner: &str,
        target: &str,
    ) -> OrchestratorResult<Option<AnalysisTask>> {
        let slot_key = DedupKey::new(owner, target).slot_key();
        let Some(holder) = self.store.get(&slot_key).await? else {
            return Ok(None);
        };
        let holder_id = String::from_utf8_lossy(&holder).into_owned();
        Ok(self
            .get_task(&holder_id)
            .await?
            .filter(|task| !task.is_terminal()))
    }
}
