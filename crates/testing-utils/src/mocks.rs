//! Mock implementations of the store, queue and engine ports
//!
//! These are in-memory doubles for unit tests that need to force
//! failures or script engine behaviour without a real backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_domain::{
    AnalysisArtifact, AnalysisEngine, AnalysisInput, AnalysisTask, CounterOutcome, EngineError,
    Expiry, JobDescriptor, JobQueue, KeyValueStore, ProgressReporter, ProgressUpdate, TaskError,
    TaskHandle, TaskRegistry, TaskStatus,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};

/// A store whose backend is permanently down
#[derive(Debug, Clone, Default)]
pub struct UnavailableStore;

impl UnavailableStore {
    pub fn new() -> Self {
        Self
    }

    fn down<T>() -> OrchestratorResult<T> {
        Err(OrchestratorError::store("connection refused"))
    }
}

#[async_trait]
impl KeyValueStore for UnavailableStore {
    fn backend(&self) -> &'static str {
        "unavailable"
    }

    async fn get(&self, _key: &str) -> OrchestratorResult<Option<Vec<u8>>> {
        Self::down()
    }

    async fn get_with_ttl(
        &self,
        _key: &str,
    ) -> OrchestratorResult<Option<(Vec<u8>, Option<Duration>)>> {
        Self::down()
    }

    async fn set(&self, _key: &str, _value: &[u8], _expiry: Expiry) -> OrchestratorResult<()> {
        Self::down()
    }

    async fn set_if_absent(
        &self,
        _key: &str,
        _value: &[u8],
        _ttl: Option<Duration>,
    ) -> OrchestratorResult<bool> {
        Self::down()
    }

    async fn compare_and_swap(
        &self,
        _key: &str,
        _expected: &[u8],
        _new: &[u8],
        _expiry: Expiry,
    ) -> OrchestratorResult<bool> {
        Self::down()
    }

    async fn delete(&self, _key: &str) -> OrchestratorResult<bool> {
        Self::down()
    }

    async fn delete_many(&self, _keys: &[String]) -> OrchestratorResult<u64> {
        Self::down()
    }

    async fn delete_if_equals(&self, _key: &str, _expected: &[u8]) -> OrchestratorResult<bool> {
        Self::down()
    }

    async fn ttl(&self, _key: &str) -> OrchestratorResult<Option<Duration>> {
        Self::down()
    }

    async fn increment_below(
        &self,
        _key: &str,
        _limit: u64,
        _window: Duration,
    ) -> OrchestratorResult<CounterOutcome> {
        Self::down()
    }

    async fn set_add(
        &self,
        _key: &str,
        _members: &[String],
        _ttl: Option<Duration>,
    ) -> OrchestratorResult<()> {
        Self::down()
    }

    async fn set_remove(&self, _key: &str, _members: &[String]) -> OrchestratorResult<()> {
        Self::down()
    }

    async fn set_members(&self, _key: &str) -> OrchestratorResult<Vec<String>> {
        Self::down()
    }

    async fn list_push(&self, _key: &str, _value: &[u8]) -> OrchestratorResult<()> {
        Self::down()
    }

    async fn list_pop(
        &self,
        _key: &str,
        _timeout: Duration,
    ) -> OrchestratorResult<Option<Vec<u8>>> {
        Self::down()
    }

    async fn list_len(&self, _key: &str) -> OrchestratorResult<u64> {
        Self::down()
    }

    async fn health_check(&self) -> OrchestratorResult<bool> {
        Ok(false)
    }

    async fn close(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}

/// Mock implementation of JobQueue for testing
#[derive(Debug, Clone, Default)]
pub struct MockJobQueue {
    jobs: Arc<Mutex<VecDeque<JobDescriptor>>>,
    failing: Arc<AtomicBool>,
}

impl MockJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的 `enqueue` 全部返回 `QueueUnavailable`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<JobDescriptor> {
        self.jobs.lock().unwrap().iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[async_trait]
impl JobQueue for MockJobQueue {
    async fn enqueue(&self, job: &JobDescriptor) -> OrchestratorResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(OrchestratorError::QueueUnavailable(
                "mock queue is down".to_string(),
            ));
        }
        self.jobs.lock().unwrap().push_back(job.clone());
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> OrchestratorResult<Option<JobDescriptor>> {
        if let Some(job) = self.jobs.lock().unwrap().pop_front() {
            return Ok(Some(job));
        }
        tokio::time::sleep(timeout).await;
        Ok(self.jobs.lock().unwrap().pop_front())
    }

    async fn len(&self) -> OrchestratorResult<u64> {
        Ok(self.jobs.lock().unwrap().len() as u64)
    }
}

/// How a [`ScriptedEngine`] finishes after replaying its progress ticks
#[derive(Debug, Clone)]
pub enum EngineOutcome {
    Succeed(AnalysisArtifact),
    Fail(String),
    Panic,
    /// 一直运行，直到被取消
    Hang,
}

/// An engine that replays fixed progress ticks and then ends with a fixed outcome.
///
/// Cancellation is honoured between ticks and while hanging.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    ticks: Vec<(u8, String)>,
    tick_delay: Duration,
    outcome: EngineOutcome,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    inputs: Arc<Mutex<Vec<AnalysisInput>>>,
}

/// Decrements the in-flight count however `analyze` exits.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedEngine {
    pub fn new(outcome: EngineOutcome) -> Self {
        Self {
            ticks: Vec::new(),
            tick_delay: Duration::from_millis(10),
            outcome,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn succeeding(artifact: AnalysisArtifact) -> Self {
        Self::new(EngineOutcome::Succeed(artifact))
    }

    pub fn failing(message: &str) -> Self {
        Self::new(EngineOutcome::Fail(message.to_string()))
    }

    pub fn with_ticks(mut self, ticks: &[(u8, &str)]) -> Self {
        self.ticks = ticks.iter().map(|(p, m)| (*p, m.to_string())).collect();
        self
    }

    pub fn with_tick_delay(mut self, delay: Duration) -> Self {
        self.tick_delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of `analyze` calls that were running at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<AnalysisInput> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn analyze(
        &self,
        input: AnalysisInput,
        progress: ProgressReporter,
    ) -> Result<AnalysisArtifact, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let _in_flight = InFlight(Arc::clone(&self.in_flight));
        self.inputs.lock().unwrap().push(input);

        for (percent, message) in &self.ticks {
            if progress.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            progress.report(*percent, message.clone());
            tokio::time::sleep(self.tick_delay).await;
        }

        match &self.outcome {
            EngineOutcome::Succeed(artifact) => Ok(artifact.clone()),
            EngineOutcome::Fail(message) => Err(EngineError::Failed(message.clone())),
            EngineOutcome::Panic => panic!("scripted engine panic"),
            EngineOutcome::Hang => loop {
                if progress.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                tokio::time::sleep(self.tick_delay).await;
            },
        }
    }
}

/// Wraps a registry and counts progress writes reaching it
pub struct CountingRegistry {
    inner: Arc<dyn TaskRegistry>,
    progress_writes: AtomicUsize,
}

impl CountingRegistry {
    pub fn new(inner: Arc<dyn TaskRegistry>) -> Self {
        Self {
            inner,
            progress_writes: AtomicUsize::new(0),
        }
    }

    pub fn progress_writes(&self) -> usize {
        self.progress_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskRegistry for CountingRegistry {
    async fn submit(&self, task: AnalysisTask) -> OrchestratorResult<TaskHandle> {
        self.inner.submit(task).await
    }

    async fn record_terminal(&self, task: AnalysisTask) -> OrchestratorResult<TaskHandle> {
        self.inner.record_terminal(task).await
    }

    async fn rollback(&self, task_id: &str) -> OrchestratorResult<()> {
        self.inner.rollback(task_id).await
    }

    async fn get_task(&self, task_id: &str) -> OrchestratorResult<Option<AnalysisTask>> {
        self.inner.get_task(task_id).await
    }

    async fn get_status(&self, task_id: &str) -> OrchestratorResult<TaskStatus> {
        self.inner.get_status(task_id).await
    }

    async fn mark_started(&self, task_id: &str) -> OrchestratorResult<AnalysisTask> {
        self.inner.mark_started(task_id).await
    }

    async fn update_progress(
        &self,
        task_id: &str,
        percent: u8,
        message: Option<String>,
    ) -> OrchestratorResult<ProgressUpdate> {
        self.progress_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_progress(task_id, percent, message).await
    }

    async fn complete(&self, task_id: &str, result_ref: &str) -> OrchestratorResult<AnalysisTask> {
        self.inner.complete(task_id, result_ref).await
    }

    async fn fail(&self, task_id: &str, error: TaskError) -> OrchestratorResult<AnalysisTask> {
        self.inner.fail(task_id, error).await
    }

    async fn fail_if_unchanged(
        &self,
        task_id: &str,
        observed_updated_at: DateTime<Utc>,
        error: TaskError,
    ) -> OrchestratorResult<Option<AnalysisTask>> {
        self.inner
            .fail_if_unchanged(task_id, observed_updated_at, error)
            .await
    }

    async fn request_cancel(&self, task_id: &str) -> OrchestratorResult<TaskStatus> {
        self.inner.request_cancel(task_id).await
    }

    async fn is_cancel_requested(&self, task_id: &str) -> OrchestratorResult<bool> {
        self.inner.is_cancel_requested(task_id).await
    }

    async fn heartbeat(&self, task_id: &str) -> OrchestratorResult<bool> {
        self.inner.heartbeat(task_id).await
    }

    async fn list_live(&self) -> OrchestratorResult<Vec<AnalysisTask>> {
        self.inner.list_live().await
    }

    async fn find_live(
        &self,
        owner: &str,
        target: &str,
    ) -> OrchestratorResult<Option<AnalysisTask>> {
        self.inner.find_live(owner, target).await
    }
}
