//! Test data builders for creating test entities

use chrono::{DateTime, Duration, Utc};
use orchestrator_domain::{AnalysisTask, ParamsHash, TaskError, TaskState};

/// Builder for creating test AnalysisTask entities
pub struct AnalysisTaskBuilder {
    task: AnalysisTask,
}

impl AnalysisTaskBuilder {
    pub fn new() -> Self {
        let params = serde_json::json!({"depth": 20});
        let hash = ParamsHash::of(&params).into_inner();
        Self {
            task: AnalysisTask::new("u1", "g1", params, hash),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.task.id = id.to_string();
        self
    }

    pub fn with_owner(mut self, owner: &str) -> Self {
        self.task.owner = owner.to_string();
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.task.target = target.to_string();
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.task.params_hash = ParamsHash::of(&params).into_inner();
        self.task.params = params;
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.task.state = state;
        if state.is_terminal() {
            self.task.completed_at = Some(self.task.updated_at);
        }
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.task.progress = progress;
        self
    }

    pub fn with_result_ref(mut self, result_ref: &str) -> Self {
        self.task.result_ref = Some(result_ref.to_string());
        self
    }

    pub fn with_error(mut self, error: TaskError) -> Self {
        self.task.error = Some(error);
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.task.updated_at = updated_at;
        self
    }

    /// 将 `created_at` 与 `updated_at` 都回拨 `age`
    pub fn aged(mut self, age: Duration) -> Self {
        self.task.created_at -= age;
        self.task.updated_at -= age;
        self
    }

    pub fn running(self) -> Self {
        self.with_state(TaskState::Progress).with_progress(40)
    }

    pub fn succeeded(self) -> Self {
        let result_ref = orchestrator_domain::result_ref(&self.task.target, &self.task.params_hash);
        self.with_state(TaskState::Success)
            .with_progress(100)
            .with_result_ref(&result_ref)
    }

    pub fn build(self) -> AnalysisTask {
        self.task
    }
}

impl Default for AnalysisTaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}
