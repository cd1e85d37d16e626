use std::fmt;

use chrono::{DateTime, Utc};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 分析任务的生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskState {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "PROGRESS")]
    Progress,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Started => "STARTED",
            TaskState::Progress => "PROGRESS",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }

    /// PENDING → STARTED → PROGRESS* → {SUCCESS, FAILURE}；
    /// PENDING → FAILURE 仅用于启动前取消或回收从未出队的任务
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Started)
                | (Pending, Failure)
                | (Started, Progress)
                | (Started, Success)
                | (Started, Failure)
                | (Progress, Progress)
                | (Progress, Success)
                | (Progress, Failure)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 对外报告的状态，额外包含 UNKNOWN（从未提交或已过期）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusState {
    Unknown,
    Pending,
    Started,
    Progress,
    Success,
    Failure,
}

impl StatusState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusState::Success | StatusState::Failure)
    }
}

impl From<TaskState> for StatusState {
    fn from(state: TaskState) -> Self {
        match state {
            TaskState::Pending => StatusState::Pending,
            TaskState::Started => StatusState::Started,
            TaskState::Progress => StatusState::Progress,
            TaskState::Success => StatusState::Success,
            TaskState::Failure => StatusState::Failure,
        }
    }
}

/// 记录在任务上的失败原因（稳定错误码 + 消息）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskError {
    pub code: String,
    pub message: String,
}

impl TaskError {
    pub fn new<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn engine_failure<M: Into<String>>(message: M) -> Self {
        Self::new("ENGINE_FAILURE", message)
    }

    pub fn worker_lost<M: Into<String>>(message: M) -> Self {
        Self::new("WORKER_LOST", message)
    }

    pub fn cancelled() -> Self {
        Self::new("CANCELLED", "cancelled")
    }

    pub fn timeout<M: Into<String>>(message: M) -> Self {
        Self::new("TIMEOUT", message)
    }

    pub fn evicted() -> Self {
        Self::new("TASK_EVICTED", "task record expired before the batch was observed")
    }

    pub fn is_cancellation(&self) -> bool {
        self.code == "CANCELLED"
    }
}

impl From<&OrchestratorError> for TaskError {
    fn from(err: &OrchestratorError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

/// 一次进度上报的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    Applied { progress: u8 },
    /// 进度回退被拒绝，存储的状态保持不变
    Rejected { current: u8, requested: u8 },
}

/// 单个分析任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisTask {
    pub id: String,
    pub owner: String,
    pub target: String,
    pub params: serde_json::Value,
    pub params_hash: String,
    pub state: TaskState,
    pub progress: u8,
    pub message: Option<String>,
    pub result_ref: Option<String>,
    pub error: Option<TaskError>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisTask {
    pub fn new(
        owner: impl Into<String>,
        target: impl Into<String>,
        params: serde_json::Value,
        params_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.into(),
            target: target.into(),
            params,
            params_hash: params_hash.into(),
            state: TaskState::Pending,
            progress: 0,
            message: None,
            result_ref: None,
            error: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn handle(&self, deduplicated: bool) -> TaskHandle {
        TaskHandle {
            task_id: self.id.clone(),
            state: self.state.into(),
            deduplicated,
        }
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            task_id: self.id.clone(),
            state: self.state.into(),
            progress: self.progress,
            message: self.message.clone(),
            result_ref: self.result_ref.clone(),
            error: self.error.clone(),
            cancel_requested: self.cancel_requested,
            updated_at: Some(self.updated_at),
        }
    }

    fn transition(&mut self, next: TaskState) -> OrchestratorResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        self.state = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    pub fn start(&mut self) -> OrchestratorResult<()> {
        self.transition(TaskState::Started)?;
        self.message = Some("started".to_string());
        Ok(())
    }

    /// 进度只能单调不减；回退返回 `Rejected` 且不修改任务
    pub fn apply_progress(
        &mut self,
        percent: u8,
        message: Option<String>,
    ) -> OrchestratorResult<ProgressUpdate> {
        if percent > 100 {
            return Err(OrchestratorError::validation(format!(
                "进度必须在0到100之间: {percent}"
            )));
        }
        if percent < self.progress {
            return Ok(ProgressUpdate::Rejected {
                current: self.progress,
                requested: percent,
            });
        }
        self.transition(TaskState::Progress)?;
        self.progress = percent;
        if message.is_some() {
            self.message = message;
        }
        Ok(ProgressUpdate::Applied { progress: percent })
    }

    pub fn succeed(&mut self, result_ref: impl Into<String>) -> OrchestratorResult<()> {
        self.transition(TaskState::Success)?;
        self.progress = 100;
        self.result_ref = Some(result_ref.into());
        self.message = Some("completed".to_string());
        Ok(())
    }

    pub fn fail(&mut self, error: TaskError) -> OrchestratorResult<()> {
        self.transition(TaskState::Failure)?;
        self.message = Some(error.message.clone());
        self.error = Some(error);
        Ok(())
    }

    /// 刷新存活时间戳，不改变状态
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// 提交返回的句柄
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskHandle {
    pub task_id: String,
    pub state: StatusState,
    /// 命中已有的进行中任务时为 true
    pub deduplicated: bool,
}

/// 轮询返回的任务状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatus {
    pub task_id: String,
    pub state: StatusState,
    pub progress: u8,
    pub message: Option<String>,
    pub result_ref: Option<String>,
    pub error: Option<TaskError>,
    pub cancel_requested: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskStatus {
    pub fn unknown(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            state: StatusState::Unknown,
            progress: 0,
            message: None,
            result_ref: None,
            error: None,
            cancel_requested: false,
            updated_at: None,
        }
    }
}

/// 投递到任务队列中的作业描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDescriptor {
    pub task_id: String,
    pub owner: String,
    pub target: String,
    pub params: serde_json::Value,
    pub params_hash: String,
    pub enqueued_at: DateTime<Utc>,
}

impl JobDescriptor {
    pub fn for_task(task: &AnalysisTask) -> Self {
        Self {
            task_id: task.id.clone(),
            owner: task.owner.clone(),
            target: task.target.clone(),
            params: task.params.clone(),
            params_hash: task.params_hash.clone(),
            enqueued_at: Utc::now(),
        }
    }
}

/// 批量分析：子任务列表在创建时固定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchTask {
    pub id: String,
    pub owner: String,
    pub task_ids: Vec<String>,
    pub targets: Vec<String>,
    pub params_hash: String,
    pub created_at: DateTime<Utc>,
    pub aggregate_metrics: Option<serde_json::Value>,
    pub metrics_computed_at: Option<DateTime<Utc>>,
}

impl BatchTask {
    pub fn new(
        owner: impl Into<String>,
        targets: Vec<String>,
        task_ids: Vec<String>,
        params_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.into(),
            task_ids,
            targets,
            params_hash: params_hash.into(),
            created_at: Utc::now(),
            aggregate_metrics: None,
            metrics_computed_at: None,
        }
    }

    pub fn total(&self) -> usize {
        self.task_ids.len()
    }

    pub fn handle(&self) -> BatchHandle {
        BatchHandle {
            batch_id: self.id.clone(),
            task_ids: self.task_ids.clone(),
            total: self.total(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchHandle {
    pub batch_id: String,
    pub task_ids: Vec<String>,
    pub total: usize,
}

/// 批次整体状态；STARTED 在批次视图中统一归入 PROGRESS
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    Progress,
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChildStatus {
    pub target: String,
    pub task_id: String,
    pub state: StatusState,
    pub progress: u8,
    pub result_ref: Option<String>,
    pub error: Option<TaskError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchStatus {
    pub batch_id: String,
    pub state: BatchState,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub percent: f64,
    pub children: Vec<ChildStatus>,
    pub aggregate_metrics: Option<serde_json::Value>,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        self.state != BatchState::Progress
    }
}

/// 限流判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RateLimitDecision {
    Allowed {
        limit: u64,
        remaining: u64,
        reset_in_seconds: u64,
    },
    Denied {
        limit: u64,
        reset_in_seconds: u64,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }

    pub fn limit(&self) -> u64 {
        match self {
            RateLimitDecision::Allowed { limit, .. } | RateLimitDecision::Denied { limit, .. } => {
                *limit
            }
        }
    }

    pub fn remaining(&self) -> u64 {
        match self {
            RateLimitDecision::Allowed { remaining, .. } => *remaining,
            RateLimitDecision::Denied { .. } => 0,
        }
    }

    pub fn reset_in_seconds(&self) -> u64 {
        match self {
            RateLimitDecision::Allowed {
                reset_in_seconds, ..
            }
            | RateLimitDecision::Denied {
                reset_in_seconds, ..
            } => *reset_in_seconds,
        }
    }
}
