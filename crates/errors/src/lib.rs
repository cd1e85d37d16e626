use thiserror::Error;

/// 编排层统一错误类型
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("任务队列不可用: {0}")]
    QueueUnavailable(String),

    #[error("分析引擎执行失败: {0}")]
    EngineFailure(String),

    #[error("Worker丢失: {0}")]
    WorkerLost(String),

    #[error("缓存后端不可用: {0}")]
    CacheBackendUnavailable(String),

    #[error("请求过于频繁，请在 {retry_after_seconds} 秒后重试")]
    RateLimitExceeded { retry_after_seconds: u64 },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("批次未找到: {id}")]
    BatchNotFound { id: String },

    #[error("分析结果未找到: {reference}")]
    ResultNotFound { reference: String },

    #[error("非法的状态转换: 任务 {task_id} 从 {from} 到 {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("任务已取消")]
    Cancelled,

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("存储错误: {0}")]
    Store(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }

    pub fn batch_not_found<S: Into<String>>(id: S) -> Self {
        Self::BatchNotFound { id: id.into() }
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 面向调用方的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::ValidationError(_) => "VALIDATION_ERROR",
            OrchestratorError::QueueUnavailable(_) => "QUEUE_UNAVAILABLE",
            OrchestratorError::EngineFailure(_) => "ENGINE_FAILURE",
            OrchestratorError::WorkerLost(_) => "WORKER_LOST",
            OrchestratorError::CacheBackendUnavailable(_) => "CACHE_BACKEND_UNAVAILABLE",
            OrchestratorError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            OrchestratorError::TaskNotFound { .. } => "TASK_NOT_FOUND",
            OrchestratorError::BatchNotFound { .. } => "BATCH_NOT_FOUND",
            OrchestratorError::ResultNotFound { .. } => "RESULT_NOT_FOUND",
            OrchestratorError::InvalidTransition { .. } => "INVALID_TRANSITION",
            OrchestratorError::Cancelled => "CANCELLED",
            OrchestratorError::Timeout(_) => "TIMEOUT",
            OrchestratorError::Store(_) => "STORE_ERROR",
            OrchestratorError::Serialization(_) => "SERIALIZATION_ERROR",
            OrchestratorError::Configuration(_) => "CONFIGURATION_ERROR",
            OrchestratorError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::QueueUnavailable(_)
                | OrchestratorError::CacheBackendUnavailable(_)
                | OrchestratorError::RateLimitExceeded { .. }
                | OrchestratorError::Store(_)
                | OrchestratorError::Timeout(_)
        )
    }

    /// 对外展示的消息，不包含内部细节
    pub fn user_message(&self) -> String {
        match self {
            OrchestratorError::ValidationError(msg) => format!("请求参数无效: {msg}"),
            OrchestratorError::QueueUnavailable(_) => "任务队列暂不可用，请稍后重试".to_string(),
            OrchestratorError::EngineFailure(_) => "分析引擎执行失败".to_string(),
            OrchestratorError::WorkerLost(_) => "执行任务的Worker已丢失，可重新提交".to_string(),
            OrchestratorError::CacheBackendUnavailable(_) => "缓存服务暂不可用".to_string(),
            OrchestratorError::RateLimitExceeded {
                retry_after_seconds,
            } => format!("请求过于频繁，请在 {retry_after_seconds} 秒后重试"),
            OrchestratorError::TaskNotFound { id } => format!("任务 {id} 不存在"),
            OrchestratorError::BatchNotFound { id } => format!("批次 {id} 不存在"),
            OrchestratorError::ResultNotFound { reference } => {
                format!("分析结果 {reference} 不存在或已过期")
            }
            OrchestratorError::InvalidTransition { .. } => "任务状态不允许该操作".to_string(),
            OrchestratorError::Cancelled => "任务已取消".to_string(),
            OrchestratorError::Timeout(_) => "操作超时，请稍后重试".to_string(),
            _ => "系统繁忙，请稍后重试".to_string(),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
