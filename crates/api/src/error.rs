use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use orchestrator_errors::OrchestratorError;
use tracing::{error, warn};

use crate::response::ApiResponse;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("编排错误: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("缺少调用方标识头 x-owner-id")]
    MissingOwner,

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingOwner | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Orchestrator(err) => match err {
                OrchestratorError::ValidationError(_) => StatusCode::BAD_REQUEST,
                OrchestratorError::TaskNotFound { .. }
                | OrchestratorError::BatchNotFound { .. }
                | OrchestratorError::ResultNotFound { .. } => StatusCode::NOT_FOUND,
                OrchestratorError::InvalidTransition { .. } => StatusCode::CONFLICT,
                OrchestratorError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                OrchestratorError::QueueUnavailable(_)
                | OrchestratorError::CacheBackendUnavailable(_)
                | OrchestratorError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Orchestrator(err) => err.code(),
            ApiError::MissingOwner => "MISSING_OWNER",
            ApiError::BadRequest(_) => "VALIDATION_ERROR",
        }
    }

    fn user_message(&self) -> String {
        match self {
            ApiError::Orchestrator(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("请求处理失败: {}", self);
        } else {
            warn!("请求被拒绝: {}", self);
        }

        let body = ApiResponse::error(self.code(), self.user_message());
        let mut response = (status, body).into_response();
        if let ApiError::Orchestrator(OrchestratorError::RateLimitExceeded {
            retry_after_seconds,
        }) = &self
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_seconds));
        }
        response
    }
}
