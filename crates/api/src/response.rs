use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

/// 所有 `/api` 响应的统一包装
///
/// 成功: `{"status":"success","data":…}`；失败: `{"status":"error","code":…,"message":…}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ApiResponse<T> {
    Success { data: T },
    Error { code: String, message: String },
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::Success { data }
    }
}

impl ApiResponse<()> {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

pub fn success<T: Serialize>(data: T) -> impl IntoResponse {
    ApiResponse::success(data)
}

/// 异步任务已受理
pub fn accepted<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::ACCEPTED, ApiResponse::success(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_shape() {
        let body = serde_json::to_value(ApiResponse::success(json!({"task_id": "t1"}))).unwrap();
        assert_eq!(body, json!({"status": "success", "data": {"task_id": "t1"}}));
    }

    #[test]
    fn test_error_shape() {
        let body = serde_json::to_value(ApiResponse::error("TASK_NOT_FOUND", "missing")).unwrap();
        assert_eq!(
            body,
            json!({"status": "error", "code": "TASK_NOT_FOUND", "message": "missing"})
        );
    }
}
