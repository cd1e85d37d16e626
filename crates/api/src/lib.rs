//! # Orchestrator API
//!
//! 分析编排系统的REST接口层，基于Axum构建。
//!
//! ## API 端点
//!
//! - `POST /api/analyses` - 提交分析任务
//! - `GET /api/analyses/{task_id}` - 查询任务状态
//! - `POST /api/analyses/{task_id}/cancel` - 请求取消任务
//! - `POST /api/batches` - 创建批量分析
//! - `GET /api/batches/{batch_id}` - 查询批次状态与聚合指标
//! - `GET /api/results/{result_ref}` - 读取分析结果
//! - `POST /api/cache/invalidate` - 失效缓存
//! - `GET /health` - 健康检查
//!
//! 所有 `/api` 响应都带有 `x-ratelimit-*` 头，超限时返回 429 和 `retry-after`。

pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::time::Duration;

use axum::{extract::DefaultBodyLimit, Router};
use orchestrator_core::ApiConfig;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

pub use error::{ApiError, ApiResult};
pub use response::ApiResponse;
pub use routes::{create_routes, AppState};

use crate::middleware::{cors_layer, request_logging, trace_layer};

/// 创建带中间件的API应用
pub fn create_app(state: AppState, config: &ApiConfig, metrics_path: &str) -> Router {
    let mut app = create_routes(state, metrics_path)
        .layer(DefaultBodyLimit::max(config.max_request_size_mb * 1024 * 1024))
        .layer(
            ServiceBuilder::new()
                .layer(trace_layer())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.request_timeout_seconds,
                )))
                .layer(axum::middleware::from_fn(request_logging)),
        );

    if config.cors_enabled {
        app = app.layer(cors_layer(&config.cors_origins));
    }
    app
}
