use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::routes::AppState;

/// Prometheus 文本格式的指标
pub async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            String::new(),
        ),
    }
}
