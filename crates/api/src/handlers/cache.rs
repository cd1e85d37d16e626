use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use orchestrator_infrastructure::InvalidationTarget;
use serde::Serialize;
use tracing::info;

use crate::{error::ApiResult, response::success, routes::AppState};

#[derive(Debug, Serialize)]
pub struct InvalidationReport {
    pub target: InvalidationTarget,
    pub invalidated: u64,
}

/// 按键、标签或通配模式失效缓存
pub async fn invalidate_cache(
    State(state): State<AppState>,
    payload: Result<Json<InvalidationTarget>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(target) = payload?;
    let invalidated = state.cache.invalidate(target.clone()).await?;
    info!("缓存失效完成: {:?}, 删除 {} 个条目", target, invalidated);
    Ok(success(InvalidationReport {
        target,
        invalidated,
    }))
}
