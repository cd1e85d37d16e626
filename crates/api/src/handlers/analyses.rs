use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};
use orchestrator_dispatcher::SubmitRequest;
use tracing::info;

use crate::{
    auth::OwnerId,
    error::ApiResult,
    response::{accepted, success},
    routes::AppState,
};

/// 提交单个分析任务
pub async fn submit_analysis(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let handle = state.submitter.submit(&owner, request).await?;
    info!(
        "受理分析请求: owner={}, task_id={}, deduplicated={}",
        owner, handle.task_id, handle.deduplicated
    );
    Ok(accepted(handle))
}

/// 查询任务状态；未知任务返回 UNKNOWN
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = state.registry.get_status(&task_id).await?;
    Ok(success(status))
}

pub async fn cancel_analysis(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = state.submitter.cancel(&task_id).await?;
    Ok(success(status))
}
