use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::{
    auth::OwnerId,
    error::ApiResult,
    response::{accepted, success},
    routes::AppState,
};

/// 批量分析请求：同一组参数作用于所有目标
#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    pub targets: Vec<String>,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub force: bool,
}

pub async fn create_batch(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    payload: Result<Json<CreateBatchRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let handle = state
        .aggregator
        .create_batch(&owner, request.targets, request.params, request.force)
        .await?;
    Ok(accepted(handle))
}

pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = state.aggregator.get_batch_status(&batch_id).await?;
    Ok(success(status))
}
