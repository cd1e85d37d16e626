use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use orchestrator_domain::AnalysisArtifact;
use orchestrator_errors::OrchestratorError;
use serde::Serialize;

use crate::{error::ApiResult, response::success, routes::AppState};

#[derive(Debug, Serialize)]
pub struct ResultView {
    pub result_ref: String,
    pub artifact: AnalysisArtifact,
}

const RESULT_PREFIX: &str = "analysis:";

/// 读取已完成任务的分析结果
///
/// 只接受 `analysis:` 结果引用；处于过期宽限期内的结果照常返回。
pub async fn get_result(
    State(state): State<AppState>,
    Path(result_ref): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let not_found = || OrchestratorError::ResultNotFound {
        reference: result_ref.clone(),
    };
    if !result_ref.starts_with(RESULT_PREFIX) {
        return Err(not_found().into());
    }

    let artifact = state
        .cache
        .get_allow_stale::<AnalysisArtifact>(&result_ref)
        .await?
        .ok_or_else(not_found)?;

    Ok(success(ResultView {
        result_ref,
        artifact,
    }))
}
