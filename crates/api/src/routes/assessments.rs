use axum::{
    extract::{Path, State},
    Json,
};
use learnwell_assessments::{AttemptResult, QuestionResponse, SearchRequest, SearchResults};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AttemptRequest {
    pub responses: Vec<QuestionResponse>,
}

pub async fn search_assessments(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<Json<SearchResults>> {
    Ok(Json(state.assessments.search(tenant_id, req).await?))
}

pub async fn submit_attempt(
    State(state): State<AppState>,
    Path((tenant_id, tool_id, assessment_id)): Path<(Uuid, Uuid, String)>,
    Json(req): Json<AttemptRequest>,
) -> ApiResult<Json<AttemptResult>> {
    let result = state
        .assessments
        .grade_attempt(tenant_id, tool_id, &assessment_id, &req.responses)
        .await?;
    Ok(Json(result))
}
