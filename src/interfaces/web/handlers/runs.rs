use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde_json::{Value, json};

use super::super::AppState;
use crate::core::error::AgentResult;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(serde::Deserialize)]
pub struct RunsQuery {
    limit: Option<usize>,
}

pub async fn list_runs(
    Path(agent_id): Path<String>,
    Query(query): Query<RunsQuery>,
    State(state): State<AppState>,
) -> AgentResult<Json<Value>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let runs = state.manager.list_runs(&agent_id, limit).await?;
    Ok(Json(json!({ "success": true, "runs": runs })))
}

pub async fn get_run(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> AgentResult<Json<Value>> {
    let run = state.manager.get_run(&run_id).await?;
    Ok(Json(json!({ "success": true, "run": run })))
}
