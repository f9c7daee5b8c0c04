use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};

use super::super::AppState;
use super::ApiJson;
use crate::core::error::{AgentError, AgentResult};
use crate::core::store::AgentPatch;

pub async fn get_agents(State(state): State<AppState>) -> AgentResult<Json<Value>> {
    let agents = state.manager.list().await?;
    Ok(Json(json!({ "success": true, "agents": agents })))
}

#[derive(serde::Deserialize)]
pub struct CreateAgentRequest {
    name: String,
    #[serde(default, rename = "type", alias = "agent_type")]
    agent_type: Option<String>,
    config: Value,
}

pub async fn create_agent_endpoint(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateAgentRequest>,
) -> AgentResult<(StatusCode, Json<Value>)> {
    let agent_id = state
        .manager
        .create(&payload.name, payload.agent_type.as_deref(), payload.config)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "agent_id": agent_id })),
    ))
}

pub async fn get_agent(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> AgentResult<Json<Value>> {
    let agent = state.manager.get(&agent_id).await?;
    let active = state.manager.is_active(&agent_id).await;
    Ok(Json(json!({ "success": true, "agent": agent, "live": active })))
}

pub async fn update_agent_endpoint(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    ApiJson(patch): ApiJson<AgentPatch>,
) -> AgentResult<Json<Value>> {
    if patch.is_empty() {
        return Err(AgentError::Validation(
            "update must set name, type or config".to_string(),
        ));
    }
    let agent = state.manager.update(&agent_id, patch).await?;
    Ok(Json(json!({ "success": true, "agent": agent })))
}

pub async fn delete_agent_endpoint(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> AgentResult<Json<Value>> {
    state.manager.delete(&agent_id).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn start_agent_endpoint(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> AgentResult<Json<Value>> {
    let was_active = state.manager.is_active(&agent_id).await;
    let started = state.manager.start(&agent_id).await?;
    Ok(Json(json!({ "success": started, "was_active": was_active })))
}

pub async fn stop_agent_endpoint(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> AgentResult<Json<Value>> {
    let was_active = state.manager.is_active(&agent_id).await;
    let stopped = state.manager.stop(&agent_id).await?;
    Ok(Json(json!({ "success": stopped, "was_active": was_active })))
}

pub async fn get_agent_state(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> AgentResult<Json<Value>> {
    let agent_state = state.manager.get_state(&agent_id).await?;
    Ok(Json(json!({ "success": true, "state": agent_state })))
}

pub async fn get_active_agents(State(state): State<AppState>) -> Json<Value> {
    let active = state.manager.active_ids().await;
    Json(json!({ "success": true, "active": active }))
}
