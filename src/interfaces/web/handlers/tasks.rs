use axum::{
    Json,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::super::AppState;
use super::{ApiJson, error_body};
use crate::core::error::AgentResult;
use crate::core::manager::TaskOutcome;

fn outcome_body(outcome: TaskOutcome) -> Value {
    json!({ "success": true, "run_id": outcome.run_id, "result": outcome.result })
}

pub async fn run_task_endpoint(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    ApiJson(task): ApiJson<Value>,
) -> AgentResult<Json<Value>> {
    let outcome = state.manager.run_task(&agent_id, task).await?;
    Ok(Json(outcome_body(outcome)))
}

/// Each text frame is one task; each reply mirrors the REST response body.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    if let Err(e) = state.manager.get(&agent_id).await {
        return e.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, agent_id))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, agent_id: String) {
    info!("Task socket opened for agent {}", agent_id);
    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let reply = match serde_json::from_str::<Value>(text.as_str()) {
            Ok(task) => match state.manager.run_task(&agent_id, task).await {
                Ok(outcome) => outcome_body(outcome),
                Err(e) => error_body(&e),
            },
            Err(e) => json!({ "success": false, "error": format!("invalid task JSON: {e}") }),
        };

        if socket
            .send(Message::Text(reply.to_string().into()))
            .await
            .is_err()
        {
            warn!("Task socket for agent {} dropped mid-reply", agent_id);
            break;
        }
    }
    info!("Task socket closed for agent {}", agent_id);
}
