pub mod agents;
pub mod runs;
pub mod tasks;

use axum::{
    Json,
    extract::{FromRequest, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::core::error::AgentError;

/// `Json` whose rejections use the API error body instead of plain text.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AgentError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for AgentError {
    fn from(rejection: JsonRejection) -> Self {
        AgentError::Validation(format!("invalid request body: {}", rejection.body_text()))
    }
}

pub(crate) fn status_for(err: &AgentError) -> StatusCode {
    match err {
        AgentError::Validation(_) | AgentError::InvalidTask(_) => StatusCode::BAD_REQUEST,
        AgentError::NotFound(_) | AgentError::RunNotFound(_) => StatusCode::NOT_FOUND,
        AgentError::NotActive(_) => StatusCode::CONFLICT,
        AgentError::Start { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AgentError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        AgentError::External(_) => StatusCode::BAD_GATEWAY,
        AgentError::TaskFailed { source, .. } => match source.as_ref() {
            AgentError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::BAD_GATEWAY,
        },
        AgentError::Database(_) | AgentError::Serialization(_) | AgentError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// JSON body for a failed call; failed runs carry their id.
pub(crate) fn error_body(err: &AgentError) -> serde_json::Value {
    let mut body = json!({ "success": false, "error": err.to_string() });
    if let AgentError::TaskFailed { run_id, .. } = err {
        body["run_id"] = json!(run_id);
    }
    body
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
        }
        (status, Json(error_body(&self))).into_response()
    }
}
