use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::agent::{AgentConfig, AgentStatus};

#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub name: String,
    pub agent_type: String,
    pub config: AgentConfig,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
}

/// One-to-one companion of an agent row: conversational memory plus the
/// task currently in flight, if any.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStateRecord {
    pub agent_id: String,
    pub current_task: Option<Value>,
    pub memory: Value,
    pub last_active: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub agent_id: String,
    pub task: Value,
    pub status: RunStatus,
    pub result: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partial update of an agent row. `config` is merged key by key into the
/// stored config rather than replacing it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type", alias = "agent_type")]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub config: Option<Map<String, Value>>,
}

impl AgentPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.agent_type.is_none() && self.config.is_none()
    }
}
