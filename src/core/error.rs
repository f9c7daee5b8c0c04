use thiserror::Error;

/// Every failure the record store and the lifecycle manager can surface.
/// Nothing here is retried; callers get the variant verbatim.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid agent: {0}")]
    Validation(String),

    #[error("agent {0} not found")]
    NotFound(String),

    #[error("run {0} not found")]
    RunNotFound(String),

    #[error("agent {0} is not active")]
    NotActive(String),

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("failed to start agent {agent_id}: {reason}")]
    Start { agent_id: String, reason: String },

    #[error("agent type '{0}' cannot execute tasks")]
    NotImplemented(String),

    /// The language model endpoint or the executor wrapped around it failed.
    #[error("external dependency failed: {0}")]
    External(String),

    /// The handle raised while executing. The run row has already been
    /// written as `failed` by the time this reaches the caller.
    #[error("task run {run_id} failed: {source}")]
    TaskFailed {
        run_id: String,
        source: Box<AgentError>,
    },

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn start(agent_id: &str, reason: impl Into<String>) -> Self {
        AgentError::Start {
            agent_id: agent_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn task_failed(run_id: &str, source: AgentError) -> Self {
        AgentError::TaskFailed {
            run_id: run_id.to_string(),
            source: Box::new(source),
        }
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;
