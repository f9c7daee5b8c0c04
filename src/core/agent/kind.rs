//! Agent kinds: the mapping from a stored type tag to something that can
//! build a live handle, plus the placeholder used for unknown tags.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::core::error::{AgentError, AgentResult};
use crate::core::llm::LlmProvider;
use crate::core::store::AgentRecord;

/// Builds live handles for agents of one type tag.
pub trait AgentKind: Send + Sync {
    fn tag(&self) -> &str;

    /// Bind config, tools and restored memory into a handle. Any error here
    /// is reported by the manager as a start failure.
    fn build_handle(
        &self,
        agent: &AgentRecord,
        memory: &Value,
        llm: Arc<dyn LlmProvider>,
    ) -> AgentResult<Arc<dyn AgentHandle>>;
}

/// A started agent: accepts task input and keeps conversational memory.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    /// Reject payloads missing the fields this handle needs.
    fn validate_task(&self, task: &Value) -> AgentResult<()>;

    async fn execute(&self, task: &Value) -> AgentResult<Value>;

    /// Snapshot of the memory blob to persist after a run.
    async fn memory(&self) -> Value;
}

/// Type tags resolve here; unknown tags get the placeholder.
pub struct KindRegistry {
    kinds: HashMap<String, Arc<dyn AgentKind>>,
    fallback: Arc<dyn AgentKind>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
            fallback: Arc::new(PlaceholderKind),
        }
    }

    /// Registry with every built-in kind.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::ReactKind));
        registry.register(Arc::new(super::StorytellerKind));
        registry
    }

    pub fn register(&mut self, kind: Arc<dyn AgentKind>) {
        self.kinds.insert(kind.tag().to_string(), kind);
    }

    pub fn resolve(&self, tag: &str) -> Arc<dyn AgentKind> {
        match self.kinds.get(tag) {
            Some(kind) => kind.clone(),
            None => {
                warn!("No agent kind registered for '{}', using placeholder", tag);
                self.fallback.clone()
            }
        }
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.kinds.keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// Stand-in for unregistered type tags. Starting works; every task fails
/// with `NotImplemented`.
pub struct PlaceholderKind;

struct PlaceholderHandle {
    agent_type: String,
    memory: Value,
}

impl AgentKind for PlaceholderKind {
    fn tag(&self) -> &str {
        "placeholder"
    }

    fn build_handle(
        &self,
        agent: &AgentRecord,
        memory: &Value,
        _llm: Arc<dyn LlmProvider>,
    ) -> AgentResult<Arc<dyn AgentHandle>> {
        Ok(Arc::new(PlaceholderHandle {
            agent_type: agent.agent_type.clone(),
            memory: memory.clone(),
        }))
    }
}

#[async_trait]
impl AgentHandle for PlaceholderHandle {
    fn validate_task(&self, task: &Value) -> AgentResult<()> {
        if !task.is_object() {
            return Err(AgentError::InvalidTask(
                "task must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, _task: &Value) -> AgentResult<Value> {
        Err(AgentError::NotImplemented(self.agent_type.clone()))
    }

    async fn memory(&self) -> Value {
        self.memory.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::{AgentConfig, AgentStatus};
    use crate::core::llm::testing::ScriptedLlm;
    use serde_json::json;

    fn record(agent_type: &str) -> AgentRecord {
        AgentRecord {
            agent_id: "a1".to_string(),
            name: "n".to_string(),
            agent_type: agent_type.to_string(),
            config: AgentConfig::from_value(json!({ "model_name": "m", "tools": [] })).unwrap(),
            status: AgentStatus::Inactive,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn builtin_tags_resolve() {
        let registry = KindRegistry::with_builtin();
        assert_eq!(registry.tags(), vec!["default", "storyteller"]);
        assert_eq!(registry.resolve("default").tag(), "default");
        assert_eq!(registry.resolve("storyteller").tag(), "storyteller");
    }

    #[tokio::test]
    async fn unknown_tag_gets_placeholder_that_refuses_work() {
        let registry = KindRegistry::with_builtin();
        let kind = registry.resolve("quantum");
        assert_eq!(kind.tag(), "placeholder");

        let handle = kind
            .build_handle(&record("quantum"), &json!({}), Arc::new(ScriptedLlm::fixed("x")))
            .unwrap();
        handle.validate_task(&json!({ "input": "hi" })).unwrap();
        let err = handle.execute(&json!({ "input": "hi" })).await.unwrap_err();
        assert!(matches!(err, AgentError::NotImplemented(ref t) if t == "quantum"));
    }
}
