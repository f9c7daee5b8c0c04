//! The lifecycle manager: keeps the in-process registry of live agent
//! handles consistent with the record store, and runs tasks on them.

use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::agent::{AgentHandle, AgentStatus, KindRegistry, normalize_type};
use crate::core::error::{AgentError, AgentResult};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::llm::LlmProvider;
use crate::core::store::{
    AgentPatch, AgentRecord, AgentStateRecord, AgentStore, RunRecord, RunStatus,
};

/// What a successful `run_task` hands back.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub run_id: String,
    pub result: Value,
}

type ActiveRegistry = Arc<Mutex<HashMap<String, Arc<dyn AgentHandle>>>>;

#[derive(Clone)]
pub struct AgentManager {
    store: AgentStore,
    kinds: Arc<KindRegistry>,
    llm: Arc<dyn LlmProvider>,
    active: ActiveRegistry,
    /// Serializes start/stop/delete so the registry and the status column
    /// move together.
    transitions: Arc<Mutex<()>>,
}

impl AgentManager {
    pub fn new(store: AgentStore, kinds: KindRegistry, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            store,
            kinds: Arc::new(kinds),
            llm,
            active: Arc::new(Mutex::new(HashMap::new())),
            transitions: Arc::new(Mutex::new(())),
        }
    }

    pub fn kind_tags(&self) -> Vec<String> {
        self.kinds.tags()
    }

    pub async fn create(
        &self,
        name: &str,
        agent_type: Option<&str>,
        config: Value,
    ) -> AgentResult<String> {
        self.store
            .create_agent(name, &normalize_type(agent_type), config)
            .await
    }

    pub async fn get(&self, agent_id: &str) -> AgentResult<AgentRecord> {
        self.store.get_agent(agent_id).await
    }

    pub async fn list(&self) -> AgentResult<Vec<AgentRecord>> {
        self.store.list_agents().await
    }

    /// A live handle keeps the config it was started with until restarted.
    pub async fn update(&self, agent_id: &str, patch: AgentPatch) -> AgentResult<AgentRecord> {
        self.store.update_agent(agent_id, patch).await
    }

    /// Returns `true` once the agent is live, including when it already was.
    /// Failures come back as errors and leave no registry entry.
    pub async fn start(&self, agent_id: &str) -> AgentResult<bool> {
        let _guard = self.transitions.lock().await;

        let agent = self.store.get_agent(agent_id).await?;
        if self.active.lock().await.contains_key(agent_id) {
            info!("Agent {} is already active", agent_id);
            return Ok(true);
        }

        let state = self.store.get_state(agent_id).await?;
        let kind = self.kinds.resolve(&agent.agent_type);
        let handle = kind
            .build_handle(&agent, &state.memory, self.llm.clone())
            .map_err(|e| match e {
                AgentError::Start { .. } => e,
                other => AgentError::start(agent_id, other.to_string()),
            })?;

        self.active
            .lock()
            .await
            .insert(agent_id.to_string(), handle);
        if let Err(e) = self.store.set_status(agent_id, AgentStatus::Active).await {
            self.active.lock().await.remove(agent_id);
            return Err(e);
        }

        info!(
            "Started agent {} ({}, {} provider)",
            agent_id,
            kind.tag(),
            self.llm.name()
        );
        Ok(true)
    }

    /// Stopping an agent that is not live still marks it inactive.
    pub async fn stop(&self, agent_id: &str) -> AgentResult<bool> {
        let _guard = self.transitions.lock().await;
        self.stop_locked(agent_id).await?;
        Ok(true)
    }

    async fn stop_locked(&self, agent_id: &str) -> AgentResult<()> {
        let was_active = self.active.lock().await.remove(agent_id).is_some();
        self.store
            .set_status(agent_id, AgentStatus::Inactive)
            .await?;
        if was_active {
            info!("Stopped agent {}", agent_id);
        }
        Ok(())
    }

    pub async fn delete(&self, agent_id: &str) -> AgentResult<()> {
        let _guard = self.transitions.lock().await;
        self.store.get_agent(agent_id).await?;
        self.stop_locked(agent_id).await?;
        self.store.delete_agent(agent_id).await
    }

    /// Run one task on an active agent. A run row is written before the
    /// handle is invoked and always reaches a terminal status. Failures
    /// come back as `TaskFailed` carrying the run id.
    pub async fn run_task(&self, agent_id: &str, task: Value) -> AgentResult<TaskOutcome> {
        let handle = self
            .active
            .lock()
            .await
            .get(agent_id)
            .cloned()
            .ok_or_else(|| AgentError::NotActive(agent_id.to_string()))?;
        handle.validate_task(&task)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        self.store
            .record_run_start(&run_id, agent_id, &task)
            .await?;
        info!("Run {} started on agent {}", run_id, agent_id);

        match handle.execute(&task).await {
            Ok(result) => {
                self.finish_run(&run_id, RunStatus::Completed, &result)
                    .await?;
                let memory = handle.memory().await;
                if let Err(e) = self.store.save_state(agent_id, &memory).await {
                    warn!("Could not persist memory of agent {}: {}", agent_id, e);
                }
                info!("Run {} completed", run_id);
                Ok(TaskOutcome { run_id, result })
            }
            Err(err) => {
                warn!("Run {} failed: {}", run_id, err);
                self.finish_run(&run_id, RunStatus::Failed, &json!({ "error": err.to_string() }))
                    .await?;
                Err(AgentError::task_failed(&run_id, err))
            }
        }
    }

    async fn finish_run(&self, run_id: &str, status: RunStatus, result: &Value) -> AgentResult<()> {
        match self.store.record_run_end(run_id, status, result).await {
            Err(AgentError::RunNotFound(_)) => {
                warn!("Run {} vanished before it finished (agent deleted?)", run_id);
                Ok(())
            }
            other => other,
        }
    }

    pub async fn get_state(&self, agent_id: &str) -> AgentResult<AgentStateRecord> {
        self.store.get_state(agent_id).await
    }

    pub async fn list_runs(&self, agent_id: &str, limit: usize) -> AgentResult<Vec<RunRecord>> {
        self.store.get_agent(agent_id).await?;
        self.store.list_runs(agent_id, limit).await
    }

    pub async fn get_run(&self, run_id: &str) -> AgentResult<RunRecord> {
        self.store.get_run(run_id).await
    }

    pub async fn is_active(&self, agent_id: &str) -> bool {
        self.active.lock().await.contains_key(agent_id)
    }

    pub async fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every active agent. Store failures are logged, not returned.
    pub async fn shutdown(&self) -> usize {
        let _guard = self.transitions.lock().await;
        let ids: Vec<String> = self.active.lock().await.drain().map(|(id, _)| id).collect();
        for id in &ids {
            if let Err(e) = self.store.set_status(id, AgentStatus::Inactive).await {
                warn!("Failed to mark agent {} inactive: {}", id, e);
            }
        }
        if !ids.is_empty() {
            info!("Stopped {} active agent(s)", ids.len());
        }
        ids.len()
    }
}

#[async_trait::async_trait]
impl LifecycleComponent for AgentManager {
    async fn on_init(&mut self) -> Result<()> {
        self.store.check_connection().await?;
        info!(
            "Agent manager ready (kinds: {})",
            self.kind_tags().join(", ")
        );
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        self.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::testing::ScriptedLlm;

    fn manager_with(llm: ScriptedLlm) -> AgentManager {
        AgentManager::new(
            AgentStore::open_in_memory().unwrap(),
            KindRegistry::with_builtin(),
            Arc::new(llm),
        )
    }

    fn config() -> Value {
        json!({ "model_name": "m", "tools": [], "temperature": 0.5 })
    }

    #[tokio::test]
    async fn story_scenario_end_to_end() {
        let manager = manager_with(ScriptedLlm::fixed("Once upon a time..."));
        let id = manager.create("A", None, config()).await.unwrap();

        let agent = manager.get(&id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Inactive);
        assert_eq!(agent.agent_type, "default");
        assert_eq!(agent.config.temperature, 0.5);

        assert!(manager.start(&id).await.unwrap());
        assert_eq!(manager.active_ids().await, vec![id.clone()]);
        assert_eq!(manager.get(&id).await.unwrap().status, AgentStatus::Active);

        let outcome = manager
            .run_task(&id, json!({ "task": "generate_story", "params": {} }))
            .await
            .unwrap();
        assert_eq!(outcome.result["output"], "Once upon a time...");
        let run = manager.get_run(&outcome.run_id).await.unwrap();
        assert_eq!(run.agent_id, id);
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.completed_at.is_some());

        assert!(manager.stop(&id).await.unwrap());
        assert!(!manager.is_active(&id).await);
        assert_eq!(manager.get(&id).await.unwrap().status, AgentStatus::Inactive);

        manager.delete(&id).await.unwrap();
        assert!(matches!(manager.get(&id).await, Err(AgentError::NotFound(_))));
    }

    #[tokio::test]
    async fn stopped_agent_rejects_tasks() {
        let manager = manager_with(ScriptedLlm::fixed("ok"));
        let id = manager.create("A", None, config()).await.unwrap();
        let err = manager.run_task(&id, json!({ "input": "hi" })).await.unwrap_err();
        assert!(matches!(err, AgentError::NotActive(_)));

        manager.start(&id).await.unwrap();
        manager.run_task(&id, json!({ "input": "hi" })).await.unwrap();
        manager.stop(&id).await.unwrap();
        let err = manager.run_task(&id, json!({ "input": "hi" })).await.unwrap_err();
        assert!(matches!(err, AgentError::NotActive(_)));
    }

    #[tokio::test]
    async fn failed_invocation_is_recorded_then_raised() {
        let manager = manager_with(ScriptedLlm::failing("rate limited"));
        let id = manager.create("A", None, config()).await.unwrap();
        manager.start(&id).await.unwrap();

        let err = manager.run_task(&id, json!({ "input": "hi" })).await.unwrap_err();
        let AgentError::TaskFailed { run_id, source } = err else {
            panic!("expected TaskFailed");
        };
        assert!(matches!(*source, AgentError::External(_)));

        let run = manager.get_run(&run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.result.unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("rate limited"));
        assert!(manager.get_state(&id).await.unwrap().current_task.is_none());
    }

    #[tokio::test]
    async fn every_run_reaches_a_terminal_status() {
        let manager = manager_with(ScriptedLlm::script(&["fine"], "Action: nope\nAction Input: x"));
        let id = manager.create("A", None, config()).await.unwrap();
        manager.start(&id).await.unwrap();

        manager.run_task(&id, json!({ "input": "one" })).await.unwrap();
        manager.run_task(&id, json!({ "input": "two" })).await.unwrap_err();

        let runs = manager.list_runs(&id, 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status.is_terminal()));
    }

    #[tokio::test]
    async fn invalid_task_writes_no_run() {
        let manager = manager_with(ScriptedLlm::fixed("ok"));
        let id = manager.create("A", None, config()).await.unwrap();
        manager.start(&id).await.unwrap();

        let err = manager.run_task(&id, json!({ "prompt": "hi" })).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidTask(_)));
        assert!(manager.list_runs(&id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_type_starts_but_refuses_work() {
        let manager = manager_with(ScriptedLlm::fixed("ok"));
        let id = manager.create("Q", Some("quantum"), config()).await.unwrap();
        assert!(manager.start(&id).await.unwrap());

        let err = manager.run_task(&id, json!({ "input": "hi" })).await.unwrap_err();
        let AgentError::TaskFailed { run_id, source } = err else {
            panic!("expected TaskFailed");
        };
        assert!(matches!(*source, AgentError::NotImplemented(ref t) if t == "quantum"));
        assert_eq!(manager.get_run(&run_id).await.unwrap().status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn broken_tool_config_leaves_nothing_behind() {
        let manager = manager_with(ScriptedLlm::fixed("ok"));
        let id = manager
            .create("T", None, json!({ "model_name": "m", "tools": [{ "type": "teleport" }] }))
            .await
            .unwrap();

        let err = manager.start(&id).await.unwrap_err();
        assert!(matches!(err, AgentError::Start { .. }));
        assert!(!manager.is_active(&id).await);
        assert_eq!(manager.get(&id).await.unwrap().status, AgentStatus::Inactive);
    }

    #[tokio::test]
    async fn delete_of_active_agent_clears_everything() {
        let manager = manager_with(ScriptedLlm::fixed("ok"));
        let keep = manager.create("keep", None, config()).await.unwrap();
        let id = manager.create("A", None, config()).await.unwrap();
        manager.start(&id).await.unwrap();
        let outcome = manager.run_task(&id, json!({ "input": "hi" })).await.unwrap();

        manager.delete(&id).await.unwrap();
        assert!(!manager.is_active(&id).await);
        assert!(matches!(manager.get_state(&id).await, Err(AgentError::NotFound(_))));
        assert!(matches!(
            manager.get_run(&outcome.run_id).await,
            Err(AgentError::RunNotFound(_))
        ));
        assert_eq!(manager.list().await.unwrap().len(), 1);
        assert_eq!(manager.get(&keep).await.unwrap().name, "keep");
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found_everywhere() {
        let manager = manager_with(ScriptedLlm::fixed("ok"));
        let keep = manager.create("keep", None, config()).await.unwrap();

        assert!(matches!(manager.get("nope").await, Err(AgentError::NotFound(_))));
        assert!(matches!(manager.start("nope").await, Err(AgentError::NotFound(_))));
        assert!(matches!(manager.stop("nope").await, Err(AgentError::NotFound(_))));
        assert!(matches!(manager.delete("nope").await, Err(AgentError::NotFound(_))));
        let patch = AgentPatch {
            name: Some("x".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            manager.update("nope", patch).await,
            Err(AgentError::NotFound(_))
        ));

        assert!(manager.active_ids().await.is_empty());
        assert_eq!(manager.get(&keep).await.unwrap().name, "keep");
    }

    #[tokio::test]
    async fn concurrent_starts_leave_one_entry() {
        let manager = manager_with(ScriptedLlm::fixed("ok"));
        let id = manager.create("A", None, config()).await.unwrap();

        let (a, b) = tokio::join!(manager.start(&id), manager.start(&id));
        assert!(a.unwrap() && b.unwrap());
        assert_eq!(manager.active_ids().await.len(), 1);
        assert_eq!(manager.get(&id).await.unwrap().status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn repeated_transitions_succeed() {
        let manager = manager_with(ScriptedLlm::fixed("ok"));
        let id = manager.create("A", None, config()).await.unwrap();

        assert!(manager.stop(&id).await.unwrap());
        assert_eq!(manager.get(&id).await.unwrap().status, AgentStatus::Inactive);

        assert!(manager.start(&id).await.unwrap());
        assert!(manager.start(&id).await.unwrap());
        assert_eq!(manager.active_ids().await, vec![id.clone()]);
        assert_eq!(manager.get(&id).await.unwrap().status, AgentStatus::Active);

        assert!(manager.stop(&id).await.unwrap());
        assert!(manager.stop(&id).await.unwrap());
        assert!(!manager.is_active(&id).await);
    }

    #[tokio::test]
    async fn memory_survives_restart() {
        let llm = Arc::new(ScriptedLlm::fixed("noted"));
        let manager = AgentManager::new(
            AgentStore::open_in_memory().unwrap(),
            KindRegistry::with_builtin(),
            llm.clone(),
        );
        let id = manager.create("A", None, config()).await.unwrap();
        manager.start(&id).await.unwrap();
        manager.run_task(&id, json!({ "input": "remember me" })).await.unwrap();

        let state = manager.get_state(&id).await.unwrap();
        assert_eq!(state.memory["chat_history"][0]["content"], "remember me");

        manager.stop(&id).await.unwrap();
        manager.start(&id).await.unwrap();
        manager.run_task(&id, json!({ "input": "again" })).await.unwrap();
        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls[1].1[0].content, "remember me");
    }

    #[tokio::test]
    async fn shutdown_deactivates_all() {
        let manager = manager_with(ScriptedLlm::fixed("ok"));
        let a = manager.create("A", None, config()).await.unwrap();
        let b = manager.create("B", Some("storyteller"), config()).await.unwrap();
        manager.start(&a).await.unwrap();
        manager.start(&b).await.unwrap();

        assert_eq!(manager.shutdown().await, 2);
        assert!(manager.active_ids().await.is_empty());
        for id in [a, b] {
            assert_eq!(manager.get(&id).await.unwrap().status, AgentStatus::Inactive);
        }
    }
}
