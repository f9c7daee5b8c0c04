use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::info;

use super::kind::{AgentHandle, AgentKind};
use super::react::{ReactHandle, task_question};
use crate::core::error::{AgentError, AgentResult};
use crate::core::llm::{ChatMessage, LlmProvider};
use crate::core::store::AgentRecord;

const GENERATE_STORY: &str = "generate_story";

#[derive(Debug, Clone, Deserialize)]
struct AgeRange {
    min: u32,
    max: u32,
}

/// Story settings, read from the agent config over these defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct StoryConfig {
    target_age_range: AgeRange,
    story_length: u32,
    system_prompt: String,
    story_prompt_template: String,
    theme_prompt_template: String,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            target_age_range: AgeRange { min: 5, max: 10 },
            story_length: 500,
            system_prompt: "You are a skilled children's book author who writes engaging, \
                            imaginative stories with positive messages."
                .to_string(),
            story_prompt_template: "Write a children's story that is engaging, age-appropriate, \
                                    and has a good moral lesson. The story should be around \
                                    {word_count} words long and suitable for children aged \
                                    {min_age}-{max_age}. {theme_prompt}"
                .to_string(),
            theme_prompt_template: "The story should be about or involve: {theme}.".to_string(),
        }
    }
}

impl StoryConfig {
    fn from_extra(extra: &Map<String, Value>) -> Result<Self, String> {
        let config: StoryConfig = serde_json::from_value(Value::Object(extra.clone()))
            .map_err(|e| format!("invalid story settings: {e}"))?;
        if config.target_age_range.min > config.target_age_range.max {
            return Err(format!(
                "target_age_range min {} exceeds max {}",
                config.target_age_range.min, config.target_age_range.max
            ));
        }
        Ok(config)
    }

    fn story_prompt(&self, theme: Option<&str>) -> String {
        let theme_prompt = match theme {
            Some(t) => self.theme_prompt_template.replace("{theme}", t),
            None => String::new(),
        };
        self.story_prompt_template
            .replace("{word_count}", &self.story_length.to_string())
            .replace("{min_age}", &self.target_age_range.min.to_string())
            .replace("{max_age}", &self.target_age_range.max.to_string())
            .replace("{theme_prompt}", &theme_prompt)
            .trim_end()
            .to_string()
    }
}

pub struct StorytellerKind;

impl AgentKind for StorytellerKind {
    fn tag(&self) -> &str {
        "storyteller"
    }

    fn build_handle(
        &self,
        agent: &AgentRecord,
        memory: &Value,
        llm: Arc<dyn LlmProvider>,
    ) -> AgentResult<Arc<dyn AgentHandle>> {
        let story = StoryConfig::from_extra(&agent.config.extra)
            .map_err(|reason| AgentError::start(&agent.agent_id, reason))?;
        let fallback = ReactHandle::build(agent, memory, llm.clone())?;
        Ok(Arc::new(StorytellerHandle {
            agent_id: agent.agent_id.clone(),
            model_name: agent.config.model_name.clone(),
            temperature: agent.config.temperature,
            story,
            llm,
            fallback,
        }))
    }
}

/// Writes stories directly; anything else goes to the ReAct executor.
struct StorytellerHandle {
    agent_id: String,
    model_name: String,
    temperature: f64,
    story: StoryConfig,
    llm: Arc<dyn LlmProvider>,
    fallback: ReactHandle,
}

fn story_theme(task: &Value) -> AgentResult<Option<&str>> {
    match task.get("params").and_then(|p| p.get("theme")) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(AgentError::InvalidTask(
            "'params.theme' must be a string".to_string(),
        )),
    }
}

fn is_story_task(task: &Value) -> bool {
    task.get("task").and_then(Value::as_str) == Some(GENERATE_STORY)
}

#[async_trait]
impl AgentHandle for StorytellerHandle {
    fn validate_task(&self, task: &Value) -> AgentResult<()> {
        task_question(task)?;
        if is_story_task(task) {
            story_theme(task)?;
        }
        Ok(())
    }

    async fn execute(&self, task: &Value) -> AgentResult<Value> {
        if !is_story_task(task) {
            return self.fallback.execute(task).await;
        }

        let theme = story_theme(task)?;
        let prompt = self.story.story_prompt(theme);
        let messages = [
            ChatMessage::system(self.story.system_prompt.clone()),
            ChatMessage::user(prompt.clone()),
        ];
        let story = self
            .llm
            .generate(&self.model_name, &messages, self.temperature)
            .await
            .map_err(|e| AgentError::External(format!("failed to generate story: {e}")))?;
        info!(
            "Agent {} wrote a story ({} chars, theme: {})",
            self.agent_id,
            story.len(),
            theme.unwrap_or("none")
        );

        self.fallback.remember(&prompt, &story).await;
        Ok(json!({ "output": story }))
    }

    async fn memory(&self) -> Value {
        self.fallback.memory_snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::{AgentConfig, AgentStatus};
    use crate::core::llm::testing::ScriptedLlm;

    fn record(config: Value) -> AgentRecord {
        AgentRecord {
            agent_id: "s1".to_string(),
            name: "bard".to_string(),
            agent_type: "storyteller".to_string(),
            config: AgentConfig::from_value(config).unwrap(),
            status: AgentStatus::Active,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn default_prompt_without_theme() {
        let prompt = StoryConfig::default().story_prompt(None);
        assert!(prompt.contains("around 500 words"));
        assert!(prompt.contains("aged 5-10."));
        assert!(!prompt.contains("{theme_prompt}"));
    }

    #[test]
    fn config_extras_override_defaults() {
        let extra = json!({ "story_length": 120, "target_age_range": { "min": 3, "max": 4 } });
        let config = StoryConfig::from_extra(extra.as_object().unwrap()).unwrap();
        let prompt = config.story_prompt(Some("dragons"));
        assert!(prompt.contains("around 120 words"));
        assert!(prompt.contains("aged 3-4"));
        assert!(prompt.ends_with("The story should be about or involve: dragons."));
    }

    #[test]
    fn inverted_age_range_fails_to_start() {
        let err = StorytellerKind
            .build_handle(
                &record(json!({
                    "model_name": "m", "tools": [],
                    "target_age_range": { "min": 9, "max": 4 }
                })),
                &json!({}),
                Arc::new(ScriptedLlm::fixed("x")),
            )
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::Start { .. }));
    }

    #[tokio::test]
    async fn generate_story_uses_system_and_story_prompts() {
        let llm = Arc::new(ScriptedLlm::fixed("The dragon learned to share."));
        let handle = StorytellerKind
            .build_handle(
                &record(json!({ "model_name": "gpt-4o", "tools": [], "temperature": 0.9 })),
                &json!({}),
                llm.clone(),
            )
            .unwrap();
        let task = json!({ "task": "generate_story", "params": { "theme": "dragons" } });
        handle.validate_task(&task).unwrap();
        let out = handle.execute(&task).await.unwrap();
        assert_eq!(out["output"], "The dragon learned to share.");

        let calls = llm.calls.lock().unwrap();
        let (model, messages, temperature) = &calls[0];
        assert_eq!(model, "gpt-4o");
        assert_eq!(*temperature, 0.9);
        assert_eq!(messages[0].role, "system");
        assert!(messages[1].content.contains("dragons"));
        drop(calls);

        let memory = handle.memory().await;
        assert_eq!(memory["chat_history"][1]["content"], "The dragon learned to share.");
    }

    #[tokio::test]
    async fn other_tasks_fall_back_to_react() {
        let llm = Arc::new(ScriptedLlm::fixed("Final Answer: 4"));
        let handle = StorytellerKind
            .build_handle(
                &record(json!({ "model_name": "m", "tools": [] })),
                &json!({}),
                llm,
            )
            .unwrap();
        let out = handle.execute(&json!({ "input": "2+2?" })).await.unwrap();
        assert_eq!(out["output"], "4");
    }

    #[test]
    fn non_string_theme_is_invalid() {
        let task = json!({ "task": "generate_story", "params": { "theme": 7 } });
        assert!(matches!(story_theme(&task), Err(AgentError::InvalidTask(_))));
        assert_eq!(story_theme(&json!({ "task": "generate_story" })).unwrap(), None);
    }
}
