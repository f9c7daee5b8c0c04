//! The default agent kind: a conversational, tool-using ReAct executor.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::kind::{AgentHandle, AgentKind};
use super::tools::{Tool, resolve_tools};
use crate::core::error::{AgentError, AgentResult};
use crate::core::llm::{ChatMessage, LlmProvider};
use crate::core::store::AgentRecord;

/// Upper bound on model turns for a single task.
const MAX_ITERATIONS: usize = 5;

/// Conversation messages kept in the persisted memory blob.
pub(super) const MAX_HISTORY: usize = 40;

const DEFAULT_PROMPT_TEMPLATE: &str = "You are a helpful AI assistant.

Available tools:
{tools}

Use the following format:
Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input question

Question: {input}
{agent_scratchpad}";

pub struct ReactKind;

impl AgentKind for ReactKind {
    fn tag(&self) -> &str {
        "default"
    }

    fn build_handle(
        &self,
        agent: &AgentRecord,
        memory: &Value,
        llm: Arc<dyn LlmProvider>,
    ) -> AgentResult<Arc<dyn AgentHandle>> {
        Ok(Arc::new(ReactHandle::build(agent, memory, llm)?))
    }
}

/// Replies are parsed for `Final Answer:` first, then `Action:`/`Action Input:`.
struct ReplyParser {
    final_answer: Regex,
    action: Regex,
    action_input: Regex,
}

enum Step {
    Finish(String),
    Act { tool: String, input: String },
}

impl ReplyParser {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            final_answer: Regex::new(r"(?s)Final Answer:\s*(.*)$")?,
            action: Regex::new(r"Action:\s*([^\n]+)")?,
            action_input: Regex::new(r"(?s)Action Input:\s*(.*?)\s*(?:\nObservation:|$)")?,
        })
    }

    fn parse(&self, reply: &str) -> Step {
        if let Some(caps) = self.final_answer.captures(reply) {
            return Step::Finish(caps[1].trim().to_string());
        }
        if let Some(caps) = self.action.captures(reply) {
            let input = self
                .action_input
                .captures(reply)
                .map(|c| c[1].trim().trim_matches('"').to_string())
                .unwrap_or_default();
            return Step::Act {
                tool: caps[1].trim().to_string(),
                input,
            };
        }
        // Plain replies are taken as the answer.
        Step::Finish(reply.trim().to_string())
    }
}

pub(super) struct ReactHandle {
    agent_id: String,
    model_name: String,
    temperature: f64,
    tools: Vec<Arc<dyn Tool>>,
    prompt_template: String,
    parser: ReplyParser,
    llm: Arc<dyn LlmProvider>,
    history: Mutex<Vec<ChatMessage>>,
}

impl ReactHandle {
    pub(super) fn build(
        agent: &AgentRecord,
        memory: &Value,
        llm: Arc<dyn LlmProvider>,
    ) -> AgentResult<Self> {
        let tools = resolve_tools(&agent.config.tools)
            .map_err(|reason| AgentError::start(&agent.agent_id, reason))?;

        let prompt_template = agent
            .config
            .extra_str("prompt_template")
            .unwrap_or(DEFAULT_PROMPT_TEMPLATE)
            .to_string();
        if !prompt_template.contains("{input}") {
            return Err(AgentError::start(
                &agent.agent_id,
                "prompt_template must contain an {input} placeholder",
            ));
        }

        let parser =
            ReplyParser::new().map_err(|e| AgentError::start(&agent.agent_id, e.to_string()))?;

        info!(
            "Bound agent {} to model {} (temperature {}, {} tools)",
            agent.agent_id,
            agent.config.model_name,
            agent.config.temperature,
            tools.len()
        );

        Ok(Self {
            agent_id: agent.agent_id.clone(),
            model_name: agent.config.model_name.clone(),
            temperature: agent.config.temperature,
            tools,
            prompt_template,
            parser,
            llm,
            history: Mutex::new(history_from_memory(memory)),
        })
    }

    fn render_prompt(&self, input: &str, scratchpad: &str) -> String {
        let tool_lines: Vec<String> = self
            .tools
            .iter()
            .map(|t| format!("{}: {}", t.name(), t.description()))
            .collect();
        let tool_names: Vec<&str> = self.tools.iter().map(|t| t.name()).collect();
        let tools = if tool_lines.is_empty() {
            "(none)".to_string()
        } else {
            tool_lines.join("\n")
        };
        self.prompt_template
            .replace("{tools}", &tools)
            .replace("{tool_names}", &tool_names.join(", "))
            .replace("{input}", input)
            .replace("{agent_scratchpad}", scratchpad)
    }

    /// Run the think/act/observe loop for one question.
    pub(super) async fn answer(&self, question: &str) -> AgentResult<(String, Vec<Value>)> {
        let history = self.history.lock().await.clone();
        let mut scratchpad = String::new();
        let mut steps = Vec::new();

        for iter in 1..=MAX_ITERATIONS {
            let mut messages = history.clone();
            messages.push(ChatMessage::user(self.render_prompt(question, &scratchpad)));

            let reply = self
                .llm
                .generate(&self.model_name, &messages, self.temperature)
                .await
                .map_err(|e| AgentError::External(e.to_string()))?;
            debug!("Agent {} iter {}: {} chars", self.agent_id, iter, reply.len());

            match self.parser.parse(&reply) {
                Step::Finish(answer) => return Ok((answer, steps)),
                Step::Act { tool, input } => {
                    let observation = match self.tools.iter().find(|t| t.name() == tool) {
                        Some(t) => t.call(&input).await,
                        None => format!("{tool} is not a valid tool, try one of the listed tools."),
                    };
                    info!("Agent {} used tool {}", self.agent_id, tool);
                    let thought = reply
                        .split("\nObservation:")
                        .next()
                        .unwrap_or(&reply)
                        .trim_end();
                    scratchpad.push_str(&format!("{thought}\nObservation: {observation}\nThought: "));
                    steps.push(json!({
                        "tool": tool,
                        "input": input,
                        "observation": observation,
                    }));
                }
            }
        }

        Err(AgentError::External(format!(
            "agent stopped after {MAX_ITERATIONS} iterations without a final answer"
        )))
    }

    pub(super) async fn remember(&self, question: &str, answer: &str) {
        let mut history = self.history.lock().await;
        history.push(ChatMessage::user(question));
        history.push(ChatMessage::assistant(answer));
        let excess = history.len().saturating_sub(MAX_HISTORY);
        history.drain(..excess);
    }

    pub(super) async fn memory_snapshot(&self) -> Value {
        let history = self.history.lock().await;
        json!({ "chat_history": *history })
    }
}

fn history_from_memory(memory: &Value) -> Vec<ChatMessage> {
    memory
        .get("chat_history")
        .and_then(|h| serde_json::from_value::<Vec<ChatMessage>>(h.clone()).ok())
        .unwrap_or_default()
}

/// A task is either `{"input": "..."}` or `{"task": "...", "params": {...}}`.
pub(super) fn task_question(task: &Value) -> AgentResult<String> {
    let Some(obj) = task.as_object() else {
        return Err(AgentError::InvalidTask(
            "task must be a JSON object".to_string(),
        ));
    };
    if let Some(input) = obj.get("input") {
        return match input.as_str() {
            Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
            _ => Err(AgentError::InvalidTask(
                "'input' must be a non-empty string".to_string(),
            )),
        };
    }
    match obj.get("task").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => {
            let params = obj.get("params").cloned().unwrap_or_else(|| json!({}));
            if !params.is_object() {
                return Err(AgentError::InvalidTask(
                    "'params' must be an object".to_string(),
                ));
            }
            Ok(format!("Task: {name}\nParameters: {params}"))
        }
        _ => Err(AgentError::InvalidTask(
            "task must contain an 'input' or 'task' field".to_string(),
        )),
    }
}

#[async_trait]
impl AgentHandle for ReactHandle {
    fn validate_task(&self, task: &Value) -> AgentResult<()> {
        task_question(task).map(|_| ())
    }

    async fn execute(&self, task: &Value) -> AgentResult<Value> {
        let question = task_question(task)?;
        let (answer, steps) = self.answer(&question).await?;
        self.remember(&question, &answer).await;
        Ok(json!({
            "output": answer,
            "intermediate_steps": steps,
        }))
    }

    async fn memory(&self) -> Value {
        self.memory_snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::{AgentConfig, AgentStatus};
    use crate::core::llm::testing::ScriptedLlm;

    fn record(config: Value) -> AgentRecord {
        AgentRecord {
            agent_id: "a1".to_string(),
            name: "helper".to_string(),
            agent_type: "default".to_string(),
            config: AgentConfig::from_value(config).unwrap(),
            status: AgentStatus::Active,
            created_at: chrono::Utc::now(),
        }
    }

    fn handle(config: Value, llm: Arc<ScriptedLlm>) -> ReactHandle {
        ReactHandle::build(&record(config), &json!({}), llm).unwrap()
    }

    #[tokio::test]
    async fn plain_reply_is_final_answer() {
        let llm = Arc::new(ScriptedLlm::fixed("Once upon a time..."));
        let h = handle(json!({ "model_name": "m", "tools": [], "temperature": 0.5 }), llm.clone());
        let out = h
            .execute(&json!({ "task": "generate_story", "params": {} }))
            .await
            .unwrap();
        assert_eq!(out["output"], "Once upon a time...");

        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls[0].0, "m");
        assert_eq!(calls[0].2, 0.5);
        assert!(calls[0].1.last().unwrap().content.contains("Task: generate_story"));
    }

    #[tokio::test]
    async fn tool_round_trip_then_final_answer() {
        let llm = Arc::new(ScriptedLlm::script(
            &[
                "Thought: run it\nAction: code_interpreter\nAction Input: \"print(2+2)\"\nObservation: made up",
            ],
            "Thought: I now know the final answer\nFinal Answer: cannot execute code",
        ));
        let h = handle(
            json!({ "model_name": "m", "tools": ["code_interpreter"] }),
            llm.clone(),
        );
        let out = h.execute(&json!({ "input": "what is 2+2" })).await.unwrap();
        assert_eq!(out["output"], "cannot execute code");
        assert_eq!(out["intermediate_steps"][0]["tool"], "code_interpreter");
        assert_eq!(out["intermediate_steps"][0]["input"], "print(2+2)");
        assert_eq!(
            out["intermediate_steps"][0]["observation"],
            "Code execution not implemented"
        );

        let calls = llm.calls.lock().unwrap();
        let second_prompt = &calls[1].1.last().unwrap().content;
        assert!(second_prompt.contains("Observation: Code execution not implemented"));
        assert!(!second_prompt.contains("made up"));
    }

    #[tokio::test]
    async fn endless_actions_hit_the_iteration_cap() {
        let llm = Arc::new(ScriptedLlm::fixed("Action: search\nAction Input: cats"));
        let h = handle(json!({ "model_name": "m", "tools": [] }), llm.clone());
        let err = h.execute(&json!({ "input": "cats?" })).await.unwrap_err();
        assert!(matches!(err, AgentError::External(_)));
        assert_eq!(llm.call_count(), MAX_ITERATIONS);
    }

    #[tokio::test]
    async fn llm_failure_is_external() {
        let llm = Arc::new(ScriptedLlm::failing("connection refused"));
        let h = handle(json!({ "model_name": "m", "tools": [] }), llm);
        let err = h.execute(&json!({ "input": "hi" })).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn memory_accumulates_and_is_restored() {
        let llm = Arc::new(ScriptedLlm::fixed("hello back"));
        let h = handle(json!({ "model_name": "m", "tools": [] }), llm.clone());
        h.execute(&json!({ "input": "hello" })).await.unwrap();
        let memory = h.memory().await;
        assert_eq!(memory["chat_history"][0]["content"], "hello");
        assert_eq!(memory["chat_history"][1]["role"], "assistant");

        let restored = ReactHandle::build(
            &record(json!({ "model_name": "m", "tools": [] })),
            &memory,
            llm.clone(),
        )
        .unwrap();
        restored.execute(&json!({ "input": "again" })).await.unwrap();
        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls[1].1.len(), 3);
        assert_eq!(calls[1].1[0].content, "hello");
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let llm = Arc::new(ScriptedLlm::fixed("ok"));
        let h = handle(json!({ "model_name": "m", "tools": [] }), llm);
        for n in 0..(MAX_HISTORY) {
            h.remember(&format!("q{n}"), "ok").await;
        }
        let memory = h.memory().await;
        let history = memory["chat_history"].as_array().unwrap();
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history.last().unwrap()["content"], "ok");
        assert_eq!(history[0]["content"], format!("q{}", MAX_HISTORY / 2));
    }

    #[test]
    fn malformed_tasks_are_rejected() {
        for task in [
            json!("just a string"),
            json!({}),
            json!({ "input": "" }),
            json!({ "input": 5 }),
            json!({ "task": "x", "params": [1] }),
        ] {
            assert!(
                matches!(task_question(&task), Err(AgentError::InvalidTask(_))),
                "expected {task} to be rejected"
            );
        }
    }

    #[test]
    fn bad_tools_or_template_fail_to_build() {
        let llm = Arc::new(ScriptedLlm::fixed("x"));
        let err = ReactHandle::build(
            &record(json!({ "model_name": "m", "tools": [{ "type": "teleport" }] })),
            &json!({}),
            llm.clone(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AgentError::Start { .. }));

        let err = ReactHandle::build(
            &record(json!({ "model_name": "m", "tools": [], "prompt_template": "no slot" })),
            &json!({}),
            llm,
        )
        .err()
        .unwrap();
        assert!(matches!(err, AgentError::Start { .. }));
    }
}
