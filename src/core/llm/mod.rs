pub mod providers;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A hosted chat-completion endpoint. Failures are opaque to callers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    // Single completion for a structured conversation at the given temperature
    async fn generate(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> Result<String>;
}
