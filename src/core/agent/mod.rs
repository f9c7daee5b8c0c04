//! Agent configuration, lifecycle status, and the kinds that turn a stored
//! agent into a live handle.

mod kind;
mod react;
mod storyteller;
mod tools;

pub use kind::{AgentHandle, KindRegistry};
use react::ReactKind;
use storyteller::StorytellerKind;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::{AgentError, AgentResult};

pub const DEFAULT_AGENT_TYPE: &str = "default";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Keys a config blob must carry before anything is persisted.
const REQUIRED_CONFIG_KEYS: &[&str] = &["tools", "model_name"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Inactive,
    Active,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Inactive => "inactive",
            AgentStatus::Active => "active",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "inactive" => Some(AgentStatus::Inactive),
            "active" => Some(AgentStatus::Active),
            _ => None,
        }
    }
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

/// The persisted configuration blob. Keys this struct does not know about are
/// kept in `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub model_name: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    pub tools: Vec<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentConfig {
    /// Parse and validate a raw JSON config.
    pub fn from_value(raw: Value) -> AgentResult<Self> {
        let Some(obj) = raw.as_object() else {
            return Err(AgentError::Validation(
                "config must be a JSON object".to_string(),
            ));
        };
        let missing: Vec<&str> = REQUIRED_CONFIG_KEYS
            .iter()
            .copied()
            .filter(|k| !obj.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(AgentError::Validation(format!(
                "config missing required fields: {}",
                missing.join(", ")
            )));
        }

        let config: AgentConfig = serde_json::from_value(raw)
            .map_err(|e| AgentError::Validation(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.model_name.trim().is_empty() {
            return Err(AgentError::Validation(
                "model_name cannot be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(AgentError::Validation(format!(
                "temperature must be between 0 and 1, got {}",
                self.temperature
            )));
        }
        Ok(())
    }

    /// Merge `patch` over this config key by key and re-validate the result.
    pub fn merged(&self, patch: &Map<String, Value>) -> AgentResult<Self> {
        let mut current = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            current.insert(key.clone(), value.clone());
        }
        Self::from_value(Value::Object(current))
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

pub fn validate_name(name: &str) -> AgentResult<()> {
    if name.trim().is_empty() {
        return Err(AgentError::Validation(
            "agent name cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Empty or whitespace-only type tags mean the default kind.
pub fn normalize_type(agent_type: Option<&str>) -> String {
    match agent_type.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => DEFAULT_AGENT_TYPE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_config_round_trips_extra_keys() {
        let config = AgentConfig::from_value(json!({
            "model_name": "gpt-4o",
            "tools": [],
            "temperature": 0.2,
            "story_length": 300
        }))
        .unwrap();
        assert_eq!(config.model_name, "gpt-4o");
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.extra.get("story_length"), Some(&json!(300)));

        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["story_length"], json!(300));
    }

    #[test]
    fn temperature_defaults_when_absent() {
        let config =
            AgentConfig::from_value(json!({ "model_name": "m", "tools": [] })).unwrap();
        assert_eq!(config.temperature, DEFAULT_TEMPERATURE);
    }

    #[test]
    fn missing_required_keys_are_named() {
        let err = AgentConfig::from_value(json!({ "temperature": 0.5 })).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, AgentError::Validation(_)));
        assert!(msg.contains("tools"));
        assert!(msg.contains("model_name"));
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        for t in [-0.1, 1.5] {
            let err = AgentConfig::from_value(json!({
                "model_name": "m", "tools": [], "temperature": t
            }))
            .unwrap_err();
            assert!(matches!(err, AgentError::Validation(_)));
        }
    }

    #[test]
    fn blank_model_and_non_array_tools_are_rejected() {
        assert!(AgentConfig::from_value(json!({ "model_name": "  ", "tools": [] })).is_err());
        assert!(AgentConfig::from_value(json!({ "model_name": "m", "tools": "x" })).is_err());
        assert!(AgentConfig::from_value(json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn merge_overrides_and_revalidates() {
        let config =
            AgentConfig::from_value(json!({ "model_name": "m", "tools": [], "temperature": 0.1 }))
                .unwrap();
        let patch = json!({ "temperature": 0.9, "theme": "space" });
        let merged = config.merged(patch.as_object().unwrap()).unwrap();
        assert_eq!(merged.temperature, 0.9);
        assert_eq!(merged.model_name, "m");
        assert_eq!(merged.extra_str("theme"), Some("space"));

        let bad = json!({ "temperature": 3.0 });
        assert!(config.merged(bad.as_object().unwrap()).is_err());
    }

    #[test]
    fn status_strings() {
        assert_eq!(AgentStatus::from_status("active"), Some(AgentStatus::Active));
        assert_eq!(AgentStatus::Inactive.as_str(), "inactive");
        assert_eq!(AgentStatus::from_status("paused"), None);
    }

    #[test]
    fn names_and_types() {
        assert!(validate_name("  ").is_err());
        assert!(validate_name("Story Bot").is_ok());
        assert_eq!(normalize_type(None), "default");
        assert_eq!(normalize_type(Some(" ")), "default");
        assert_eq!(normalize_type(Some("storyteller")), "storyteller");
    }
}
