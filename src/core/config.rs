use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::platform::{NativePlatform, Platform};

/// Process-wide settings. Read from `<data_dir>/config.toml` when present,
/// then overridden by environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(skip)]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseSettings {
    /// `sqlite:///path/to/agents.db`, a bare path, or `:memory:`.
    /// Empty means `<data_dir>/agents.db`.
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            default_model: default_model(),
            default_temperature: default_temperature(),
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            llm: LlmSettings::default(),
            api: ApiSettings::default(),
            log_level: default_log_level(),
            data_dir: PathBuf::new(),
        }
    }
}

impl Settings {
    /// Load settings for the platform data directory.
    pub async fn load() -> Result<Self> {
        Self::load_from(NativePlatform::data_dir(), |key| std::env::var(key).ok()).await
    }

    /// Load from `data_dir/config.toml` (optional) and apply overrides from `env`.
    pub async fn load_from<F>(data_dir: PathBuf, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = data_dir.join("config.toml");
        let mut settings = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path).await?;
            let parsed: Settings = toml::from_str(&content)
                .with_context(|| format!("invalid {}", config_path.display()))?;
            info!("Loaded settings from {}", config_path.display());
            parsed
        } else {
            Settings::default()
        };
        settings.data_dir = data_dir;
        settings.apply_env(env)?;
        Ok(settings)
    }

    fn apply_env<F>(&mut self, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = env("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(key) = env("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(base) = env("OPENAI_BASE_URL") {
            self.llm.base_url = base;
        }
        if let Some(model) = env("DEFAULT_MODEL") {
            self.llm.default_model = model;
        }
        if let Some(temp) = env("DEFAULT_TEMPERATURE") {
            self.llm.default_temperature = temp
                .parse()
                .with_context(|| format!("DEFAULT_TEMPERATURE is not a number: {temp}"))?;
        }
        if let Some(level) = env("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(host) = env("API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = env("API_PORT") {
            self.api.port = port
                .parse()
                .with_context(|| format!("API_PORT is not a port number: {port}"))?;
        }
        Ok(())
    }

    /// Resolved database location. `None` means an in-memory database.
    pub fn database_path(&self) -> Option<PathBuf> {
        let url = self.database.url.trim();
        if url.is_empty() {
            return Some(self.data_dir.join("agents.db"));
        }
        let path = url
            .strip_prefix("sqlite:///")
            .or_else(|| url.strip_prefix("sqlite://"))
            .unwrap_or(url);
        if path == ":memory:" {
            None
        } else {
            Some(Path::new(path).to_path_buf())
        }
    }

    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }
}
