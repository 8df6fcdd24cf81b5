//! Configuration settings for Agora.

use crate::compat::ApiFamily;
use crate::error::{AgoraError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub model: ModelSettings,
    pub providers: BTreeMap<String, ProviderSettings>,
    pub agent: AgentSettings,
    pub tools: ToolServerSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
        }
    }
}

/// Default model selection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelSettings {
    /// Provider that receives bare model ids nothing else recognizes.
    pub default_provider: Option<String>,
    /// Model used when none is requested.
    pub default_model: Option<String>,
}

/// Persisted per-provider connection settings.
///
/// Environment variables take precedence over every field here.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Wire API family, overriding the one inferred from the provider id.
    pub api_type: Option<ApiFamily>,
    /// Named request-shaping profile, overriding the one matching `api_type`.
    pub compat_profile: Option<ApiFamily>,
}

/// Run engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Maximum model calls per run.
    pub max_steps: usize,
    /// Per tool call timeout in milliseconds (0 disables).
    pub tool_timeout_ms: u64,
    /// Maximum silence on the model stream in milliseconds (0 disables).
    pub idle_timeout_ms: u64,
    /// Custom system prompt; the built-in one is used when unset.
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: 5,
            tool_timeout_ms: 120_000,
            idle_timeout_ms: 60_000,
            system_prompt: None,
        }
    }
}

/// External tool-execution (MCP) server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServerSettings {
    /// Command that starts the server. Empty disables tools.
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Timeout for a single JSON-RPC request.
    pub request_timeout_secs: u64,
}

impl Default for ToolServerSettings {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            request_timeout_secs: 120,
        }
    }
}

impl ToolServerSettings {
    /// Check if a tool server is configured.
    pub fn is_enabled(&self) -> bool {
        !self.command.trim().is_empty()
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AgoraError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agora")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Set a value by dotted key, e.g. `providers.openai.api_key`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = |v: &str| (!v.is_empty()).then(|| v.to_string());
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["general", "log_level"] => self.general.log_level = value.to_string(),
            ["model", "default_provider"] => self.model.default_provider = optional(value),
            ["model", "default_model"] => self.model.default_model = optional(value),
            ["agent", "max_steps"] => self.agent.max_steps = parse_number(key, value)?,
            ["agent", "tool_timeout_ms"] => self.agent.tool_timeout_ms = parse_number(key, value)?,
            ["agent", "idle_timeout_ms"] => self.agent.idle_timeout_ms = parse_number(key, value)?,
            ["agent", "system_prompt"] => self.agent.system_prompt = optional(value),
            ["tools", "command"] => self.tools.command = value.to_string(),
            ["tools", "request_timeout_secs"] => {
                self.tools.request_timeout_secs = parse_number(key, value)?
            }
            ["providers", provider, field] => {
                let entry = self.providers.entry(provider.to_string()).or_default();
                match *field {
                    "api_key" => entry.api_key = optional(value),
                    "base_url" => entry.base_url = optional(value),
                    "api_type" => entry.api_type = parse_family(key, value)?,
                    "compat_profile" => entry.compat_profile = parse_family(key, value)?,
                    _ => return Err(AgoraError::Config(format!("Unknown config key: {}", key))),
                }
            }
            _ => return Err(AgoraError::Config(format!("Unknown config key: {}", key))),
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| AgoraError::Config(format!("{} expects a number, got '{}'", key, value)))
}

fn parse_family(key: &str, value: &str) -> Result<Option<ApiFamily>> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|e: String| AgoraError::Config(format!("{}: {}", key, e)))
}
