//! Configuration management
//!
//! This module handles loading, validation, and management of the Pilot configuration.
//! Configuration is stored in TOML format at ~/.pilot/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **llm**: Capability provider endpoints and request limits
//! - **actuation**: Desktop actuation endpoint
//! - **agent**: Orchestration defaults (model, context window, summarization)
//!
//! API keys never live in the file. Each provider names the environment
//! variable its key is read from.
//!
//! # Examples
//!
//! ```no_run
//! use pilot_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Default provider: {}", config.agent.default_provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Provider keys the registry knows how to build
pub const PROVIDER_KEYS: [&str; 4] = ["anthropic", "openai", "google", "proxy"];

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Capability provider configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Actuation endpoint configuration
    #[serde(default)]
    pub actuation: ActuationConfig,

    /// Orchestration defaults
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Capability provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    #[serde(default = "default_anthropic")]
    pub anthropic: ProviderConfig,

    #[serde(default = "default_openai")]
    pub openai: ProviderConfig,

    #[serde(default = "default_google")]
    pub google: ProviderConfig,

    /// OpenAI-compatible gateway
    #[serde(default = "default_proxy")]
    pub proxy: ProviderConfig,

    /// Output token ceiling per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Whole-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Endpoint settings for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,

    /// Name of the environment variable holding the API key
    pub api_key_env: String,
}

impl ProviderConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Actuation endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuationConfig {
    /// Base URL of the desktop daemon; actions are posted to `{base_url}/computer-use`
    #[serde(default = "default_actuation_base_url")]
    pub base_url: String,

    #[serde(default = "default_actuation_timeout_secs")]
    pub timeout_secs: u64,
}

/// Orchestration defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider key used for tasks created from the CLI
    #[serde(default = "default_provider")]
    pub default_provider: String,

    #[serde(default = "default_model")]
    pub default_model: String,

    /// Context window assumed when a task's model does not declare one
    #[serde(default = "default_context_window")]
    pub default_context_window: u64,

    /// Fraction of the context window that triggers summarization
    #[serde(default = "default_summarization_ratio")]
    pub summarization_ratio: f64,

    /// Unsummarized messages included after the plan narrative
    #[serde(default = "default_plan_context_messages")]
    pub plan_context_messages: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.pilot/data")
}

fn default_anthropic() -> ProviderConfig {
    ProviderConfig {
        base_url: "https://api.anthropic.com/v1".to_string(),
        api_key_env: "ANTHROPIC_API_KEY".to_string(),
    }
}

fn default_openai() -> ProviderConfig {
    ProviderConfig {
        base_url: "https://api.openai.com/v1".to_string(),
        api_key_env: "OPENAI_API_KEY".to_string(),
    }
}

fn default_google() -> ProviderConfig {
    ProviderConfig {
        base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        api_key_env: "GEMINI_API_KEY".to_string(),
    }
}

fn default_proxy() -> ProviderConfig {
    ProviderConfig {
        base_url: "http://localhost:4000".to_string(),
        api_key_env: "PILOT_PROXY_API_KEY".to_string(),
    }
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_actuation_base_url() -> String {
    "http://localhost:9990".to_string()
}

fn default_actuation_timeout_secs() -> u64 {
    60
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_context_window() -> u64 {
    200_000
}

fn default_summarization_ratio() -> f64 {
    0.75
}

fn default_plan_context_messages() -> usize {
    10
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            anthropic: default_anthropic(),
            openai: default_openai(),
            google: default_google(),
            proxy: default_proxy(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            base_url: default_actuation_base_url(),
            timeout_secs: default_actuation_timeout_secs(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            default_model: default_model(),
            default_context_window: default_context_window(),
            summarization_ratio: default_summarization_ratio(),
            plan_context_messages: default_plan_context_messages(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.pilot/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();

        // Serialize before processing so the file keeps the portable ~ form
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.pilot/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".pilot").join("config.toml"))
    }

    /// Settings for one provider key
    pub fn provider(&self, key: &str) -> Option<&ProviderConfig> {
        match key {
            "anthropic" => Some(&self.llm.anthropic),
            "openai" => Some(&self.llm.openai),
            "google" => Some(&self.llm.google),
            "proxy" => Some(&self.llm.proxy),
            _ => None,
        }
    }

    /// Path of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("pilot.db")
    }

    /// Validate values, expand ~ in paths and create the data directory.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        self.validate()?;

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }

    /// Validate values without touching the file system.
    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if !PROVIDER_KEYS.contains(&self.agent.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.agent.default_provider,
                PROVIDER_KEYS.join(", ")
            )));
        }

        let ratio = self.agent.summarization_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(EngineError::Config(
                "summarization_ratio must be in (0.0, 1.0]".to_string(),
            ));
        }

        if self.agent.default_context_window == 0 {
            return Err(EngineError::Config(
                "default_context_window must be greater than zero".to_string(),
            ));
        }

        if self.actuation.timeout_secs == 0 || self.llm.request_timeout_secs == 0 {
            return Err(EngineError::Config(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
