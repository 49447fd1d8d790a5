//! Configuration loading, validation, and management for Burrow.
//!
//! Loads configuration from `~/.burrow/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.burrow/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Persona (name and system instructions)
    #[serde(default)]
    pub persona: PersonaConfig,

    /// Model runtime configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Inference scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Persistence configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Discord gateway configuration
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Outbound delivery configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Seconds to wait for running jobs during shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("persona", &self.persona)
            .field("model", &self.model)
            .field("scheduler", &self.scheduler)
            .field("storage", &self.storage)
            .field("discord", &self.discord)
            .field("dispatch", &self.dispatch)
            .field("shutdown_grace_secs", &self.shutdown_grace_secs)
            .finish()
    }
}

/// The agent's persona: its name and the system instructions that open
/// every prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_persona_name")]
    pub name: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_persona_name() -> String {
    "Burrow".into()
}
fn default_system_prompt() -> String {
    "You are a friendly and concise chat assistant named Burrow. \
     Answer naturally and keep replies short unless asked for detail."
        .into()
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model alias or HF repo spec (see burrow-inference presets)
    #[serde(default = "default_model")]
    pub model: String,

    /// Total context window in tokens
    #[serde(default = "default_context_tokens")]
    pub context_tokens: usize,

    /// Tokens reserved for the model's own output
    #[serde(default = "default_reserved_output_tokens")]
    pub reserved_output_tokens: usize,

    /// Sampling temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_model() -> String {
    "mistral-7b-instruct".into()
}
fn default_context_tokens() -> usize {
    4096
}
fn default_reserved_output_tokens() -> usize {
    256
}
fn default_temperature() -> f64 {
    0.8
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            context_tokens: default_context_tokens(),
            reserved_output_tokens: default_reserved_output_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrent generations (blocking worker slots)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Global cap on queued jobs, running jobs excluded
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Per-job wall-clock deadline in seconds
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_workers() -> usize {
    2
}
fn default_queue_depth() -> usize {
    32
}
fn default_job_timeout_secs() -> u64 {
    120
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path; defaults to `~/.burrow/burrow.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Turns loaded per conversation when assembling context
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Retries for a transient append failure
    #[serde(default = "default_append_retries")]
    pub append_retries: u32,

    /// Initial backoff between append retries, in milliseconds
    #[serde(default = "default_append_backoff_ms")]
    pub append_backoff_ms: u64,
}

fn default_history_limit() -> usize {
    200
}
fn default_append_retries() -> u32 {
    3
}
fn default_append_backoff_ms() -> u64 {
    50
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            history_limit: default_history_limit(),
            append_retries: default_append_retries(),
            append_backoff_ms: default_append_backoff_ms(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bot token; usually supplied via `DISCORD_BOT_TOKEN` instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// The bot's own user id, for mention detection
    #[serde(default)]
    pub bot_user_id: String,

    /// Allowed sender ids; empty = everyone
    #[serde(default)]
    pub allowed_users: Vec<String>,

    /// Channel ids to listen in; empty = all channels
    #[serde(default)]
    pub channel_filter: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_token: None,
            bot_user_id: String::new(),
            allowed_users: vec![],
            channel_filter: vec![],
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("enabled", &self.enabled)
            .field("bot_token", &redact(&self.bot_token))
            .field("bot_user_id", &self.bot_user_id)
            .field("allowed_users", &self.allowed_users)
            .field("channel_filter", &self.channel_filter)
            .finish()
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Delivery attempts per chunk before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff between delivery retries, in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    250
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.burrow/config.toml).
    ///
    /// Environment variable overrides (highest priority):
    /// - `DISCORD_BOT_TOKEN` — gateway token
    /// - `BURROW_MODEL` — model alias/spec
    /// - `BURROW_DB_PATH` — SQLite database path
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(token) = std::env::var("DISCORD_BOT_TOKEN") {
            config.discord.bot_token = Some(token);
        }

        if let Ok(model) = std::env::var("BURROW_MODEL") {
            config.model.model = model;
        }

        if let Ok(path) = std::env::var("BURROW_DB_PATH") {
            config.storage.path = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".burrow")
    }

    /// The effective database path.
    pub fn db_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("burrow.db"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.temperature < 0.0 || self.model.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.model.reserved_output_tokens >= self.model.context_tokens {
            return Err(ConfigError::ValidationError(
                "model.reserved_output_tokens must be smaller than model.context_tokens".into(),
            ));
        }

        if self.scheduler.workers == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.workers must be at least 1".into(),
            ));
        }

        if self.scheduler.job_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.job_timeout_secs must be at least 1".into(),
            ));
        }

        if self.storage.history_limit == 0 {
            return Err(ConfigError::ValidationError(
                "storage.history_limit must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// The token budget left for conversation history after output headroom.
    pub fn history_budget(&self) -> usize {
        self.model.context_tokens - self.model.reserved_output_tokens
    }

    /// Check if a gateway token is available (from config or environment).
    pub fn has_bot_token(&self) -> bool {
        self.discord.bot_token.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            persona: PersonaConfig::default(),
            model: ModelConfig::default(),
            scheduler: SchedulerConfig::default(),
            storage: StorageConfig::default(),
            discord: DiscordConfig::default(),
            dispatch: DispatchConfig::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model.model, "mistral-7b-instruct");
        assert_eq!(config.scheduler.workers, 2);
        assert_eq!(config.history_budget(), 4096 - 256);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.model, config.model.model);
        assert_eq!(parsed.scheduler.queue_depth, config.scheduler.queue_depth);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.model.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn reserved_tokens_must_leave_history_room() {
        let mut config = AppConfig::default();
        config.model.reserved_output_tokens = config.model.context_tokens;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = AppConfig::default();
        config.scheduler.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().scheduler.queue_depth, 32);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[persona]
name = "Acorn"

[scheduler]
workers = 4
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.persona.name, "Acorn");
        assert_eq!(config.scheduler.workers, 4);
        assert_eq!(config.scheduler.queue_depth, 32);
        assert_eq!(config.model.context_tokens, 4096);
    }

    #[test]
    fn debug_redacts_bot_token() {
        let mut config = AppConfig::default();
        config.discord.bot_token = Some("very-secret-token".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("very-secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("mistral-7b-instruct"));
        assert!(toml_str.contains("queue_depth"));
    }
}
