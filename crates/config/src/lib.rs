//! Configuration loading, validation, and management for crmpilot.
//!
//! Loads configuration from `~/.crmpilot/config.toml`, then applies
//! environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.crmpilot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model-completion endpoint
    #[serde(default)]
    pub llm: LlmConfig,

    /// Record backend REST API
    #[serde(default)]
    pub backend: BackendConfig,

    /// Orchestrator limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// History compaction
    #[serde(default)]
    pub compaction: CompactionConfig,

    /// Per-session context store
    #[serde(default)]
    pub context: ContextConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Full chat-completions URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model used when a chat request does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_chat_temperature")]
    pub temperature: f32,

    #[serde(default = "default_llm_timeout")]
    pub request_timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    "http://localhost:1234/v1/chat/completions".into()
}
fn default_model() -> String {
    "nvidia-nemotron-3-nano-30b-a3b-mlx".into()
}
fn default_chat_temperature() -> f32 {
    0.7
}
fn default_llm_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            default_model: default_model(),
            temperature: default_chat_temperature(),
            request_timeout_secs: default_llm_timeout(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("default_model", &self.default_model)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the record API, without a trailing slash
    #[serde(default = "default_backend_base_url")]
    pub base_url: String,

    #[serde(default = "default_backend_timeout")]
    pub request_timeout_secs: u64,
}

fn default_backend_base_url() -> String {
    "http://localhost:3001".into()
}
fn default_backend_timeout() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_base_url(),
            request_timeout_secs: default_backend_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model calls per turn before the loop gives up
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// Context window the history must fit into
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Fraction of `max_context_tokens` that triggers auto-compaction
    #[serde(default = "default_auto_compact_threshold")]
    pub auto_compact_threshold: f64,

    /// Capacity of the per-turn event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_tool_rounds() -> usize {
    100
}
fn default_max_context_tokens() -> usize {
    100_000
}
fn default_auto_compact_threshold() -> f64 {
    0.75
}
fn default_event_buffer() -> usize {
    32
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            max_context_tokens: default_max_context_tokens(),
            auto_compact_threshold: default_auto_compact_threshold(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl AgentConfig {
    /// Estimated token count above which the history is compacted.
    pub fn compact_trigger_tokens(&self) -> usize {
        (self.max_context_tokens as f64 * self.auto_compact_threshold) as usize
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Model used for summarization
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_compaction_temperature")]
    pub temperature: f32,

    /// Histories shorter than this are never compacted
    #[serde(default = "default_min_messages")]
    pub min_messages: usize,

    /// Archived tool output and arguments are cut to this many characters
    #[serde(default = "default_archive_truncate_chars")]
    pub archive_truncate_chars: usize,
}

fn default_compaction_temperature() -> f32 {
    0.3
}
fn default_min_messages() -> usize {
    6
}
fn default_archive_truncate_chars() -> usize {
    500
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_compaction_temperature(),
            min_messages: default_min_messages(),
            archive_truncate_chars: default_archive_truncate_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Sessions kept before the least recently used one is evicted
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Idle time after which a session is evicted
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Where sessions are persisted across restarts; unset disables persistence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,

    /// Directories context files may be read from. Empty allows any path.
    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,
}

fn default_max_sessions() -> usize {
    1024
}
fn default_session_ttl() -> u64 {
    7200
}
fn default_sweep_interval() -> u64 {
    300
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            session_ttl_secs: default_session_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            snapshot_path: None,
            allowed_roots: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub allow_public_bind: bool,
}

fn default_port() -> u16 {
    8090
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allow_public_bind: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.crmpilot/config.toml),
    /// then apply environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
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

    /// Apply environment overrides through `lookup`.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(key) = lookup("LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = lookup("CRMPILOT_MODEL") {
            self.llm.default_model = model;
        }
        if let Some(url) = lookup("API_BASE_URL") {
            self.backend.base_url = url;
        }
        if let Some(model) = lookup("COMPACT_MODEL") {
            self.compaction.model = model;
        }
        if let Some(raw) = lookup("MAX_CONTEXT_TOKENS") {
            match raw.parse() {
                Ok(v) => self.agent.max_context_tokens = v,
                Err(_) => tracing::warn!(value = %raw, "Ignoring unparseable MAX_CONTEXT_TOKENS"),
            }
        }
        if let Some(raw) = lookup("AUTO_COMPACT_THRESHOLD") {
            match raw.parse() {
                Ok(v) => self.agent.auto_compact_threshold = v,
                Err(_) => tracing::warn!(value = %raw, "Ignoring unparseable AUTO_COMPACT_THRESHOLD"),
            }
        }
        if let Some(raw) = lookup("CRMPILOT_PORT") {
            match raw.parse() {
                Ok(v) => self.gateway.port = v,
                Err(_) => tracing::warn!(value = %raw, "Ignoring unparseable CRMPILOT_PORT"),
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".crmpilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.agent.auto_compact_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::ValidationError(
                "agent.auto_compact_threshold must be in (0.0, 1.0]".into(),
            ));
        }

        if self.agent.max_context_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_context_tokens must be > 0".into(),
            ));
        }

        if self.agent.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_rounds must be > 0".into(),
            ));
        }

        if self.agent.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "agent.event_buffer must be > 0".into(),
            ));
        }

        if self.context.max_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_sessions must be > 0".into(),
            ));
        }

        for (name, t) in [
            ("llm.temperature", self.llm.temperature),
            ("compaction.temperature", self.compaction.temperature),
        ] {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 2.0"
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
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
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_tool_rounds, 100);
        assert_eq!(config.agent.compact_trigger_tokens(), 75_000);
        assert_eq!(config.backend.base_url, "http://localhost:3001");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.llm.default_model, config.llm.default_model);
        assert_eq!(parsed.gateway.port, config.gateway.port);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[agent]\nmax_tool_rounds = 12\n\n[context]\nallowed_roots = [\"/srv/docs\"]\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.max_tool_rounds, 12);
        assert_eq!(config.agent.max_context_tokens, 100_000);
        assert_eq!(config.context.allowed_roots, vec![PathBuf::from("/srv/docs")]);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent\nmax_tool_rounds = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.llm.base_url, "http://localhost:1234/v1/chat/completions");
    }

    #[test]
    fn env_overrides_apply_and_bad_numbers_are_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("API_BASE_URL", "http://crm.internal:3001"),
            ("MAX_CONTEXT_TOKENS", "32000"),
            ("AUTO_COMPACT_THRESHOLD", "lots"),
            ("COMPACT_MODEL", "small-summarizer"),
            ("LLM_API_KEY", "sk-test"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.backend.base_url, "http://crm.internal:3001");
        assert_eq!(config.agent.max_context_tokens, 32_000);
        assert!((config.agent.auto_compact_threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.compaction.model, "small-summarizer");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn invalid_threshold_rejected() {
        let mut config = AppConfig::default();
        config.agent.auto_compact_threshold = 1.5;
        assert!(config.validate().is_err());
        config.agent.auto_compact_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-very-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("max_tool_rounds"));
        assert!(toml_str.contains("8090"));
    }
}
