//! Configuration management for agentrun
//!
//! This module provides configuration loading and saving. Configuration is
//! loaded from `~/.agentrun/config.json` (or an explicit path) with `.env`
//! support and environment variable overrides.

mod types;
pub mod validate;

pub use types::*;
pub use validate::{unknown_fields, validate_config, Diagnostic, DiagnosticLevel};

use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::warn;

impl Config {
    /// Returns the agentrun configuration directory path (~/.agentrun)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agentrun")
    }

    /// Returns the path to the config file (~/.agentrun/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// Environment variables can override config values using the pattern:
    /// `AGENTRUN_SECTION_KEY`
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    ///
    /// A `.env` file in the working directory is read first, so its values
    /// take part in the overrides. Unknown keys in the file are logged at
    /// warn level and otherwise ignored.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let raw: serde_json::Value = serde_json::from_str(&content)?;
            for diag in unknown_fields(&raw) {
                warn!(path = %diag.path, "{}", diag.message);
            }
            serde_json::from_value(raw)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: AGENTRUN_SECTION_KEY.
    /// Values that fail to parse are ignored.
    fn apply_env_overrides(&mut self) {
        // Agent
        override_parsed("AGENTRUN_AGENT_MAX_TURNS", &mut self.agent.max_turns);
        if let Ok(val) = std::env::var("AGENTRUN_AGENT_SYSTEM_RULES") {
            self.agent.system_rules = val;
        }
        if let Ok(val) = std::env::var("AGENTRUN_AGENT_MODEL") {
            self.agent.model = Some(val);
        }
        if let Some(v) = env_parsed("AGENTRUN_AGENT_MAX_TOKENS") {
            self.agent.max_tokens = Some(v);
        }
        if let Some(v) = env_parsed("AGENTRUN_AGENT_TEMPERATURE") {
            self.agent.temperature = Some(v);
        }
        override_parsed("AGENTRUN_AGENT_STREAMING", &mut self.agent.streaming);

        // Retry
        override_parsed("AGENTRUN_RETRY_ENABLED", &mut self.retry.enabled);
        override_parsed("AGENTRUN_RETRY_MAX_RETRIES", &mut self.retry.max_retries);
        override_parsed("AGENTRUN_RETRY_BASE_DELAY_MS", &mut self.retry.base_delay_ms);
        override_parsed("AGENTRUN_RETRY_MAX_DELAY_MS", &mut self.retry.max_delay_ms);

        // Context
        override_parsed("AGENTRUN_CONTEXT_TOKEN_BUDGET", &mut self.context.token_budget);
        override_parsed(
            "AGENTRUN_CONTEXT_HISTORY_TURNS",
            &mut self.context.history_turns,
        );

        // Tools
        override_parsed("AGENTRUN_TOOLS_PARALLEL", &mut self.tools.parallel);
        override_parsed("AGENTRUN_TOOLS_FAIL_FAST", &mut self.tools.fail_fast);
        override_parsed(
            "AGENTRUN_TOOLS_APPROVAL_TIMEOUT_SECS",
            &mut self.tools.approval_timeout_secs,
        );
        if let Ok(val) = std::env::var("AGENTRUN_TOOLS_REQUIRE_APPROVAL") {
            self.tools.require_approval = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        // Events / tracer
        override_parsed("AGENTRUN_EVENTS_BUFFER_SIZE", &mut self.events.buffer_size);
        override_parsed("AGENTRUN_TRACER_ENABLED", &mut self.tracer.enabled);
        override_parsed("AGENTRUN_TRACER_BUFFER_SIZE", &mut self.tracer.buffer_size);
        if let Ok(val) = std::env::var("AGENTRUN_TRACER_PATH") {
            self.tracer.path = Some(val);
        }

        // Logging
        if let Ok(val) = std::env::var("AGENTRUN_LOGGING_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("AGENTRUN_LOGGING_FORMAT") {
            if let Ok(format) = serde_json::from_value(serde_json::Value::String(val)) {
                self.logging.format = format;
            }
        }
        if let Ok(val) = std::env::var("AGENTRUN_LOGGING_FILE") {
            self.logging.file = Some(val);
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn override_parsed<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Some(v) = env_parsed(key) {
        *target = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.agent.max_turns, 20);
        assert!(config.retry.enabled);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.tools.approval_timeout_secs, 300);
        assert!(!config.tools.parallel);
        assert!(!config.tools.fail_fast);
        assert_eq!(config.events.buffer_size, 64);
        assert_eq!(config.tracer.buffer_size, 1024);
        assert_eq!(config.logging.format, LogFormat::Component);
    }

    #[test]
    fn test_config_partial_json() {
        let json = r#"{"agent": {"max_turns": 3}, "tools": {"parallel": true}}"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.agent.max_turns, 3);
        assert_eq!(config.agent.system_rules, "You are a helpful assistant.");
        assert!(config.tools.parallel);
        assert_eq!(config.tools.approval_timeout_secs, 300);
        assert_eq!(config.context.token_budget, 100_000);
    }

    #[test]
    fn test_config_dir() {
        let dir = Config::dir();
        assert!(dir.ends_with(".agentrun"));
        assert!(Config::path().ends_with("config.json"));
    }

    #[test]
    fn test_env_override() {
        env::set_var("AGENTRUN_AGENT_MODEL", "test-model");
        env::set_var("AGENTRUN_CONTEXT_TOKEN_BUDGET", "4096");
        env::set_var("AGENTRUN_TOOLS_REQUIRE_APPROVAL", "save_memory, echo ,");
        env::set_var("AGENTRUN_RETRY_MAX_RETRIES", "not-a-number");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.agent.model.as_deref(), Some("test-model"));
        assert_eq!(config.context.token_budget, 4096);
        assert_eq!(
            config.tools.require_approval,
            vec!["save_memory".to_string(), "echo".to_string()]
        );
        assert_eq!(config.retry.max_retries, 3);

        env::remove_var("AGENTRUN_AGENT_MODEL");
        env::remove_var("AGENTRUN_CONTEXT_TOKEN_BUDGET");
        env::remove_var("AGENTRUN_TOOLS_REQUIRE_APPROVAL");
        env::remove_var("AGENTRUN_RETRY_MAX_RETRIES");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let mut config = Config::default();
        config.agent.max_turns = 7;
        config.tools.fail_fast = true;
        config.save_to_path(&config_path).unwrap();

        let loaded = Config::load_from_path(&config_path).unwrap();
        assert_eq!(loaded.agent.max_turns, 7);
        assert!(loaded.tools.fail_fast);
    }

    #[test]
    fn test_load_ignores_unknown_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{"agent": {"max_turns": 4, "max_turnz": 9}, "gateway": {}}"#,
        )
        .unwrap();

        let loaded = Config::load_from_path(&config_path).unwrap();
        assert_eq!(loaded.agent.max_turns, 4);
    }

    #[test]
    fn test_load_nonexistent() {
        let path = PathBuf::from("/nonexistent/path/config.json");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.agent.max_turns, 20);
    }

    #[test]
    fn test_load_invalid_json_is_error() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, "{ nope").unwrap();
        assert!(Config::load_from_path(&config_path).is_err());
    }
}
