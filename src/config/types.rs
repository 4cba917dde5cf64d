//! Configuration type definitions for agentrun
//!
//! This module defines all configuration structs used by an agent run.
//! All types implement serde traits for JSON serialization and have sensible
//! defaults, so a partial config file only needs the fields it changes.

use serde::{Deserialize, Serialize};

/// Main configuration struct for agentrun
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Turn loop settings (turn limit, system rules, model options)
    pub agent: AgentConfig,
    /// Backoff for transient model failures
    pub retry: RetryConfig,
    /// Prompt budget and history carry-forward
    pub context: ContextConfig,
    /// Tool dispatch (parallelism, fail-fast, approval)
    pub tools: ToolsConfig,
    /// Event stream buffering
    pub events: EventsConfig,
    /// Trace recording
    pub tracer: TracerConfig,
    /// Logging output
    pub logging: LoggingConfig,
}

// ============================================================================
// Agent
// ============================================================================

/// Turn loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum model turns per run before the run fails
    pub max_turns: u32,
    /// System rules placed at the top of every prompt
    pub system_rules: String,
    /// Model override passed to the adapter (adapter default when unset)
    pub model: Option<String>,
    /// Maximum tokens to generate per model call
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Use the adapter's streaming call and emit partial Content events
    pub streaming: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            system_rules: "You are a helpful assistant.".to_string(),
            model: None,
            max_tokens: None,
            temperature: None,
            streaming: false,
        }
    }
}

// ============================================================================
// Retry
// ============================================================================

/// Exponential backoff for transient model errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Wrap the model adapter in a retrying decorator
    pub enabled: bool,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay for attempt 0
    pub base_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

// ============================================================================
// Context
// ============================================================================

/// Prompt budget configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Estimated token budget for a built prompt
    pub token_budget: usize,
    /// Number of prior conversation turns carried into a new run
    pub history_turns: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: 100_000,
            history_turns: 10,
        }
    }
}

// ============================================================================
// Tools
// ============================================================================

/// Tool dispatch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Run independent calls of one turn concurrently
    pub parallel: bool,
    /// End the run on the first failed tool execution
    pub fail_fast: bool,
    /// Seconds to wait for an approval decision before denying
    pub approval_timeout_secs: u64,
    /// Tool names that need approval even if the tool does not ask for it
    pub require_approval: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            fail_fast: false,
            approval_timeout_secs: 300,
            require_approval: Vec::new(),
        }
    }
}

// ============================================================================
// Events / Tracer
// ============================================================================

/// Event stream configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Capacity of the bounded event channel; the run waits when it is full
    pub buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { buffer_size: 64 }
    }
}

/// Trace recording configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Record traces when a tracer is attached from config
    pub enabled: bool,
    /// Capacity of the trace channel; records beyond it are dropped
    pub buffer_size: usize,
    /// JSONL file for trace records (in-memory sink when unset)
    pub path: Option<String>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            buffer_size: 1024,
            path: None,
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output
    Pretty,
    /// Compact single-line output with a `component` field
    #[default]
    Component,
    /// JSON lines for log aggregators
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Append JSON logs to this file instead of stderr
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "info".to_string(),
            file: None,
        }
    }
}
