//! Configuration validation.
//!
//! Two checks live here:
//! - [`validate_config`] rejects a configuration a run cannot start with. The
//!   agent loop calls it before the first turn and turns a failure into a
//!   fatal-config error event.
//! - [`unknown_fields`] reports unrecognized keys in raw config JSON with
//!   "did you mean?" suggestions.

use serde_json::Value;
use std::collections::HashSet;

use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::tools::ToolRegistry;

/// Known top-level config field names.
const KNOWN_TOP_LEVEL: &[&str] = &[
    "agent", "retry", "context", "tools", "events", "tracer", "logging",
];

/// Known fields for each section.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    (
        "agent",
        &[
            "max_turns",
            "system_rules",
            "model",
            "max_tokens",
            "temperature",
            "streaming",
        ],
    ),
    (
        "retry",
        &["enabled", "max_retries", "base_delay_ms", "max_delay_ms"],
    ),
    ("context", &["token_budget", "history_turns"]),
    (
        "tools",
        &[
            "parallel",
            "fail_fast",
            "approval_timeout_secs",
            "require_approval",
        ],
    ),
    ("events", &["buffer_size"]),
    ("tracer", &["enabled", "buffer_size", "path"]),
    ("logging", &["format", "level", "file"]),
];

/// A validation diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Warn,
    Error,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Simple Levenshtein distance for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut matrix = vec![vec![0usize; b.len() + 1]; a.len() + 1];

    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, val) in matrix[0].iter_mut().enumerate() {
        *val = j;
    }

    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            matrix[i + 1][j + 1] = std::cmp::min(
                std::cmp::min(matrix[i][j + 1] + 1, matrix[i + 1][j] + 1),
                matrix[i][j] + cost,
            );
        }
    }
    matrix[a.len()][b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn unknown_key(path: String, key: &str, known: &[&str]) -> Diagnostic {
    let message = match suggest_field(key, known) {
        Some(suggestion) => format!("Unknown field '{}' ({})", key, suggestion),
        None => format!("Unknown field '{}'", key),
    };
    Diagnostic {
        level: DiagnosticLevel::Warn,
        path,
        message,
    }
}

/// Report unknown keys in a raw JSON config value.
///
/// Unknown keys are ignored by deserialization, so these are warnings. A
/// value that is not an object at all is an error.
pub fn unknown_fields(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Error,
                path: String::new(),
                message: "Config must be a JSON object".to_string(),
            });
            return diagnostics;
        }
    };

    let known_top: HashSet<&str> = KNOWN_TOP_LEVEL.iter().copied().collect();
    for (key, value) in obj {
        if !known_top.contains(key.as_str()) {
            diagnostics.push(unknown_key(key.clone(), key, KNOWN_TOP_LEVEL));
            continue;
        }

        let Some(section) = value.as_object() else {
            continue;
        };
        let Some((_, fields)) = KNOWN_SECTIONS.iter().find(|(name, _)| name == key) else {
            continue;
        };
        for field in section.keys() {
            if !fields.contains(&field.as_str()) {
                diagnostics.push(unknown_key(format!("{}.{}", key, field), field, fields));
            }
        }
    }

    diagnostics
}

/// Check that a run can start with this configuration and tool set.
///
/// Returns [`AgentError::Config`] listing every problem found.
pub fn validate_config(config: &Config, registry: &ToolRegistry) -> Result<()> {
    let mut problems = Vec::new();

    if config.agent.max_turns == 0 {
        problems.push("agent.max_turns must be at least 1".to_string());
    }
    if config.context.token_budget == 0 {
        problems.push("context.token_budget must be positive".to_string());
    }
    if config.events.buffer_size == 0 {
        problems.push("events.buffer_size must be positive".to_string());
    }
    if config.tracer.buffer_size == 0 {
        problems.push("tracer.buffer_size must be positive".to_string());
    }
    if config.tools.approval_timeout_secs == 0 {
        problems.push("tools.approval_timeout_secs must be at least 1".to_string());
    }
    if config.retry.enabled && config.retry.base_delay_ms > config.retry.max_delay_ms {
        problems.push("retry.base_delay_ms exceeds retry.max_delay_ms".to_string());
    }
    if let Some(t) = config.agent.temperature {
        if !(0.0..=2.0).contains(&t) {
            problems.push(format!("agent.temperature {} is outside 0.0..=2.0", t));
        }
    }

    for name in &config.tools.require_approval {
        if !registry.has(name) {
            problems.push(format!(
                "tools.require_approval names unknown tool '{}'",
                name
            ));
        }
    }

    for name in registry.names() {
        if let Some(tool) = registry.get(name) {
            let schema = tool.parameters();
            let is_object = schema.get("type").and_then(Value::as_str) == Some("object");
            if !is_object {
                problems.push(format!(
                    "tool '{}' parameter schema must be an object schema",
                    name
                ));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(AgentError::Config(problems.join("; ")))
    }
}
