//! Error types for agentrun
//!
//! This module defines the error types used throughout the crate. Uses
//! `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.
//!
//! Two layers exist:
//! - [`AgentError`] is the Rust error returned by fallible operations.
//! - [`ErrorKind`] is the run-level taxonomy carried inside Error events, so a
//!   consumer of the event stream can classify failures without the Rust type.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Structured provider error classification.
///
/// Provides fine-grained categorization of model adapter failures, enabling
/// retry decisions without string matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// 401: Invalid API key or authentication failure
    Auth(String),
    /// 429: Rate limit or quota exceeded
    RateLimit(String),
    /// 402: Payment required or billing issue
    Billing(String),
    /// 500/502/503/504: Server-side errors
    ServerError(String),
    /// 400: Bad request, invalid JSON, malformed parameters
    InvalidRequest(String),
    /// 404: Model not found or endpoint not available
    ModelNotFound(String),
    /// Connection or read timeout
    Timeout(String),
    /// Provider is overloaded, retry with backoff
    Overloaded(String),
    /// Request format error (e.g. malformed tool call id), do not retry
    Format(String),
    /// Catch-all for unrecognized errors
    Unknown(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ProviderError::RateLimit(msg) => write!(f, "Rate limit error: {}", msg),
            ProviderError::Billing(msg) => write!(f, "Billing error: {}", msg),
            ProviderError::ServerError(msg) => write!(f, "Server error: {}", msg),
            ProviderError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ProviderError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            ProviderError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ProviderError::Overloaded(msg) => write!(f, "Overloaded error: {}", msg),
            ProviderError::Format(msg) => write!(f, "Format error: {}", msg),
            ProviderError::Unknown(msg) => write!(f, "Unknown provider error: {}", msg),
        }
    }
}

impl ProviderError {
    /// Returns `true` if this error is transient and the request should be retried.
    ///
    /// Retryable errors: RateLimit, ServerError, Timeout, Overloaded.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit(_)
                | ProviderError::ServerError(_)
                | ProviderError::Timeout(_)
                | ProviderError::Overloaded(_)
        )
    }

    /// Returns the HTTP status code associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Auth(_) => Some(401),
            ProviderError::RateLimit(_) => Some(429),
            ProviderError::Billing(_) => Some(402),
            ProviderError::ServerError(_) => Some(500),
            ProviderError::InvalidRequest(_) => Some(400),
            ProviderError::ModelNotFound(_) => Some(404),
            ProviderError::Timeout(_) => None,
            ProviderError::Overloaded(_) => Some(503),
            ProviderError::Format(_) => Some(400),
            ProviderError::Unknown(_) => None,
        }
    }
}

impl From<ProviderError> for AgentError {
    fn from(err: ProviderError) -> Self {
        AgentError::ProviderTyped(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for agentrun operations.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Configuration errors detected before a run starts (fatal).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unclassified model adapter error.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Structured provider error with classification for retry decisions.
    #[error("Provider error: {0}")]
    ProviderTyped(ProviderError),

    /// Tool execution failure.
    #[error("Tool error: {0}")]
    Tool(String),

    /// The model referenced a tool that is not registered.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool arguments failed schema validation.
    #[error("Invalid arguments for tool '{tool}': {}", .problems.join("; "))]
    InvalidArguments { tool: String, problems: Vec<String> },

    /// An interceptor aborted the model call.
    #[error("Interceptor '{name}' failed: {message}")]
    Interceptor { name: String, message: String },

    /// Even the minimal prompt (system rules + current turn) exceeds the budget.
    #[error("Context overflow: minimal prompt needs {required} tokens, budget is {budget}")]
    ContextOverflow { required: usize, budget: usize },

    /// The run exceeded its configured maximum number of turns.
    #[error("Turn limit exceeded: {0} turns")]
    TurnLimitExceeded(u32),

    /// The run (or an in-flight model call) was cancelled.
    #[error("Run cancelled")]
    Cancelled,

    /// Conversation history errors (invalid record, persistence failures, etc.)
    #[error("Session error: {0}")]
    Session(String),

    /// Resource not found (pending approvals, documents, etc.)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Map this error onto the run-level taxonomy used in Error events.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Config(_) => ErrorKind::FatalConfig,
            AgentError::Provider(_) | AgentError::ProviderTyped(_) => {
                if crate::providers::retry::is_retryable(self) {
                    ErrorKind::TransientModel
                } else {
                    ErrorKind::Model
                }
            }
            AgentError::Tool(_) | AgentError::ToolNotFound(_) => ErrorKind::ToolExecution,
            AgentError::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            AgentError::Interceptor { .. } => ErrorKind::Interceptor,
            AgentError::ContextOverflow { .. } => ErrorKind::ContextOverflow,
            AgentError::TurnLimitExceeded(_) => ErrorKind::TurnLimitExceeded,
            AgentError::Cancelled => ErrorKind::Cancelled,
            AgentError::Session(_)
            | AgentError::NotFound(_)
            | AgentError::Io(_)
            | AgentError::Json(_) => ErrorKind::Internal,
        }
    }
}

/// A specialized `Result` type for agentrun operations.
pub type Result<T> = std::result::Result<T, AgentError>;

// ============================================================================
// Run-level error taxonomy
// ============================================================================

/// Classification carried by Error events on the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Model call failed transiently and retries were exhausted.
    TransientModel,
    /// Model call failed with a non-retryable error.
    Model,
    /// An interceptor aborted the model call.
    Interceptor,
    /// A tool returned an error or could not be resolved.
    ToolExecution,
    /// Tool arguments did not match the declared schema.
    InvalidArguments,
    /// An approval-gated tool was denied (or timed out).
    ApprovalDenied,
    /// The prompt could not fit the configured budget.
    ContextOverflow,
    /// Invalid configuration detected before the first turn.
    FatalConfig,
    /// Maximum turn count reached.
    TurnLimitExceeded,
    /// Cancellation surfaced as an error by a collaborator.
    Cancelled,
    /// Anything else (I/O, serialization).
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TransientModel => "transient_model",
            ErrorKind::Model => "model",
            ErrorKind::Interceptor => "interceptor",
            ErrorKind::ToolExecution => "tool_execution",
            ErrorKind::InvalidArguments => "invalid_arguments",
            ErrorKind::ApprovalDenied => "approval_denied",
            ErrorKind::ContextOverflow => "context_overflow",
            ErrorKind::FatalConfig => "fatal_config",
            ErrorKind::TurnLimitExceeded => "turn_limit_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}
