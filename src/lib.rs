//! agentrun - turn-loop orchestrator for a single tool-using LLM agent
//!
//! A run takes one user input, repeatedly builds a prompt from the agent
//! context, calls the model, executes the tools it asks for (pausing for
//! approval where required) and ends with exactly one of `Completed`,
//! `Failed` or `Cancelled` on its event stream.

pub mod agent;
pub mod config;
pub mod error;
pub mod providers;
pub mod session;
pub mod tools;
pub mod utils;

pub use agent::{
    AgentContext, AgentRun, AgentRunBuilder, ApprovalDecision, Event, EventPayload, EventStream,
    RunController, RunStatus,
};
pub use config::Config;
pub use error::{AgentError, ErrorKind, Result};
pub use providers::{
    ChatOptions, LLMProvider, LLMResponse, LLMToolCall, RetryProvider, StreamEvent,
    ToolDefinition, Usage,
};
pub use session::{
    shared_history, ConversationHistory, ConversationTurn, MemoryEntry, MemoryScope, Message,
    Role, SharedHistory, ToolCall, ToolCallStatus,
};
pub use tools::{SideEffect, Tool, ToolContext, ToolOutput, ToolRegistry};
