//! Session types for agentrun
//!
//! This module defines the core conversation types: messages, roles, tool
//! calls with their lifecycle status, memory entries and the persisted
//! conversation turn record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single message in a conversation.
///
/// Messages can be from users, assistants, system prompts, or tool results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender
    pub role: Role,
    /// The text content of the message
    pub content: String,
    /// Tool calls made by the assistant (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// ID of the tool call this message is responding to (for tool results)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new user message.
    ///
    /// # Example
    /// ```
    /// use agentrun::session::{Message, Role};
    ///
    /// let msg = Message::user("get expert1 name");
    /// assert_eq!(msg.role, Role::User);
    /// ```
    pub fn user(content: &str) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: &str) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: &str) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a new tool result message.
    ///
    /// # Example
    /// ```
    /// use agentrun::session::{Message, Role};
    ///
    /// let msg = Message::tool_result("call_123", "saved");
    /// assert_eq!(msg.role, Role::Tool);
    /// assert_eq!(msg.tool_call_id.as_deref(), Some("call_123"));
    /// ```
    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.to_string()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// Create an assistant message with tool calls.
    pub fn assistant_with_tools(content: &str, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Check if this message has tool calls.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .map(|tc| !tc.is_empty())
            .unwrap_or(false)
    }

    /// Check if this is a tool result message.
    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool && self.tool_call_id.is_some()
    }

    /// Whether this assistant message issued a call with the given id.
    pub fn issued_call(&self, call_id: &str) -> bool {
        self.tool_calls
            .as_ref()
            .map(|calls| calls.iter().any(|c| c.id == call_id))
            .unwrap_or(false)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompts and instructions
    System,
    /// Messages from the user
    User,
    /// Messages from the AI assistant
    Assistant,
    /// Results from tool executions
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Lifecycle of a tool call within a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    /// Issued by the model, not yet resolved
    #[default]
    Pending,
    /// Cleared for execution (approval granted or not required)
    Approved,
    /// Approval denied or timed out; never executed
    Denied,
    /// Executed successfully
    Executed,
    /// Unknown tool, invalid arguments, execution error, or skipped by cancellation
    Failed,
}

impl ToolCallStatus {
    /// Terminal statuses are never changed again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolCallStatus::Denied | ToolCallStatus::Executed | ToolCallStatus::Failed
        )
    }
}

impl std::fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolCallStatus::Pending => "pending",
            ToolCallStatus::Approved => "approved",
            ToolCallStatus::Denied => "denied",
            ToolCallStatus::Executed => "executed",
            ToolCallStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A tool call made by the assistant.
///
/// Tool calls represent requests to execute specific tools with given arguments.
/// The `id` is unique within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the tool to call
    pub name: String,
    /// JSON-encoded arguments for the tool
    pub arguments: String,
    /// Where this call is in its lifecycle
    #[serde(default)]
    pub status: ToolCallStatus,
}

impl ToolCall {
    /// Create a new pending tool call.
    ///
    /// # Example
    /// ```
    /// use agentrun::session::{ToolCall, ToolCallStatus};
    ///
    /// let call = ToolCall::new("call_123", "save_memory", r#"{"key": "k", "value": "v"}"#);
    /// assert_eq!(call.status, ToolCallStatus::Pending);
    /// ```
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
            status: ToolCallStatus::Pending,
        }
    }

    /// Parse the arguments as a specific type.
    pub fn parse_arguments<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.arguments)
    }

    /// Parse the arguments as a JSON value. Empty arguments are an empty object.
    pub fn arguments_value(&self) -> serde_json::Result<serde_json::Value> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// Lifetime of a memory entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    /// Discarded when the run ends
    #[default]
    RunLocal,
    /// Stored on the conversation turn and restored by the next run
    Conversation,
}

/// A named fact the agent keeps in its prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub scope: MemoryScope,
}

impl MemoryEntry {
    pub fn new(key: &str, value: &str, scope: MemoryScope) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            scope,
        }
    }

    /// Shorthand for a run-local entry.
    pub fn run_local(key: &str, value: &str) -> Self {
        Self::new(key, value, MemoryScope::RunLocal)
    }

    /// Shorthand for a conversation-persistent entry.
    pub fn conversation(key: &str, value: &str) -> Self {
        Self::new(key, value, MemoryScope::Conversation)
    }
}

/// Compact record of one emitted event, kept on the conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    /// Sequence number of the event within its run
    pub seq: u64,
    /// Event kind (`content`, `tool`, `approval`, ...)
    pub kind: String,
    /// Tool call this event refers to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Short human-readable detail (tool status, error kind, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One completed run of a conversation.
///
/// Created exactly once per successful `AgentRun::start`, after the final
/// response is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Position of this turn in the conversation (1-based)
    pub turn_id: u64,
    /// Run that produced this turn
    pub run_id: String,
    /// User input that started the run
    pub input: String,
    /// Final assistant response
    pub output: String,
    /// Events the run emitted, in sequence order
    #[serde(default)]
    pub events: Vec<EventSummary>,
    /// Conversation-scoped memory as of the end of the run
    #[serde(default)]
    pub memory: Vec<MemoryEntry>,
    /// When the run completed
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert!(msg.tool_calls.is_none());
        assert!(msg.tool_call_id.is_none());

        assert_eq!(Message::assistant("Hi").role, Role::Assistant);
        assert_eq!(Message::system("Rules").role, Role::System);
    }

    #[test]
    fn test_message_tool_result() {
        let msg = Message::tool_result("call_123", "Success");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id, Some("call_123".to_string()));
        assert!(msg.is_tool_result());
        assert!(!Message::user("x").is_tool_result());
    }

    #[test]
    fn test_message_with_tool_calls() {
        let tool_call = ToolCall::new("call_1", "search", r#"{"q": "test"}"#);
        let msg = Message::assistant_with_tools("Searching...", vec![tool_call]);

        assert!(msg.has_tool_calls());
        assert!(msg.issued_call("call_1"));
        assert!(!msg.issued_call("call_2"));
        assert!(!Message::assistant("plain").has_tool_calls());
    }

    #[test]
    fn test_role_serialize() {
        let json = serde_json::to_string(&Role::User).unwrap();
        assert_eq!(json, r#""user""#);
        let parsed: Role = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Role::User);
        assert_eq!(Role::Tool.to_string(), "tool");
    }

    #[test]
    fn test_tool_call_status() {
        assert!(!ToolCallStatus::Pending.is_terminal());
        assert!(!ToolCallStatus::Approved.is_terminal());
        assert!(ToolCallStatus::Denied.is_terminal());
        assert!(ToolCallStatus::Executed.is_terminal());
        assert!(ToolCallStatus::Failed.is_terminal());
        assert_eq!(ToolCallStatus::Denied.to_string(), "denied");
        assert_eq!(
            serde_json::to_string(&ToolCallStatus::Executed).unwrap(),
            r#""executed""#
        );
    }

    #[test]
    fn test_tool_call_status_defaults_when_missing() {
        let call: ToolCall =
            serde_json::from_str(r#"{"id": "c1", "name": "echo", "arguments": "{}"}"#).unwrap();
        assert_eq!(call.status, ToolCallStatus::Pending);
    }

    #[test]
    fn test_tool_call_arguments_value() {
        let call = ToolCall::new("c1", "echo", r#"{"message": "hi"}"#);
        assert_eq!(call.arguments_value().unwrap()["message"], "hi");

        let empty = ToolCall::new("c2", "echo", "  ");
        assert!(empty.arguments_value().unwrap().as_object().unwrap().is_empty());

        let broken = ToolCall::new("c3", "echo", "{not json");
        assert!(broken.arguments_value().is_err());
    }

    #[test]
    fn test_memory_entry_scopes() {
        let local = MemoryEntry::run_local("scratch", "1");
        assert_eq!(local.scope, MemoryScope::RunLocal);
        let persistent = MemoryEntry::conversation("expert1", "Ada");
        assert_eq!(persistent.scope, MemoryScope::Conversation);

        let json = serde_json::to_string(&persistent).unwrap();
        assert!(json.contains(r#""scope":"conversation""#));
    }

    #[test]
    fn test_message_serialization_skips_none() {
        let msg = Message::user("Hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
    }

    #[test]
    fn test_conversation_turn_serialization() {
        let turn = ConversationTurn {
            turn_id: 1,
            run_id: "run-1".into(),
            input: "get expert1 name".into(),
            output: "Ada".into(),
            events: vec![EventSummary {
                seq: 1,
                kind: "content".into(),
                call_id: None,
                detail: None,
            }],
            memory: vec![MemoryEntry::conversation("expert1", "Ada")],
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&turn).unwrap();
        let parsed: ConversationTurn = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, turn);
    }
}
