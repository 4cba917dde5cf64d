//! Provider types for agentrun
//!
//! This module defines the model adapter seam: the `LLMProvider` trait, chat
//! options, response types and the incremental `StreamEvent` used by streaming
//! adapters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::session::Message;

/// Definition of a tool that can be called by the LLM.
///
/// Tool definitions describe the available tools, their parameters,
/// and how the LLM should invoke them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The name of the tool (must be unique)
    pub name: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    ///
    /// # Example
    /// ```
    /// use agentrun::providers::ToolDefinition;
    /// use serde_json::json;
    ///
    /// let tool = ToolDefinition::new(
    ///     "lookup_expert",
    ///     "Look up an expert by id",
    ///     json!({
    ///         "type": "object",
    ///         "properties": {
    ///             "id": { "type": "string" }
    ///         },
    ///         "required": ["id"]
    ///     }),
    /// );
    /// assert_eq!(tool.name, "lookup_expert");
    /// ```
    pub fn new(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// Trait for model adapters.
///
/// Implement this trait to plug a concrete model API into an agent run. The
/// adapter translates between agentrun's message format and the vendor's wire
/// format; transport details stay on the adapter's side of the seam.
///
/// Adapters should honor `options.cancellation`: when the token fires, an
/// in-flight call is expected to return promptly (typically with
/// [`AgentError::Cancelled`](crate::error::AgentError::Cancelled)).
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Send a chat completion request to the model.
    ///
    /// # Arguments
    /// * `messages` - The prompt, system message first
    /// * `tools` - Schemas of the tools the model may call
    /// * `options` - Model override, sampling settings and cancellation signal
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: ChatOptions,
    ) -> Result<LLMResponse>;

    /// Streaming variant of [`chat`](Self::chat).
    ///
    /// The default implementation performs a regular `chat` call and delivers
    /// the whole response as a single [`StreamEvent::Done`].
    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let response = self.chat(messages, tools, options).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(StreamEvent::from(response)).await;
        Ok(rx)
    }

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;

    /// Get the provider name.
    fn name(&self) -> &str;
}

/// Options for chat completion requests.
///
/// Use the builder pattern to construct options.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Model override (adapter default when `None`)
    pub model: Option<String>,
    /// Maximum number of tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    pub temperature: Option<f32>,
    /// Cancellation signal for the in-flight call
    pub cancellation: Option<CancellationToken>,
}

impl ChatOptions {
    /// Create new default chat options.
    ///
    /// # Example
    /// ```
    /// use agentrun::providers::ChatOptions;
    ///
    /// let options = ChatOptions::new();
    /// assert!(options.max_tokens.is_none());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the model for this request.
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    /// Set the maximum number of tokens to generate.
    ///
    /// # Example
    /// ```
    /// use agentrun::providers::ChatOptions;
    ///
    /// let options = ChatOptions::new().with_max_tokens(1000);
    /// assert_eq!(options.max_tokens, Some(1000));
    /// ```
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature for sampling.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Attach a cancellation token the adapter should observe.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Whether the attached cancellation token (if any) has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }
}

/// Response from a model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LLMResponse {
    /// Text content of the response
    pub content: String,
    /// Tool calls made by the model (if any)
    #[serde(default)]
    pub tool_calls: Vec<LLMToolCall>,
    /// Reasoning trace, for models that expose one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Token usage information (if available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl LLMResponse {
    /// Create a simple text response with no tool calls.
    ///
    /// # Example
    /// ```
    /// use agentrun::providers::LLMResponse;
    ///
    /// let response = LLMResponse::text("expert1 is Ada");
    /// assert_eq!(response.content, "expert1 is Ada");
    /// assert!(!response.has_tool_calls());
    /// ```
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            ..Default::default()
        }
    }

    /// Create a response with tool calls.
    pub fn with_tools(content: &str, tool_calls: Vec<LLMToolCall>) -> Self {
        Self {
            content: content.to_string(),
            tool_calls,
            ..Default::default()
        }
    }

    /// Attach a reasoning trace.
    pub fn with_thinking(mut self, thinking: &str) -> Self {
        self.thinking = Some(thinking.to_string());
        self
    }

    /// Check if this response contains any tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Set usage information for this response.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A tool call made by the LLM.
///
/// This represents the model's request to execute a specific tool
/// with given arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMToolCall {
    /// Identifier assigned by the model (made unique per run by the agent loop)
    pub id: String,
    /// Name of the tool to execute
    pub name: String,
    /// JSON-encoded arguments for the tool
    pub arguments: String,
}

impl LLMToolCall {
    /// Create a new tool call.
    ///
    /// # Example
    /// ```
    /// use agentrun::providers::LLMToolCall;
    ///
    /// let call = LLMToolCall::new("call_1", "save_memory", r#"{"key": "k", "value": "v"}"#);
    /// assert_eq!(call.name, "save_memory");
    /// ```
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    /// Parse the arguments as a specific type.
    pub fn parse_arguments<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.arguments)
    }
}

/// Token usage information from a completion request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt
    pub prompt_tokens: u32,
    /// Number of tokens in the completion
    pub completion_tokens: u32,
    /// Total tokens used (prompt + completion)
    pub total_tokens: u32,
}

impl Usage {
    /// Create new usage information.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Incremental chunk produced by [`LLMProvider::chat_stream`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A piece of response text.
    Delta(String),
    /// A piece of the reasoning trace.
    Thinking(String),
    /// End of stream with the assembled response.
    Done {
        content: String,
        tool_calls: Vec<LLMToolCall>,
        thinking: Option<String>,
        usage: Option<Usage>,
    },
    /// The stream failed mid-flight.
    Error(String),
}

impl From<LLMResponse> for StreamEvent {
    fn from(response: LLMResponse) -> Self {
        StreamEvent::Done {
            content: response.content,
            tool_calls: response.tool_calls,
            thinking: response.thinking,
            usage: response.usage,
        }
    }
}
