//! Tool registry for agentrun
//!
//! This module provides the `ToolRegistry` struct: the `{name -> tool}` map a
//! run resolves tool calls against. Registries are passed explicitly to each
//! run; there is no global registry.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::error::{AgentError, Result};
use crate::providers::ToolDefinition;

use super::{Tool, ToolContext, ToolOutput};

/// A registry that holds and manages tools.
///
/// # Example
///
/// ```rust
/// use agentrun::tools::{ToolRegistry, ToolContext, EchoTool};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let mut registry = ToolRegistry::new();
/// registry.register(Box::new(EchoTool));
///
/// assert!(registry.has("echo"));
///
/// let result = registry
///     .execute_with_context("echo", json!({"message": "hello"}), &ToolContext::new())
///     .await;
/// assert_eq!(result.unwrap().for_llm, "hello");
/// # });
/// ```
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a new tool in the registry.
    ///
    /// If a tool with the same name already exists, it will be replaced.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        info!(tool = %name, "Registering tool");
        self.tools.insert(name, tool);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, tool: Box<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Check whether a tool with this name is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Execute a tool by name with a specific context.
    ///
    /// Unlike the agent loop's invoker, this performs no schema validation or
    /// approval gating; it is the raw dispatch step. An unknown name is
    /// [`AgentError::ToolNotFound`].
    pub async fn execute_with_context(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        let start = Instant::now();
        debug!(tool = name, call_id = %ctx.call_id, "Executing tool");

        match tool.execute(args, ctx).await {
            Ok(output) => {
                info!(
                    tool = name,
                    call_id = %ctx.call_id,
                    is_error = output.is_error,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Tool executed"
                );
                Ok(output)
            }
            Err(e) => {
                error!(
                    tool = name,
                    call_id = %ctx.call_id,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Tool execution failed"
                );
                Err(e)
            }
        }
    }

    /// Get all tool definitions for use with model adapters.
    ///
    /// Definitions are sorted by name so identical registries always produce
    /// identical prompts.
    ///
    /// # Example
    /// ```
    /// use agentrun::tools::{ToolRegistry, EchoTool, SaveMemoryTool};
    ///
    /// let registry = ToolRegistry::new()
    ///     .with(Box::new(SaveMemoryTool))
    ///     .with(Box::new(EchoTool));
    ///
    /// let definitions = registry.definitions();
    /// assert_eq!(definitions[0].name, "echo");
    /// assert_eq!(definitions[1].name, "save_memory");
    /// ```
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.parameters()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, SaveMemoryTool};
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            Err(AgentError::Tool("disk on fire".into()))
        }
    }

    #[test]
    fn test_registry_new_is_empty() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.definitions().is_empty());
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        assert!(registry.has("echo"));
        assert!(!registry.has("nope"));
        assert_eq!(registry.get("echo").unwrap().name(), "echo");
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(EchoTool));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_names_and_definitions_sorted() {
        let registry = ToolRegistry::new()
            .with(Box::new(SaveMemoryTool))
            .with(Box::new(FailingTool))
            .with(Box::new(EchoTool));

        assert_eq!(registry.names(), vec!["echo", "failing", "save_memory"]);
        let defs: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(defs, vec!["echo", "failing", "save_memory"]);
    }

    #[tokio::test]
    async fn test_execute_with_context() {
        let registry = ToolRegistry::new().with(Box::new(EchoTool));
        let ctx = ToolContext::new().with_call("run-1", "call_1");

        let output = registry
            .execute_with_context("echo", json!({"message": "hi"}), &ctx)
            .await
            .unwrap();
        assert_eq!(output.for_llm, "hi");
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute_with_context("ghost", json!({}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(ref n) if n == "ghost"));
    }

    #[tokio::test]
    async fn test_execute_propagates_tool_error() {
        let registry = ToolRegistry::new().with(Box::new(FailingTool));
        let err = registry
            .execute_with_context("failing", json!({}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk on fire"));
    }
}
