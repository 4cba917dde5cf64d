//! Tool types for agentrun
//!
//! This module defines the core types for tool execution, including the `Tool`
//! trait that all tools must implement, and the `ToolContext` struct that
//! provides a read-only view of the run to a tool.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::Document;
use crate::error::Result;
use crate::session::MemoryEntry;

/// What a tool touches when it runs.
///
/// The invoker uses this to decide which calls of one turn may run
/// concurrently. Two calls conflict when either is `Exclusive`, or when both
/// name the same `Resource`. `None` conflicts only with `Exclusive`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "key")]
pub enum SideEffect {
    /// Pure: reads only immutable inputs.
    None,
    /// Mutates the named resource.
    Resource(String),
    /// May touch anything; never runs alongside another call.
    Exclusive,
}

impl SideEffect {
    /// Whether two calls with these side effects must not run concurrently.
    ///
    /// # Example
    /// ```
    /// use agentrun::tools::SideEffect;
    ///
    /// let a = SideEffect::Resource("memory".into());
    /// assert!(a.conflicts_with(&SideEffect::Resource("memory".into())));
    /// assert!(!a.conflicts_with(&SideEffect::None));
    /// assert!(SideEffect::None.conflicts_with(&SideEffect::Exclusive));
    /// ```
    pub fn conflicts_with(&self, other: &SideEffect) -> bool {
        match (self, other) {
            (SideEffect::Exclusive, _) | (_, SideEffect::Exclusive) => true,
            (SideEffect::Resource(a), SideEffect::Resource(b)) => a == b,
            _ => false,
        }
    }
}

/// Result of a tool execution.
///
/// Tools never touch the agent context directly. Anything they want
/// remembered is returned in `memory_writes` and applied by the run after the
/// turn's tool results are flushed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// Content sent to the model as the tool result.
    pub for_llm: String,
    /// Whether this result represents an error condition.
    pub is_error: bool,
    /// Memory entries to store once the call completes.
    pub memory_writes: Vec<MemoryEntry>,
}

impl ToolOutput {
    /// Plain result for the model.
    pub fn llm_only(content: impl Into<String>) -> Self {
        Self {
            for_llm: content.into(),
            ..Default::default()
        }
    }

    /// Error result. The model sees the error and the call is marked failed.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            for_llm: content.into(),
            is_error: true,
            ..Default::default()
        }
    }

    /// Attach a memory write.
    pub fn with_memory(mut self, entry: MemoryEntry) -> Self {
        self.memory_writes.push(entry);
        self
    }
}

/// Trait that all tools must implement.
///
/// Tools are executable functions that the model can call to perform actions.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use agentrun::tools::{SideEffect, Tool, ToolContext, ToolOutput};
/// use agentrun::error::Result;
///
/// struct ExpertLookup;
///
/// #[async_trait]
/// impl Tool for ExpertLookup {
///     fn name(&self) -> &str { "lookup_expert" }
///     fn description(&self) -> &str { "Find an expert's name by id" }
///     fn parameters(&self) -> Value {
///         serde_json::json!({
///             "type": "object",
///             "properties": { "id": { "type": "string" } },
///             "required": ["id"]
///         })
///     }
///     fn side_effect(&self) -> SideEffect { SideEffect::None }
///     async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
///         Ok(ToolOutput::llm_only(format!("expert {}: Ada", args["id"])))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name.
    ///
    /// This name is used to identify the tool when the model requests it.
    /// It should be unique within a registry.
    fn name(&self) -> &str;

    /// Get the tool description sent to the model.
    fn description(&self) -> &str;

    /// Get the JSON schema for the tool's parameters.
    ///
    /// Arguments are validated against this schema before `execute` is called.
    fn parameters(&self) -> Value;

    /// Execute the tool with validated arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput>;

    /// Whether a human must approve each call before it runs.
    fn approval_required(&self) -> bool {
        false
    }

    /// What this tool touches. Defaults to `Exclusive` (fail-closed): a tool
    /// that does not declare itself safe never runs concurrently.
    fn side_effect(&self) -> SideEffect {
        SideEffect::Exclusive
    }
}

/// Context provided to tools during execution.
///
/// A read-only view of the run: identifiers, the execution environment, the
/// attached documents and a snapshot of memory taken when the turn's tool
/// calls were dispatched.
#[derive(Clone, Default)]
pub struct ToolContext {
    /// Run the call belongs to
    pub run_id: String,
    /// Id of the call being executed
    pub call_id: String,
    /// Working directory of the execution environment
    pub workspace: Option<PathBuf>,
    /// Attached documents, in attachment order
    pub documents: Vec<Arc<Document>>,
    /// Memory as of dispatch, keyed by name
    pub memory: BTreeMap<String, MemoryEntry>,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("run_id", &self.run_id)
            .field("call_id", &self.call_id)
            .field("workspace", &self.workspace)
            .field("documents", &self.documents.len())
            .field("memory", &self.memory.len())
            .finish()
    }
}

impl ToolContext {
    /// Create a new empty tool context.
    ///
    /// # Example
    /// ```
    /// use agentrun::tools::ToolContext;
    ///
    /// let ctx = ToolContext::new().with_call("run-1", "call_1");
    /// assert_eq!(ctx.call_id, "call_1");
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run and call identifiers.
    pub fn with_call(mut self, run_id: &str, call_id: &str) -> Self {
        self.run_id = run_id.to_string();
        self.call_id = call_id.to_string();
        self
    }

    /// Set the workspace directory.
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Set the attached documents.
    pub fn with_documents(mut self, documents: Vec<Arc<Document>>) -> Self {
        self.documents = documents;
        self
    }

    /// Find an attached document by filename.
    pub fn document(&self, filename: &str) -> Option<&Arc<Document>> {
        self.documents.iter().find(|d| d.filename() == filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_effect_conflicts() {
        let none = SideEffect::None;
        let mem = SideEffect::Resource("memory".into());
        let files = SideEffect::Resource("files".into());
        let excl = SideEffect::Exclusive;

        assert!(!none.conflicts_with(&none));
        assert!(!none.conflicts_with(&mem));
        assert!(none.conflicts_with(&excl));
        assert!(mem.conflicts_with(&mem));
        assert!(!mem.conflicts_with(&files));
        assert!(excl.conflicts_with(&excl));
        assert!(files.conflicts_with(&excl));
    }

    #[test]
    fn test_side_effect_serde() {
        let json = serde_json::to_string(&SideEffect::Resource("memory".into())).unwrap();
        assert_eq!(json, r#"{"kind":"resource","key":"memory"}"#);
        let none: SideEffect = serde_json::from_str(r#"{"kind":"none"}"#).unwrap();
        assert_eq!(none, SideEffect::None);
    }

    #[test]
    fn test_tool_output_constructors() {
        let ok = ToolOutput::llm_only("done");
        assert_eq!(ok.for_llm, "done");
        assert!(!ok.is_error);
        assert!(ok.memory_writes.is_empty());

        let err = ToolOutput::error("boom");
        assert!(err.is_error);

        let with_mem = ToolOutput::llm_only("saved").with_memory(MemoryEntry::run_local("k", "v"));
        assert_eq!(with_mem.memory_writes.len(), 1);
    }

    #[test]
    fn test_tool_context_builder() {
        let ctx = ToolContext::new()
            .with_call("run-1", "call_9")
            .with_workspace("/tmp/ws");
        assert_eq!(ctx.run_id, "run-1");
        assert_eq!(ctx.call_id, "call_9");
        assert_eq!(ctx.workspace, Some(PathBuf::from("/tmp/ws")));
        assert!(ctx.document("missing.txt").is_none());
    }
}
