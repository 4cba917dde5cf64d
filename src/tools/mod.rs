//! Tools module - Tool definitions and execution for model function calling
//!
//! This module provides the infrastructure for defining and executing tools
//! that the model can call during a run.
//!
//! # Overview
//!
//! - `Tool` trait: The interface that all tools must implement
//! - `ToolContext`: Read-only view of the run handed to a tool
//! - `ToolRegistry`: The `{name -> tool}` map a run resolves calls against
//! - `schema`: Argument validation against a tool's parameter schema
//!
//! # Built-in Tools
//!
//! - `EchoTool`: Simple echo tool for testing
//! - `SaveMemoryTool`: Store a memory entry (approval required)
//! - `ReadDocumentTool`: Read an attached document
//!
//! # Example
//!
//! ```rust
//! use agentrun::tools::{ToolRegistry, ToolContext, EchoTool, SaveMemoryTool};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let registry = ToolRegistry::new()
//!     .with(Box::new(EchoTool))
//!     .with(Box::new(SaveMemoryTool));
//!
//! let result = registry
//!     .execute_with_context("echo", json!({"message": "Hello!"}), &ToolContext::new())
//!     .await;
//! assert_eq!(result.unwrap().for_llm, "Hello!");
//!
//! assert_eq!(registry.definitions().len(), 2);
//! # });
//! ```

pub mod document;
pub mod memory;
mod registry;
pub mod schema;
mod types;

pub use document::ReadDocumentTool;
pub use memory::SaveMemoryTool;
pub use registry::ToolRegistry;
pub use types::{SideEffect, Tool, ToolContext, ToolOutput};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A simple echo tool for testing purposes.
///
/// This tool echoes back any message provided to it. It has no side effects,
/// so any number of echo calls may run in one concurrent wave.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the provided message"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo"
                }
            },
            "required": ["message"]
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::None
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");
        Ok(ToolOutput::llm_only(message))
    }
}
