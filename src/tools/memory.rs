//! Memory tool.
//!
//! `save_memory` lets the model store a named fact in the agent's prompt
//! memory. Every call requires approval.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AgentError, Result};
use crate::session::{MemoryEntry, MemoryScope};

use super::{SideEffect, Tool, ToolContext, ToolOutput};

/// Resource key shared by every tool that writes memory.
pub const MEMORY_RESOURCE: &str = "memory";

#[derive(Debug, Deserialize)]
struct SaveMemoryArgs {
    key: String,
    value: String,
    #[serde(default)]
    scope: Option<String>,
}

/// Tool that stores a memory entry.
///
/// The entry is returned as a memory write on the tool output; the run
/// applies it after the turn's results are merged.
pub struct SaveMemoryTool;

#[async_trait]
impl Tool for SaveMemoryTool {
    fn name(&self) -> &str {
        "save_memory"
    }

    fn description(&self) -> &str {
        "Save a named fact to memory so it is available in later turns. \
         Use scope 'conversation' to keep it for future runs of this conversation."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "Name of the fact",
                    "minLength": 1
                },
                "value": {
                    "type": "string",
                    "description": "Content to remember"
                },
                "scope": {
                    "type": "string",
                    "enum": ["run", "conversation"],
                    "description": "Lifetime of the entry (default: run)"
                }
            },
            "required": ["key", "value"],
            "additionalProperties": false
        })
    }

    fn approval_required(&self) -> bool {
        true
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::Resource(MEMORY_RESOURCE.to_string())
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: SaveMemoryArgs = serde_json::from_value(args)
            .map_err(|e| AgentError::Tool(format!("save_memory: {}", e)))?;

        let scope = match args.scope.as_deref() {
            Some("conversation") => MemoryScope::Conversation,
            _ => MemoryScope::RunLocal,
        };
        let verb = if ctx.memory.contains_key(&args.key) {
            "Updated"
        } else {
            "Saved"
        };

        Ok(
            ToolOutput::llm_only(format!("{} memory '{}'", verb, args.key))
                .with_memory(MemoryEntry::new(&args.key, &args.value, scope)),
        )
    }
}
