//! Document reading tool.
//!
//! `read_document` returns the content of an attached document. Content is
//! fetched through the document's lazy loader on first access and served
//! from cache afterwards.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{AgentError, Result};

use super::{SideEffect, Tool, ToolContext, ToolOutput};

/// Default cap on characters returned to the model per call.
const DEFAULT_MAX_CHARS: usize = 20_000;

/// Tool that reads an attached document by filename.
pub struct ReadDocumentTool {
    max_chars: usize,
}

impl Default for ReadDocumentTool {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
        }
    }
}

impl ReadDocumentTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of characters returned per call.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }
}

#[async_trait]
impl Tool for ReadDocumentTool {
    fn name(&self) -> &str {
        "read_document"
    }

    fn description(&self) -> &str {
        "Read the content of an attached document. Use 'offset' to continue \
         reading a long document."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Filename as listed under Documents"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Character offset to start from (default 0)"
                }
            },
            "required": ["filename"]
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::None
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let filename = args
            .get("filename")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::Tool("read_document: missing 'filename'".into()))?;
        let offset = args.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;

        let Some(doc) = ctx.document(filename) else {
            let available: Vec<&str> = ctx.documents.iter().map(|d| d.filename()).collect();
            return Ok(ToolOutput::error(format!(
                "No document named '{}'. Available: [{}]",
                filename,
                available.join(", ")
            )));
        };

        let content = doc.content().await?;
        let total = content.chars().count();
        if offset >= total && total > 0 {
            return Ok(ToolOutput::error(format!(
                "Offset {} is past the end of '{}' ({} characters)",
                offset, filename, total
            )));
        }

        let chunk: String = content.chars().skip(offset).take(self.max_chars).collect();
        let end = offset + chunk.chars().count();
        let mut out = chunk;
        if end < total {
            out.push_str(&format!(
                "\n\n[truncated: showing characters {}..{} of {}; continue with offset {}]",
                offset, end, total, end
            ));
        }
        Ok(ToolOutput::llm_only(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Document, StaticLoader};
    use std::sync::Arc;

    fn ctx_with(content: &str) -> ToolContext {
        let doc = Document::new(
            "experts.txt",
            "text/plain",
            content.len() as u64,
            Arc::new(StaticLoader::new(content)),
        );
        ToolContext::new().with_documents(vec![Arc::new(doc)])
    }

    #[test]
    fn test_read_document_metadata() {
        let tool = ReadDocumentTool::new();
        assert_eq!(tool.name(), "read_document");
        assert!(!tool.approval_required());
        assert_eq!(tool.side_effect(), SideEffect::None);
    }

    #[tokio::test]
    async fn test_read_whole_document() {
        let ctx = ctx_with("expert1: Ada\nexpert2: Grace");
        let output = ReadDocumentTool::new()
            .execute(json!({"filename": "experts.txt"}), &ctx)
            .await
            .unwrap();
        assert!(!output.is_error);
        assert_eq!(output.for_llm, "expert1: Ada\nexpert2: Grace");
    }

    #[tokio::test]
    async fn test_read_document_truncates_with_hint() {
        let ctx = ctx_with("abcdefghij");
        let tool = ReadDocumentTool::new().with_max_chars(4);

        let first = tool
            .execute(json!({"filename": "experts.txt"}), &ctx)
            .await
            .unwrap();
        assert!(first.for_llm.starts_with("abcd"));
        assert!(first.for_llm.contains("continue with offset 4"));

        let last = tool
            .execute(json!({"filename": "experts.txt", "offset": 8}), &ctx)
            .await
            .unwrap();
        assert_eq!(last.for_llm, "ij");
    }

    #[tokio::test]
    async fn test_read_document_offset_past_end() {
        let ctx = ctx_with("abc");
        let output = ReadDocumentTool::new()
            .execute(json!({"filename": "experts.txt", "offset": 10}), &ctx)
            .await
            .unwrap();
        assert!(output.is_error);
    }

    #[tokio::test]
    async fn test_read_unknown_document() {
        let ctx = ctx_with("abc");
        let output = ReadDocumentTool::new()
            .execute(json!({"filename": "missing.pdf"}), &ctx)
            .await
            .unwrap();
        assert!(output.is_error);
        assert!(output.for_llm.contains("experts.txt"));
    }
}
