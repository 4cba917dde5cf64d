//! Agent context for a run
//!
//! `AgentContext` owns everything a run puts in front of the model: the
//! system rules, the ordered conversation messages, named memory entries,
//! attached documents and the execution environment. Only the owning run
//! mutates it; everyone else sees an immutable [`ContextSnapshot`].
//!
//! # Prompt layout
//!
//! ```text
//! system:    rules
//!            ## Memory      (key: value per entry)
//!            ## Documents   (filename, mime type, size per document)
//! ...        carried-forward conversation messages (oldest first)
//! user:      current input
//! ...        assistant / tool messages of the current run
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::session::{MemoryEntry, MemoryScope, Message, ToolCallStatus};
use crate::tools::ToolContext;

use super::compaction::{drop_count, message_tokens, messages_tokens};
use super::documents::{Document, DocumentRef};

/// Paths the run's tools operate in.
///
/// # Example
/// ```rust
/// use agentrun::agent::ExecutionEnvironment;
///
/// let env = ExecutionEnvironment::new()
///     .with_workspace("/srv/agent")
///     .with_path("uploads", "/srv/agent/uploads");
/// assert_eq!(env.path("uploads").unwrap().to_str(), Some("/srv/agent/uploads"));
/// assert!(env.path("cache").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEnvironment {
    /// Working directory handed to tools
    pub workspace: Option<PathBuf>,
    /// Additional named paths
    #[serde(default)]
    pub paths: BTreeMap<String, PathBuf>,
}

impl ExecutionEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_path(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(name.to_string(), path.into());
        self
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.paths.get(name).map(PathBuf::as_path)
    }
}

/// Optional section of the system message that truncation may remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSection {
    Memory,
    Documents,
}

/// A prompt ready to send to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    /// System message followed by the retained conversation messages
    pub messages: Vec<Message>,
    /// Estimated size of `messages`
    pub estimated_tokens: usize,
    /// Messages removed from the live context to make this prompt fit
    pub dropped_messages: usize,
    /// System message sections left out of this prompt
    pub dropped_sections: Vec<PromptSection>,
}

/// Immutable copy of an [`AgentContext`] for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub system_rules: String,
    pub messages: Vec<Message>,
    /// Index into `messages` where the current run's turn begins
    pub current_turn_start: usize,
    pub memory: Vec<MemoryEntry>,
    pub documents: Vec<DocumentRef>,
    pub environment: ExecutionEnvironment,
    /// Estimated size of the untruncated prompt
    pub estimated_tokens: usize,
}

/// Conversation state owned by a single run.
///
/// # Example
///
/// ```rust
/// use agentrun::agent::AgentContext;
/// use agentrun::session::{MemoryEntry, Role};
///
/// let mut ctx = AgentContext::new("You answer questions about experts.");
/// ctx.remember(MemoryEntry::run_local("expert1", "Ada"));
/// ctx.begin_turn("get expert1 name");
///
/// let prompt = ctx.build_prompt(1_000).unwrap();
/// assert_eq!(prompt.messages.len(), 2);
/// assert_eq!(prompt.messages[0].role, Role::System);
/// assert!(prompt.messages[0].content.contains("- expert1: Ada"));
/// assert!(prompt.estimated_tokens <= 1_000);
/// ```
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    system_rules: String,
    messages: Vec<Message>,
    current_turn_start: usize,
    memory: BTreeMap<String, MemoryEntry>,
    documents: Vec<Arc<Document>>,
    environment: ExecutionEnvironment,
}

impl AgentContext {
    pub fn new(system_rules: &str) -> Self {
        Self {
            system_rules: system_rules.to_string(),
            ..Default::default()
        }
    }

    /// Attach a document. Documents keep their attachment order.
    pub fn with_document(mut self, document: Document) -> Self {
        self.documents.push(Arc::new(document));
        self
    }

    pub fn with_documents(mut self, documents: Vec<Arc<Document>>) -> Self {
        self.documents.extend(documents);
        self
    }

    pub fn with_environment(mut self, environment: ExecutionEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_memory(mut self, entry: MemoryEntry) -> Self {
        self.remember(entry);
        self
    }

    pub fn system_rules(&self) -> &str {
        &self.system_rules
    }

    pub fn set_system_rules(&mut self, rules: &str) {
        self.system_rules = rules.to_string();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages carried in from earlier runs.
    pub fn prior_messages(&self) -> &[Message] {
        &self.messages[..self.current_turn_start]
    }

    /// Messages of the current run, starting with its user input.
    pub fn current_turn(&self) -> &[Message] {
        &self.messages[self.current_turn_start..]
    }

    pub fn documents(&self) -> &[Arc<Document>] {
        &self.documents
    }

    pub fn environment(&self) -> &ExecutionEnvironment {
        &self.environment
    }

    /// Add messages from earlier turns of the conversation.
    ///
    /// Seeded messages always precede the current turn.
    pub fn seed_history(&mut self, messages: Vec<Message>) {
        let count = messages.len();
        self.messages
            .splice(self.current_turn_start..self.current_turn_start, messages);
        self.current_turn_start += count;
    }

    /// Start the current turn with the user's input.
    pub fn begin_turn(&mut self, input: &str) {
        self.current_turn_start = self.messages.len();
        self.messages.push(Message::user(input));
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Record the final status of a tool call on the assistant message that
    /// issued it.
    pub fn set_call_status(&mut self, call_id: &str, status: ToolCallStatus) -> bool {
        let issued = self
            .messages
            .iter_mut()
            .rev()
            .filter_map(|m| m.tool_calls.as_mut())
            .flat_map(|calls| calls.iter_mut())
            .find(|c| c.id == call_id);
        match issued {
            Some(call) => {
                call.status = status;
                true
            }
            None => false,
        }
    }

    /// Store a memory entry, returning the one it replaced.
    pub fn remember(&mut self, entry: MemoryEntry) -> Option<MemoryEntry> {
        self.memory.insert(entry.key.clone(), entry)
    }

    pub fn forget(&mut self, key: &str) -> Option<MemoryEntry> {
        self.memory.remove(key)
    }

    pub fn memory(&self) -> &BTreeMap<String, MemoryEntry> {
        &self.memory
    }

    /// Entries that outlive the run.
    pub fn persistent_memory(&self) -> Vec<MemoryEntry> {
        self.memory
            .values()
            .filter(|m| m.scope == MemoryScope::Conversation)
            .cloned()
            .collect()
    }

    fn memory_section(&self) -> Option<String> {
        if self.memory.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .memory
            .values()
            .map(|m| format!("- {}: {}", m.key, m.value))
            .collect();
        Some(format!("## Memory\n\n{}", lines.join("\n")))
    }

    fn documents_section(&self) -> Option<String> {
        if self.documents.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .documents
            .iter()
            .map(|d| format!("- {} ({}, {} bytes)", d.filename(), d.mime_type(), d.size()))
            .collect();
        Some(format!("## Documents\n\n{}", lines.join("\n")))
    }

    fn system_message(&self, memory: bool, documents: bool) -> Message {
        let mut content = self.system_rules.clone();
        let sections = [
            memory.then(|| self.memory_section()).flatten(),
            documents.then(|| self.documents_section()).flatten(),
        ];
        for section in sections.into_iter().flatten() {
            content.push_str("\n\n");
            content.push_str(&section);
        }
        Message::system(&content)
    }

    /// Build the next prompt within `budget` estimated tokens.
    ///
    /// The system rules and the current turn are always included; if they
    /// alone exceed the budget this returns [`AgentError::ContextOverflow`]
    /// and nothing is changed. Otherwise the oldest prior messages are
    /// removed from the live context until the prompt fits, and if that is
    /// not enough the documents section and then the memory section are left
    /// out of this prompt.
    pub fn build_prompt(&mut self, budget: usize) -> Result<Prompt> {
        let current_tokens = messages_tokens(self.current_turn());
        let required = message_tokens(&Message::system(&self.system_rules)) + current_tokens;
        if required > budget {
            return Err(AgentError::ContextOverflow { required, budget });
        }

        let mut system = self.system_message(true, true);
        let fixed = message_tokens(&system) + current_tokens;
        let dropped = drop_count(self.prior_messages(), budget.saturating_sub(fixed));
        if dropped > 0 {
            self.messages.drain(..dropped);
            self.current_turn_start -= dropped;
            debug!(
                dropped,
                retained = self.messages.len(),
                "Truncated oldest context messages"
            );
        }

        let mut dropped_sections = Vec::new();
        let retained = messages_tokens(&self.messages);
        if message_tokens(&system) + retained > budget && self.documents_section().is_some() {
            system = self.system_message(true, false);
            dropped_sections.push(PromptSection::Documents);
        }
        if message_tokens(&system) + retained > budget && self.memory_section().is_some() {
            system = self.system_message(false, false);
            dropped_sections.push(PromptSection::Memory);
        }
        if !dropped_sections.is_empty() {
            debug!(sections = ?dropped_sections, "Left sections out of the prompt");
        }

        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.push(system);
        messages.extend(self.messages.iter().cloned());

        Ok(Prompt {
            estimated_tokens: messages_tokens(&messages),
            messages,
            dropped_messages: dropped,
            dropped_sections,
        })
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> Arc<ContextSnapshot> {
        let system = self.system_message(true, true);
        Arc::new(ContextSnapshot {
            system_rules: self.system_rules.clone(),
            messages: self.messages.clone(),
            current_turn_start: self.current_turn_start,
            memory: self.memory.values().cloned().collect(),
            documents: self.documents.iter().map(|d| d.metadata().clone()).collect(),
            environment: self.environment.clone(),
            estimated_tokens: message_tokens(&system) + messages_tokens(&self.messages),
        })
    }

    /// Read-only view handed to a tool call.
    pub fn tool_context(&self, run_id: &str, call_id: &str) -> ToolContext {
        let mut ctx = ToolContext::new()
            .with_call(run_id, call_id)
            .with_documents(self.documents.clone());
        ctx.workspace = self.environment.workspace.clone();
        ctx.memory = self.memory.clone();
        ctx
    }
}
