//! Conversation history shared across runs.
//!
//! A [`ConversationHistory`] is an append-only sequence of
//! [`ConversationTurn`]s. Each successful run appends exactly one turn; the
//! next run rebuilds its context from the most recent turns via
//! [`ConversationHistory::carry_forward`]. The whole record serializes to
//! JSON losslessly so a conversation can be resumed from disk.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::session::{ConversationTurn, MemoryEntry, MemoryScope, Message};

/// Ordered, append-only log of conversation turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed turn.
    ///
    /// Turn ids must increase strictly; a turn that does not is rejected so the
    /// log stays append-only in meaning as well as in storage.
    pub fn append(&mut self, turn: ConversationTurn) -> Result<()> {
        if let Some(last) = self.turns.last() {
            if turn.turn_id <= last.turn_id {
                return Err(AgentError::Session(format!(
                    "turn id {} does not follow {}",
                    turn.turn_id, last.turn_id
                )));
            }
        }
        self.turns.push(turn);
        Ok(())
    }

    /// Id the next appended turn should use.
    pub fn next_turn_id(&self) -> u64 {
        self.turns.last().map(|t| t.turn_id + 1).unwrap_or(1)
    }

    /// All turns, oldest first.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The most recent turn, if any.
    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Render the last `max_turns` turns as user/assistant message pairs.
    ///
    /// # Example
    /// ```
    /// use agentrun::session::ConversationHistory;
    ///
    /// let history = ConversationHistory::new();
    /// assert!(history.carry_forward(5).is_empty());
    /// ```
    pub fn carry_forward(&self, max_turns: usize) -> Vec<Message> {
        let start = self.turns.len().saturating_sub(max_turns);
        self.turns[start..]
            .iter()
            .flat_map(|t| [Message::user(&t.input), Message::assistant(&t.output)])
            .collect()
    }

    /// Conversation-scoped memory recorded by the most recent turn.
    pub fn persistent_memory(&self) -> Vec<MemoryEntry> {
        self.turns
            .last()
            .map(|t| {
                t.memory
                    .iter()
                    .filter(|m| m.scope == MemoryScope::Conversation)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Serialize to a pretty-printed JSON record.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rebuild a history from a JSON record.
    pub fn from_json(json: &str) -> Result<Self> {
        let history: Self = serde_json::from_str(json)?;
        history.check_order()?;
        Ok(history)
    }

    /// Write the history to `path`, creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = self.to_json()?;
        tokio::fs::write(path, json).await?;
        debug!(path = %path.display(), turns = self.turns.len(), "Saved conversation history");
        Ok(())
    }

    /// Load a history from `path`. A missing file yields an empty history.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn check_order(&self) -> Result<()> {
        for pair in self.turns.windows(2) {
            if pair[1].turn_id <= pair[0].turn_id {
                return Err(AgentError::Session(format!(
                    "history out of order: turn {} follows {}",
                    pair[1].turn_id, pair[0].turn_id
                )));
            }
        }
        Ok(())
    }
}
