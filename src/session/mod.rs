//! Session module - conversation state that outlives a single run
//!
//! This module provides:
//! - Message, role and tool-call types exchanged with the model
//! - Memory entries and their scopes
//! - [`ConversationHistory`], the append-only log of completed turns
//!
//! Runs of one conversation share a history through [`SharedHistory`]. A run
//! reads it when it starts and appends one turn when it completes.
//!
//! # Example
//!
//! ```
//! use agentrun::session::{shared_history, ConversationHistory};
//!
//! let history = shared_history(ConversationHistory::new());
//! let len = tokio_test::block_on(async { history.read().await.len() });
//! assert_eq!(len, 0);
//! ```

pub mod history;
pub mod types;

pub use history::ConversationHistory;
pub use types::{
    ConversationTurn, EventSummary, MemoryEntry, MemoryScope, Message, Role, ToolCall,
    ToolCallStatus,
};

use std::sync::Arc;
use tokio::sync::RwLock;

/// Conversation history handle shared between runs.
pub type SharedHistory = Arc<RwLock<ConversationHistory>>;

/// Wrap a history for sharing across runs.
pub fn shared_history(history: ConversationHistory) -> SharedHistory {
    Arc::new(RwLock::new(history))
}
