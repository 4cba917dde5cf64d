//! Token estimation and prompt truncation.
//!
//! Token counts are estimates: `ceil(chars / 4)` per text plus a fixed
//! per-message overhead. The same estimate is used everywhere so a prompt
//! that fits here fits by the same measure the run reports.
//!
//! Truncation only ever removes a prefix of the messages that precede the
//! current turn, so the retained messages are always a contiguous suffix of
//! the conversation.

use crate::session::{Message, Role};

/// Estimated tokens added for each message (role, separators).
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Estimate the token count of a text: `ceil(chars / 4)`.
///
/// # Examples
/// ```
/// use agentrun::agent::compaction::estimate_tokens;
///
/// assert_eq!(estimate_tokens(""), 0);
/// assert_eq!(estimate_tokens("abcd"), 1);
/// assert_eq!(estimate_tokens("abcde"), 2);
/// ```
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// Estimated tokens for one message, including its tool calls.
pub fn message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .as_ref()
        .map(|calls| {
            calls
                .iter()
                .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments))
                .sum()
        })
        .unwrap_or(0);
    MESSAGE_OVERHEAD_TOKENS + estimate_tokens(&message.content) + calls
}

/// Estimated tokens for a slice of messages.
pub fn messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(message_tokens).sum()
}

/// Number of leading messages to drop so the rest fit in `available` tokens.
///
/// Messages are removed oldest first. Once anything is removed, tool results
/// left at the front of the retained suffix are removed too, since the
/// assistant message that issued their calls is gone.
///
/// # Examples
/// ```
/// use agentrun::agent::compaction::{drop_count, message_tokens};
/// use agentrun::session::Message;
///
/// let msgs = vec![
///     Message::user("first question"),
///     Message::assistant("first answer"),
///     Message::user("second question"),
///     Message::assistant("second answer"),
/// ];
/// let last_two = message_tokens(&msgs[2]) + message_tokens(&msgs[3]);
/// assert_eq!(drop_count(&msgs, last_two), 2);
/// assert_eq!(drop_count(&msgs, usize::MAX), 0);
/// ```
pub fn drop_count(messages: &[Message], available: usize) -> usize {
    let mut remaining = messages_tokens(messages);
    let mut dropped = 0;

    while dropped < messages.len() && remaining > available {
        remaining -= message_tokens(&messages[dropped]);
        dropped += 1;
    }

    // Any tool result left at the front lost its originating assistant message
    while dropped > 0 && dropped < messages.len() && messages[dropped].role == Role::Tool {
        dropped += 1;
    }

    dropped
}
