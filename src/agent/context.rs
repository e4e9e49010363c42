//! Message context builder for the tool-calling loop.
//!
//! Assembles the system prompt and a bounded window of the session's
//! conversation for each provider call.

use crate::types::*;
use tracing::debug;

/// Build the full message list for an inference call.
///
/// Keeps at most `history_window` trailing messages. The window never opens
/// on a tool message, since a tool reply without the assistant message that
/// requested it is rejected by OpenAI-compatible APIs.
pub fn build_messages(
    system_prompt: &str,
    conversation: &Conversation,
    history_window: usize,
) -> Vec<ChatMessage> {
    let history = conversation.messages();
    let mut start = history.len().saturating_sub(history_window.max(1));
    while start < history.len() && history[start].role == ChatRole::Tool {
        start += 1;
    }

    let mut messages = Vec::with_capacity(history.len() - start + 1);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend_from_slice(&history[start..]);

    if start > 0 {
        debug!("Context window dropped {} older message(s)", start);
    }
    messages
}
