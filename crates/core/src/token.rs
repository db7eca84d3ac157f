//! Token estimation shared by the context store and the compactor.
//!
//! Uses the ~4 characters per token heuristic. Both subsystems must use the
//! same estimator so that reported savings and context budgets agree.

use crate::message::ChatMessage;

/// Estimate the number of tokens in a text string.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Estimate tokens for one message: content, reasoning, and tool call arguments.
pub fn estimate_message_tokens(message: &ChatMessage) -> usize {
    let mut total = estimate_tokens(&message.content);
    if let Some(reasoning) = &message.reasoning {
        total += estimate_tokens(reasoning);
    }
    for call in &message.tool_calls {
        total += estimate_tokens(call.arguments());
    }
    total
}

/// Estimate tokens for a list of messages.
pub fn estimate_messages_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}
