//! System prompt assembly.

use chrono::{DateTime, TimeZone};
use crmpilot_context::ContextItem;
use crmpilot_core::message::{ChatMessage, Role};

/// Marker that opens the active-context block in a system prompt.
pub const CONTEXT_MARKER: &str = "ACTIVE CONTEXT FILES";

/// The default system prompt, dated `now`.
pub fn base_system_prompt<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "You are crmpilot, an AI assistant for a metadata-driven CRM. Today is {}.\n\
         \nPRINCIPLES:\
         \n1. EXPLORE BEFORE ACTING - First understand which objects and fields exist, then dive into specifics.\
         \n2. TREE EXPLORATION - Start broad (list all), then narrow down (get details), then act (CRUD). Don't try to do everything at once.\
         \n\nObjects and fields are metadata-driven and differ between deployments. \
         Think step by step. If a tool fails, read the error and adapt.",
        now.format("%A, %B %-d, %Y")
    )
}

/// Render a session's context items. Empty when there are none.
pub fn context_block(items: &[ContextItem]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut block = format!("\n\n{CONTEXT_MARKER} (Priority over general knowledge):\n");
    for item in items {
        block.push_str(&format!(
            "\n--- FILE: {} ---\n{}\n--- END FILE ---\n",
            item.path, item.content
        ));
    }
    block
}

/// Make sure the history opens with a system message carrying the context
/// block.
///
/// A caller-supplied system message is kept; the block is appended to it
/// unless it already carries one.
pub fn prepare_history(messages: &mut Vec<ChatMessage>, base_prompt: &str, context: &str) {
    match messages.first_mut() {
        Some(first) if first.role == Role::System => {
            if !context.is_empty() && !first.content.contains(CONTEXT_MARKER) {
                first.content.push_str(context);
            }
        }
        _ => messages.insert(0, ChatMessage::system(format!("{base_prompt}{context}"))),
    }
}
