//! History compaction.
//!
//! Older turns are folded into a model-written summary that lives inside the
//! leading system message, while the most recent turns (the keep window)
//! stay verbatim. Compaction never fails hard: any problem is reported as a
//! warning and the original history is returned.

use chrono::Local;
use crmpilot_config::CompactionConfig;
use crmpilot_core::message::{ChatMessage, Role};
use crmpilot_core::provider::{Provider, ProviderRequest};
use crmpilot_core::token::{estimate_messages_tokens, estimate_tokens};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SUMMARY_START: &str = "--- CONVERSATION SUMMARY";
const SUMMARY_END: &str = "--- END SUMMARY ---";
const TRUNCATION_SUFFIX: &str = "...[truncated]";

pub const NOTHING_TO_COMPACT: &str = "nothing to compact outside the keep window";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionResult {
    pub messages: Vec<ChatMessage>,
    pub tokens_before: usize,
    pub tokens_after: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl CompactionResult {
    fn unchanged(messages: Vec<ChatMessage>, tokens: usize, warning: Option<String>) -> Self {
        Self {
            messages,
            tokens_before: tokens,
            tokens_after: tokens,
            warning,
        }
    }

    pub fn saved_tokens(&self) -> usize {
        self.tokens_before.saturating_sub(self.tokens_after)
    }
}

/// How much of the recent history to keep verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
enum KeepWindow {
    /// The last `n` messages.
    Last(usize),
    /// From the second-to-last user message on. The note, if any, names
    /// details the summary must preserve.
    Turns { note: Option<String> },
}

impl KeepWindow {
    fn parse(keep: Option<&str>) -> Self {
        let Some(raw) = keep.map(str::trim).filter(|k| !k.is_empty()) else {
            return KeepWindow::Turns { note: None };
        };
        match raw.parse::<usize>() {
            Ok(n) if n > 0 => KeepWindow::Last(n),
            _ => KeepWindow::Turns {
                note: Some(raw.to_string()),
            },
        }
    }

    /// Index into `messages` where the verbatim tail starts.
    fn tail_start(&self, messages: &[ChatMessage]) -> usize {
        let mut start = match self {
            KeepWindow::Last(n) => messages.len().saturating_sub(*n),
            KeepWindow::Turns { .. } => {
                let mut users = messages
                    .iter()
                    .enumerate()
                    .rev()
                    .filter(|(_, m)| m.role == Role::User)
                    .map(|(i, _)| i);
                let last = users.next();
                users.next().or(last).unwrap_or(0)
            }
        };
        // A tool message must stay with the assistant message that called it.
        while start > 0 && messages.get(start).is_some_and(|m| m.role == Role::Tool) {
            start -= 1;
        }
        start
    }

    fn note(&self) -> Option<&str> {
        match self {
            KeepWindow::Turns { note } => note.as_deref(),
            KeepWindow::Last(_) => None,
        }
    }
}

/// Summarizes older history through a model call.
pub struct Compactor {
    provider: Arc<dyn Provider>,
    config: CompactionConfig,
}

impl Compactor {
    pub fn new(provider: Arc<dyn Provider>, config: CompactionConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Compact `messages`, keeping the window described by `keep` verbatim.
    ///
    /// `keep` is either a positive message count or free text naming what
    /// the summary must preserve.
    pub async fn compact(&self, messages: Vec<ChatMessage>, keep: Option<&str>) -> CompactionResult {
        let tokens_before = estimate_messages_tokens(&messages);
        if messages.len() < self.config.min_messages {
            return CompactionResult::unchanged(messages, tokens_before, None);
        }

        let has_system = messages.first().is_some_and(|m| m.role == Role::System);
        let (base_prompt, previous_summary) = match messages.first() {
            Some(first) if has_system => split_summary(&first.content),
            _ => (String::new(), None),
        };
        let body = if has_system { &messages[1..] } else { &messages[..] };

        let window = KeepWindow::parse(keep);
        let cut = window.tail_start(body);
        if cut == 0 {
            debug!(messages = messages.len(), "Keep window covers the whole history");
            return CompactionResult::unchanged(messages, tokens_before, Some(NOTHING_TO_COMPACT.into()));
        }
        let (head, tail) = body.split_at(cut);

        let archive = micro_compact(head, self.config.archive_truncate_chars);
        let prompt = summarization_prompt(&archive, previous_summary.as_deref(), window.note());
        let request = ProviderRequest::new(self.config.model.clone(), vec![ChatMessage::user(prompt)])
            .with_temperature(self.config.temperature);

        let summary = match self.provider.complete(request).await {
            Ok(response) if !response.message.content.trim().is_empty() => response.message.content,
            Ok(_) => {
                warn!("Summarizer returned an empty reply");
                return CompactionResult::unchanged(
                    messages,
                    tokens_before,
                    Some("summarization failed: empty summarization response".into()),
                );
            }
            Err(e) => {
                warn!(error = %e, "Summarization call failed");
                return CompactionResult::unchanged(
                    messages,
                    tokens_before,
                    Some(format!("summarization failed: {e}")),
                );
            }
        };

        let estimated_after = estimate_tokens(&summary) + estimate_messages_tokens(tail);
        let saved = tokens_before.saturating_sub(estimated_after);
        let system = format!(
            "{base_prompt}\n\n{SUMMARY_START} (Saved ~{saved} tokens | Compacted: {}) ---\n{summary}\n{SUMMARY_END}",
            Local::now().format("%b %-d, %-I:%M %p")
        );

        let mut compacted = Vec::with_capacity(tail.len() + 1);
        compacted.push(ChatMessage::system(system));
        compacted.extend_from_slice(tail);
        let tokens_after = estimate_messages_tokens(&compacted);

        info!(
            archived = head.len(),
            kept = tail.len(),
            tokens_before,
            tokens_after,
            "Compacted conversation history"
        );
        CompactionResult {
            messages: compacted,
            tokens_before,
            tokens_after,
            warning: None,
        }
    }
}

impl std::fmt::Debug for Compactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compactor")
            .field("provider", &self.provider.name())
            .field("model", &self.config.model)
            .finish()
    }
}

/// Split a system prompt into its base text and the body of an embedded
/// summary block, if one is present.
fn split_summary(content: &str) -> (String, Option<String>) {
    let Some(start) = content.find(SUMMARY_START) else {
        return (content.to_string(), None);
    };
    let Some(end) = content[start..].find(SUMMARY_END).map(|e| start + e) else {
        return (content.to_string(), None);
    };

    let base = content[..start].trim().to_string();
    let summary = content[start..end]
        .find("---\n")
        .map(|h| content[start + h + 4..end].trim().to_string())
        .filter(|s| !s.is_empty());
    (base, summary)
}

/// Cut long tool output and tool call arguments to `limit` characters.
pub fn micro_compact(messages: &[ChatMessage], limit: usize) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|message| {
            let mut message = message.clone();
            if message.role == Role::Tool {
                truncate_in_place(&mut message.content, limit);
            }
            for call in &mut message.tool_calls {
                truncate_in_place(&mut call.function.arguments, limit);
            }
            message
        })
        .collect()
}

fn truncate_in_place(text: &mut String, limit: usize) {
    if let Some((cut, _)) = text.char_indices().nth(limit) {
        text.truncate(cut);
        text.push_str(TRUNCATION_SUFFIX);
    }
}

fn summarization_prompt(archive: &[ChatMessage], previous: Option<&str>, note: Option<&str>) -> String {
    let mut transcript = String::new();
    for message in archive {
        let _ = writeln!(transcript, "[{}]: {}", message.role.as_str(), message.content);
        for call in &message.tool_calls {
            let _ = writeln!(transcript, "(Tool Call: {})", call.name());
        }
        if message.role == Role::Tool {
            match message.name.as_deref() {
                Some(name) if !name.is_empty() => {
                    let _ = writeln!(transcript, "(Tool Result: {name})");
                }
                _ => transcript.push_str("(Tool Result)\n"),
            }
        }
    }

    let keep_instruction = note
        .map(|n| format!("\n\nIMPORTANT: Make sure to preserve details about: {n}"))
        .unwrap_or_default();
    let previous_section = previous
        .map(|p| format!("\nPrevious Context Summary (incorporate this into your new summary):\n{p}\n\n"))
        .unwrap_or_default();

    format!(
        "Summarize the following conversation history concisely.\n\
         This history will be removed from the prompt, so capture ALL critical state, decisions, and record IDs.\n\
         {keep_instruction}\n\n\
         {previous_section}Recent Conversation to Archive:\n\
         {transcript}\n\
         Provide a concise, consolidated summary (2-4 paragraphs). Focus on:\n\
         - What has been accomplished\n\
         - Objects, fields and records that were created or changed\n\
         - Errors encountered and resolutions\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, make_text_response};
    use crmpilot_core::error::ProviderError;
    use crmpilot_core::message::ToolCall;

    fn compactor(provider: ScriptedProvider) -> (Compactor, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        (Compactor::new(provider.clone(), CompactionConfig::default()), provider)
    }

    /// system + `turns` × (user, assistant-with-call, tool, assistant)
    fn history(turns: usize) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system("BASE PROMPT")];
        for t in 0..turns {
            let id = format!("call_{t}");
            messages.push(ChatMessage::user(format!("question {t}")));
            messages.push(ChatMessage::assistant_with_tools(
                "",
                vec![ToolCall::new(&id, "query_object", r#"{"object_name":"account"}"#)],
            ));
            messages.push(ChatMessage::tool_result(&id, "query_object", "x".repeat(800)));
            messages.push(ChatMessage::assistant(format!("answer {t}")));
        }
        messages
    }

    #[tokio::test]
    async fn short_history_is_left_alone() {
        let (compactor, provider) = compactor(ScriptedProvider::new(vec![]));
        let messages = history(1);
        let result = compactor.compact(messages.clone(), None).await;
        assert_eq!(result.messages, messages);
        assert_eq!(result.tokens_before, result.tokens_after);
        assert!(result.warning.is_none());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn default_window_keeps_last_two_user_turns() {
        let (compactor, provider) = compactor(ScriptedProvider::new(vec![Ok(make_text_response(
            "Listed accounts twice.",
        ))]));
        let messages = history(4);
        let expected_tail = messages[9..].to_vec();

        let result = compactor.compact(messages, None).await;
        assert!(result.warning.is_none());
        assert_eq!(result.messages.len(), 1 + expected_tail.len());
        assert_eq!(&result.messages[1..], &expected_tail[..]);
        assert!(result.tokens_after < result.tokens_before);

        let system = &result.messages[0].content;
        assert!(system.starts_with("BASE PROMPT\n\n--- CONVERSATION SUMMARY (Saved ~"));
        assert!(system.ends_with("---\nListed accounts twice.\n--- END SUMMARY ---"));

        let request = provider.last_request().unwrap();
        assert!((request.temperature - 0.3).abs() < f32::EPSILON);
        assert!(request.tools.is_empty());
        assert!(request.messages[0].content.contains("[user]: question 0"));
        assert!(request.messages[0].content.contains("(Tool Result: query_object)"));
        assert!(!request.messages[0].content.contains("question 2"));
    }

    #[tokio::test]
    async fn compaction_is_idempotent_inside_the_keep_window() {
        let (compactor, provider) = compactor(ScriptedProvider::new(vec![Ok(make_text_response("S1"))]));
        let first = compactor.compact(history(4), None).await;
        let second = compactor.compact(first.messages.clone(), None).await;

        assert_eq!(second.messages, first.messages);
        assert_eq!(second.tokens_before, second.tokens_after);
        assert_eq!(second.warning.as_deref(), Some(NOTHING_TO_COMPACT));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn numeric_keep_never_starts_on_a_tool_message() {
        let (compactor, _) = compactor(ScriptedProvider::new(vec![Ok(make_text_response("S"))]));
        let messages = history(3);
        // The last two messages are (tool, assistant); the cut must move back
        // to include the assistant call that produced the tool message.
        let result = compactor.compact(messages.clone(), Some("2")).await;
        let tail = &result.messages[1..];
        assert_eq!(tail.len(), 3);
        assert!(tail[0].has_tool_calls());
        assert_eq!(tail, &messages[messages.len() - 3..]);
    }

    #[tokio::test]
    async fn text_keep_becomes_a_preserve_instruction() {
        let (compactor, provider) = compactor(ScriptedProvider::new(vec![Ok(make_text_response("S"))]));
        compactor.compact(history(3), Some("the Acme renewal")).await;
        let prompt = &provider.last_request().unwrap().messages[0].content;
        assert!(prompt.contains("IMPORTANT: Make sure to preserve details about: the Acme renewal"));
    }

    #[tokio::test]
    async fn previous_summary_is_folded_into_the_next_one() {
        let (compactor, provider) = compactor(ScriptedProvider::new(vec![
            Ok(make_text_response("FIRST SUMMARY")),
            Ok(make_text_response("SECOND SUMMARY")),
        ]));
        let first = compactor.compact(history(3), None).await;

        let mut grown = first.messages;
        grown.extend(history(3).into_iter().skip(1));
        let second = compactor.compact(grown, None).await;

        let prompt = &provider.last_request().unwrap().messages[0].content;
        assert!(prompt.contains("Previous Context Summary (incorporate this into your new summary):\nFIRST SUMMARY"));
        let system = &second.messages[0].content;
        assert!(system.starts_with("BASE PROMPT\n\n--- CONVERSATION SUMMARY"));
        assert_eq!(system.matches("--- CONVERSATION SUMMARY").count(), 1);
        assert!(system.contains("SECOND SUMMARY"));
    }

    #[tokio::test]
    async fn failing_summarizer_returns_history_unchanged() {
        let (compactor, _) = compactor(ScriptedProvider::new(vec![Err(ProviderError::Network(
            "connection refused".into(),
        ))]));
        let messages = history(10);
        assert_eq!(messages.len(), 41);

        let result = compactor.compact(messages.clone(), None).await;
        assert_eq!(result.messages, messages);
        assert_eq!(result.tokens_before, result.tokens_after);
        let warning = result.warning.unwrap();
        assert!(warning.starts_with("summarization failed: "));
        assert!(warning.contains("connection refused"));
    }

    #[tokio::test]
    async fn failing_summarizer_with_numeric_keep_returns_history_unchanged() {
        let (compactor, provider) = compactor(ScriptedProvider::new(vec![Err(ProviderError::Network(
            "connection refused".into(),
        ))]));
        let messages = history(10);

        let result = compactor.compact(messages.clone(), Some("10")).await;
        assert_eq!(provider.call_count(), 1);
        assert_eq!(result.messages, messages);
        assert_eq!(result.tokens_before, result.tokens_after);
        assert!(result.warning.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn empty_summary_counts_as_failure() {
        let (compactor, _) = compactor(ScriptedProvider::new(vec![Ok(make_text_response("  "))]));
        let result = compactor.compact(history(3), None).await;
        assert_eq!(
            result.warning.as_deref(),
            Some("summarization failed: empty summarization response")
        );
    }

    #[test]
    fn micro_compact_truncates_tool_output_and_arguments() {
        let long_args = format!(r#"{{"data":"{}"}}"#, "y".repeat(600));
        let messages = vec![
            ChatMessage::assistant_with_tools("", vec![ToolCall::new("c1", "create_record", long_args)]),
            ChatMessage::tool_result("c1", "create_record", "z".repeat(501)),
            ChatMessage::user("u".repeat(900)),
        ];
        let compacted = micro_compact(&messages, 500);
        assert_eq!(compacted[0].tool_calls[0].arguments().chars().count(), 500 + TRUNCATION_SUFFIX.len());
        assert!(compacted[1].content.ends_with("...[truncated]"));
        assert_eq!(compacted[2].content.len(), 900);
    }

    #[test]
    fn split_summary_extracts_base_and_body() {
        let content = "BASE\n\n--- CONVERSATION SUMMARY (Saved ~10 tokens | Compacted: Jan 2, 3:04 PM) ---\nold facts\n--- END SUMMARY ---";
        let (base, summary) = split_summary(content);
        assert_eq!(base, "BASE");
        assert_eq!(summary.as_deref(), Some("old facts"));

        let (base, summary) = split_summary("plain prompt");
        assert_eq!(base, "plain prompt");
        assert!(summary.is_none());
    }

    #[test]
    fn keep_window_parsing() {
        assert_eq!(KeepWindow::parse(Some(" 4 ")), KeepWindow::Last(4));
        assert_eq!(KeepWindow::parse(Some("0")), KeepWindow::Turns { note: Some("0".into()) });
        assert_eq!(KeepWindow::parse(Some("")), KeepWindow::Turns { note: None });
        assert_eq!(KeepWindow::parse(None), KeepWindow::Turns { note: None });
    }

    #[tokio::test]
    async fn summarizer_error_display_is_preserved() {
        let (compactor, _) = compactor(ScriptedProvider::new(vec![Err(ProviderError::RateLimited {
            retry_after_secs: 3,
        })]));
        let result = compactor.compact(history(3), None).await;
        assert_eq!(
            result.warning.as_deref(),
            Some("summarization failed: Rate limited by provider, retry after 3s")
        );
    }
}
