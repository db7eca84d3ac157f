//! Agent-level streaming events.
//!
//! `StreamEvent` is what one agent turn emits, in order, to whoever drives
//! it. The gateway forwards each event as one SSE frame whose `event:` name
//! is [`StreamEvent::event_type`] and whose data is the JSON form below.

use crmpilot_core::message::ChatMessage;
use serde::{Deserialize, Serialize};

/// Events emitted by the orchestrator during one turn.
///
/// - `thinking`    : the model's reasoning before it calls tools
/// - `tool_call`   : a tool is about to be dispatched
/// - `tool_result` : the tool returned (possibly with `is_error`)
/// - `content`     : the final answer text
/// - `auto_compact`: the history was compacted before a model call
/// - `done`        : the turn finished; carries the full history
/// - `error`       : the turn failed and no more events follow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Thinking {
        content: String,
    },

    ToolCall {
        tool_name: String,
        tool_call_id: String,
        /// Raw JSON argument text as the model produced it.
        tool_args: String,
    },

    ToolResult {
        tool_name: String,
        tool_call_id: String,
        tool_result: String,
        is_error: bool,
    },

    Content {
        content: String,
    },

    AutoCompact {
        content: String,
        tokens_before: usize,
        tokens_after: usize,
    },

    Done {
        history: Vec<ChatMessage>,
    },

    Error {
        content: String,
    },
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Content { .. } => "content",
            Self::AutoCompact { .. } => "auto_compact",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_serializes_with_type_tag() {
        let event = StreamEvent::ToolCall {
            tool_name: "query_object".into(),
            tool_call_id: "call_1".into(),
            tool_args: r#"{"object_name":"account"}"#.into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["tool_name"], "query_object");
        assert_eq!(json["tool_args"], r#"{"object_name":"account"}"#);
    }

    #[test]
    fn tool_result_carries_error_flag() {
        let event = StreamEvent::ToolResult {
            tool_name: "get_record".into(),
            tool_call_id: "call_2".into(),
            tool_result: "Get failed: api error (404): not found\n".into(),
            is_error: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_result""#));
        assert!(json.contains(r#""is_error":true"#));
    }

    #[test]
    fn auto_compact_reports_token_counts() {
        let event = StreamEvent::AutoCompact {
            content: "Context auto-compacted: 900 → 200 tokens".into(),
            tokens_before: 900,
            tokens_after: 200,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "auto_compact");
        assert_eq!(json["tokens_before"], 900);
        assert_eq!(json["tokens_after"], 200);
    }

    #[test]
    fn done_deserializes_history() {
        let json = r#"{"type":"done","history":[{"role":"user","content":"hi"}]}"#;
        match serde_json::from_str::<StreamEvent>(json).unwrap() {
            StreamEvent::Done { history } => assert_eq!(history[0].content, "hi"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn event_type_names_match_tags() {
        let events = [
            StreamEvent::Thinking { content: "x".into() },
            StreamEvent::Content { content: "x".into() },
            StreamEvent::Done { history: vec![] },
            StreamEvent::Error { content: "x".into() },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn only_done_and_error_are_terminal() {
        assert!(StreamEvent::Done { history: vec![] }.is_terminal());
        assert!(StreamEvent::Error { content: "boom".into() }.is_terminal());
        assert!(!StreamEvent::Content { content: "x".into() }.is_terminal());
    }
}
