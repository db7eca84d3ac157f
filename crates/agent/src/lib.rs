//! The crmpilot agent.
//!
//! One turn follows a **Prepare → Call → Dispatch** cycle:
//!
//! 1. **Prepare** the history (system prompt plus the caller's active context)
//! 2. **Call** the model with the tool catalog attached
//! 3. **If tool calls**: dispatch them through the tool bus and loop back to 2
//! 4. **If text**: emit the answer and the final history
//!
//! Long histories are summarized by the [`Compactor`], either on request or
//! automatically when a turn crosses the configured token trigger.

pub mod compactor;
pub mod orchestrator;
pub mod prompt;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use compactor::{micro_compact, CompactionResult, Compactor, NOTHING_TO_COMPACT};
pub use orchestrator::{AgentError, ChatRequest, ChatResponse, Orchestrator, STEP_LIMIT_NOTICE};
pub use prompt::{base_system_prompt, context_block, prepare_history, CONTEXT_MARKER};
pub use stream_event::StreamEvent;
