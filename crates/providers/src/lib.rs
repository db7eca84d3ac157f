//! HTTP clients for crmpilot's two external collaborators.
//!
//! - [`OpenAiCompatProvider`] implements `crmpilot_core::Provider` against
//!   any OpenAI-compatible chat-completions endpoint.
//! - [`RecordApiClient`] implements `crmpilot_core::RecordBackend` against
//!   the CRM backend's REST API.

pub mod openai_compat;
pub mod record_api;

pub use openai_compat::OpenAiCompatProvider;
pub use record_api::RecordApiClient;
