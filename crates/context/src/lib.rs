//! Per-session context store for crmpilot.
//!
//! A session is keyed by the caller's opaque credential and holds the set of
//! artifacts (files) the caller has opted into model visibility, together
//! with an exact running token total.

pub mod reader;
pub mod session;
pub mod store;

pub use reader::{Artifact, ArtifactReader, FsArtifactReader, InMemoryReader};
pub use session::{ContextItem, SessionContext};
pub use store::{session_fingerprint, ContextStore, SessionPolicy};
