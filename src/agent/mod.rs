//! Agents and their collaborator capabilities.
//!
//! An agent is a pluggable unit transforming a [`crate::state::WorkflowState`]
//! snapshot into an updated snapshot, representing one area of expertise.
//! This module defines the [`Agent`] capability and its error taxonomy, the
//! per-agent I/O contracts enforced at roster wiring time, the built-in
//! specialist roster, and the external capabilities agents consume: a
//! text-generation provider and a similarity-lookup memory. The workflow
//! core never touches either capability directly.

pub mod memory;
pub mod provider;
pub mod roster;
pub mod specialists;
pub mod traits;
pub mod types;

// Re-export main types for convenience
pub use memory::InMemoryStore;
pub use provider::HttpTextGenerator;
pub use roster::{Roster, WiringError};
pub use traits::{Agent, GenerateError, MemoryEntry, MemoryStore, TextGenerator};
pub use types::{AgentError, AgentId, IoContract, StateField};
