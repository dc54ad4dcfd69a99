//! Capability traits consumed by the workflow core and by agents.
//!
//! The core depends only on [`Agent`]. The text-generation and memory
//! capabilities are collaborator interfaces consumed by agent
//! implementations, never by the coordinator, registry, or transport.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{AgentError, AgentId, IoContract};
use crate::state::WorkflowState;

/// A pluggable unit transforming a workflow snapshot into an updated one.
///
/// Agents receive a full, independent snapshot and return a new snapshot;
/// they never hold references into shared state. Routing is not an agent
/// concern: agents report results through their declared write slots and
/// the routing policy decides what runs next.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Roster identity of this agent.
    fn id(&self) -> AgentId;

    /// Declared read and write sets, validated at roster wiring time.
    fn contract(&self) -> IoContract;

    /// Run one invocation against the given snapshot.
    async fn run(&self, state: WorkflowState) -> Result<WorkflowState, AgentError>;
}

/// Failure from the text-generation provider.
#[derive(Debug, Clone, Error)]
pub enum GenerateError {
    /// Transient failure (timeout, rate limit, 5xx); worth retrying.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// The provider rejected the request; retrying will not help.
    #[error("provider rejected the request: {0}")]
    Permanent(String),
}

impl From<GenerateError> for AgentError {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::Transient(msg) => AgentError::Recoverable(msg),
            GenerateError::Permanent(msg) => AgentError::Fatal(msg),
        }
    }
}

/// Text-generation provider capability, consumed only by agents.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for the given prompt.
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

/// One remembered note.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    /// Remembered text.
    pub text: String,
    /// Agent that recorded the note, if any.
    pub agent: Option<AgentId>,
    /// Recording time.
    pub recorded_at: DateTime<Utc>,
}

/// Opaque similarity-lookup memory capability, consumed only by agents.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Record a note for later recall.
    async fn remember(&self, text: &str, agent: Option<AgentId>);

    /// Return up to `limit` notes most similar to the query, best first.
    async fn recall(&self, query: &str, limit: usize) -> Vec<MemoryEntry>;
}
