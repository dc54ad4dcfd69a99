//! troupe - multi-agent workflow coordination server
//!
//! A fixed roster of specialized agents collaboratively transforms a
//! software task description into code artifacts. The crate's core is the
//! workflow machinery around one shared, copy-on-handoff state record:
//!
//! - **`state`** - the [`state::WorkflowState`] value routed between agents
//! - **`agent`** - the agent capability, I/O contracts, roster wiring, and
//!   the built-in specialists
//! - **`routing`** - the pure decision table selecting each next agent
//! - **`coordinator`** - the per-workflow execution loop
//! - **`registry`** - the process-wide table of concurrent workflows
//! - **`server`** - the WebSocket transport streaming progress to
//!   observers
//! - **`config`** / **`observability`** - TOML + `.env` configuration and
//!   per-workflow markdown transcripts
//!
//! # Example: running a workflow without the transport
//!
//! ```ignore
//! use std::sync::Arc;
//! use troupe::agent::{HttpTextGenerator, InMemoryStore, Roster};
//! use troupe::registry::{RegistryConfig, WorkflowRegistry};
//! use troupe::routing::{IterationBudget, RoutePlan, RoutingPolicy};
//!
//! let provider = Arc::new(HttpTextGenerator::new(
//!     "http://127.0.0.1:8080/v1/chat/completions",
//!     "gemini-2.5-flash",
//!     None,
//! ));
//! let roster = Arc::new(Roster::standard(provider, Arc::new(InMemoryStore::new()))?);
//! let policy = Arc::new(RoutingPolicy::new(
//!     RoutePlan::standard(),
//!     IterationBudget::default(),
//! ));
//! let registry = WorkflowRegistry::new(roster, policy, RegistryConfig::default());
//!
//! let (id, mut events) = registry.start("add input validation to parse_int", None).await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

#![warn(missing_docs)]

pub mod agent;
pub mod config;
pub mod coordinator;
pub mod observability;
pub mod registry;
pub mod routing;
pub mod server;
pub mod state;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::agent::{
        Agent, AgentError, AgentId, HttpTextGenerator, InMemoryStore, IoContract, MemoryStore,
        Roster, StateField, TextGenerator, WiringError,
    };
    pub use crate::config::{Configuration, ConfigurationLoader, EnvironmentLoader};
    pub use crate::coordinator::{RetryConfig, WorkflowCoordinator, WorkflowEvent};
    pub use crate::observability::TranscriptLogger;
    pub use crate::registry::{RegistryConfig, RegistryError, WorkflowId, WorkflowRegistry};
    pub use crate::routing::{
        BlockSignal, FailureReason, IterationBudget, RoutePlan, RouteRule, RoutingPolicy,
        Successor, Verdict,
    };
    pub use crate::server::{ClientRequest, ServerEvent, TransportServer};
    pub use crate::state::{WorkflowState, WorkflowStatus};
}
