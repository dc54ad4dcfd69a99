//! Wire protocol of the workflow transport.
//!
//! JSON messages discriminated by a `type` tag, matching the verbs the
//! editor-side client speaks. Inbound frames that fail to parse are
//! answered with an `error` event; the connection stays open.

use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::coordinator::WorkflowEvent;
use crate::state::{WorkflowState, WorkflowStatus};

/// Inbound control messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Start a workflow for the given task; the server assigns an id
    /// unless the caller supplies one.
    StartWorkflow {
        /// Natural-language task description.
        task: String,
        /// Optional caller-chosen id, echoed back if free.
        #[serde(default)]
        workflow_id: Option<String>,
    },
    /// Request cooperative cancellation.
    CancelWorkflow {
        /// Target workflow.
        workflow_id: String,
    },
    /// Fetch the latest snapshot.
    GetWorkflowResults {
        /// Target workflow.
        workflow_id: String,
    },
    /// Subscribe to live progress events.
    Subscribe {
        /// Target workflow.
        workflow_id: String,
    },
}

impl ClientRequest {
    /// Parse one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Outbound events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Greeting pushed once per connection.
    Hello {
        /// Server crate version.
        server_version: String,
        /// Number of workflows currently retained.
        active_workflows: usize,
    },
    /// A workflow state transition.
    Status {
        /// Workflow the event belongs to.
        workflow_id: String,
        /// Status after the transition.
        status: WorkflowStatus,
        /// Agent holding the execution turn, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        active_agent: Option<AgentId>,
    },
    /// A full snapshot, pushed on terminal status and on demand.
    WorkflowResults {
        /// Workflow the snapshot belongs to.
        workflow_id: String,
        /// The snapshot.
        state: Box<WorkflowState>,
    },
    /// A structured failure notice.
    Error {
        /// Related workflow, when one is known.
        #[serde(skip_serializing_if = "Option::is_none")]
        workflow_id: Option<String>,
        /// Human-readable description.
        message: String,
    },
}

impl ServerEvent {
    /// Build an error event.
    pub fn error(workflow_id: Option<String>, message: impl Into<String>) -> Self {
        Self::Error {
            workflow_id,
            message: message.into(),
        }
    }

    /// Map a coordinator event onto the wire.
    pub fn from_workflow(event: WorkflowEvent) -> Self {
        match event {
            WorkflowEvent::Status {
                id,
                status,
                active_agent,
            } => Self::Status {
                workflow_id: id.to_string(),
                status,
                active_agent,
            },
            WorkflowEvent::Terminal { id, state } => Self::WorkflowResults {
                workflow_id: id.to_string(),
                state,
            },
        }
    }
}
