//! Core agent types: identifiers, error taxonomy, and I/O contracts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of one specialist in the fixed roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    /// Designs the solution and decomposes the task.
    Architect,
    /// Writes and reworks code artifacts.
    Coder,
    /// Examines code for quality, style, and correctness issues.
    Reviewer,
    /// Derives test outcomes for the produced artifacts.
    Tester,
    /// Improves structure without changing behavior.
    Refactorer,
    /// Audits the artifacts for vulnerabilities.
    Security,
    /// Produces the closing documentation; the terminal specialist.
    Documentation,
}

impl AgentId {
    /// All roster members, in canonical order.
    pub const ALL: [AgentId; 7] = [
        AgentId::Architect,
        AgentId::Coder,
        AgentId::Reviewer,
        AgentId::Tester,
        AgentId::Refactorer,
        AgentId::Security,
        AgentId::Documentation,
    ];

    /// Lowercase wire/display name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Architect => "architect",
            Self::Coder => "coder",
            Self::Reviewer => "reviewer",
            Self::Tester => "tester",
            Self::Refactorer => "refactorer",
            Self::Security => "security",
            Self::Documentation => "documentation",
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Failure reported by an agent invocation.
///
/// Recoverable failures (typically transient provider errors) are retried
/// by the coordinator with bounded backoff; fatal failures end the
/// workflow immediately.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// Transient failure; the invocation may be retried.
    #[error("recoverable agent failure: {0}")]
    Recoverable(String),
    /// Contract violation or unrecoverable failure; no further agents run.
    #[error("fatal agent failure: {0}")]
    Fatal(String),
}

impl AgentError {
    /// Whether the coordinator may retry the invocation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable(_))
    }
}

/// A field of [`crate::state::WorkflowState`] an agent may declare in its
/// I/O contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    /// The code artifact map. The only write slot shared across agents
    /// (the coder/refactorer class).
    Files,
    /// Architecture plan.
    Plan,
    /// Reviewer quality issues.
    CodeIssues,
    /// Reviewer summary.
    ReviewNotes,
    /// Tester outcomes.
    TestResults,
    /// Security auditor findings.
    SecurityFindings,
    /// Documentation summary.
    DocSummary,
}

impl StateField {
    /// Whether more than one agent may claim this slot for writing.
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Files)
    }

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Plan => "plan",
            Self::CodeIssues => "code_issues",
            Self::ReviewNotes => "review_notes",
            Self::TestResults => "test_results",
            Self::SecurityFindings => "security_findings",
            Self::DocSummary => "doc_summary",
        }
    }
}

impl std::fmt::Display for StateField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Declared read and write sets of one agent, checked at roster wiring
/// time to prevent silent cross-agent field collisions.
#[derive(Debug, Clone)]
pub struct IoContract {
    /// Fields the agent reads.
    pub reads: Vec<StateField>,
    /// Fields the agent writes.
    pub writes: Vec<StateField>,
}

impl IoContract {
    /// Build a contract from slices of fields.
    pub fn new(reads: &[StateField], writes: &[StateField]) -> Self {
        Self {
            reads: reads.to_vec(),
            writes: writes.to_vec(),
        }
    }
}
