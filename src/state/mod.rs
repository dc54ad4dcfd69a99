//! Workflow state - the shared record routed between agents.
//!
//! A [`WorkflowState`] is handed to each agent by value and returned as a
//! fresh snapshot; the coordinator is the only component that replaces the
//! committed snapshot of a running workflow. Concurrency safety is therefore
//! achieved by single-writer handoff rather than field-level locking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::agent::AgentId;

/// Workflow execution status.
///
/// Transitions are monotone: `Pending -> Running -> {Completed, Failed,
/// Cancelled}`, with `Pending -> Cancelled` allowed for workflows cancelled
/// before their first dispatch. Terminal statuses have no outgoing
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Registered, not yet dispatched.
    Pending,
    /// At least one agent invocation has started.
    Running,
    /// The terminal agent finished cleanly.
    Completed,
    /// An agent fault or budget exhaustion ended the workflow.
    Failed,
    /// A cooperative cancellation request was honored.
    Cancelled,
}

impl WorkflowStatus {
    /// Whether this status has no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn can_advance_to(&self, next: WorkflowStatus) -> bool {
        match self {
            Self::Pending => matches!(
                next,
                Self::Running | Self::Completed | Self::Failed | Self::Cancelled
            ),
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{}", name)
    }
}

/// A code artifact produced or revised by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArtifact {
    /// Full file content; entries are replaced, never deleted.
    pub content: String,
    /// Detected or declared language, if any.
    pub language: Option<String>,
}

/// One entry of the inter-agent audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The agent that wrote the message.
    pub agent: AgentId,
    /// Free-form message body.
    pub content: String,
    /// Time the message was appended.
    pub timestamp: DateTime<Utc>,
}

/// One completed agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The invoked agent.
    pub agent_id: AgentId,
    /// Invocation start time.
    pub entered_at: DateTime<Utc>,
    /// Invocation end time.
    pub exited_at: DateTime<Utc>,
    /// Workflow status immediately after the invocation.
    pub resulting_status: WorkflowStatus,
}

/// Category of a code quality issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueCategory {
    /// Formatting or naming concerns.
    Style,
    /// Avoidable inefficiency.
    Performance,
    /// Structure that will impede future changes.
    Maintainability,
    /// Incorrect behavior.
    Bug,
}

/// A code quality issue reported by the reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeIssue {
    /// Path of the affected file.
    pub file_path: String,
    /// One-based line number, if the issue is localized.
    pub line: Option<u32>,
    /// Issue category.
    pub category: IssueCategory,
    /// What is wrong.
    pub description: String,
    /// Suggested fix, if any.
    pub recommendation: Option<String>,
    /// Whether the issue must be resolved before the workflow may proceed.
    pub blocking: bool,
}

/// Severity scale for security findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Informational.
    Low,
    /// Worth fixing, not urgent.
    Medium,
    /// Must be fixed before release.
    High,
    /// Exploitable as-is.
    Critical,
}

impl Severity {
    /// High and critical findings block the happy path.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// A security finding reported by the security auditor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFinding {
    /// Path of the affected file.
    pub file_path: String,
    /// One-based line number, if the finding is localized.
    pub line: Option<u32>,
    /// Finding severity.
    pub severity: Severity,
    /// What is vulnerable.
    pub description: String,
    /// Suggested mitigation, if any.
    pub recommendation: Option<String>,
}

/// Outcome of a single test derived by the tester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// Test name.
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Failure detail or other output.
    pub message: Option<String>,
}

/// The canonical data object for a single workflow run.
///
/// Owned exclusively by the active coordinator while the run is in
/// progress; once `status` is terminal the snapshot is read-only and
/// `files`, `messages` and `workflow_history` never change again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Original task description; immutable after creation.
    pub task: String,
    /// Current lifecycle status.
    pub status: WorkflowStatus,
    /// Code artifacts keyed by path; replace-only.
    #[serde(default)]
    pub files: BTreeMap<String, FileArtifact>,
    /// Append-only inter-agent audit trail.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Append-only invocation record; sole source of truth for iteration
    /// counting.
    #[serde(default)]
    pub workflow_history: Vec<HistoryEntry>,
    /// Architecture plan; owned by the architect.
    #[serde(default)]
    pub plan: Option<String>,
    /// Quality issues; owned by the reviewer.
    #[serde(default)]
    pub code_issues: Vec<CodeIssue>,
    /// Review summary; owned by the reviewer.
    #[serde(default)]
    pub review_notes: Option<String>,
    /// Test outcomes; owned by the tester.
    #[serde(default)]
    pub test_results: Vec<TestResult>,
    /// Security findings; owned by the security auditor.
    #[serde(default)]
    pub security_findings: Vec<SecurityFinding>,
    /// Documentation summary; owned by the documentation agent.
    #[serde(default)]
    pub doc_summary: Option<String>,
    /// Agent currently holding the execution turn, or `None` when idle.
    pub active_agent: Option<AgentId>,
    /// Terminal error description; set at most once.
    pub error: Option<String>,
    /// Time of the last committed snapshot; drives terminal-record
    /// retention.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Create a fresh `Pending` state for the given task.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            status: WorkflowStatus::Pending,
            files: BTreeMap::new(),
            messages: Vec::new(),
            workflow_history: Vec::new(),
            plan: None,
            code_issues: Vec::new(),
            review_notes: None,
            test_results: Vec::new(),
            security_findings: Vec::new(),
            doc_summary: None,
            active_agent: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Advance the status, refusing non-monotone transitions.
    ///
    /// Returns whether the transition was applied.
    pub fn transition(&mut self, next: WorkflowStatus) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Record a terminal error description. Only the first call takes
    /// effect; the field is immutable thereafter.
    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }

    /// Append a message to the audit trail.
    pub fn push_message(&mut self, agent: AgentId, content: impl Into<String>) {
        self.messages.push(Message {
            agent,
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    /// Append one invocation record. Called by the coordinator only.
    pub fn record_step(
        &mut self,
        agent_id: AgentId,
        entered_at: DateTime<Utc>,
        exited_at: DateTime<Utc>,
        resulting_status: WorkflowStatus,
    ) {
        self.workflow_history.push(HistoryEntry {
            agent_id,
            entered_at,
            exited_at,
            resulting_status,
        });
    }

    /// Total number of completed agent invocations.
    pub fn step_count(&self) -> usize {
        self.workflow_history.len()
    }

    /// Number of completed invocations of one specific agent.
    pub fn visits(&self, agent: AgentId) -> usize {
        self.workflow_history
            .iter()
            .filter(|entry| entry.agent_id == agent)
            .count()
    }

    /// Whether the reviewer reported at least one blocking issue.
    pub fn has_blocking_issues(&self) -> bool {
        self.code_issues.iter().any(|issue| issue.blocking)
    }

    /// Whether the reviewer reported issues, none of them blocking.
    pub fn has_advisory_issues_only(&self) -> bool {
        !self.code_issues.is_empty() && !self.has_blocking_issues()
    }

    /// Whether the tester reported at least one failing test.
    pub fn has_failing_tests(&self) -> bool {
        self.test_results.iter().any(|result| !result.passed)
    }

    /// Whether the security auditor reported a high or critical finding.
    pub fn has_blocking_findings(&self) -> bool {
        self.security_findings
            .iter()
            .any(|finding| finding.severity.is_blocking())
    }
}
