//! Workflow coordinator - drives one workflow's agent loop.
//!
//! The coordinator owns the working state of a single workflow: it hands a
//! full snapshot to each agent, validates what comes back, appends the
//! history entry, commits the snapshot, emits exactly one progress event,
//! and then consults the routing policy. Cancellation is cooperative and
//! observed at these routing boundaries only; an in-flight agent invocation
//! always completes so that partial output is never committed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, AgentError, AgentId, Roster};
use crate::observability::TranscriptLogger;
use crate::registry::WorkflowId;
use crate::routing::{RoutingPolicy, Verdict};
use crate::state::{WorkflowState, WorkflowStatus};

/// Retry policy for recoverable agent failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts per invocation, including the first.
    pub max_attempts: u32,
    /// Backoff before retry `n` is `base_delay * 2^(n-1)`.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Progress event pushed to workflow subscribers.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A state transition: workflow started, an agent step completed, or a
    /// terminal status was reached.
    Status {
        /// Workflow the event belongs to.
        id: WorkflowId,
        /// Status after the transition.
        status: WorkflowStatus,
        /// Agent holding the execution turn, if any.
        active_agent: Option<AgentId>,
    },
    /// The final snapshot, pushed once after the terminal status event.
    Terminal {
        /// Workflow the event belongs to.
        id: WorkflowId,
        /// Final committed snapshot.
        state: Box<WorkflowState>,
    },
}

/// Check an agent's returned snapshot against the handoff contract.
///
/// Agents may fill their declared write slots and append messages; the
/// coordinator owns everything else. A violation is a fatal agent error:
/// the returned snapshot is discarded, never committed.
pub fn validate_step(before: &WorkflowState, after: &WorkflowState) -> Result<(), String> {
    if after.task != before.task {
        return Err("agent mutated the immutable task description".to_string());
    }
    if after.status != before.status {
        return Err("agent mutated the coordinator-owned status".to_string());
    }
    if after.error.is_some() {
        return Err("agent wrote the coordinator-owned error slot".to_string());
    }
    if after.active_agent != before.active_agent {
        return Err("agent mutated the coordinator-owned active_agent".to_string());
    }
    if after.workflow_history != before.workflow_history {
        return Err("agent mutated the coordinator-owned workflow history".to_string());
    }
    if after.messages.len() < before.messages.len()
        || after.messages[..before.messages.len()] != before.messages[..]
    {
        return Err("agent truncated or reordered the append-only message trail".to_string());
    }
    Ok(())
}

enum StepResult {
    Advanced(WorkflowState),
    Cancelled,
    Failed(AgentError),
}

/// Drives the agent loop of one workflow on its own task.
pub struct WorkflowCoordinator {
    id: WorkflowId,
    roster: Arc<Roster>,
    policy: Arc<RoutingPolicy>,
    snapshot: Arc<RwLock<WorkflowState>>,
    events: broadcast::Sender<WorkflowEvent>,
    cancel: CancellationToken,
    retry: RetryConfig,
    transcript: Option<TranscriptLogger>,
}

impl WorkflowCoordinator {
    /// Assemble a coordinator around an already-registered workflow.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: WorkflowId,
        roster: Arc<Roster>,
        policy: Arc<RoutingPolicy>,
        snapshot: Arc<RwLock<WorkflowState>>,
        events: broadcast::Sender<WorkflowEvent>,
        cancel: CancellationToken,
        retry: RetryConfig,
        transcript: Option<TranscriptLogger>,
    ) -> Self {
        Self {
            id,
            roster,
            policy,
            snapshot,
            events,
            cancel,
            retry,
            transcript,
        }
    }

    /// Run the workflow to a terminal status.
    ///
    /// Consumes the coordinator; meant to be spawned as the workflow's own
    /// tokio task by the registry.
    pub async fn run(self) {
        let mut state = self.snapshot.read().await.clone();

        if self.cancel.is_cancelled() {
            self.finish(state, WorkflowStatus::Cancelled, None).await;
            return;
        }

        state.transition(WorkflowStatus::Running);
        self.commit(&mut state).await;
        self.emit_status(&state);
        if let Some(t) = &self.transcript {
            if let Err(e) = t.log_workflow_started(&state.task) {
                tracing::warn!(workflow = %self.id, error = %e, "transcript write failed");
            }
        }
        tracing::info!(workflow = %self.id, task = %state.task, "workflow started");

        let mut next = self.policy.entry_agent();
        loop {
            if self.cancel.is_cancelled() {
                self.finish(state, WorkflowStatus::Cancelled, None).await;
                return;
            }

            let agent = match self.roster.get(next) {
                Some(agent) => agent,
                None => {
                    self.finish(
                        state,
                        WorkflowStatus::Failed,
                        Some(format!("agent '{}' is not wired in the roster", next)),
                    )
                    .await;
                    return;
                }
            };

            // Commit the turn handoff so observer snapshots name the agent
            // currently working; the step's one event follows its result.
            state.active_agent = Some(next);
            self.commit(&mut state).await;
            let entered = Utc::now();

            match self.invoke_with_retry(agent.as_ref(), &state).await {
                StepResult::Advanced(mut new_state) => {
                    if let Err(violation) = validate_step(&state, &new_state) {
                        // Reject the partial output: fail on the pre-step state.
                        state.record_step(next, entered, Utc::now(), WorkflowStatus::Failed);
                        self.finish(
                            state,
                            WorkflowStatus::Failed,
                            Some(format!("agent '{}' violated its contract: {}", next, violation)),
                        )
                        .await;
                        return;
                    }

                    let exited = Utc::now();
                    new_state.record_step(next, entered, exited, WorkflowStatus::Running);
                    state = new_state;
                    self.commit(&mut state).await;
                    self.emit_status(&state);
                    if let Some(t) = &self.transcript {
                        if let Err(e) = t.log_agent_step(next, state.step_count()) {
                            tracing::warn!(workflow = %self.id, error = %e, "transcript write failed");
                        }
                    }
                    tracing::debug!(workflow = %self.id, agent = %next, step = state.step_count(), "agent step completed");

                    match self.policy.next(&state) {
                        Verdict::Run(id) => next = id,
                        Verdict::Complete => {
                            self.finish(state, WorkflowStatus::Completed, None).await;
                            return;
                        }
                        Verdict::Fail(reason) => {
                            self.finish(state, WorkflowStatus::Failed, Some(reason.to_string()))
                                .await;
                            return;
                        }
                    }
                }
                StepResult::Cancelled => {
                    state.active_agent = None;
                    self.finish(state, WorkflowStatus::Cancelled, None).await;
                    return;
                }
                StepResult::Failed(err) => {
                    state.record_step(next, entered, Utc::now(), WorkflowStatus::Failed);
                    self.finish(state, WorkflowStatus::Failed, Some(err.to_string()))
                        .await;
                    return;
                }
            }
        }
    }

    /// Invoke one agent, retrying recoverable failures with exponential
    /// backoff. Failed attempts leave no history entries; only the
    /// successful invocation is recorded by the caller.
    async fn invoke_with_retry(&self, agent: &dyn Agent, state: &WorkflowState) -> StepResult {
        let mut failures = 0u32;
        loop {
            match agent.run(state.clone()).await {
                Ok(next_state) => return StepResult::Advanced(next_state),
                Err(err @ AgentError::Fatal(_)) => return StepResult::Failed(err),
                Err(err @ AgentError::Recoverable(_)) => {
                    failures += 1;
                    if failures >= self.retry.max_attempts {
                        return StepResult::Failed(err);
                    }
                    let delay = self.retry.base_delay * 2u32.pow(failures - 1);
                    tracing::warn!(
                        workflow = %self.id,
                        agent = %agent.id(),
                        attempt = failures,
                        error = %err,
                        "recoverable agent failure, retrying"
                    );
                    if let Some(t) = &self.transcript {
                        let _ = t.log_retry(agent.id(), failures, &err.to_string());
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        // A retry is a fresh invocation; cancellation may
                        // pre-empt it during the backoff.
                        _ = self.cancel.cancelled() => return StepResult::Cancelled,
                    }
                }
            }
        }
    }

    async fn finish(&self, mut state: WorkflowState, status: WorkflowStatus, error: Option<String>) {
        if let Some(message) = error {
            state.record_error(message);
        }
        state.transition(status);
        state.active_agent = None;
        self.commit(&mut state).await;
        self.emit_status(&state);
        let _ = self.events.send(WorkflowEvent::Terminal {
            id: self.id.clone(),
            state: Box::new(state.clone()),
        });

        if let Some(t) = &self.transcript {
            if let Err(e) = t.log_workflow_finished(state.status, state.error.as_deref()) {
                tracing::warn!(workflow = %self.id, error = %e, "transcript write failed");
            }
        }
        match state.status {
            WorkflowStatus::Failed => {
                tracing::warn!(workflow = %self.id, error = ?state.error, "workflow failed")
            }
            _ => tracing::info!(workflow = %self.id, status = %state.status, "workflow finished"),
        }
    }

    async fn commit(&self, state: &mut WorkflowState) {
        state.updated_at = Utc::now();
        *self.snapshot.write().await = state.clone();
    }

    fn emit_status(&self, state: &WorkflowState) {
        // Send errors only mean there is no live subscriber right now.
        let _ = self.events.send(WorkflowEvent::Status {
            id: self.id.clone(),
            status: state.status,
            active_agent: state.active_agent,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{IoContract, StateField};
    use crate::routing::{IterationBudget, RoutePlan, RouteRule, RoutingPolicy, Successor};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Agent that succeeds, optionally after a scripted number of
    /// recoverable failures.
    struct FlakyAgent {
        id: AgentId,
        failures_before_success: u32,
        calls: AtomicU32,
    }

    impl FlakyAgent {
        fn reliable(id: AgentId) -> Arc<Self> {
            Arc::new(Self {
                id,
                failures_before_success: 0,
                calls: AtomicU32::new(0),
            })
        }

        fn flaky(id: AgentId, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                id,
                failures_before_success: failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Agent for FlakyAgent {
        fn id(&self) -> AgentId {
            self.id
        }

        fn contract(&self) -> IoContract {
            IoContract::new(&[], &[StateField::Files])
        }

        async fn run(&self, mut state: WorkflowState) -> Result<WorkflowState, AgentError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(AgentError::Recoverable("provider timeout".to_string()));
            }
            state.push_message(self.id, "done");
            Ok(state)
        }
    }

    /// Agent that violates the handoff contract.
    struct RogueAgent;

    #[async_trait]
    impl Agent for RogueAgent {
        fn id(&self) -> AgentId {
            AgentId::Coder
        }

        fn contract(&self) -> IoContract {
            IoContract::new(&[], &[])
        }

        async fn run(&self, mut state: WorkflowState) -> Result<WorkflowState, AgentError> {
            state.task = "rewritten".to_string();
            Ok(state)
        }
    }

    fn two_step_policy() -> Arc<RoutingPolicy> {
        let plan = RoutePlan::new(AgentId::Coder)
            .rule(AgentId::Coder, RouteRule::direct(Successor::Next(AgentId::Reviewer)))
            .rule(AgentId::Reviewer, RouteRule::direct(Successor::Finish));
        Arc::new(RoutingPolicy::new(plan, IterationBudget::default()))
    }

    fn harness(
        roster: Roster,
        policy: Arc<RoutingPolicy>,
        retry: RetryConfig,
    ) -> (
        WorkflowCoordinator,
        Arc<RwLock<WorkflowState>>,
        broadcast::Receiver<WorkflowEvent>,
        CancellationToken,
    ) {
        let snapshot = Arc::new(RwLock::new(WorkflowState::new("add input validation")));
        let (events, rx) = broadcast::channel(64);
        let cancel = CancellationToken::new();
        let coordinator = WorkflowCoordinator::new(
            WorkflowId::generate(),
            Arc::new(roster),
            policy,
            snapshot.clone(),
            events,
            cancel.clone(),
            retry,
            None,
        );
        (coordinator, snapshot, rx, cancel)
    }

    #[tokio::test]
    async fn test_two_step_workflow_completes() {
        let roster = Roster::new(vec![
            FlakyAgent::reliable(AgentId::Coder) as Arc<dyn Agent>,
            FlakyAgent::reliable(AgentId::Reviewer) as Arc<dyn Agent>,
        ])
        .unwrap();
        let (coordinator, snapshot, _rx, _cancel) =
            harness(roster, two_step_policy(), RetryConfig::default());

        coordinator.run().await;

        let state = snapshot.read().await;
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.step_count(), 2);
        assert!(state.error.is_none());
        assert_eq!(state.active_agent, None);
    }

    #[tokio::test]
    async fn test_recoverable_failures_are_retried_without_history_entries() {
        let coder = FlakyAgent::flaky(AgentId::Coder, 2);
        let roster = Roster::new(vec![
            coder.clone() as Arc<dyn Agent>,
            FlakyAgent::reliable(AgentId::Reviewer) as Arc<dyn Agent>,
        ])
        .unwrap();
        let retry = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let (coordinator, snapshot, _rx, _cancel) = harness(roster, two_step_policy(), retry);

        coordinator.run().await;

        let state = snapshot.read().await;
        assert_eq!(state.status, WorkflowStatus::Completed);
        // Two failed attempts, then success: the history records only the
        // successful invocation of each agent.
        assert_eq!(state.step_count(), 2);
        assert_eq!(coder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_workflow() {
        let roster = Roster::new(vec![
            FlakyAgent::flaky(AgentId::Coder, 10) as Arc<dyn Agent>,
            FlakyAgent::reliable(AgentId::Reviewer) as Arc<dyn Agent>,
        ])
        .unwrap();
        let retry = RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        };
        let (coordinator, snapshot, _rx, _cancel) = harness(roster, two_step_policy(), retry);

        coordinator.run().await;

        let state = snapshot.read().await;
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert!(state.error.as_deref().unwrap().contains("recoverable"));
    }

    #[tokio::test]
    async fn test_contract_violation_discards_partial_output() {
        let roster = Roster::new(vec![
            Arc::new(RogueAgent) as Arc<dyn Agent>,
            FlakyAgent::reliable(AgentId::Reviewer) as Arc<dyn Agent>,
        ])
        .unwrap();
        let (coordinator, snapshot, _rx, _cancel) =
            harness(roster, two_step_policy(), RetryConfig::default());

        coordinator.run().await;

        let state = snapshot.read().await;
        assert_eq!(state.status, WorkflowStatus::Failed);
        // The rogue rewrite was never committed.
        assert_eq!(state.task, "add input validation");
        assert!(state.error.as_deref().unwrap().contains("violated its contract"));
    }

    #[tokio::test]
    async fn test_cancellation_before_start() {
        let roster = Roster::new(vec![
            FlakyAgent::reliable(AgentId::Coder) as Arc<dyn Agent>,
            FlakyAgent::reliable(AgentId::Reviewer) as Arc<dyn Agent>,
        ])
        .unwrap();
        let (coordinator, snapshot, _rx, cancel) =
            harness(roster, two_step_policy(), RetryConfig::default());

        cancel.cancel();
        coordinator.run().await;

        let state = snapshot.read().await;
        assert_eq!(state.status, WorkflowStatus::Cancelled);
        assert_eq!(state.step_count(), 0);
    }

    #[tokio::test]
    async fn test_events_arrive_in_order_and_end_terminal() {
        let roster = Roster::new(vec![
            FlakyAgent::reliable(AgentId::Coder) as Arc<dyn Agent>,
            FlakyAgent::reliable(AgentId::Reviewer) as Arc<dyn Agent>,
        ])
        .unwrap();
        let (coordinator, _snapshot, mut rx, _cancel) =
            harness(roster, two_step_policy(), RetryConfig::default());

        coordinator.run().await;

        let mut statuses = Vec::new();
        let mut terminal = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                WorkflowEvent::Status { status, active_agent, .. } => {
                    statuses.push((status, active_agent))
                }
                WorkflowEvent::Terminal { state, .. } => terminal = Some(state),
            }
        }

        assert_eq!(
            statuses,
            vec![
                (WorkflowStatus::Running, None),
                (WorkflowStatus::Running, Some(AgentId::Coder)),
                (WorkflowStatus::Running, Some(AgentId::Reviewer)),
                (WorkflowStatus::Completed, None),
            ]
        );
        assert_eq!(terminal.unwrap().status, WorkflowStatus::Completed);
    }

    #[test]
    fn test_validate_step_accepts_honest_updates() {
        let before = WorkflowState::new("task");
        let mut after = before.clone();
        after.push_message(AgentId::Coder, "wrote a file");
        after.plan = Some("plan".to_string());
        assert!(validate_step(&before, &after).is_ok());
    }

    #[test]
    fn test_validate_step_rejects_trail_truncation() {
        let mut before = WorkflowState::new("task");
        before.push_message(AgentId::Coder, "first");
        let mut after = before.clone();
        after.messages.clear();
        assert!(validate_step(&before, &after).is_err());
    }

    #[test]
    fn test_validate_step_rejects_status_writes() {
        let before = WorkflowState::new("task");
        let mut after = before.clone();
        after.status = WorkflowStatus::Completed;
        assert!(validate_step(&before, &after).is_err());
    }
}
