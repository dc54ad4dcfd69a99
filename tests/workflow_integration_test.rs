//! Integration tests for the workflow registry and coordinator.
//!
//! Exercises the full loop with scripted agents standing in for the
//! provider-backed specialists.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use troupe::agent::{Agent, AgentError, AgentId, IoContract, Roster, StateField};
use troupe::registry::{RegistryConfig, WorkflowRegistry};
use troupe::routing::{
    BlockSignal, IterationBudget, RoutePlan, RouteRule, RoutingPolicy, Successor,
};
use troupe::state::{CodeIssue, FileArtifact, IssueCategory, WorkflowState, WorkflowStatus};

/// Coder stand-in: writes one file, optionally failing recoverably first.
struct ScriptedCoder {
    failures_before_success: u32,
    calls: AtomicU32,
}

impl ScriptedCoder {
    fn reliable() -> Arc<Self> {
        Self::flaky(0)
    }

    fn flaky(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures_before_success: failures,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Agent for ScriptedCoder {
    fn id(&self) -> AgentId {
        AgentId::Coder
    }

    fn contract(&self) -> IoContract {
        IoContract::new(&[], &[StateField::Files])
    }

    async fn run(&self, mut state: WorkflowState) -> Result<WorkflowState, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            return Err(AgentError::Recoverable("provider timeout".to_string()));
        }
        state.files.insert(
            "src/parse.rs".to_string(),
            FileArtifact {
                content: "fn parse_int(s: &str) -> Option<i64> { s.trim().parse().ok() }"
                    .to_string(),
                language: Some("rust".to_string()),
            },
        );
        state.push_message(AgentId::Coder, "wrote src/parse.rs");
        Ok(state)
    }
}

/// Reviewer stand-in: reports a scripted number of blocking reviews before
/// going clean.
struct ScriptedReviewer {
    blocking_reviews: u32,
    calls: AtomicU32,
}

impl ScriptedReviewer {
    fn clean() -> Arc<Self> {
        Self::blocking(0)
    }

    fn blocking(reviews: u32) -> Arc<Self> {
        Arc::new(Self {
            blocking_reviews: reviews,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Agent for ScriptedReviewer {
    fn id(&self) -> AgentId {
        AgentId::Reviewer
    }

    fn contract(&self) -> IoContract {
        IoContract::new(&[StateField::Files], &[StateField::CodeIssues])
    }

    async fn run(&self, mut state: WorkflowState) -> Result<WorkflowState, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        state.code_issues = if call < self.blocking_reviews {
            vec![CodeIssue {
                file_path: "src/parse.rs".to_string(),
                line: Some(1),
                category: IssueCategory::Bug,
                description: "no overflow handling".to_string(),
                recommendation: Some("use checked parsing".to_string()),
                blocking: true,
            }]
        } else {
            Vec::new()
        };
        state.push_message(AgentId::Reviewer, "review finished");
        Ok(state)
    }
}

/// A slow agent for exercising cancellation mid-run.
struct SlowAgent(AgentId);

#[async_trait]
impl Agent for SlowAgent {
    fn id(&self) -> AgentId {
        self.0
    }

    fn contract(&self) -> IoContract {
        IoContract::new(&[], &[])
    }

    async fn run(&self, mut state: WorkflowState) -> Result<WorkflowState, AgentError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.push_message(self.0, "slow step");
        Ok(state)
    }
}

fn coder_reviewer_plan() -> RoutePlan {
    RoutePlan::new(AgentId::Coder)
        .rule(
            AgentId::Coder,
            RouteRule::direct(Successor::Next(AgentId::Reviewer)),
        )
        .rule(
            AgentId::Reviewer,
            RouteRule::with_detours(
                vec![(BlockSignal::BlockingIssues, AgentId::Coder)],
                Successor::Finish,
            ),
        )
}

fn registry_with(
    coder: Arc<ScriptedCoder>,
    reviewer: Arc<ScriptedReviewer>,
    budget: IterationBudget,
    config: RegistryConfig,
) -> WorkflowRegistry {
    let roster = Roster::new(vec![coder as Arc<dyn Agent>, reviewer as Arc<dyn Agent>]).unwrap();
    let policy = RoutingPolicy::new(coder_reviewer_plan(), budget);
    WorkflowRegistry::new(Arc::new(roster), Arc::new(policy), config)
}

async fn wait_terminal(registry: &WorkflowRegistry, id: &troupe::registry::WorkflowId) -> WorkflowState {
    for _ in 0..400 {
        let state = registry.snapshot(id).await.expect("workflow retained");
        if state.status.is_terminal() {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("workflow never reached a terminal status");
}

/// Scenario A: a clean Coder -> Reviewer run completes in two steps.
#[tokio::test]
async fn test_clean_run_completes_with_two_steps() {
    let registry = registry_with(
        ScriptedCoder::reliable(),
        ScriptedReviewer::clean(),
        IterationBudget::default(),
        RegistryConfig::default(),
    );

    let (id, _events) = registry
        .start("add input validation to parse_int", None)
        .await
        .unwrap();
    let state = wait_terminal(&registry, &id).await;

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.workflow_history.len(), 2);
    assert_eq!(state.workflow_history[0].agent_id, AgentId::Coder);
    assert_eq!(state.workflow_history[1].agent_id, AgentId::Reviewer);
    assert!(state.error.is_none());
    assert!(state.files.contains_key("src/parse.rs"));
}

/// Scenario B: a reviewer that keeps blocking exhausts the repeat budget.
#[tokio::test]
async fn test_review_ping_pong_hits_iteration_limit() {
    let registry = registry_with(
        ScriptedCoder::reliable(),
        ScriptedReviewer::blocking(10),
        IterationBudget {
            max_steps: 24,
            max_agent_visits: 2,
        },
        RegistryConfig::default(),
    );

    let (id, _events) = registry
        .start("add input validation to parse_int", None)
        .await
        .unwrap();
    let state = wait_terminal(&registry, &id).await;

    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.error.as_deref(), Some("iteration_limit_exceeded"));
    // Two full coder/reviewer rounds ran before the budget tripped.
    assert_eq!(state.workflow_history.len(), 4);
}

/// Scenario C: two transient failures then success proceed normally, with
/// no history entries for the failed attempts.
#[tokio::test]
async fn test_transient_failures_are_retried_transparently() {
    let coder = ScriptedCoder::flaky(2);
    let mut config = RegistryConfig::default();
    config.retry.max_attempts = 3;
    config.retry.base_delay = Duration::from_millis(1);

    let registry = registry_with(
        coder.clone(),
        ScriptedReviewer::clean(),
        IterationBudget::default(),
        config,
    );

    let (id, _events) = registry
        .start("add input validation to parse_int", None)
        .await
        .unwrap();
    let state = wait_terminal(&registry, &id).await;

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.workflow_history.len(), 2);
    assert_eq!(coder.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_issued_ids_are_unique_while_retained() {
    let registry = registry_with(
        ScriptedCoder::reliable(),
        ScriptedReviewer::clean(),
        IterationBudget::default(),
        RegistryConfig::default(),
    );

    let mut seen = std::collections::HashSet::new();
    for i in 0..32 {
        let (id, _events) = registry.start(&format!("task {}", i), None).await.unwrap();
        assert!(seen.insert(id), "registry issued a duplicate id");
    }
}

#[tokio::test]
async fn test_terminal_results_are_idempotent() {
    let registry = registry_with(
        ScriptedCoder::reliable(),
        ScriptedReviewer::clean(),
        IterationBudget::default(),
        RegistryConfig::default(),
    );

    let (id, _events) = registry.start("task", None).await.unwrap();
    wait_terminal(&registry, &id).await;

    let first = serde_json::to_string(&registry.snapshot(&id).await.unwrap()).unwrap();
    for _ in 0..5 {
        let again = serde_json::to_string(&registry.snapshot(&id).await.unwrap()).unwrap();
        assert_eq!(first, again);
    }
}

#[tokio::test]
async fn test_cancel_mid_run_settles_cancelled() {
    // An endless slow ping-pong that only cancellation can stop.
    let roster = Roster::new(vec![
        Arc::new(SlowAgent(AgentId::Coder)) as Arc<dyn Agent>,
        Arc::new(SlowAgent(AgentId::Reviewer)) as Arc<dyn Agent>,
    ])
    .unwrap();
    let plan = RoutePlan::new(AgentId::Coder)
        .rule(
            AgentId::Coder,
            RouteRule::direct(Successor::Next(AgentId::Reviewer)),
        )
        .rule(
            AgentId::Reviewer,
            RouteRule::direct(Successor::Next(AgentId::Coder)),
        );
    let policy = RoutingPolicy::new(
        plan,
        IterationBudget {
            max_steps: 10_000,
            max_agent_visits: 10_000,
        },
    );
    let registry = WorkflowRegistry::new(
        Arc::new(roster),
        Arc::new(policy),
        RegistryConfig::default(),
    );

    let (id, _events) = registry.start("long running task", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    registry.cancel(&id).await.unwrap();

    let state = wait_terminal(&registry, &id).await;
    assert_eq!(state.status, WorkflowStatus::Cancelled);
    // The in-flight step completed before cancellation was honored.
    assert!(state.step_count() >= 1);
}

#[tokio::test]
async fn test_all_subscribers_observe_the_same_event_order() {
    let registry = registry_with(
        ScriptedCoder::reliable(),
        ScriptedReviewer::clean(),
        IterationBudget::default(),
        RegistryConfig::default(),
    );

    let (id, mut first) = registry.start("task", None).await.unwrap();
    let (_, mut second) = registry.subscribe(&id).await.unwrap();

    wait_terminal(&registry, &id).await;

    let drain = |receiver: &mut tokio::sync::broadcast::Receiver<
        troupe::coordinator::WorkflowEvent,
    >| {
        let mut statuses = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            if let troupe::coordinator::WorkflowEvent::Status { status, active_agent, .. } = event {
                statuses.push((status, active_agent));
            }
        }
        statuses
    };

    let first_order = drain(&mut first);
    let second_order = drain(&mut second);

    // The late subscriber may have joined mid-stream, but what it saw is a
    // suffix of the full ordered stream, never a reordering.
    assert!(!first_order.is_empty());
    assert!(first_order.ends_with(&second_order));
    assert_eq!(
        first_order.last(),
        Some(&(WorkflowStatus::Completed, None))
    );
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_workflows() {
    let roster = Roster::new(vec![
        Arc::new(SlowAgent(AgentId::Coder)) as Arc<dyn Agent>,
        Arc::new(SlowAgent(AgentId::Reviewer)) as Arc<dyn Agent>,
    ])
    .unwrap();
    let plan = RoutePlan::new(AgentId::Coder)
        .rule(
            AgentId::Coder,
            RouteRule::direct(Successor::Next(AgentId::Reviewer)),
        )
        .rule(
            AgentId::Reviewer,
            RouteRule::direct(Successor::Next(AgentId::Coder)),
        );
    let policy = RoutingPolicy::new(
        plan,
        IterationBudget {
            max_steps: 10_000,
            max_agent_visits: 10_000,
        },
    );
    let registry = WorkflowRegistry::new(
        Arc::new(roster),
        Arc::new(policy),
        RegistryConfig::default(),
    );

    let (_, mut events) = registry.start("drain me", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    registry.shutdown().await;
    assert!(registry.is_empty().await);

    // The last status the subscriber saw is CANCELLED.
    let mut last = None;
    while let Ok(event) = events.try_recv() {
        if let troupe::coordinator::WorkflowEvent::Status { status, .. } = event {
            last = Some(status);
        }
    }
    assert_eq!(last, Some(WorkflowStatus::Cancelled));
}
