//! Workflow registry - the process-wide table of active and retained
//! workflows.
//!
//! The registry is the one truly shared mutable structure in the system.
//! Its map sits behind a single coarse lock held only for the duration of a
//! lookup or insert, never across an agent invocation: each workflow runs
//! on its own tokio task and owns its state outright. Terminal records are
//! retained for a bounded window so late-joining observers can still fetch
//! final results, then evicted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::Roster;
use crate::coordinator::{RetryConfig, WorkflowCoordinator, WorkflowEvent};
use crate::observability::TranscriptLogger;
use crate::routing::RoutingPolicy;
use crate::state::{WorkflowState, WorkflowStatus};

/// Process-unique, caller-opaque workflow token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Mint a fresh id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for WorkflowId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for WorkflowId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors surfaced by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The task description was empty; no workflow was created.
    #[error("task must not be empty")]
    EmptyTask,

    /// The caller-supplied id collides with a retained workflow.
    #[error("workflow '{0}' already exists")]
    DuplicateId(WorkflowId),

    /// No retained workflow carries the given id.
    #[error("unknown workflow")]
    UnknownWorkflow,
}

/// Runtime knobs for the registry and its coordinators.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Retry policy applied to recoverable agent failures.
    pub retry: RetryConfig,
    /// How long terminal records stay fetchable before eviction.
    pub retention: Duration,
    /// Per-workflow event channel capacity.
    pub event_capacity: usize,
    /// Directory for workflow transcripts; `None` disables them.
    pub transcript_dir: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            retention: Duration::from_secs(300),
            event_capacity: 256,
            transcript_dir: None,
        }
    }
}

struct WorkflowRecord {
    snapshot: Arc<RwLock<WorkflowState>>,
    events: broadcast::Sender<WorkflowEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Process-wide table of workflows, keyed by workflow id.
pub struct WorkflowRegistry {
    roster: Arc<Roster>,
    policy: Arc<RoutingPolicy>,
    config: RegistryConfig,
    workflows: RwLock<HashMap<WorkflowId, WorkflowRecord>>,
}

impl WorkflowRegistry {
    /// Build an empty registry over the given roster and routing policy.
    pub fn new(roster: Arc<Roster>, policy: Arc<RoutingPolicy>, config: RegistryConfig) -> Self {
        Self {
            roster,
            policy,
            config,
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Start a new workflow for the given task.
    ///
    /// Validates the task, assigns (or echoes) the id, registers the
    /// record, and spawns the coordinator on its own task. Returns
    /// immediately with the id and an event receiver that observes every
    /// event from the first status transition on.
    pub async fn start(
        &self,
        task: &str,
        requested_id: Option<String>,
    ) -> Result<(WorkflowId, broadcast::Receiver<WorkflowEvent>), RegistryError> {
        let task = task.trim();
        if task.is_empty() {
            return Err(RegistryError::EmptyTask);
        }

        let id = match requested_id.filter(|raw| !raw.trim().is_empty()) {
            Some(raw) => WorkflowId::from(raw),
            None => WorkflowId::generate(),
        };

        // Early duplicate check so a rejected start leaves no side effects;
        // the insert below re-checks under the write lock.
        if self.workflows.read().await.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }

        let snapshot = Arc::new(RwLock::new(WorkflowState::new(task)));
        let (events, receiver) = broadcast::channel(self.config.event_capacity);
        let cancel = CancellationToken::new();
        let transcript = self.config.transcript_dir.as_ref().and_then(|dir| {
            match TranscriptLogger::for_workflow(dir, id.as_str()) {
                Ok(logger) => Some(logger),
                Err(e) => {
                    tracing::warn!(workflow = %id, error = %e, "transcript disabled");
                    None
                }
            }
        });

        let coordinator = WorkflowCoordinator::new(
            id.clone(),
            self.roster.clone(),
            self.policy.clone(),
            snapshot.clone(),
            events.clone(),
            cancel.clone(),
            self.config.retry,
            transcript,
        );

        {
            let mut workflows = self.workflows.write().await;
            if workflows.contains_key(&id) {
                return Err(RegistryError::DuplicateId(id));
            }
            let handle = tokio::spawn(coordinator.run());
            workflows.insert(
                id.clone(),
                WorkflowRecord {
                    snapshot,
                    events,
                    cancel,
                    handle,
                },
            );
        }

        tracing::info!(workflow = %id, "workflow registered");
        Ok((id, receiver))
    }

    /// Request cooperative cancellation.
    ///
    /// Takes effect at the workflow's next routing boundary. Returns the
    /// status observed at request time; an already-terminal workflow keeps
    /// its prior status.
    pub async fn cancel(&self, id: &WorkflowId) -> Result<WorkflowStatus, RegistryError> {
        let (snapshot, cancel) = {
            let workflows = self.workflows.read().await;
            let record = workflows.get(id).ok_or(RegistryError::UnknownWorkflow)?;
            (record.snapshot.clone(), record.cancel.clone())
        };

        let status = snapshot.read().await.status;
        if !status.is_terminal() {
            cancel.cancel();
            tracing::info!(workflow = %id, "cancellation requested");
        }
        Ok(status)
    }

    /// The latest committed snapshot, never a partially-written one.
    pub async fn snapshot(&self, id: &WorkflowId) -> Result<WorkflowState, RegistryError> {
        let snapshot = {
            let workflows = self.workflows.read().await;
            workflows
                .get(id)
                .ok_or(RegistryError::UnknownWorkflow)?
                .snapshot
                .clone()
        };
        let state = snapshot.read().await.clone();
        Ok(state)
    }

    /// Subscribe to a workflow's live events.
    ///
    /// Returns the current snapshot alongside the receiver so the caller
    /// can surface the latest state immediately (replay policy: latest
    /// snapshot only, no event history).
    pub async fn subscribe(
        &self,
        id: &WorkflowId,
    ) -> Result<(WorkflowState, broadcast::Receiver<WorkflowEvent>), RegistryError> {
        let (snapshot, receiver) = {
            let workflows = self.workflows.read().await;
            let record = workflows.get(id).ok_or(RegistryError::UnknownWorkflow)?;
            (record.snapshot.clone(), record.events.subscribe())
        };
        let state = snapshot.read().await.clone();
        Ok((state, receiver))
    }

    /// Explicitly dispose of a workflow record.
    ///
    /// A live workflow is cancelled first; its task finishes at the next
    /// routing boundary.
    pub async fn dispose(&self, id: &WorkflowId) -> Result<(), RegistryError> {
        let record = {
            let mut workflows = self.workflows.write().await;
            workflows.remove(id).ok_or(RegistryError::UnknownWorkflow)?
        };
        record.cancel.cancel();
        tracing::info!(workflow = %id, "workflow disposed");
        Ok(())
    }

    /// Number of retained workflows (active and terminal).
    pub async fn len(&self) -> usize {
        self.workflows.read().await.len()
    }

    /// Whether the registry retains no workflows.
    pub async fn is_empty(&self) -> bool {
        self.workflows.read().await.is_empty()
    }

    /// Evict terminal records older than the retention window.
    ///
    /// Returns the number of evicted workflows.
    pub async fn evict_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let now = Utc::now();

        let mut expired = Vec::new();
        {
            let workflows = self.workflows.read().await;
            for (id, record) in workflows.iter() {
                if !record.handle.is_finished() {
                    continue;
                }
                let state = record.snapshot.read().await;
                if state.status.is_terminal() && now - state.updated_at > retention {
                    expired.push(id.clone());
                }
            }
        }

        if expired.is_empty() {
            return 0;
        }

        let mut workflows = self.workflows.write().await;
        let mut evicted = 0;
        for id in expired {
            if workflows.remove(&id).is_some() {
                tracing::debug!(workflow = %id, "terminal workflow evicted");
                evicted += 1;
            }
        }
        evicted
    }

    /// Periodically evict expired terminal records until the registry is
    /// dropped. Meant to be spawned once at startup.
    pub async fn run_eviction(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = self.evict_expired().await;
            if evicted > 0 {
                tracing::info!(evicted, "retention sweep");
            }
        }
    }

    /// Drain the registry on shutdown: cancel every live workflow and wait
    /// for its task to finish. In-flight agent invocations complete first,
    /// so no partial output is committed.
    pub async fn shutdown(&self) {
        let records: Vec<(WorkflowId, WorkflowRecord)> = {
            let mut workflows = self.workflows.write().await;
            workflows.drain().collect()
        };

        for (_, record) in &records {
            record.cancel.cancel();
        }
        for (id, record) in records {
            if let Err(e) = record.handle.await {
                tracing::warn!(workflow = %id, error = %e, "workflow task join failed");
            }
        }
        tracing::info!("registry drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentError, AgentId, IoContract};
    use crate::routing::{IterationBudget, RoutePlan, RouteRule, RoutingPolicy, Successor};
    use async_trait::async_trait;

    struct NoopAgent(AgentId);

    #[async_trait]
    impl Agent for NoopAgent {
        fn id(&self) -> AgentId {
            self.0
        }

        fn contract(&self) -> IoContract {
            IoContract::new(&[], &[])
        }

        async fn run(&self, mut state: WorkflowState) -> Result<WorkflowState, AgentError> {
            state.push_message(self.0, "ok");
            Ok(state)
        }
    }

    fn test_registry() -> WorkflowRegistry {
        let roster = Roster::new(vec![
            Arc::new(NoopAgent(AgentId::Coder)) as Arc<dyn Agent>,
            Arc::new(NoopAgent(AgentId::Reviewer)) as Arc<dyn Agent>,
        ])
        .unwrap();
        let plan = RoutePlan::new(AgentId::Coder)
            .rule(AgentId::Coder, RouteRule::direct(Successor::Next(AgentId::Reviewer)))
            .rule(AgentId::Reviewer, RouteRule::direct(Successor::Finish));
        let policy = RoutingPolicy::new(plan, IterationBudget::default());
        WorkflowRegistry::new(
            Arc::new(roster),
            Arc::new(policy),
            RegistryConfig::default(),
        )
    }

    async fn wait_terminal(registry: &WorkflowRegistry, id: &WorkflowId) -> WorkflowState {
        for _ in 0..200 {
            let state = registry.snapshot(id).await.unwrap();
            if state.status.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("workflow never reached a terminal status");
    }

    #[tokio::test]
    async fn test_empty_task_is_rejected_before_registration() {
        let registry = test_registry();
        assert!(matches!(
            registry.start("   ", None).await,
            Err(RegistryError::EmptyTask)
        ));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_start_assigns_unique_ids() {
        let registry = test_registry();
        let (a, _) = registry.start("task one", None).await.unwrap();
        let (b, _) = registry.start("task two", None).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_duplicate_requested_id_is_rejected() {
        let registry = test_registry();
        let (id, _) = registry
            .start("task", Some("client-chosen".to_string()))
            .await
            .unwrap();
        assert_eq!(id.as_str(), "client-chosen");
        assert!(matches!(
            registry.start("task", Some("client-chosen".to_string())).await,
            Err(RegistryError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn test_workflow_runs_to_completion() {
        let registry = test_registry();
        let (id, _rx) = registry.start("two step task", None).await.unwrap();
        let state = wait_terminal(&registry, &id).await;
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.step_count(), 2);
    }

    #[tokio::test]
    async fn test_terminal_snapshots_are_idempotent() {
        let registry = test_registry();
        let (id, _rx) = registry.start("task", None).await.unwrap();
        wait_terminal(&registry, &id).await;

        let first = serde_json::to_string(&registry.snapshot(&id).await.unwrap()).unwrap();
        let second = serde_json::to_string(&registry.snapshot(&id).await.unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_workflow_lookup() {
        let registry = test_registry();
        let id = WorkflowId::generate();
        assert!(matches!(
            registry.snapshot(&id).await,
            Err(RegistryError::UnknownWorkflow)
        ));
        assert!(matches!(
            registry.cancel(&id).await,
            Err(RegistryError::UnknownWorkflow)
        ));
    }

    #[tokio::test]
    async fn test_eviction_removes_only_expired_terminal_records() {
        let roster = Roster::new(vec![
            Arc::new(NoopAgent(AgentId::Coder)) as Arc<dyn Agent>,
            Arc::new(NoopAgent(AgentId::Reviewer)) as Arc<dyn Agent>,
        ])
        .unwrap();
        let plan = RoutePlan::new(AgentId::Coder)
            .rule(AgentId::Coder, RouteRule::direct(Successor::Next(AgentId::Reviewer)))
            .rule(AgentId::Reviewer, RouteRule::direct(Successor::Finish));
        let policy = RoutingPolicy::new(plan, IterationBudget::default());
        let registry = WorkflowRegistry::new(
            Arc::new(roster),
            Arc::new(policy),
            RegistryConfig {
                retention: Duration::from_millis(50),
                ..RegistryConfig::default()
            },
        );

        let (expired, _rx) = registry.start("old task", None).await.unwrap();
        wait_terminal(&registry, &expired).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // A second terminal workflow still inside the retention window.
        let (fresh, _rx2) = registry.start("fresh task", None).await.unwrap();
        wait_terminal(&registry, &fresh).await;

        assert_eq!(registry.evict_expired().await, 1);
        assert!(matches!(
            registry.snapshot(&expired).await,
            Err(RegistryError::UnknownWorkflow)
        ));
        assert!(registry.snapshot(&fresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_dispose_forgets_the_workflow() {
        let registry = test_registry();
        let (id, _rx) = registry.start("task", None).await.unwrap();
        wait_terminal(&registry, &id).await;

        registry.dispose(&id).await.unwrap();
        assert!(matches!(
            registry.snapshot(&id).await,
            Err(RegistryError::UnknownWorkflow)
        ));
        assert!(matches!(
            registry.dispose(&id).await,
            Err(RegistryError::UnknownWorkflow)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_drains_all_workflows() {
        let registry = test_registry();
        let (_, _rx1) = registry.start("task one", None).await.unwrap();
        let (_, _rx2) = registry.start("task two", None).await.unwrap();

        registry.shutdown().await;
        assert!(registry.is_empty().await);
    }
}
