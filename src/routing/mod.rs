//! Routing policy - the decision table selecting each next agent.
//!
//! Routing is a pure function over the post-step [`WorkflowState`]: no
//! side effects, no I/O, fully unit-testable with synthetic states. The
//! policy holds an explicit per-agent table (detours taken on blocking
//! signals, a happy-path successor otherwise) and the iteration budget
//! that keeps two agents from ping-ponging forever.

use std::collections::HashMap;

use crate::agent::AgentId;
use crate::state::WorkflowState;

/// A blocking signal derived from the result slots of the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSignal {
    /// The reviewer reported at least one blocking issue.
    BlockingIssues,
    /// The reviewer reported issues, none of them blocking.
    AdvisoryIssues,
    /// The tester reported at least one failing test.
    TestFailures,
    /// The security auditor reported a high or critical finding.
    SecurityFindings,
}

impl BlockSignal {
    /// Evaluate the signal against a state snapshot.
    pub fn triggered(&self, state: &WorkflowState) -> bool {
        match self {
            Self::BlockingIssues => state.has_blocking_issues(),
            Self::AdvisoryIssues => state.has_advisory_issues_only(),
            Self::TestFailures => state.has_failing_tests(),
            Self::SecurityFindings => state.has_blocking_findings(),
        }
    }
}

/// Happy-path outcome after an agent completes without blocking signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Successor {
    /// Hand the turn to the given agent.
    Next(AgentId),
    /// The workflow is done; mark it COMPLETED.
    Finish,
}

/// Routing rule for one agent: detours checked in order, then the
/// happy-path successor.
#[derive(Debug, Clone)]
pub struct RouteRule {
    /// `(signal, target)` pairs evaluated in order; the first triggered
    /// signal routes to its target.
    pub detours: Vec<(BlockSignal, AgentId)>,
    /// Taken when no detour signal is triggered.
    pub on_success: Successor,
}

impl RouteRule {
    /// A rule with no detours.
    pub fn direct(on_success: Successor) -> Self {
        Self {
            detours: Vec::new(),
            on_success,
        }
    }

    /// A rule with detours.
    pub fn with_detours(detours: Vec<(BlockSignal, AgentId)>, on_success: Successor) -> Self {
        Self { detours, on_success }
    }
}

/// The allow-list of valid next agents per current agent.
#[derive(Debug, Clone)]
pub struct RoutePlan {
    entry: AgentId,
    rules: HashMap<AgentId, RouteRule>,
}

impl RoutePlan {
    /// Start an empty plan entering at the given agent.
    pub fn new(entry: AgentId) -> Self {
        Self {
            entry,
            rules: HashMap::new(),
        }
    }

    /// Add the rule for one agent (builder style).
    pub fn rule(mut self, agent: AgentId, rule: RouteRule) -> Self {
        self.rules.insert(agent, rule);
        self
    }

    /// The agent dispatched first.
    pub fn entry_agent(&self) -> AgentId {
        self.entry
    }

    /// Rule for the given agent, if one is declared.
    pub fn rule_for(&self, agent: AgentId) -> Option<&RouteRule> {
        self.rules.get(&agent)
    }

    /// Every agent the plan can dispatch: the entry, ruled agents, and
    /// all detour and successor targets. Used for wiring validation.
    pub fn referenced_agents(&self) -> Vec<AgentId> {
        let mut seen = vec![self.entry];
        for (agent, rule) in &self.rules {
            seen.push(*agent);
            for (_, target) in &rule.detours {
                seen.push(*target);
            }
            if let Successor::Next(target) = rule.on_success {
                seen.push(target);
            }
        }
        seen.sort_by_key(|id| id.name());
        seen.dedup();
        seen
    }

    /// The production plan for the standard roster.
    ///
    /// Architect -> Coder -> Reviewer; the reviewer sends blocking issues
    /// back to the coder and advisory-only issues to the refactorer;
    /// failing tests and blocking security findings also return to the
    /// coder; documentation closes the workflow.
    pub fn standard() -> Self {
        Self::new(AgentId::Architect)
            .rule(AgentId::Architect, RouteRule::direct(Successor::Next(AgentId::Coder)))
            .rule(AgentId::Coder, RouteRule::direct(Successor::Next(AgentId::Reviewer)))
            .rule(
                AgentId::Reviewer,
                RouteRule::with_detours(
                    vec![
                        (BlockSignal::BlockingIssues, AgentId::Coder),
                        (BlockSignal::AdvisoryIssues, AgentId::Refactorer),
                    ],
                    Successor::Next(AgentId::Tester),
                ),
            )
            .rule(AgentId::Refactorer, RouteRule::direct(Successor::Next(AgentId::Tester)))
            .rule(
                AgentId::Tester,
                RouteRule::with_detours(
                    vec![(BlockSignal::TestFailures, AgentId::Coder)],
                    Successor::Next(AgentId::Security),
                ),
            )
            .rule(
                AgentId::Security,
                RouteRule::with_detours(
                    vec![(BlockSignal::SecurityFindings, AgentId::Coder)],
                    Successor::Next(AgentId::Documentation),
                ),
            )
            .rule(AgentId::Documentation, RouteRule::direct(Successor::Finish))
    }
}

/// Limits preventing unbounded agent-to-agent looping.
#[derive(Debug, Clone, Copy)]
pub struct IterationBudget {
    /// Maximum total agent invocations per workflow.
    pub max_steps: usize,
    /// Maximum invocations of any single agent.
    pub max_agent_visits: usize,
}

impl Default for IterationBudget {
    fn default() -> Self {
        Self {
            max_steps: 24,
            max_agent_visits: 4,
        }
    }
}

/// Why the policy failed a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The iteration budget was exhausted.
    IterationLimitExceeded,
    /// The just-completed agent has no routing rule.
    Unroutable(AgentId),
    /// The state carries an error recorded during the run.
    AgentFault(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IterationLimitExceeded => write!(f, "iteration_limit_exceeded"),
            Self::Unroutable(agent) => write!(f, "no route from agent '{}'", agent),
            Self::AgentFault(message) => write!(f, "{}", message),
        }
    }
}

/// Decision returned after each agent step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Dispatch the given agent next.
    Run(AgentId),
    /// The workflow finished; mark it COMPLETED.
    Complete,
    /// The workflow failed; mark it FAILED with the given reason.
    Fail(FailureReason),
}

/// The decision function selecting the next agent or a terminal verdict.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    plan: RoutePlan,
    budget: IterationBudget,
}

impl RoutingPolicy {
    /// Build a policy from a plan and a budget.
    pub fn new(plan: RoutePlan, budget: IterationBudget) -> Self {
        Self { plan, budget }
    }

    /// The plan backing this policy.
    pub fn plan(&self) -> &RoutePlan {
        &self.plan
    }

    /// The agent dispatched first.
    pub fn entry_agent(&self) -> AgentId {
        self.plan.entry_agent()
    }

    /// Decide what runs next, given the post-step state.
    ///
    /// Expects `state.active_agent` to name the agent that just completed;
    /// the coordinator clears it only on terminal states.
    pub fn next(&self, state: &WorkflowState) -> Verdict {
        if let Some(error) = &state.error {
            return Verdict::Fail(FailureReason::AgentFault(error.clone()));
        }

        let current = match state.active_agent {
            Some(agent) => agent,
            None => {
                return Verdict::Fail(FailureReason::AgentFault(
                    "routing consulted without an active agent".to_string(),
                ))
            }
        };

        let rule = match self.plan.rule_for(current) {
            Some(rule) => rule,
            None => return Verdict::Fail(FailureReason::Unroutable(current)),
        };

        if state.step_count() >= self.budget.max_steps {
            return Verdict::Fail(FailureReason::IterationLimitExceeded);
        }

        for (signal, target) in &rule.detours {
            if signal.triggered(state) {
                return self.admit(*target, state);
            }
        }

        match rule.on_success {
            Successor::Finish => Verdict::Complete,
            Successor::Next(target) => self.admit(target, state),
        }
    }

    fn admit(&self, target: AgentId, state: &WorkflowState) -> Verdict {
        if state.visits(target) >= self.budget.max_agent_visits {
            Verdict::Fail(FailureReason::IterationLimitExceeded)
        } else {
            Verdict::Run(target)
        }
    }
}
