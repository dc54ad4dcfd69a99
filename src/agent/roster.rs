//! Roster wiring - the fixed set of agents behind one workflow.
//!
//! Wiring is where the per-agent I/O contracts are enforced: every
//! exclusive result slot may be claimed by at most one agent, so field
//! collisions are rejected before any workflow starts.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::specialists::{
    ArchitectAgent, CoderAgent, DocumentationAgent, RefactorerAgent, ReviewerAgent, SecurityAgent,
    TesterAgent,
};
use super::traits::{Agent, MemoryStore, TextGenerator};
use super::types::{AgentId, StateField};
use crate::routing::RoutePlan;

/// Errors detected while wiring a roster.
#[derive(Debug, Error)]
pub enum WiringError {
    /// The same agent id was registered twice.
    #[error("agent '{0}' registered twice")]
    DuplicateAgent(AgentId),

    /// Two agents claimed the same exclusive result slot.
    #[error("result slot '{field}' claimed by both '{first}' and '{second}'")]
    SlotConflict {
        /// The contested slot.
        field: StateField,
        /// Agent that claimed the slot first.
        first: AgentId,
        /// Agent whose claim was rejected.
        second: AgentId,
    },

    /// A route plan references an agent missing from the roster.
    #[error("route plan references agent '{0}' that is not in the roster")]
    MissingAgent(AgentId),
}

/// The fixed set of agents serving one workflow configuration.
pub struct Roster {
    agents: HashMap<AgentId, Arc<dyn Agent>>,
}

impl Roster {
    /// Wire a roster, validating the declared I/O contracts.
    pub fn new(agents: Vec<Arc<dyn Agent>>) -> Result<Self, WiringError> {
        let mut wired: HashMap<AgentId, Arc<dyn Agent>> = HashMap::new();
        let mut slot_owners: HashMap<StateField, AgentId> = HashMap::new();

        for agent in agents {
            let id = agent.id();
            if wired.contains_key(&id) {
                return Err(WiringError::DuplicateAgent(id));
            }
            for field in &agent.contract().writes {
                if field.is_shared() {
                    continue;
                }
                if let Some(owner) = slot_owners.get(field) {
                    return Err(WiringError::SlotConflict {
                        field: *field,
                        first: *owner,
                        second: id,
                    });
                }
                slot_owners.insert(*field, id);
            }
            wired.insert(id, agent);
        }

        Ok(Self { agents: wired })
    }

    /// Wire the standard seven-specialist roster over the given
    /// collaborator capabilities.
    pub fn standard(
        provider: Arc<dyn TextGenerator>,
        memory: Arc<dyn MemoryStore>,
    ) -> Result<Self, WiringError> {
        Self::new(vec![
            Arc::new(ArchitectAgent::new(provider.clone(), memory.clone())),
            Arc::new(CoderAgent::new(provider.clone())),
            Arc::new(ReviewerAgent::new(provider.clone(), memory)),
            Arc::new(TesterAgent::new(provider.clone())),
            Arc::new(RefactorerAgent::new(provider.clone())),
            Arc::new(SecurityAgent::new(provider.clone())),
            Arc::new(DocumentationAgent::new(provider)),
        ])
    }

    /// Verify that every agent a route plan references is wired.
    pub fn validate_plan(&self, plan: &RoutePlan) -> Result<(), WiringError> {
        for id in plan.referenced_agents() {
            if !self.agents.contains_key(&id) {
                return Err(WiringError::MissingAgent(id));
            }
        }
        Ok(())
    }

    /// Look up an agent by id.
    pub fn get(&self, id: AgentId) -> Option<Arc<dyn Agent>> {
        self.agents.get(&id).cloned()
    }

    /// Number of wired agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for Roster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&AgentId> = self.agents.keys().collect();
        ids.sort_by_key(|id| id.name());
        f.debug_struct("Roster").field("agents", &ids).finish()
    }
}
