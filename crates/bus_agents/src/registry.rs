//! Agent registry.

use std::collections::HashMap;
use std::sync::Arc;

use bus_core::{AgentRole, WorkflowStage};

use crate::architect::ArchitectAgent;
use crate::delivery::DeliveryAgent;
use crate::developer::DeveloperAgent;
use crate::plan::PlanAgent;
use crate::prd::PrdAgent;
use crate::qa::QaAgent;
use crate::security::SecurityAgent;
use crate::support::SupportAgent;
use crate::tech_writer::TechWriterAgent;
use crate::traits::Agent;
use crate::uiux::UiUxAgent;

/// Registry of available agents, one per role.
#[derive(Clone)]
pub struct AgentRegistry {
    agents: HashMap<AgentRole, Arc<dyn Agent>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Registry with all ten pipeline agents.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PrdAgent::new()));
        registry.register(Arc::new(PlanAgent::new()));
        registry.register(Arc::new(ArchitectAgent::new()));
        registry.register(Arc::new(UiUxAgent::new()));
        registry.register(Arc::new(DeveloperAgent::new()));
        registry.register(Arc::new(QaAgent::new()));
        registry.register(Arc::new(SecurityAgent::new()));
        registry.register(Arc::new(TechWriterAgent::new()));
        registry.register(Arc::new(SupportAgent::new()));
        registry.register(Arc::new(DeliveryAgent::new()));
        registry
    }

    /// Register an agent, replacing any agent with the same role.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.role(), agent);
    }

    pub fn get(&self, role: AgentRole) -> Option<Arc<dyn Agent>> {
        self.agents.get(&role).cloned()
    }

    /// Agent that runs `stage`, if the stage has one.
    pub fn for_stage(&self, stage: WorkflowStage) -> Option<Arc<dyn Agent>> {
        stage.agent_role().and_then(|role| self.get(role))
    }

    /// Registered roles in pipeline order.
    pub fn roles(&self) -> Vec<AgentRole> {
        let mut roles: Vec<AgentRole> = self.agents.keys().copied().collect();
        roles.sort();
        roles
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
