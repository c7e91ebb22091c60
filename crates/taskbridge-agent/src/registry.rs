//! Closed registry of agent kinds.
//!
//! Every kind has a stable string id and at most one implementation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use taskbridge_core::{AgentEvent, EventEmitter, RuntimeConfig, WorkflowDefinition};
use thiserror::Error;

use crate::agent::Agent;
use crate::builtin::DiagnosticAgent;
use crate::handler::AgentTaskHandler;

/// Known agent kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    PhpAnalyzer,
    CodeGenerator,
    QaAnalyzer,
    DiffVerifier,
    DevLinter,
    /// Built-in echo agent used for smoke tests and health checks.
    Diagnostic,
}

impl AgentKind {
    pub const ALL: [AgentKind; 6] = [
        Self::PhpAnalyzer,
        Self::CodeGenerator,
        Self::QaAnalyzer,
        Self::DiffVerifier,
        Self::DevLinter,
        Self::Diagnostic,
    ];

    /// Stable id; also the task type the agent is registered under.
    pub fn id(&self) -> &'static str {
        match self {
            Self::PhpAnalyzer => "php-analyzer",
            Self::CodeGenerator => "code-generator",
            Self::QaAnalyzer => "qa-analyzer",
            Self::DiffVerifier => "diff-verifier",
            Self::DevLinter => "dev-linter",
            Self::Diagnostic => "diagnostic",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for AgentKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.id() == s)
            .ok_or_else(|| RegistryError::UnknownKind(s.to_string()))
    }
}

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Agent '{0}' already has an implementation")]
    Duplicate(AgentKind),

    #[error("Unknown agent: {0}")]
    UnknownKind(String),

    #[error("No implementation registered for agent '{0}'")]
    NotRegistered(AgentKind),
}

/// One implementation per [`AgentKind`].
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the agents shipped in this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .agents
            .insert(AgentKind::Diagnostic, Arc::new(DiagnosticAgent::new()));
        registry
    }

    /// Register `agent` under its kind. A second implementation is rejected.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), RegistryError> {
        let kind = agent.kind();
        if self.agents.contains_key(&kind) {
            return Err(RegistryError::Duplicate(kind));
        }
        self.agents.insert(kind, agent);
        Ok(())
    }

    pub fn get(&self, kind: AgentKind) -> Result<Arc<dyn Agent>, RegistryError> {
        self.agents
            .get(&kind)
            .cloned()
            .ok_or(RegistryError::NotRegistered(kind))
    }

    /// Look an agent up by its stable id.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Agent>, RegistryError> {
        self.get(id.parse()?)
    }

    /// Registered kinds in declaration order.
    pub fn kinds(&self) -> Vec<AgentKind> {
        let mut kinds: Vec<_> = self.agents.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// One workflow definition per registered agent, each running the agent
    /// inside a fresh runtime configured with `config`.
    pub fn workflow_definitions(
        &self,
        config: &RuntimeConfig,
        events: Option<EventEmitter<AgentEvent>>,
    ) -> Vec<WorkflowDefinition> {
        self.kinds()
            .into_iter()
            .filter_map(|kind| self.agents.get(&kind).cloned())
            .map(|agent| {
                let mut handler = AgentTaskHandler::new(agent, config.clone());
                if let Some(events) = &events {
                    handler = handler.with_events(events.clone());
                }
                handler.workflow_definition()
            })
            .collect()
    }
}
