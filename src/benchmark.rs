//! Compiled benchmark handed to the controller and shipped to agents.
use serde::{Deserialize, Serialize};

use crate::error::DefinitionError;
use crate::phase::PhaseDefinition;
use crate::phase::compiler::{PhaseTemplate, compile};

const DEFAULT_STATISTICS_PERIOD_MS: u64 = 1_000;

/// An agent the benchmark expects to run on. Without an address the agent is
/// started in-process or joins on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}

impl AgentSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    pub name: String,
    pub agents: Vec<AgentSpec>,
    pub phases: Vec<PhaseDefinition>,
    pub statistics_period_ms: u64,
}

impl Benchmark {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> BenchmarkBuilder {
        BenchmarkBuilder {
            name: name.into(),
            agents: Vec::new(),
            templates: Vec::new(),
            statistics_period_ms: DEFAULT_STATISTICS_PERIOD_MS,
        }
    }

    #[must_use]
    pub fn phase(&self, name: &str) -> Option<&PhaseDefinition> {
        self.phases.iter().find(|phase| phase.name == name)
    }

    #[must_use]
    pub fn agent_names(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(|agent| agent.name.as_str())
    }
}

pub struct BenchmarkBuilder {
    name: String,
    agents: Vec<AgentSpec>,
    templates: Vec<PhaseTemplate>,
    statistics_period_ms: u64,
}

impl BenchmarkBuilder {
    #[must_use]
    pub fn agent(mut self, agent: AgentSpec) -> Self {
        self.agents.push(agent);
        self
    }

    #[must_use]
    pub fn phase(mut self, template: PhaseTemplate) -> Self {
        self.templates.push(template);
        self
    }

    #[must_use]
    pub const fn statistics_period(mut self, period_ms: u64) -> Self {
        self.statistics_period_ms = period_ms;
        self
    }

    /// Compiles the phase templates.
    ///
    /// # Errors
    ///
    /// Returns a [`DefinitionError`] when there are no phases or the phase
    /// graph is invalid.
    pub fn build(self) -> Result<Benchmark, DefinitionError> {
        if self.templates.is_empty() {
            return Err(DefinitionError::NoPhases {
                benchmark: self.name,
            });
        }
        let phases = compile(&self.templates)?;
        Ok(Benchmark {
            name: self.name,
            agents: self.agents,
            phases,
            statistics_period_ms: self.statistics_period_ms.max(1),
        })
    }
}
