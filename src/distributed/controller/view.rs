use serde::{Deserialize, Serialize};

use crate::phase::PhaseStatus;

use super::agent::AgentStatus;
use super::persist::RunSummary;
use super::run::Run;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseView {
    pub name: String,
    pub status: PhaseStatus,
    pub failed: bool,
    pub start_time: Option<u64>,
    pub completion_time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentView {
    pub name: String,
    pub address: Option<String>,
    pub status: AgentStatus,
}

/// Point-in-time view of a run for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunView {
    pub summary: RunSummary,
    pub phases: Vec<PhaseView>,
    pub agents: Vec<AgentView>,
}

impl RunView {
    #[must_use]
    pub fn phase(&self, name: &str) -> Option<&PhaseView> {
        self.phases.iter().find(|phase| phase.name == name)
    }

    /// A completed run whose phases have all been unloaded.
    pub(super) const fn unloaded(summary: RunSummary) -> Self {
        Self {
            summary,
            phases: Vec::new(),
            agents: Vec::new(),
        }
    }

    pub(super) fn capture(run: &Run) -> Self {
        Self {
            summary: RunSummary::of(run),
            phases: run
                .phases()
                .iter()
                .map(|phase| PhaseView {
                    name: phase.name().to_owned(),
                    status: phase.status(),
                    failed: phase.is_failed(),
                    start_time: phase.absolute_start_time(),
                    completion_time: phase.absolute_completion_time(),
                })
                .collect(),
            agents: run
                .agents
                .iter()
                .map(|agent| AgentView {
                    name: agent.name.clone(),
                    address: agent.address.clone(),
                    status: agent.status,
                })
                .collect(),
        }
    }
}
