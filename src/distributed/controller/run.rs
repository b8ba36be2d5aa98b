use std::collections::HashMap;
use std::sync::Arc;

use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::benchmark::Benchmark;
use crate::phase::{PhaseState, PhaseStatus, SessionLimitPolicy};
use crate::stats::{CustomValue, InMemoryStatistics, StatisticsStore};

use super::agent::{AgentInfo, AgentStatus, aggregate_phase_status};

/// Run-level error surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub agent: Option<String>,
    pub message: String,
}

/// Phase status report from one agent, already decoded from the wire.
pub(super) struct PhaseReport<'report> {
    pub(super) agent: &'report str,
    pub(super) phase: &'report str,
    pub(super) status: PhaseStatus,
    pub(super) successful: bool,
    pub(super) session_limit_exceeded: bool,
    pub(super) error: Option<String>,
}

/// One execution of a benchmark. Owned and mutated by a single run task.
pub(super) struct Run {
    pub(super) id: String,
    pub(super) benchmark: Arc<Benchmark>,
    pub(super) description: Option<String>,
    phases: Vec<PhaseState>,
    index: HashMap<String, usize>,
    pub(super) agents: Vec<AgentInfo>,
    pub(super) errors: Vec<RunError>,
    pub(super) cancelled: bool,
    pub(super) start_time: Option<u64>,
    terminate_time: OnceCell<u64>,
    terminate_waiters: Vec<oneshot::Sender<u64>>,
    pub(super) store: Box<dyn StatisticsStore>,
}

impl Run {
    pub(super) fn new(id: String, benchmark: Arc<Benchmark>, description: Option<String>) -> Self {
        let store = Box::new(InMemoryStatistics::new(benchmark.phases.iter()));
        let phases: Vec<PhaseState> = benchmark
            .phases
            .iter()
            .map(|definition| PhaseState::new(Arc::new(definition.clone())))
            .collect();
        let index = phases
            .iter()
            .enumerate()
            .map(|(position, phase)| (phase.name().to_owned(), position))
            .collect();
        let agents = benchmark
            .agents
            .iter()
            .zip(0_u32..)
            .map(|(spec, id)| AgentInfo::new(id, spec.name.clone()))
            .collect();
        Self {
            id,
            benchmark,
            description,
            phases,
            index,
            agents,
            errors: Vec::new(),
            cancelled: false,
            start_time: None,
            terminate_time: OnceCell::new(),
            terminate_waiters: Vec::new(),
            store,
        }
    }

    pub(super) fn phases(&self) -> &[PhaseState] {
        &self.phases
    }

    /// Moves the phase at `position` to `status`, see [`PhaseState::set_status`].
    pub(super) fn set_phase_status(&mut self, position: usize, status: PhaseStatus, now: u64) -> bool {
        match self.phases.get_mut(position) {
            Some(phase) => phase.set_status(&self.id, status, now, self.store.as_mut()),
            None => false,
        }
    }

    pub(super) fn start_phase(&mut self, position: usize, now: u64) -> bool {
        match self.phases.get_mut(position) {
            Some(phase) => phase.start(&self.id, now, self.store.as_mut()),
            None => false,
        }
    }

    /// Completes the custom data accumulators of every phase.
    pub(super) fn complete_custom(&mut self) {
        for phase in &mut self.phases {
            phase.complete_custom(self.store.as_mut());
        }
    }

    pub(super) fn add_custom(&mut self, phase: &str, key: &str, value: CustomValue) {
        let Some(position) = self.position(phase) else {
            warn!("{} Custom data for unknown phase {}", self.id, phase);
            return;
        };
        if let Some(state) = self.phases.get_mut(position) {
            state.add_custom(key, value);
        }
    }

    pub(super) fn phase(&self, name: &str) -> Option<&PhaseState> {
        self.index
            .get(name)
            .and_then(|position| self.phases.get(*position))
    }

    pub(super) fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(super) fn agent(&self, name: &str) -> Option<&AgentInfo> {
        self.agents.iter().find(|agent| agent.name == name)
    }

    pub(super) fn agent_mut(&mut self, name: &str) -> Option<&mut AgentInfo> {
        self.agents.iter_mut().find(|agent| agent.name == name)
    }

    pub(super) fn agent_by_connection(&mut self, connection: u64) -> Option<&mut AgentInfo> {
        self.agents
            .iter_mut()
            .find(|agent| agent.connection == Some(connection))
    }

    pub(super) fn all_agents(&self, status: AgentStatus) -> bool {
        self.agents.iter().all(|agent| agent.status == status)
    }

    pub(super) fn agents_done(&self) -> bool {
        self.agents.iter().all(|agent| agent.status.is_done())
    }

    pub(super) fn is_completed(&self) -> bool {
        self.phases.iter().all(PhaseState::is_terminated)
    }

    pub(super) fn terminate_time(&self) -> Option<u64> {
        self.terminate_time.get().copied()
    }

    /// Fills the terminate time once; later calls keep the first value.
    pub(super) fn set_terminate_time(&mut self, now: u64) -> u64 {
        let time = *self.terminate_time.get_or_init(|| now);
        for waiter in self.terminate_waiters.drain(..) {
            if waiter.send(time).is_err() {
                // Requester stopped waiting.
            }
        }
        time
    }

    /// Resolves `waiter` when the terminate time is set.
    pub(super) fn on_terminate(&mut self, waiter: oneshot::Sender<u64>) {
        match self.terminate_time.get() {
            Some(time) => {
                if waiter.send(*time).is_err() {
                    // Requester stopped waiting.
                }
            }
            None => self.terminate_waiters.push(waiter),
        }
    }

    pub(super) fn record_error(&mut self, agent: Option<&str>, message: String) {
        warn!("{} Run error: {}", self.id, message);
        self.errors.push(RunError {
            agent: agent.map(str::to_owned),
            message,
        });
    }

    /// Moves every phase that has not started yet to CANCELLED.
    pub(super) fn cancel_not_started(&mut self, now: u64) {
        for phase in &mut self.phases {
            if phase.status() == PhaseStatus::NotStarted {
                phase.set_status(&self.id, PhaseStatus::Cancelled, now, self.store.as_mut());
            }
        }
    }

    /// Applies an agent's phase report. Returns whether the aggregated
    /// status changed.
    pub(super) fn apply_phase_report(&mut self, report: &PhaseReport<'_>, now: u64) -> bool {
        let Some(position) = self.position(report.phase) else {
            warn!(
                "{} Agent {} reported unknown phase {}",
                self.id, report.agent, report.phase
            );
            return false;
        };
        if let Some(agent) = self.agent_mut(report.agent) {
            agent.set_phase_status(report.phase, report.status);
        }
        let mut failure: Option<String> = None;
        if !report.successful {
            failure = Some(report.error.clone().unwrap_or_else(|| {
                format!("Phase {} failed on agent {}", report.phase, report.agent)
            }));
        }
        if report.session_limit_exceeded {
            let policy = self
                .phases
                .get(position)
                .and_then(|phase| phase.definition().model.session_limit_policy());
            match policy {
                Some(SessionLimitPolicy::Fail) => {
                    failure.get_or_insert_with(|| {
                        format!(
                            "Phase {} exceeded its session limit on agent {}",
                            report.phase, report.agent
                        )
                    });
                }
                Some(SessionLimitPolicy::Continue) | None => info!(
                    "{} Phase {} exceeded its session limit on agent {}",
                    self.id, report.phase, report.agent
                ),
            }
        }

        let aggregated = aggregate_phase_status(&self.agents, report.phase);
        let Some(phase) = self.phases.get_mut(position) else {
            return false;
        };
        let was_failed = phase.is_failed();
        if failure.is_some() {
            phase.fail();
        }
        let changed = aggregated.is_some_and(|status| {
            phase.set_status(&self.id, status, now, self.store.as_mut())
        });
        let newly_failed = !was_failed && phase.is_failed();
        if newly_failed {
            match failure {
                Some(message) => self.record_error(Some(report.agent), message),
                None => {
                    let message = self.sla_message(report.phase);
                    self.record_error(None, message);
                }
            }
            self.cancel_not_started(now);
        }
        changed
    }

    fn sla_message(&self, phase: &str) -> String {
        self.store
            .sla_failures()
            .into_iter()
            .rev()
            .find(|failure| failure.phase == phase)
            .map_or_else(
                || format!("Phase {} failed", phase),
                |failure| failure.message,
            )
    }
}
