use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use crate::error::AppResult;
use crate::phase::{Model, PhaseDefinition, PhaseStatus};
use crate::stats::{CustomValue, StatisticsSample};

/// Local outcome of a phase command on one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseProgress {
    pub status: PhaseStatus,
    pub session_limit_exceeded: bool,
}

impl PhaseProgress {
    #[must_use]
    pub const fn new(status: PhaseStatus) -> Self {
        Self {
            status,
            session_limit_exceeded: false,
        }
    }
}

/// Executes the sessions of phases on behalf of an agent.
#[async_trait]
pub trait SessionDriver: Send {
    /// Starts admitting sessions for `phase`.
    async fn start(&mut self, phase: &PhaseDefinition) -> AppResult<PhaseProgress>;

    /// Stops admitting new sessions.
    async fn finish(&mut self, phase: &str) -> AppResult<PhaseProgress>;

    /// Terminates once running sessions have drained.
    async fn try_terminate(&mut self, phase: &str) -> AppResult<PhaseProgress>;

    /// Cancels running sessions.
    async fn terminate(&mut self, phase: &str) -> AppResult<PhaseProgress>;

    fn list_sessions(&self, include_inactive: bool) -> Vec<String>;

    fn list_connections(&self) -> Vec<String>;

    /// Statistics gathered since the previous call.
    fn statistics(&mut self, now: u64) -> Vec<StatisticsSample>;

    /// Custom data published when `phase` terminates.
    fn custom_data(&mut self, _phase: &str) -> Vec<(String, CustomValue)> {
        Vec::new()
    }
}

#[derive(Debug)]
struct IdlePhase {
    definition: PhaseDefinition,
    status: PhaseStatus,
    started_ms: u64,
    reported_ms: u64,
    sessions: u64,
    unreported: u64,
}

/// Admits symbolic sessions according to the phase model and completes them
/// immediately. No traffic leaves the agent.
#[derive(Debug, Default)]
pub struct IdleDriver {
    phases: BTreeMap<String, IdlePhase>,
}

impl IdleDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn progress(&mut self, phase: &str, target: PhaseStatus) -> PhaseProgress {
        match self.phases.get_mut(phase) {
            Some(state) => {
                if target > state.status {
                    state.status = target;
                }
                PhaseProgress::new(state.status)
            }
            None => PhaseProgress::new(target),
        }
    }
}

/// Sessions a model admits up front; open models admit over time.
fn initial_sessions(model: &Model) -> u64 {
    match model {
        Model::AtOnce(model) | Model::Always(model) => u64::from(model.users),
        Model::Sequentially(model) => u64::from(model.repeats),
        Model::RampRate(_) | Model::ConstantRate(_) | Model::Noop => 0,
    }
}

/// Concurrency an open model needs if every session lasts one second.
#[expect(
    clippy::float_arithmetic,
    reason = "Arrival rates are fractional"
)]
fn open_concurrency(model: &Model) -> Option<(u64, u32)> {
    let (rate, cap) = match model {
        Model::RampRate(model) => (
            model.initial_users_per_sec.max(model.target_users_per_sec),
            model.max_sessions,
        ),
        Model::ConstantRate(model) => (model.users_per_sec, model.max_sessions),
        Model::AtOnce(_) | Model::Always(_) | Model::Sequentially(_) | Model::Noop => {
            return None;
        }
    };
    Some((rate.max(0.0).ceil() as u64, cap))
}

#[expect(
    clippy::float_arithmetic,
    reason = "Arrival rates are fractional"
)]
fn arrivals(model: &Model, elapsed_ms: u64) -> u64 {
    let rate = match model {
        Model::RampRate(model) => (model.initial_users_per_sec + model.target_users_per_sec) / 2.0,
        Model::ConstantRate(model) => model.users_per_sec,
        Model::AtOnce(_) | Model::Always(_) | Model::Sequentially(_) | Model::Noop => {
            return 0;
        }
    };
    (rate.max(0.0) * elapsed_ms as f64 / 1_000.0).floor() as u64
}

#[async_trait]
impl SessionDriver for IdleDriver {
    async fn start(&mut self, phase: &PhaseDefinition) -> AppResult<PhaseProgress> {
        let now = crate::distributed::utils::current_time_ms();
        let sessions = initial_sessions(&phase.model);
        let session_limit_exceeded = open_concurrency(&phase.model)
            .is_some_and(|(needed, cap)| needed > u64::from(cap));
        // Closed single-shot models drain before the phase is asked to finish.
        let status = match phase.model {
            Model::AtOnce(_) | Model::Sequentially(_) => PhaseStatus::Finished,
            Model::Always(_) | Model::RampRate(_) | Model::ConstantRate(_) | Model::Noop => {
                PhaseStatus::Running
            }
        };
        debug!(
            "Idle driver starting {} with {} sessions",
            phase.name, sessions
        );
        self.phases.insert(
            phase.name.clone(),
            IdlePhase {
                definition: phase.clone(),
                status,
                started_ms: now,
                reported_ms: now,
                sessions,
                unreported: sessions,
            },
        );
        Ok(PhaseProgress {
            status,
            session_limit_exceeded,
        })
    }

    async fn finish(&mut self, phase: &str) -> AppResult<PhaseProgress> {
        Ok(self.progress(phase, PhaseStatus::Finished))
    }

    async fn try_terminate(&mut self, phase: &str) -> AppResult<PhaseProgress> {
        let finished = self
            .phases
            .get(phase)
            .is_none_or(|state| state.status.is_finished());
        let target = if finished {
            PhaseStatus::Terminated
        } else {
            PhaseStatus::Running
        };
        Ok(self.progress(phase, target))
    }

    async fn terminate(&mut self, phase: &str) -> AppResult<PhaseProgress> {
        Ok(self.progress(phase, PhaseStatus::Terminated))
    }

    fn list_sessions(&self, include_inactive: bool) -> Vec<String> {
        self.phases
            .iter()
            .filter(|(_, state)| include_inactive || !state.status.is_terminated())
            .map(|(name, state)| {
                format!(
                    "{}: {} sessions ({}, started at {})",
                    name, state.sessions, state.status, state.started_ms
                )
            })
            .collect()
    }

    fn list_connections(&self) -> Vec<String> {
        Vec::new()
    }

    fn statistics(&mut self, now: u64) -> Vec<StatisticsSample> {
        let mut samples = Vec::new();
        for (name, state) in &mut self.phases {
            if state.status.is_terminated() && state.unreported == 0 {
                continue;
            }
            let elapsed = now.saturating_sub(state.reported_ms);
            let arrived = if state.status.is_finished() {
                0
            } else {
                arrivals(&state.definition.model, elapsed)
            };
            state.sessions = state.sessions.saturating_add(arrived);
            let requests = state.unreported.saturating_add(arrived);
            state.unreported = 0;
            if requests == 0 {
                state.reported_ms = now;
                continue;
            }
            samples.push(StatisticsSample {
                phase: name.clone(),
                metric: "session".to_owned(),
                start_ms: state.reported_ms,
                end_ms: now,
                requests,
                responses: requests,
                ..StatisticsSample::default()
            });
            state.reported_ms = now;
        }
        samples
    }

    fn custom_data(&mut self, phase: &str) -> Vec<(String, CustomValue)> {
        self.phases
            .get(phase)
            .map(|state| vec![("sessions".to_owned(), CustomValue::Counter(state.sessions))])
            .unwrap_or_default()
    }
}
