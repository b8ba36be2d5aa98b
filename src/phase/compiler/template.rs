use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DefinitionError;

use super::super::definition::{Scenario, Sla};
use super::super::model::SessionLimitPolicy;

/// How a dependency on an iterated template maps to concrete iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelativeIteration {
    /// The whole referenced phase (its final barrier when iterated).
    #[default]
    None,
    /// The referenced template at `iteration - 1`; dropped at iteration 0.
    Previous,
    /// The referenced template at the same iteration.
    Same,
}

impl RelativeIteration {
    const fn as_str(self) -> &'static str {
        match self {
            RelativeIteration::None => "none",
            RelativeIteration::Previous => "previous",
            RelativeIteration::Same => "same",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReference {
    pub phase: String,
    #[serde(default)]
    pub iteration: RelativeIteration,
    #[serde(default)]
    pub fork: Option<String>,
}

impl PhaseReference {
    #[must_use]
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            iteration: RelativeIteration::None,
            fork: None,
        }
    }

    #[must_use]
    pub const fn iteration(mut self, iteration: RelativeIteration) -> Self {
        self.iteration = iteration;
        self
    }

    #[must_use]
    pub fn fork(mut self, fork: impl Into<String>) -> Self {
        self.fork = Some(fork.into());
        self
    }
}

impl From<&str> for PhaseReference {
    fn from(phase: &str) -> Self {
        Self::new(phase)
    }
}

impl From<String> for PhaseReference {
    fn from(phase: String) -> Self {
        Self::new(phase)
    }
}

impl fmt::Display for PhaseReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.phase, self.iteration.as_str())?;
        if let Some(fork) = &self.fork {
            write!(f, "/{}", fork)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReferenceDelay {
    pub reference: PhaseReference,
    pub delay_ms: u64,
}

const fn default_variance() -> bool {
    true
}

/// Concurrency model parameters before per-iteration and per-fork scaling.
/// Increments are added once per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelTemplate {
    AtOnce {
        users: u32,
        #[serde(default)]
        users_increment: u32,
    },
    Always {
        users: u32,
        #[serde(default)]
        users_increment: u32,
    },
    RampRate {
        initial_users_per_sec: f64,
        #[serde(default)]
        initial_users_per_sec_increment: f64,
        target_users_per_sec: f64,
        #[serde(default)]
        target_users_per_sec_increment: f64,
        #[serde(default)]
        max_sessions: Option<u32>,
        #[serde(default = "default_variance")]
        variance: bool,
        #[serde(default)]
        session_limit_policy: SessionLimitPolicy,
    },
    ConstantRate {
        users_per_sec: f64,
        #[serde(default)]
        users_per_sec_increment: f64,
        #[serde(default)]
        max_sessions: Option<u32>,
        #[serde(default = "default_variance")]
        variance: bool,
        #[serde(default)]
        session_limit_policy: SessionLimitPolicy,
    },
    Sequentially {
        repeats: u32,
    },
    Noop,
}

impl ModelTemplate {
    #[must_use]
    pub const fn at_once(users: u32) -> Self {
        ModelTemplate::AtOnce {
            users,
            users_increment: 0,
        }
    }

    #[must_use]
    pub const fn always(users: u32) -> Self {
        ModelTemplate::Always {
            users,
            users_increment: 0,
        }
    }

    #[must_use]
    pub const fn ramp_rate(initial_users_per_sec: f64, target_users_per_sec: f64) -> Self {
        ModelTemplate::RampRate {
            initial_users_per_sec,
            initial_users_per_sec_increment: 0.0,
            target_users_per_sec,
            target_users_per_sec_increment: 0.0,
            max_sessions: None,
            variance: true,
            session_limit_policy: SessionLimitPolicy::Fail,
        }
    }

    #[must_use]
    pub const fn constant_rate(users_per_sec: f64) -> Self {
        ModelTemplate::ConstantRate {
            users_per_sec,
            users_per_sec_increment: 0.0,
            max_sessions: None,
            variance: true,
            session_limit_policy: SessionLimitPolicy::Fail,
        }
    }

    #[must_use]
    pub const fn sequentially(repeats: u32) -> Self {
        ModelTemplate::Sequentially { repeats }
    }

    /// Sets the explicit session cap of an open model; closed models are
    /// returned unchanged.
    #[must_use]
    pub const fn with_max_sessions(mut self, cap: u32) -> Self {
        match &mut self {
            ModelTemplate::RampRate { max_sessions, .. }
            | ModelTemplate::ConstantRate { max_sessions, .. } => *max_sessions = Some(cap),
            ModelTemplate::AtOnce { .. }
            | ModelTemplate::Always { .. }
            | ModelTemplate::Sequentially { .. }
            | ModelTemplate::Noop => {}
        }
        self
    }

    #[must_use]
    pub const fn with_session_limit_policy(mut self, policy: SessionLimitPolicy) -> Self {
        match &mut self {
            ModelTemplate::RampRate {
                session_limit_policy,
                ..
            }
            | ModelTemplate::ConstantRate {
                session_limit_policy,
                ..
            } => *session_limit_policy = policy,
            ModelTemplate::AtOnce { .. }
            | ModelTemplate::Always { .. }
            | ModelTemplate::Sequentially { .. }
            | ModelTemplate::Noop => {}
        }
        self
    }
}

/// A weighted alternative scenario of one template. The anonymous fork
/// carries no name.
#[derive(Debug, Clone, PartialEq)]
pub struct ForkTemplate {
    pub name: Option<String>,
    pub weight: f64,
    pub scenario: Scenario,
}

/// A phase as authored: expands into one concrete phase per iteration and
/// fork.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTemplate {
    pub(super) name: String,
    pub(super) model: ModelTemplate,
    pub(super) start_time_ms: Option<u64>,
    pub(super) start_after: Vec<PhaseReference>,
    pub(super) start_after_strict: Vec<PhaseReference>,
    pub(super) terminate_after_strict: Vec<PhaseReference>,
    pub(super) start_with: Option<PhaseReferenceDelay>,
    pub(super) duration_ms: Option<u64>,
    pub(super) max_duration_ms: Option<u64>,
    pub(super) max_iterations: u32,
    pub(super) force_iterations: bool,
    pub(super) forks: Vec<ForkTemplate>,
    pub(super) slas: Vec<Sla>,
}

impl PhaseTemplate {
    #[must_use]
    pub fn new(name: impl Into<String>, model: ModelTemplate) -> Self {
        Self {
            name: name.into(),
            model,
            start_time_ms: None,
            start_after: Vec::new(),
            start_after_strict: Vec::new(),
            terminate_after_strict: Vec::new(),
            start_with: None,
            duration_ms: None,
            max_duration_ms: None,
            max_iterations: 1,
            force_iterations: false,
            forks: Vec::new(),
            slas: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn start_time(mut self, offset_ms: u64) -> Self {
        self.start_time_ms = Some(offset_ms);
        self
    }

    #[must_use]
    pub fn start_after(mut self, reference: impl Into<PhaseReference>) -> Self {
        self.start_after.push(reference.into());
        self
    }

    #[must_use]
    pub fn start_after_strict(mut self, reference: impl Into<PhaseReference>) -> Self {
        self.start_after_strict.push(reference.into());
        self
    }

    #[must_use]
    pub fn terminate_after_strict(mut self, reference: impl Into<PhaseReference>) -> Self {
        self.terminate_after_strict.push(reference.into());
        self
    }

    #[must_use]
    pub fn start_with(mut self, reference: impl Into<PhaseReference>, delay_ms: u64) -> Self {
        self.start_with = Some(PhaseReferenceDelay {
            reference: reference.into(),
            delay_ms,
        });
        self
    }

    #[must_use]
    pub const fn duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    #[must_use]
    pub const fn max_duration(mut self, max_duration_ms: u64) -> Self {
        self.max_duration_ms = Some(max_duration_ms);
        self
    }

    #[must_use]
    pub const fn max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = iterations;
        self
    }

    #[must_use]
    pub const fn force_iterations(mut self, force: bool) -> Self {
        self.force_iterations = force;
        self
    }

    #[must_use]
    pub fn sla(mut self, sla: Sla) -> Self {
        self.slas.push(sla);
        self
    }

    /// Attaches the single anonymous scenario.
    ///
    /// # Errors
    ///
    /// Fails when a scenario is already set or the template is forked.
    pub fn scenario(mut self, scenario: Scenario) -> Result<Self, DefinitionError> {
        if self.forks.is_empty() {
            self.forks.push(ForkTemplate {
                name: None,
                weight: 1.0,
                scenario,
            });
            return Ok(self);
        }
        if self.has_anonymous_fork() {
            return Err(DefinitionError::ScenarioAlreadySet { phase: self.name });
        }
        Err(DefinitionError::ScenarioForked { phase: self.name })
    }

    /// Adds a named, weighted fork.
    ///
    /// # Errors
    ///
    /// Fails when an anonymous scenario was already attached.
    pub fn fork(
        mut self,
        name: impl Into<String>,
        weight: f64,
        scenario: Scenario,
    ) -> Result<Self, DefinitionError> {
        if self.has_anonymous_fork() {
            return Err(DefinitionError::ScenarioAlreadySet { phase: self.name });
        }
        self.forks.push(ForkTemplate {
            name: Some(name.into()),
            weight,
            scenario,
        });
        Ok(self)
    }

    fn has_anonymous_fork(&self) -> bool {
        matches!(self.forks.as_slice(), [only] if only.name.is_none())
    }

    pub(super) const fn is_iterated(&self) -> bool {
        self.max_iterations > 1 || self.force_iterations
    }
}
