use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::DefinitionError;

use super::model::Model;

/// Body of work executed by sessions of a phase. Barrier phases carry an
/// empty scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub initial_sequences: Vec<String>,
    #[serde(default)]
    pub sequences: Vec<String>,
}

impl Scenario {
    #[must_use]
    pub fn new(initial_sequences: Vec<String>) -> Self {
        Self {
            initial_sequences,
            sequences: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.initial_sequences.is_empty() && self.sequences.is_empty()
    }
}

/// Start exactly `delay_ms` after the referenced phase was observed starting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWithDelay {
    pub phase: String,
    pub delay_ms: u64,
}

/// Quality gate evaluated when the phase terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sla {
    /// Fail when `errors / requests` exceeds this ratio.
    pub max_error_ratio: f64,
    #[serde(default)]
    pub max_mean_response_ms: Option<u64>,
}

/// Everything needed to build a [`PhaseDefinition`]; the scenario is
/// optional here and checked on construction.
#[derive(Debug, Clone)]
pub struct PhaseDraft {
    pub id: u32,
    pub iteration: u32,
    pub name: String,
    pub scenario: Option<Scenario>,
    pub start_time_ms: Option<u64>,
    pub start_after: BTreeSet<String>,
    pub start_after_strict: BTreeSet<String>,
    pub terminate_after_strict: BTreeSet<String>,
    pub start_with_delay: Option<StartWithDelay>,
    pub duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    pub shared_resources: String,
    pub model: Model,
    pub slas: Vec<Sla>,
}

/// Immutable description of one concrete phase instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub id: u32,
    pub iteration: u32,
    pub name: String,
    pub scenario: Scenario,
    /// Offset from run start; `None` starts as soon as dependencies allow.
    pub start_time_ms: Option<u64>,
    /// Phases that must be FINISHED before this one starts.
    pub start_after: BTreeSet<String>,
    /// Phases that must be TERMINATED before this one starts.
    pub start_after_strict: BTreeSet<String>,
    /// Phases that must be TERMINATED before this one may terminate.
    pub terminate_after_strict: BTreeSet<String>,
    pub start_with_delay: Option<StartWithDelay>,
    /// How long new sessions are admitted.
    pub duration_ms: u64,
    /// Hard cutoff; `None` is unbounded.
    pub max_duration_ms: Option<u64>,
    pub shared_resources: String,
    pub model: Model,
    pub slas: Vec<Sla>,
}

impl PhaseDefinition {
    /// Builds a definition from a draft.
    ///
    /// # Errors
    ///
    /// Returns an error when the draft has no scenario or its model rejects
    /// the timing parameters.
    pub fn try_new(draft: PhaseDraft) -> Result<Self, DefinitionError> {
        let PhaseDraft {
            id,
            iteration,
            name,
            scenario,
            start_time_ms,
            start_after,
            start_after_strict,
            terminate_after_strict,
            start_with_delay,
            duration_ms,
            max_duration_ms,
            shared_resources,
            model,
            slas,
        } = draft;
        let Some(scenario) = scenario else {
            return Err(DefinitionError::ScenarioNotSet { phase: name });
        };
        model.validate(&name, duration_ms)?;
        Ok(Self {
            id,
            iteration,
            name,
            scenario,
            start_time_ms,
            start_after,
            start_after_strict,
            terminate_after_strict,
            start_with_delay,
            duration_ms: duration_ms.unwrap_or(0),
            max_duration_ms,
            shared_resources,
            model,
            slas,
        })
    }

    /// Synthetic phase with no work; exists only as a dependency target.
    #[must_use]
    pub fn barrier(
        id: u32,
        iteration: u32,
        name: String,
        duration_ms: u64,
        start_after: BTreeSet<String>,
        start_after_strict: BTreeSet<String>,
        terminate_after_strict: BTreeSet<String>,
    ) -> Self {
        Self {
            id,
            iteration,
            shared_resources: name.clone(),
            name,
            scenario: Scenario::default(),
            start_time_ms: None,
            start_after,
            start_after_strict,
            terminate_after_strict,
            start_with_delay: None,
            duration_ms,
            max_duration_ms: Some(duration_ms),
            model: Model::Noop,
            slas: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_barrier(&self) -> bool {
        matches!(self.model, Model::Noop)
    }

    #[must_use]
    pub fn description(&self) -> String {
        self.model.description()
    }

    /// Every phase name this definition refers to.
    #[must_use]
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.start_after
            .iter()
            .chain(self.start_after_strict.iter())
            .chain(self.terminate_after_strict.iter())
            .map(String::as_str)
            .chain(
                self.start_with_delay
                    .iter()
                    .map(|delay| delay.phase.as_str()),
            )
    }
}
