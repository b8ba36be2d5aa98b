use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::phase::{PhaseDefinition, Sla};

use super::StatisticsStore;
use super::accumulator::CustomValue;
use super::sample::{PhaseSummary, StatisticsSample};

/// A quality gate that did not hold when its phase terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaFailure {
    pub phase: String,
    pub message: String,
}

/// Serialized form of the store written next to the run record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub phases: Vec<PhaseSummary>,
    #[serde(default)]
    pub agents: BTreeMap<String, Vec<PhaseSummary>>,
    #[serde(default)]
    pub custom: BTreeMap<String, BTreeMap<String, CustomValue>>,
    #[serde(default)]
    pub completed_phases: Vec<String>,
    #[serde(default)]
    pub sla_failures: Vec<SlaFailure>,
}

struct RecordedSample {
    agent: String,
    sample: StatisticsSample,
}

/// Keeps every sample in memory; suitable for runs of modest length.
pub struct InMemoryStatistics {
    slas: BTreeMap<String, Vec<Sla>>,
    samples: Vec<RecordedSample>,
    custom: BTreeMap<String, BTreeMap<String, CustomValue>>,
    completed: BTreeSet<String>,
    failures: Vec<SlaFailure>,
}

impl InMemoryStatistics {
    #[must_use]
    pub fn new<'phase, I>(phases: I) -> Self
    where
        I: IntoIterator<Item = &'phase PhaseDefinition>,
    {
        let slas = phases
            .into_iter()
            .filter(|definition| !definition.slas.is_empty())
            .map(|definition| (definition.name.clone(), definition.slas.clone()))
            .collect();
        Self {
            slas,
            samples: Vec::new(),
            custom: BTreeMap::new(),
            completed: BTreeSet::new(),
            failures: Vec::new(),
        }
    }

    fn summarize<'sample, I>(samples: I) -> Vec<PhaseSummary>
    where
        I: Iterator<Item = &'sample StatisticsSample>,
    {
        let mut phases: BTreeMap<&str, PhaseSummary> = BTreeMap::new();
        for sample in samples {
            phases
                .entry(sample.phase.as_str())
                .or_insert_with(|| PhaseSummary::empty(&sample.phase))
                .add(sample);
        }
        phases.into_values().collect()
    }

    fn phase_total(&self, phase: &str) -> PhaseSummary {
        let mut summary = PhaseSummary::empty(phase);
        for recorded in self.samples.iter().filter(|recorded| recorded.sample.phase == phase) {
            summary.add(&recorded.sample);
        }
        summary
    }
}

fn check_sla(summary: &PhaseSummary, sla: &Sla) -> Option<String> {
    let ratio = summary.error_ratio();
    if ratio > sla.max_error_ratio {
        return Some(format!(
            "Error ratio {:.4} exceeds limit {:.4}",
            ratio, sla.max_error_ratio
        ));
    }
    if let Some(limit) = sla.max_mean_response_ms {
        let mean = summary.mean_response_ms();
        if mean > limit {
            return Some(format!(
                "Mean response time {}ms exceeds limit {}ms",
                mean, limit
            ));
        }
    }
    None
}

impl StatisticsStore for InMemoryStatistics {
    fn record(&mut self, agent: &str, sample: &StatisticsSample) {
        if self.completed.contains(sample.phase.as_str()) {
            debug!(
                "Late statistics from {} for completed phase {}",
                agent, sample.phase
            );
        }
        self.samples.push(RecordedSample {
            agent: agent.to_owned(),
            sample: sample.clone(),
        });
    }

    fn recent_summary(&self, since_ms: u64) -> Vec<PhaseSummary> {
        Self::summarize(
            self.samples
                .iter()
                .map(|recorded| &recorded.sample)
                .filter(|sample| sample.end_ms >= since_ms),
        )
    }

    fn total_summary(&self) -> Vec<PhaseSummary> {
        Self::summarize(self.samples.iter().map(|recorded| &recorded.sample))
    }

    fn validate_slas(&mut self, phase: &str) -> bool {
        let Some(slas) = self.slas.get(phase) else {
            return true;
        };
        let summary = self.phase_total(phase);
        let mut valid = true;
        for sla in slas {
            if let Some(message) = check_sla(&summary, sla) {
                warn!("SLA failed for phase {}: {}", phase, message);
                self.failures.push(SlaFailure {
                    phase: phase.to_owned(),
                    message,
                });
                valid = false;
            }
        }
        valid
    }

    fn complete_phase(&mut self, phase: &str) {
        self.completed.insert(phase.to_owned());
    }

    fn record_custom(&mut self, phase: &str, key: &str, value: CustomValue) {
        self.custom
            .entry(phase.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
    }

    fn sla_failures(&self) -> Vec<SlaFailure> {
        self.failures.clone()
    }

    fn snapshot(&self) -> StatisticsSnapshot {
        let mut agents: BTreeMap<String, Vec<PhaseSummary>> = BTreeMap::new();
        let agent_names: BTreeSet<&str> = self
            .samples
            .iter()
            .map(|recorded| recorded.agent.as_str())
            .collect();
        for agent in agent_names {
            let summaries = Self::summarize(
                self.samples
                    .iter()
                    .filter(|recorded| recorded.agent == agent)
                    .map(|recorded| &recorded.sample),
            );
            agents.insert(agent.to_owned(), summaries);
        }
        StatisticsSnapshot {
            phases: self.total_summary(),
            agents,
            custom: self.custom.clone(),
            completed_phases: self.completed.iter().cloned().collect(),
            sla_failures: self.failures.clone(),
        }
    }
}
