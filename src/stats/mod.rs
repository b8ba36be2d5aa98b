//! Statistics collaborator consumed by the run coordinator. Only the pass/fail
//! signal of quality gates matters to scheduling; the store itself is a plain
//! per-phase counter aggregate.
mod accumulator;
mod memory;
mod sample;

pub use accumulator::{Accumulator, CustomValue};
pub use memory::{InMemoryStatistics, SlaFailure, StatisticsSnapshot};
pub use sample::{PhaseSummary, StatisticsSample};

/// Aggregates agent statistics for one run.
pub trait StatisticsStore: Send {
    fn record(&mut self, agent: &str, sample: &StatisticsSample);

    /// Per-phase aggregates of samples that ended at or after `since_ms`.
    fn recent_summary(&self, since_ms: u64) -> Vec<PhaseSummary>;

    fn total_summary(&self) -> Vec<PhaseSummary>;

    /// Evaluates the quality gates registered for `phase`; `false` when any
    /// gate failed.
    fn validate_slas(&mut self, phase: &str) -> bool;

    fn complete_phase(&mut self, phase: &str);

    fn record_custom(&mut self, phase: &str, key: &str, value: CustomValue);

    fn sla_failures(&self) -> Vec<SlaFailure>;

    fn snapshot(&self) -> StatisticsSnapshot;
}
