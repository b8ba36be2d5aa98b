use serde::{Deserialize, Serialize};

/// Counters reported by an agent for one phase and metric over one interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSample {
    pub phase: String,
    #[serde(default)]
    pub metric: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub requests: u64,
    pub responses: u64,
    pub errors: u64,
    #[serde(default)]
    pub timeouts: u64,
    #[serde(default)]
    pub total_response_ms: u64,
    #[serde(default)]
    pub max_response_ms: u64,
}

/// Merged counters of one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub phase: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub requests: u64,
    pub responses: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub total_response_ms: u64,
    pub max_response_ms: u64,
}

impl PhaseSummary {
    pub(crate) fn empty(phase: &str) -> Self {
        Self {
            phase: phase.to_owned(),
            ..Self::default()
        }
    }

    pub(crate) fn add(&mut self, sample: &StatisticsSample) {
        if self.start_ms == 0 || (sample.start_ms > 0 && sample.start_ms < self.start_ms) {
            self.start_ms = sample.start_ms;
        }
        self.end_ms = self.end_ms.max(sample.end_ms);
        self.requests = self.requests.saturating_add(sample.requests);
        self.responses = self.responses.saturating_add(sample.responses);
        self.errors = self.errors.saturating_add(sample.errors);
        self.timeouts = self.timeouts.saturating_add(sample.timeouts);
        self.total_response_ms = self
            .total_response_ms
            .saturating_add(sample.total_response_ms);
        self.max_response_ms = self.max_response_ms.max(sample.max_response_ms);
    }

    #[must_use]
    pub fn mean_response_ms(&self) -> u64 {
        self.total_response_ms
            .checked_div(self.responses)
            .unwrap_or(0)
    }

    /// Errors and timeouts relative to issued requests; zero without requests.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "Error ratio is compared against a fractional threshold"
    )]
    pub fn error_ratio(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.errors.saturating_add(self.timeouts) as f64 / self.requests as f64
    }
}
