use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::stats::{Accumulator, CustomValue, StatisticsStore};

use super::definition::PhaseDefinition;
use super::status::PhaseStatus;

/// Runtime tracker for one phase instance, owned by its run.
#[derive(Debug)]
pub struct PhaseState {
    definition: Arc<PhaseDefinition>,
    status: PhaseStatus,
    absolute_start_time: Option<u64>,
    absolute_completion_time: Option<u64>,
    failed: bool,
    custom: BTreeMap<String, Accumulator>,
}

impl PhaseState {
    #[must_use]
    pub const fn new(definition: Arc<PhaseDefinition>) -> Self {
        Self {
            definition,
            status: PhaseStatus::NotStarted,
            absolute_start_time: None,
            absolute_completion_time: None,
            failed: false,
            custom: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn definition(&self) -> &PhaseDefinition {
        &self.definition
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    #[must_use]
    pub const fn status(&self) -> PhaseStatus {
        self.status
    }

    #[must_use]
    pub const fn absolute_start_time(&self) -> Option<u64> {
        self.absolute_start_time
    }

    #[must_use]
    pub const fn absolute_completion_time(&self) -> Option<u64> {
        self.absolute_completion_time
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.failed
    }

    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.status.is_started()
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.status.is_finished()
    }

    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        self.status.is_terminated()
    }

    /// Advances the status. Lower or equal statuses are ignored, as is
    /// CANCELLED on anything but a phase that never started.
    ///
    /// Entering TERMINATED records the completion time and evaluates the
    /// phase's quality gates once; a failing gate marks the phase failed.
    /// Returns whether the status changed.
    pub fn set_status(
        &mut self,
        run_id: &str,
        status: PhaseStatus,
        now: u64,
        store: &mut dyn StatisticsStore,
    ) -> bool {
        if status <= self.status {
            return false;
        }
        if status == PhaseStatus::Cancelled && self.status != PhaseStatus::NotStarted {
            debug!(
                "{} Ignoring cancellation of {} in status {}",
                run_id,
                self.name(),
                self.status
            );
            return false;
        }
        info!(
            "{} {} changing status {} to {}",
            run_id,
            self.name(),
            self.status,
            status
        );
        self.status = status;
        if status == PhaseStatus::Terminated {
            self.absolute_completion_time = Some(now);
            store.complete_phase(self.name());
            if !store.validate_slas(self.name()) {
                info!("{} Phase {} failed SLAs", run_id, self.name());
                self.failed = true;
            }
        }
        true
    }

    /// Records the observed start and moves to STARTING.
    pub fn start(&mut self, run_id: &str, now: u64, store: &mut dyn StatisticsStore) -> bool {
        if self.status != PhaseStatus::NotStarted {
            return false;
        }
        self.absolute_start_time = Some(now);
        self.set_status(run_id, PhaseStatus::Starting, now, store)
    }

    /// Sets the sticky failure flag.
    pub const fn fail(&mut self) {
        self.failed = true;
    }

    /// Deadline after which no new sessions may be admitted.
    #[must_use]
    pub fn finish_deadline(&self) -> Option<u64> {
        self.absolute_start_time
            .map(|start| start.saturating_add(self.definition.duration_ms))
    }

    /// Hard cutoff, present only when the phase declares a max duration.
    #[must_use]
    pub fn terminate_deadline(&self) -> Option<u64> {
        let max = self.definition.max_duration_ms?;
        self.absolute_start_time
            .map(|start| start.saturating_add(max))
    }

    /// Merges custom data from one agent into this phase.
    pub fn add_custom(&mut self, key: &str, value: CustomValue) {
        match self.custom.get_mut(key) {
            Some(accumulator) => accumulator.add(value),
            None => {
                self.custom.insert(key.to_owned(), Accumulator::new(value));
            }
        }
    }

    /// Completes every custom accumulator into the statistics store.
    pub fn complete_custom(&mut self, store: &mut dyn StatisticsStore) {
        for (key, accumulator) in &mut self.custom {
            match accumulator.complete() {
                Some(value) => store.record_custom(self.definition.name.as_str(), key, value),
                None => warn!(
                    "Custom data {} of {} was already completed",
                    key, self.definition.name
                ),
            }
        }
    }
}
