use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::benchmark::Benchmark;
use crate::error::{AppError, AppResult, DistributedError};
use crate::phase::PhaseStatus;

use super::driver::{PhaseProgress, SessionDriver};
use crate::distributed::protocol::{
    CustomDataMessage, PhaseChangeMessage, PhaseCommand, PhaseControlMessage, StatsMessage,
    WireMessage,
};
use crate::distributed::utils::current_time_ms;

/// Agent-side view of one initialized run.
pub(super) struct AgentRunner {
    name: String,
    run_id: String,
    benchmark: Benchmark,
    statuses: HashMap<String, PhaseStatus>,
    out_tx: mpsc::UnboundedSender<WireMessage>,
}

pub(super) fn send_wire(
    out_tx: &mpsc::UnboundedSender<WireMessage>,
    message: WireMessage,
) -> AppResult<()> {
    out_tx
        .send(message)
        .map_err(|_err| AppError::distributed(DistributedError::ControllerConnectionClosed))
}

impl AgentRunner {
    pub(super) fn new(
        name: String,
        run_id: String,
        benchmark: Benchmark,
        out_tx: mpsc::UnboundedSender<WireMessage>,
    ) -> Self {
        info!(
            "Agent {} initialized run {} ({} phases)",
            name,
            run_id,
            benchmark.phases.len()
        );
        Self {
            name,
            run_id,
            benchmark,
            statuses: HashMap::new(),
            out_tx,
        }
    }

    pub(super) fn run_id(&self) -> &str {
        &self.run_id
    }

    pub(super) const fn statistics_period_ms(&self) -> u64 {
        self.benchmark.statistics_period_ms
    }

    pub(super) async fn handle_phase(
        &mut self,
        message: PhaseControlMessage,
        driver: &mut dyn SessionDriver,
    ) -> AppResult<()> {
        if message.run_id != self.run_id {
            warn!(
                "Ignoring {} for {} from run {}",
                message.command.as_str(),
                message.phase,
                message.run_id
            );
            return Ok(());
        }
        debug!(
            "Agent {} received {} for {}",
            self.name,
            message.command.as_str(),
            message.phase
        );
        let phase = message.phase;
        let result = match message.command {
            PhaseCommand::Run => {
                let Some(definition) = self.benchmark.phase(&phase).cloned() else {
                    return self.report_failure(&phase, format!("Unknown phase {}", phase));
                };
                driver.start(&definition).await
            }
            PhaseCommand::Finish => driver.finish(&phase).await,
            PhaseCommand::TryTerminate => {
                let finished = self
                    .statuses
                    .get(&phase)
                    .is_some_and(|status| status.is_finished());
                if !finished {
                    return Ok(());
                }
                driver.try_terminate(&phase).await
            }
            PhaseCommand::Terminate => driver.terminate(&phase).await,
        };
        match result {
            Ok(progress) => self.report(&phase, progress, driver),
            Err(err) => self.report_failure(&phase, err.to_string()),
        }
    }

    /// Reports every status the phase passed through locally, in order.
    fn report(
        &mut self,
        phase: &str,
        progress: PhaseProgress,
        driver: &mut dyn SessionDriver,
    ) -> AppResult<()> {
        let current = self
            .statuses
            .get(phase)
            .copied()
            .unwrap_or(PhaseStatus::NotStarted);
        let steps = [
            PhaseStatus::Running,
            PhaseStatus::Finished,
            PhaseStatus::Terminated,
        ];
        for status in steps {
            if status <= current || status > progress.status {
                continue;
            }
            if status == PhaseStatus::Terminated {
                self.flush_statistics(driver)?;
                for (key, value) in driver.custom_data(phase) {
                    send_wire(
                        &self.out_tx,
                        WireMessage::CustomData(CustomDataMessage {
                            sender_id: self.name.clone(),
                            run_id: self.run_id.clone(),
                            phase: phase.to_owned(),
                            key,
                            value,
                        }),
                    )?;
                }
            }
            self.statuses.insert(phase.to_owned(), status);
            send_wire(
                &self.out_tx,
                WireMessage::PhaseChange(PhaseChangeMessage {
                    sender_id: self.name.clone(),
                    run_id: self.run_id.clone(),
                    phase: phase.to_owned(),
                    status,
                    successful: true,
                    session_limit_exceeded: progress.session_limit_exceeded,
                    error: None,
                }),
            )?;
        }
        Ok(())
    }

    fn report_failure(&mut self, phase: &str, error: String) -> AppResult<()> {
        warn!("Agent {} phase {} failed: {}", self.name, phase, error);
        self.statuses
            .insert(phase.to_owned(), PhaseStatus::Terminated);
        send_wire(
            &self.out_tx,
            WireMessage::PhaseChange(PhaseChangeMessage {
                sender_id: self.name.clone(),
                run_id: self.run_id.clone(),
                phase: phase.to_owned(),
                status: PhaseStatus::Terminated,
                successful: false,
                session_limit_exceeded: false,
                error: Some(error),
            }),
        )
    }

    pub(super) fn flush_statistics(&self, driver: &mut dyn SessionDriver) -> AppResult<()> {
        let samples = driver.statistics(current_time_ms());
        if samples.is_empty() {
            return Ok(());
        }
        send_wire(
            &self.out_tx,
            WireMessage::Stats(StatsMessage {
                sender_id: self.name.clone(),
                run_id: self.run_id.clone(),
                samples,
            }),
        )
    }
}
