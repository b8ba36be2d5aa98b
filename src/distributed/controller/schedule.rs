use tracing::{debug, info};

use crate::distributed::protocol::PhaseCommand;
use crate::phase::{PhaseState, PhaseStatus};

use super::run::Run;

/// Upper bound on how long a run sleeps between scheduling passes.
pub(super) const MAX_WAKE_MS: u64 = 1_000;

/// A phase command to broadcast to every agent of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct PhaseAction {
    pub(super) command: PhaseCommand,
    pub(super) phase: String,
}

/// Outcome of one scheduling pass.
#[derive(Debug)]
pub(super) struct Tick {
    pub(super) actions: Vec<PhaseAction>,
    pub(super) completed: bool,
    pub(super) wake_ms: u64,
}

/// Runs one scheduling pass at `now`: finishes phases past their duration,
/// terminates or hints termination of finished phases, starts every phase
/// whose preconditions hold and computes the next wake-up.
pub(super) fn tick(run: &mut Run, now: u64) -> Tick {
    let run_start = run.start_time.unwrap_or(now);
    let mut actions = Vec::new();

    let finishing: Vec<usize> = positions(run, |phase| {
        phase.status() == PhaseStatus::Running
            && phase.finish_deadline().is_some_and(|deadline| deadline <= now)
    });
    for position in finishing {
        push_action(run, &mut actions, position, PhaseCommand::Finish);
        run.set_phase_status(position, PhaseStatus::Finishing, now);
    }

    let finished: Vec<usize> = positions(run, |phase| phase.status() == PhaseStatus::Finished);
    for position in finished {
        let Some(phase) = run.phases().get(position) else {
            continue;
        };
        if phase.terminate_deadline().is_some_and(|deadline| deadline <= now) {
            push_action(run, &mut actions, position, PhaseCommand::Terminate);
            run.set_phase_status(position, PhaseStatus::Terminating, now);
        } else if phase
            .definition()
            .terminate_after_strict
            .iter()
            .all(|name| run.phase(name).is_some_and(PhaseState::is_terminated))
        {
            push_action(run, &mut actions, position, PhaseCommand::TryTerminate);
        }
    }

    let available: Vec<usize> = positions(run, |phase| is_available(run, phase, run_start, now));
    for position in available {
        push_action(run, &mut actions, position, PhaseCommand::Run);
        run.start_phase(position, now);
    }

    let completed = run.is_completed();
    if completed {
        info!("{} All phases are terminated", run.id);
    }
    let wake_ms = next_timestamp(run, run_start, now)
        .map_or(MAX_WAKE_MS, |next| next.saturating_sub(now).min(MAX_WAKE_MS));
    Tick {
        actions,
        completed,
        wake_ms,
    }
}

fn positions<F>(run: &Run, mut predicate: F) -> Vec<usize>
where
    F: FnMut(&PhaseState) -> bool,
{
    run.phases()
        .iter()
        .enumerate()
        .filter(|(_, phase)| predicate(phase))
        .map(|(position, _)| position)
        .collect()
}

fn push_action(run: &Run, actions: &mut Vec<PhaseAction>, position: usize, command: PhaseCommand) {
    if let Some(phase) = run.phases().get(position) {
        debug!("{} {} {}", run.id, command.as_str(), phase.name());
        actions.push(PhaseAction {
            command,
            phase: phase.name().to_owned(),
        });
    }
}

/// Whether a not-started phase may start at `now`.
pub(super) fn is_available(run: &Run, phase: &PhaseState, run_start: u64, now: u64) -> bool {
    if phase.status() != PhaseStatus::NotStarted {
        return false;
    }
    let definition = phase.definition();
    if definition
        .start_time_ms
        .is_some_and(|offset| now < run_start.saturating_add(offset))
    {
        return false;
    }
    let finished = definition
        .start_after
        .iter()
        .all(|name| run.phase(name).is_some_and(PhaseState::is_finished));
    let terminated = definition
        .start_after_strict
        .iter()
        .all(|name| run.phase(name).is_some_and(PhaseState::is_terminated));
    if !finished || !terminated {
        return false;
    }
    match definition.start_with_delay.as_ref() {
        Some(delay) => run
            .phase(&delay.phase)
            .filter(|reference| reference.is_started())
            .and_then(PhaseState::absolute_start_time)
            .is_some_and(|start| now >= start.saturating_add(delay.delay_ms)),
        None => true,
    }
}

/// Earliest future instant at which a scheduling pass could act without any
/// agent message arriving first.
fn next_timestamp(run: &Run, run_start: u64, now: u64) -> Option<u64> {
    let mut candidates = Vec::new();
    for phase in run.phases() {
        let definition = phase.definition();
        match phase.status() {
            PhaseStatus::NotStarted => {
                if let Some(offset) = definition.start_time_ms {
                    candidates.push(run_start.saturating_add(offset));
                }
                if let Some(delay) = definition.start_with_delay.as_ref()
                    && let Some(start) = run
                        .phase(&delay.phase)
                        .and_then(PhaseState::absolute_start_time)
                {
                    candidates.push(start.saturating_add(delay.delay_ms));
                }
            }
            PhaseStatus::Running => {
                candidates.extend(phase.finish_deadline());
                candidates.extend(phase.terminate_deadline());
            }
            PhaseStatus::Finishing | PhaseStatus::Finished => {
                candidates.extend(phase.terminate_deadline());
            }
            PhaseStatus::Starting
            | PhaseStatus::Terminating
            | PhaseStatus::Terminated
            | PhaseStatus::Cancelled => {}
        }
    }
    candidates.into_iter().filter(|time| *time > now).min()
}
