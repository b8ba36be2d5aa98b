use crate::distributed::protocol::PhaseCommand;
use crate::error::{AppError, AppResult};
use crate::phase::PhaseStatus;
use crate::phase::compiler::{ModelTemplate, PhaseTemplate};

use super::super::schedule::{MAX_WAKE_MS, PhaseAction, tick};
use super::{expect_status, report, run_of, scenario};

fn has_action(actions: &[PhaseAction], command: PhaseCommand, phase: &str) -> bool {
    actions
        .iter()
        .any(|action| action.command == command && action.phase == phase)
}

#[test]
fn strict_dependency_waits_for_termination() -> AppResult<()> {
    let p = PhaseTemplate::new("p", ModelTemplate::always(1))
        .duration(100)
        .scenario(scenario())?;
    let q = PhaseTemplate::new("q", ModelTemplate::always(1))
        .duration(100)
        .start_after_strict("p")
        .scenario(scenario())?;
    let mut run = run_of(&["a"], vec![p, q])?;

    let first = tick(&mut run, 0);
    if !has_action(&first.actions, PhaseCommand::Run, "p") || first.actions.len() != 1 {
        return Err(AppError::distributed("Only p should start"));
    }
    expect_status(&run, "p", PhaseStatus::Starting)?;

    report(&mut run, "a", "p", PhaseStatus::Running, 10);
    let running = tick(&mut run, 50);
    if !running.actions.is_empty() {
        return Err(AppError::distributed("Nothing may happen while p runs"));
    }
    if running.wake_ms != 50 {
        return Err(AppError::distributed(format!(
            "Expected wake at finish deadline, got {}",
            running.wake_ms
        )));
    }

    let finishing = tick(&mut run, 100);
    if !has_action(&finishing.actions, PhaseCommand::Finish, "p") {
        return Err(AppError::distributed("p should be finished at its deadline"));
    }
    expect_status(&run, "p", PhaseStatus::Finishing)?;

    report(&mut run, "a", "p", PhaseStatus::Finished, 110);
    let finished = tick(&mut run, 120);
    if !has_action(&finished.actions, PhaseCommand::TryTerminate, "p")
        || has_action(&finished.actions, PhaseCommand::Run, "q")
    {
        return Err(AppError::distributed("q must wait for p to terminate"));
    }

    report(&mut run, "a", "p", PhaseStatus::Terminated, 130);
    let terminated = tick(&mut run, 130);
    if !has_action(&terminated.actions, PhaseCommand::Run, "q") {
        return Err(AppError::distributed("q should start once p terminated"));
    }
    expect_status(&run, "q", PhaseStatus::Starting)?;
    if terminated.completed {
        return Err(AppError::distributed("Run is not complete yet"));
    }
    Ok(())
}

#[test]
fn loose_dependency_starts_after_finish() -> AppResult<()> {
    let p = PhaseTemplate::new("p", ModelTemplate::at_once(1)).scenario(scenario())?;
    let q = PhaseTemplate::new("q", ModelTemplate::at_once(1))
        .start_after("p")
        .scenario(scenario())?;
    let mut run = run_of(&["a"], vec![p, q])?;

    tick(&mut run, 0);
    report(&mut run, "a", "p", PhaseStatus::Running, 1);
    let running = tick(&mut run, 1);
    if has_action(&running.actions, PhaseCommand::Run, "q") {
        return Err(AppError::distributed("q must wait for p to finish"));
    }
    report(&mut run, "a", "p", PhaseStatus::Finished, 2);
    let finished = tick(&mut run, 2);
    if !has_action(&finished.actions, PhaseCommand::Run, "q") {
        return Err(AppError::distributed("q should start after p finished"));
    }
    Ok(())
}

#[test]
fn start_time_delays_phase_and_sets_wake() -> AppResult<()> {
    let late = PhaseTemplate::new("late", ModelTemplate::at_once(1))
        .start_time(300)
        .scenario(scenario())?;
    let mut run = run_of(&["a"], vec![late])?;

    let early = tick(&mut run, 100);
    if !early.actions.is_empty() || early.wake_ms != 200 {
        return Err(AppError::distributed(format!(
            "Expected no start and a 200ms wake, got {}",
            early.wake_ms
        )));
    }
    let due = tick(&mut run, 300);
    if !has_action(&due.actions, PhaseCommand::Run, "late") {
        return Err(AppError::distributed("late should start at its offset"));
    }
    Ok(())
}

#[test]
fn start_with_waits_for_running_reference_and_delay() -> AppResult<()> {
    let p = PhaseTemplate::new("p", ModelTemplate::always(1))
        .duration(10_000)
        .scenario(scenario())?;
    let q = PhaseTemplate::new("q", ModelTemplate::at_once(1))
        .start_with("p", 500)
        .scenario(scenario())?;
    let mut run = run_of(&["a"], vec![p, q])?;

    tick(&mut run, 0);
    let starting = tick(&mut run, 600);
    if has_action(&starting.actions, PhaseCommand::Run, "q") {
        return Err(AppError::distributed("q needs p running, not just starting"));
    }
    report(&mut run, "a", "p", PhaseStatus::Running, 100);
    let early = tick(&mut run, 200);
    if has_action(&early.actions, PhaseCommand::Run, "q") || early.wake_ms != 300 {
        return Err(AppError::distributed(format!(
            "q should wait for the delay, wake {}",
            early.wake_ms
        )));
    }
    let due = tick(&mut run, 500);
    if !has_action(&due.actions, PhaseCommand::Run, "q") {
        return Err(AppError::distributed("q should start 500ms after p"));
    }
    Ok(())
}

#[test]
fn max_duration_forces_termination_of_finished_phase() -> AppResult<()> {
    let p = PhaseTemplate::new("p", ModelTemplate::always(1))
        .duration(100)
        .max_duration(400)
        .scenario(scenario())?;
    let mut run = run_of(&["a"], vec![p])?;

    tick(&mut run, 0);
    report(&mut run, "a", "p", PhaseStatus::Finished, 150);
    let hint = tick(&mut run, 200);
    if !has_action(&hint.actions, PhaseCommand::TryTerminate, "p") || hint.wake_ms != 200 {
        return Err(AppError::distributed(format!(
            "Expected a termination hint and wake at max duration, got {}",
            hint.wake_ms
        )));
    }
    let forced = tick(&mut run, 400);
    if !has_action(&forced.actions, PhaseCommand::Terminate, "p") {
        return Err(AppError::distributed("p should be terminated at max duration"));
    }
    expect_status(&run, "p", PhaseStatus::Terminating)?;
    Ok(())
}

#[test]
fn terminate_after_strict_holds_back_termination_hint() -> AppResult<()> {
    let long = PhaseTemplate::new("long", ModelTemplate::always(1))
        .duration(10_000)
        .scenario(scenario())?;
    let short = PhaseTemplate::new("short", ModelTemplate::at_once(1))
        .terminate_after_strict("long")
        .scenario(scenario())?;
    let mut run = run_of(&["a"], vec![long, short])?;

    tick(&mut run, 0);
    report(&mut run, "a", "short", PhaseStatus::Finished, 10);
    let held = tick(&mut run, 20);
    if has_action(&held.actions, PhaseCommand::TryTerminate, "short") {
        return Err(AppError::distributed("short must outlive long"));
    }
    report(&mut run, "a", "long", PhaseStatus::Terminated, 30);
    let released = tick(&mut run, 40);
    if !has_action(&released.actions, PhaseCommand::TryTerminate, "short") {
        return Err(AppError::distributed("short may terminate after long"));
    }
    Ok(())
}

#[test]
fn run_completes_only_when_every_phase_terminated() -> AppResult<()> {
    let p = PhaseTemplate::new("p", ModelTemplate::at_once(1)).scenario(scenario())?;
    let q = PhaseTemplate::new("q", ModelTemplate::at_once(1)).scenario(scenario())?;
    let mut run = run_of(&["a"], vec![p, q])?;

    tick(&mut run, 0);
    report(&mut run, "a", "p", PhaseStatus::Terminated, 5);
    let partial = tick(&mut run, 5);
    if partial.completed || partial.wake_ms != MAX_WAKE_MS {
        return Err(AppError::distributed("q is still running"));
    }
    report(&mut run, "a", "q", PhaseStatus::Terminated, 6);
    if !tick(&mut run, 6).completed {
        return Err(AppError::distributed("All phases terminated"));
    }
    Ok(())
}
