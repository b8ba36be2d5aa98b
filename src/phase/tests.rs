use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::stats::{CustomValue, InMemoryStatistics, StatisticsSample, StatisticsStore};

use super::{
    ClosedModel, Model, PhaseDefinition, PhaseDraft, PhaseState, PhaseStatus, Scenario, Sla,
};

fn definition(name: &str, slas: Vec<Sla>) -> AppResult<PhaseDefinition> {
    Ok(PhaseDefinition::try_new(PhaseDraft {
        id: 0,
        iteration: 0,
        name: name.to_owned(),
        scenario: Some(Scenario::new(vec!["main".to_owned()])),
        start_time_ms: None,
        start_after: BTreeSet::new(),
        start_after_strict: BTreeSet::new(),
        terminate_after_strict: BTreeSet::new(),
        start_with_delay: None,
        duration_ms: Some(1_000),
        max_duration_ms: Some(5_000),
        shared_resources: name.to_owned(),
        model: Model::Always(ClosedModel { users: 3 }),
        slas,
    })?)
}

fn state(name: &str, slas: Vec<Sla>) -> AppResult<(PhaseState, InMemoryStatistics)> {
    let definition = definition(name, slas)?;
    let store = InMemoryStatistics::new([&definition]);
    Ok((PhaseState::new(Arc::new(definition)), store))
}

#[test]
fn draft_without_scenario_is_rejected() -> AppResult<()> {
    let draft = PhaseDraft {
        id: 0,
        iteration: 0,
        name: "p".to_owned(),
        scenario: None,
        start_time_ms: None,
        start_after: BTreeSet::new(),
        start_after_strict: BTreeSet::new(),
        terminate_after_strict: BTreeSet::new(),
        start_with_delay: None,
        duration_ms: None,
        max_duration_ms: None,
        shared_resources: "p".to_owned(),
        model: Model::Noop,
        slas: Vec::new(),
    };
    match PhaseDefinition::try_new(draft) {
        Err(crate::error::DefinitionError::ScenarioNotSet { phase }) if phase == "p" => Ok(()),
        other => Err(AppError::definition(format!("Unexpected result {:?}", other))),
    }
}

#[test]
fn status_never_moves_backwards() -> AppResult<()> {
    let (mut phase, mut store) = state("p", Vec::new())?;

    if !phase.start("run", 100, &mut store) {
        return Err(AppError::definition("Expected start to succeed"));
    }
    if phase.absolute_start_time() != Some(100) {
        return Err(AppError::definition("Expected recorded start time"));
    }
    if !phase.set_status("run", PhaseStatus::Finished, 200, &mut store) {
        return Err(AppError::definition("Expected forward transition"));
    }
    if phase.set_status("run", PhaseStatus::Running, 300, &mut store) {
        return Err(AppError::definition("Lower status must be ignored"));
    }
    if phase.set_status("run", PhaseStatus::Finished, 300, &mut store) {
        return Err(AppError::definition("Equal status must be ignored"));
    }
    if phase.status() != PhaseStatus::Finished || !phase.is_finished() || phase.is_terminated() {
        return Err(AppError::definition(format!(
            "Unexpected status {}",
            phase.status()
        )));
    }
    if phase.start("run", 400, &mut store) {
        return Err(AppError::definition("Started phase cannot start again"));
    }
    Ok(())
}

#[test]
fn cancellation_only_from_not_started() -> AppResult<()> {
    let (mut running, mut store) = state("p", Vec::new())?;
    running.start("run", 0, &mut store);
    running.set_status("run", PhaseStatus::Running, 10, &mut store);
    if running.set_status("run", PhaseStatus::Cancelled, 20, &mut store) {
        return Err(AppError::definition("Running phase cannot be cancelled"));
    }
    if running.status() != PhaseStatus::Running {
        return Err(AppError::definition("Running phase must stay running"));
    }

    let (mut idle, mut idle_store) = state("q", Vec::new())?;
    if !idle.set_status("run", PhaseStatus::Cancelled, 20, &mut idle_store) {
        return Err(AppError::definition("Not started phase must cancel"));
    }
    if !idle.is_terminated() || idle.is_started() {
        return Err(AppError::definition("Cancelled counts as terminated"));
    }
    if idle.set_status("run", PhaseStatus::Terminated, 30, &mut idle_store) {
        return Err(AppError::definition("Cancelled is terminal"));
    }
    Ok(())
}

#[test]
fn failing_sla_marks_phase_failed_but_terminates() -> AppResult<()> {
    let (mut phase, mut store) = state(
        "p",
        vec![Sla {
            max_error_ratio: 0.1,
            max_mean_response_ms: None,
        }],
    )?;
    store.record(
        "agent-1",
        &StatisticsSample {
            phase: "p".to_owned(),
            requests: 10,
            responses: 10,
            errors: 5,
            end_ms: 50,
            ..StatisticsSample::default()
        },
    );
    phase.start("run", 0, &mut store);
    if !phase.set_status("run", PhaseStatus::Terminated, 60, &mut store) {
        return Err(AppError::definition("Expected termination"));
    }
    if !phase.is_failed() {
        return Err(AppError::definition("Expected SLA failure"));
    }
    if phase.absolute_completion_time() != Some(60) {
        return Err(AppError::definition("Expected completion time"));
    }
    if store.sla_failures().len() != 1 {
        return Err(AppError::definition("Expected recorded SLA failure"));
    }
    Ok(())
}

#[test]
fn error_ratio_at_the_limit_passes() -> AppResult<()> {
    let (mut phase, mut store) = state(
        "p",
        vec![Sla {
            max_error_ratio: 0.25,
            max_mean_response_ms: None,
        }],
    )?;
    store.record(
        "agent-1",
        &StatisticsSample {
            phase: "p".to_owned(),
            requests: 4,
            responses: 4,
            errors: 1,
            end_ms: 50,
            ..StatisticsSample::default()
        },
    );
    phase.start("run", 0, &mut store);
    phase.set_status("run", PhaseStatus::Terminated, 60, &mut store);
    if phase.is_failed() || !store.sla_failures().is_empty() {
        return Err(AppError::definition("Ratio equal to the limit must pass"));
    }
    Ok(())
}

#[test]
fn passing_sla_keeps_phase_healthy() -> AppResult<()> {
    let (mut phase, mut store) = state(
        "p",
        vec![Sla {
            max_error_ratio: 0.5,
            max_mean_response_ms: Some(100),
        }],
    )?;
    store.record(
        "agent-1",
        &StatisticsSample {
            phase: "p".to_owned(),
            requests: 4,
            responses: 4,
            errors: 1,
            total_response_ms: 200,
            ..StatisticsSample::default()
        },
    );
    phase.set_status("run", PhaseStatus::Terminated, 10, &mut store);
    if phase.is_failed() {
        return Err(AppError::definition("SLA should pass"));
    }
    phase.fail();
    phase.set_status("run", PhaseStatus::Cancelled, 20, &mut store);
    if !phase.is_failed() {
        return Err(AppError::definition("Failure flag is sticky"));
    }
    Ok(())
}

#[test]
fn deadlines_follow_observed_start() -> AppResult<()> {
    let (mut phase, mut store) = state("p", Vec::new())?;
    if phase.finish_deadline().is_some() || phase.terminate_deadline().is_some() {
        return Err(AppError::definition("No deadlines before start"));
    }
    phase.start("run", 1_000, &mut store);
    if phase.finish_deadline() != Some(2_000) || phase.terminate_deadline() != Some(6_000) {
        return Err(AppError::definition(format!(
            "Unexpected deadlines {:?} {:?}",
            phase.finish_deadline(),
            phase.terminate_deadline()
        )));
    }
    Ok(())
}

#[test]
fn custom_values_accumulate_and_complete_once() -> AppResult<()> {
    let (mut phase, mut store) = state("p", Vec::new())?;
    phase.add_custom("sessions", CustomValue::Counter(3));
    phase.add_custom("sessions", CustomValue::Counter(4));
    phase.add_custom("peak", CustomValue::Max(7));
    phase.add_custom("peak", CustomValue::Max(2));
    phase.complete_custom(&mut store);

    let snapshot = store.snapshot();
    let custom = snapshot
        .custom
        .get("p")
        .ok_or_else(|| AppError::definition("Expected custom data for p"))?;
    if custom.get("sessions") != Some(&CustomValue::Counter(7))
        || custom.get("peak") != Some(&CustomValue::Max(7))
    {
        return Err(AppError::definition(format!("Unexpected custom {:?}", custom)));
    }
    Ok(())
}

#[test]
fn status_order_matches_lifecycle() -> AppResult<()> {
    let ordered = [
        PhaseStatus::NotStarted,
        PhaseStatus::Starting,
        PhaseStatus::Running,
        PhaseStatus::Finishing,
        PhaseStatus::Finished,
        PhaseStatus::Terminating,
        PhaseStatus::Terminated,
        PhaseStatus::Cancelled,
    ];
    if ordered.windows(2).any(|pair| match pair {
        [low, high] => low >= high,
        _ => true,
    }) {
        return Err(AppError::definition("Statuses are not strictly ordered"));
    }
    if PhaseStatus::Running.to_string() != "RUNNING" {
        return Err(AppError::definition("Unexpected display"));
    }
    Ok(())
}
