use crate::error::{AppError, AppResult};
use crate::phase::compiler::{ModelTemplate, PhaseTemplate};
use crate::phase::{PhaseStatus, SessionLimitPolicy, Sla};
use crate::stats::StatisticsSample;

use super::super::run::PhaseReport;
use super::super::schedule::tick;
use super::{expect_status, report, run_of, scenario};

#[test]
fn lagging_agent_holds_phase_at_minimum() -> AppResult<()> {
    let p = PhaseTemplate::new("p", ModelTemplate::always(2))
        .duration(1_000)
        .scenario(scenario())?;
    let mut run = run_of(&["a", "b"], vec![p])?;
    tick(&mut run, 0);

    report(&mut run, "a", "p", PhaseStatus::Running, 1);
    expect_status(&run, "p", PhaseStatus::Starting)?;

    report(&mut run, "b", "p", PhaseStatus::Finished, 2);
    expect_status(&run, "p", PhaseStatus::Running)?;

    report(&mut run, "a", "p", PhaseStatus::Finished, 3);
    expect_status(&run, "p", PhaseStatus::Finished)?;
    Ok(())
}

#[test]
fn duplicate_and_stale_reports_do_not_regress() -> AppResult<()> {
    let p = PhaseTemplate::new("p", ModelTemplate::always(2))
        .duration(1_000)
        .scenario(scenario())?;
    let mut run = run_of(&["a"], vec![p])?;
    tick(&mut run, 0);

    report(&mut run, "a", "p", PhaseStatus::Finished, 1);
    if report(&mut run, "a", "p", PhaseStatus::Running, 2) {
        return Err(AppError::distributed("Stale report must be ignored"));
    }
    if report(&mut run, "a", "p", PhaseStatus::Finished, 3) {
        return Err(AppError::distributed("Duplicate report must be ignored"));
    }
    expect_status(&run, "p", PhaseStatus::Finished)?;
    Ok(())
}

#[test]
fn unsuccessful_report_cancels_phases_not_started() -> AppResult<()> {
    let p = PhaseTemplate::new("p", ModelTemplate::always(1))
        .duration(1_000)
        .scenario(scenario())?;
    let side = PhaseTemplate::new("side", ModelTemplate::always(1))
        .duration(1_000)
        .scenario(scenario())?;
    let q = PhaseTemplate::new("q", ModelTemplate::at_once(1))
        .start_after_strict("p")
        .scenario(scenario())?;
    let mut run = run_of(&["a"], vec![p, side, q])?;
    tick(&mut run, 0);
    report(&mut run, "a", "side", PhaseStatus::Running, 1);

    run.apply_phase_report(
        &PhaseReport {
            agent: "a",
            phase: "p",
            status: PhaseStatus::Running,
            successful: false,
            session_limit_exceeded: false,
            error: Some("connection refused".to_owned()),
        },
        2,
    );

    expect_status(&run, "q", PhaseStatus::Cancelled)?;
    expect_status(&run, "side", PhaseStatus::Running)?;
    expect_status(&run, "p", PhaseStatus::Running)?;
    if !run.phase("p").is_some_and(|phase| phase.is_failed()) {
        return Err(AppError::distributed("p should be failed"));
    }
    let [error] = run.errors.as_slice() else {
        return Err(AppError::distributed("Expected exactly one run error"));
    };
    if error.agent.as_deref() != Some("a") || error.message != "connection refused" {
        return Err(AppError::distributed(format!(
            "Unexpected run error {:?}",
            error
        )));
    }
    Ok(())
}

#[test]
fn failed_quality_gate_fails_phase_at_termination() -> AppResult<()> {
    let p = PhaseTemplate::new("p", ModelTemplate::at_once(1))
        .sla(Sla {
            max_error_ratio: 0.1,
            max_mean_response_ms: None,
        })
        .scenario(scenario())?;
    let q = PhaseTemplate::new("q", ModelTemplate::at_once(1))
        .start_after_strict("p")
        .scenario(scenario())?;
    let mut run = run_of(&["a"], vec![p, q])?;
    tick(&mut run, 0);
    run.store.record(
        "a",
        &StatisticsSample {
            phase: "p".to_owned(),
            start_ms: 0,
            end_ms: 10,
            requests: 10,
            responses: 10,
            errors: 5,
            ..StatisticsSample::default()
        },
    );

    report(&mut run, "a", "p", PhaseStatus::Terminated, 20);

    expect_status(&run, "p", PhaseStatus::Terminated)?;
    expect_status(&run, "q", PhaseStatus::Cancelled)?;
    let [error] = run.errors.as_slice() else {
        return Err(AppError::distributed("Expected the gate failure recorded"));
    };
    if error.agent.is_some() || !error.message.contains("Error ratio") {
        return Err(AppError::distributed(format!(
            "Unexpected run error {:?}",
            error
        )));
    }
    Ok(())
}

#[test]
fn session_limit_fails_only_under_fail_policy() -> AppResult<()> {
    let strict = PhaseTemplate::new(
        "strict",
        ModelTemplate::constant_rate(10.0)
            .with_max_sessions(1)
            .with_session_limit_policy(SessionLimitPolicy::Fail),
    )
    .duration(1_000)
    .scenario(scenario())?;
    let lenient = PhaseTemplate::new(
        "lenient",
        ModelTemplate::constant_rate(10.0)
            .with_max_sessions(1)
            .with_session_limit_policy(SessionLimitPolicy::Continue),
    )
    .duration(1_000)
    .scenario(scenario())?;
    let mut run = run_of(&["a"], vec![strict, lenient])?;
    tick(&mut run, 0);

    for phase in ["lenient", "strict"] {
        run.apply_phase_report(
            &PhaseReport {
                agent: "a",
                phase,
                status: PhaseStatus::Running,
                successful: true,
                session_limit_exceeded: true,
                error: None,
            },
            1,
        );
    }

    let failed = |name: &str| run.phase(name).is_some_and(|phase| phase.is_failed());
    if failed("lenient") || !failed("strict") {
        return Err(AppError::distributed(
            "Only the FAIL policy may fail the phase",
        ));
    }
    Ok(())
}
