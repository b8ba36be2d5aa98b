mod aggregation;
mod schedule;

use std::sync::Arc;

use crate::benchmark::{AgentSpec, Benchmark};
use crate::error::{AppError, AppResult};
use crate::phase::compiler::PhaseTemplate;
use crate::phase::{PhaseStatus, Scenario};

use super::run::{PhaseReport, Run};

fn scenario() -> Scenario {
    Scenario::new(vec!["main".to_owned()])
}

fn benchmark(agents: &[&str], templates: Vec<PhaseTemplate>) -> AppResult<Benchmark> {
    let mut builder = Benchmark::builder("controller-test").statistics_period(50);
    for agent in agents {
        builder = builder.agent(AgentSpec::new(*agent));
    }
    for template in templates {
        builder = builder.phase(template);
    }
    Ok(builder.build()?)
}

fn run_of(agents: &[&str], templates: Vec<PhaseTemplate>) -> AppResult<Run> {
    let mut run = Run::new("0001".to_owned(), Arc::new(benchmark(agents, templates)?), None);
    run.start_time = Some(0);
    Ok(run)
}

fn report(run: &mut Run, agent: &str, phase: &str, status: PhaseStatus, now: u64) -> bool {
    run.apply_phase_report(
        &PhaseReport {
            agent,
            phase,
            status,
            successful: true,
            session_limit_exceeded: false,
            error: None,
        },
        now,
    )
}

fn status_of(run: &Run, phase: &str) -> AppResult<PhaseStatus> {
    run.phase(phase)
        .map(|state| state.status())
        .ok_or_else(|| AppError::distributed(format!("Missing phase {}", phase)))
}

fn expect_status(run: &Run, phase: &str, expected: PhaseStatus) -> AppResult<()> {
    let actual = status_of(run, phase)?;
    if actual != expected {
        return Err(AppError::distributed(format!(
            "Phase {} is {}, expected {}",
            phase, actual, expected
        )));
    }
    Ok(())
}
