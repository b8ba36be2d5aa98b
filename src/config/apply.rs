use crate::args::{AgentArgs, ControllerArgs, PositiveUsize};
use crate::benchmark::{AgentSpec, Benchmark};
use crate::error::{AppError, AppResult, ConfigError};
use crate::phase::Scenario;
use crate::phase::compiler::{PhaseReference, PhaseTemplate};

use super::types::{AgentConfig, BenchmarkConfig, ControllerConfig, DeployerKind, PhaseConfig};

const DEFAULT_BENCHMARK_NAME: &str = "benchmark";
/// Agent used when the benchmark names none.
pub const DEFAULT_AGENT_NAME: &str = "local";
const DEFAULT_FORK_WEIGHT: f64 = 1.0;

/// Fills controller options the command line left unset.
///
/// # Errors
///
/// Returns an error when a config value is invalid.
pub fn apply_controller_config(args: &mut ControllerArgs, config: &ControllerConfig) -> AppResult<()> {
    if args.listen.is_none()
        && let Some(listen) = config.listen.clone()
    {
        args.listen = Some(listen);
    }

    if args.root_dir.is_none()
        && let Some(root_dir) = config.root_dir.clone()
    {
        args.root_dir = Some(root_dir);
    }

    if args.deploy_timeout.is_none()
        && let Some(timeout) = config.deploy_timeout.as_ref()
    {
        let timeout = timeout.to_duration("controller.deploy_timeout")?;
        if timeout.is_zero() {
            return Err(positive("controller.deploy_timeout"));
        }
        args.deploy_timeout = Some(timeout);
    }

    if args.max_in_memory_runs.is_none()
        && let Some(limit) = config.max_in_memory_runs
    {
        let limit =
            PositiveUsize::try_from(limit).map_err(|_err| positive("controller.max_in_memory_runs"))?;
        args.max_in_memory_runs = Some(limit);
    }

    if !args.manual && config.deployer == Some(DeployerKind::Manual) {
        args.manual = true;
    }

    Ok(())
}

/// Fills agent options the command line left unset.
///
/// # Errors
///
/// Returns an error when a config value is invalid.
pub fn apply_agent_config(args: &mut AgentArgs, config: &AgentConfig) -> AppResult<()> {
    if args.join.is_none()
        && let Some(join) = config.join.clone()
    {
        args.join = Some(join);
    }

    if args.name.is_none()
        && let Some(name) = config.name.clone()
    {
        args.name = Some(name);
    }

    if args.run_id.is_none()
        && let Some(run_id) = config.run_id.clone()
    {
        args.run_id = Some(run_id);
    }

    if !args.standby && config.standby == Some(true) {
        args.standby = true;
    }

    if args.reconnect_delay.is_none()
        && let Some(delay) = config.reconnect_delay.as_ref()
    {
        args.reconnect_delay = Some(delay.to_duration("agent.reconnect_delay")?);
    }

    Ok(())
}

/// Compiles the `[benchmark]` section. Without agents the benchmark runs on
/// a single agent named [`DEFAULT_AGENT_NAME`].
///
/// # Errors
///
/// Returns an error when a value is invalid or the phase graph does not
/// compile.
pub fn build_benchmark(config: &BenchmarkConfig) -> AppResult<Benchmark> {
    let name = config
        .name
        .clone()
        .unwrap_or_else(|| DEFAULT_BENCHMARK_NAME.to_owned());
    let mut builder = Benchmark::builder(name);

    if let Some(period) = config.statistics_period.as_ref() {
        let period_ms = period.to_millis("benchmark.statistics_period")?;
        if period_ms == 0 {
            return Err(positive("benchmark.statistics_period"));
        }
        builder = builder.statistics_period(period_ms);
    }

    if config.agents.is_empty() {
        builder = builder.agent(AgentSpec::new(DEFAULT_AGENT_NAME));
    }
    for agent in &config.agents {
        builder = builder.agent(AgentSpec::new(agent.as_str()));
    }

    for phase in &config.phases {
        builder = builder.phase(phase_template(phase)?);
    }

    Ok(builder.build()?)
}

fn phase_template(config: &PhaseConfig) -> AppResult<PhaseTemplate> {
    let field = |key: &str| format!("phases.{}.{}", config.name, key);
    let mut template = PhaseTemplate::new(config.name.as_str(), config.model);

    if let Some(start_time) = config.start_time.as_ref() {
        template = template.start_time(start_time.to_millis(&field("start_time"))?);
    }
    if let Some(duration) = config.duration.as_ref() {
        template = template.duration(duration.to_millis(&field("duration"))?);
    }
    if let Some(max_duration) = config.max_duration.as_ref() {
        template = template.max_duration(max_duration.to_millis(&field("max_duration"))?);
    }
    if let Some(iterations) = config.max_iterations {
        template = template.max_iterations(iterations);
    }
    if let Some(force) = config.force_iterations {
        template = template.force_iterations(force);
    }

    for reference in &config.start_after {
        template = template.start_after(reference.clone());
    }
    for reference in &config.start_after_strict {
        template = template.start_after_strict(reference.clone());
    }
    for reference in &config.terminate_after_strict {
        template = template.terminate_after_strict(reference.clone());
    }
    if let Some(start_with) = config.start_with.as_ref() {
        let mut reference =
            PhaseReference::new(start_with.phase.as_str()).iteration(start_with.iteration);
        if let Some(fork) = start_with.fork.as_deref() {
            reference = reference.fork(fork);
        }
        let delay_ms = match start_with.delay.as_ref() {
            Some(delay) => delay.to_millis(&field("start_with.delay"))?,
            None => 0,
        };
        template = template.start_with(reference, delay_ms);
    }

    for sla in &config.sla {
        template = template.sla(sla.clone());
    }

    match (config.scenario.as_ref(), config.forks.as_ref()) {
        (Some(_), Some(_)) => {
            return Err(AppError::config(ConfigError::ScenarioAndForks {
                phase: config.name.clone(),
            }));
        }
        (Some(sequences), None) => {
            template = template.scenario(Scenario::new(sequences.clone()))?;
        }
        (None, Some(forks)) => {
            for fork in forks {
                template = template.fork(
                    fork.name.as_str(),
                    fork.weight.unwrap_or(DEFAULT_FORK_WEIGHT),
                    Scenario::new(fork.scenario.clone()),
                )?;
            }
        }
        // Left to the compiler, which names the phase in its error.
        (None, None) => {}
    }

    Ok(template)
}

fn positive(field: &str) -> AppError {
    AppError::config(ConfigError::FieldMustBePositive {
        field: field.to_owned(),
    })
}
