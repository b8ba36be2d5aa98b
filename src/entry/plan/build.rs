use std::path::PathBuf;

use crate::args::{AgentArgs, Command, ControllerArgs, LoadfleetArgs};
use crate::benchmark::Benchmark;
use crate::config::types::{ConfigFile, DeployerKind};
use crate::config::{
    DEFAULT_AGENT_NAME, apply_agent_config, apply_controller_config, build_benchmark,
    load_config,
};
use crate::distributed::{AgentOptions, ControllerSettings};
use crate::error::{AppError, AppResult, ValidationError};

use super::types::{ControllerPlan, RunPlan};

pub(crate) fn build_plan(args: LoadfleetArgs) -> AppResult<RunPlan> {
    let config = load_config(args.config.as_deref())?.unwrap_or_default();
    match args.command {
        Command::Controller(controller_args) => {
            controller_plan(controller_args, &config).map(|plan| RunPlan::Controller(Box::new(plan)))
        }
        Command::Agent(agent_args) => agent_options(agent_args, &config).map(RunPlan::Agent),
        Command::Compile(compile_args) => Ok(RunPlan::Compile {
            benchmark: benchmark(&config)?,
            json: compile_args.json,
        }),
        Command::Runs(runs_args) => {
            let root_dir = runs_args
                .root_dir
                .or_else(|| {
                    config
                        .controller
                        .as_ref()
                        .and_then(|controller| controller.root_dir.clone())
                })
                .map_or_else(|| ControllerSettings::default().root_dir, PathBuf::from);
            Ok(RunPlan::Runs { root_dir })
        }
    }
}

fn benchmark(config: &ConfigFile) -> AppResult<Benchmark> {
    let section = config.benchmark.as_ref().ok_or_else(|| {
        tracing::error!("Missing benchmark (add a [benchmark] section to the config).");
        AppError::validation(ValidationError::MissingBenchmark)
    })?;
    build_benchmark(section)
}

fn controller_plan(mut args: ControllerArgs, config: &ConfigFile) -> AppResult<ControllerPlan> {
    if let Some(controller) = config.controller.as_ref() {
        apply_controller_config(&mut args, controller)?;
    }
    let benchmark = benchmark(config)?;

    let mut settings = ControllerSettings {
        listen: args.listen,
        ..ControllerSettings::default()
    };
    if let Some(root_dir) = args.root_dir {
        settings.root_dir = PathBuf::from(root_dir);
    }
    if let Some(timeout) = args.deploy_timeout {
        settings.deploy_timeout = timeout;
    }
    if let Some(limit) = args.max_in_memory_runs {
        settings.max_in_memory_runs = limit.get();
    }
    let deployer = if args.manual {
        DeployerKind::Manual
    } else {
        DeployerKind::Local
    };

    Ok(ControllerPlan {
        settings,
        deployer,
        benchmark,
        description: args.description,
    })
}

fn agent_options(mut args: AgentArgs, config: &ConfigFile) -> AppResult<AgentOptions> {
    if let Some(agent) = config.agent.as_ref() {
        apply_agent_config(&mut args, agent)?;
    }
    let join = args
        .join
        .ok_or_else(|| AppError::validation(ValidationError::MissingAgentJoin))?;
    let name = args.name.unwrap_or_else(|| DEFAULT_AGENT_NAME.to_owned());

    let mut options = AgentOptions::new(name, join);
    options.run_id = args.run_id;
    options.standby = args.standby;
    if let Some(delay) = args.reconnect_delay {
        options.reconnect_delay = delay;
    }
    Ok(options)
}
