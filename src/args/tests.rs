use std::time::Duration;

use clap::Parser;

use super::parsers::{parse_bool_env, parse_duration_arg};
use super::*;
use crate::error::{AppError, AppResult, ValidationError};

#[test]
fn parse_controller_subcommand() -> AppResult<()> {
    let args = LoadfleetArgs::try_parse_from([
        "loadfleet",
        "--verbose",
        "controller",
        "--listen",
        "127.0.0.1:7100",
        "--deploy-timeout",
        "2m",
        "--max-in-memory-runs",
        "3",
        "--manual",
    ])?;
    if !args.verbose {
        return Err(AppError::validation("Expected verbose"));
    }
    match args.command {
        Command::Controller(controller) => {
            if controller.listen.as_deref() != Some("127.0.0.1:7100") {
                return Err(AppError::validation("Unexpected listen address"));
            }
            if controller.deploy_timeout != Some(Duration::from_secs(120)) {
                return Err(AppError::validation("Unexpected deploy timeout"));
            }
            if controller.max_in_memory_runs.map(PositiveUsize::get) != Some(3) || !controller.manual
            {
                return Err(AppError::validation("Unexpected controller options"));
            }
            Ok(())
        }
        Command::Agent(_) | Command::Compile(_) | Command::Runs(_) => {
            Err(AppError::validation("Expected controller subcommand"))
        }
    }
}

#[test]
fn parse_agent_subcommand_with_global_config() -> AppResult<()> {
    let args = LoadfleetArgs::try_parse_from([
        "loadfleet",
        "agent",
        "--join",
        "10.0.0.1:7100",
        "--name",
        "east",
        "--run-id",
        "002A",
        "--config",
        "fleet.toml",
    ])?;
    if args.config.as_deref() != Some("fleet.toml") {
        return Err(AppError::validation("Global --config should follow the subcommand"));
    }
    match args.command {
        Command::Agent(agent) => {
            if agent.join.as_deref() != Some("10.0.0.1:7100")
                || agent.name.as_deref() != Some("east")
                || agent.run_id.as_deref() != Some("002A")
            {
                return Err(AppError::validation("Unexpected agent options"));
            }
            Ok(())
        }
        Command::Controller(_) | Command::Compile(_) | Command::Runs(_) => {
            Err(AppError::validation("Expected agent subcommand"))
        }
    }
}

#[test]
fn zero_in_memory_runs_is_rejected() -> AppResult<()> {
    let parsed = LoadfleetArgs::try_parse_from([
        "loadfleet",
        "controller",
        "--max-in-memory-runs",
        "0",
    ]);
    if parsed.is_ok() {
        return Err(AppError::validation("Expected parse failure"));
    }
    Ok(())
}

#[test]
fn subcommand_is_required() -> AppResult<()> {
    if LoadfleetArgs::try_parse_from(["loadfleet"]).is_ok() {
        return Err(AppError::validation("Expected a missing subcommand error"));
    }
    Ok(())
}

#[test]
fn parse_duration_arg_units() -> AppResult<()> {
    if parse_duration_arg("1500ms")? != Duration::from_millis(1_500) {
        return Err(AppError::validation("Unexpected ms duration"));
    }
    if parse_duration_arg("2h")? != Duration::from_secs(7_200) {
        return Err(AppError::validation("Unexpected hour duration"));
    }
    match parse_duration_arg("0s") {
        Err(AppError::Validation(ValidationError::DurationZero)) => {}
        Err(err) => return Err(AppError::validation(format!("Unexpected error {}", err))),
        Ok(duration) => {
            return Err(AppError::validation(format!(
                "Zero should be rejected, got {:?}",
                duration
            )));
        }
    }
    Ok(())
}

#[test]
fn parse_bool_env_values() -> AppResult<()> {
    if !parse_bool_env("Yes")? || parse_bool_env("off")? {
        return Err(AppError::validation("Unexpected boolean"));
    }
    if parse_bool_env("maybe").is_ok() {
        return Err(AppError::validation("Expected invalid boolean"));
    }
    Ok(())
}
