use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use super::parsers::{parse_bool_env, parse_duration_arg, parse_positive_usize};
use super::types::PositiveUsize;

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Distributed load-test coordinator: compiles phase graphs and drives them across agents."
)]
pub struct LoadfleetArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (sets log level to debug unless overridden by LOADFLEET_LOG/RUST_LOG)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Disable color output
    #[arg(long = "no-color", env = "NO_COLOR", value_parser = parse_bool_env, global = true)]
    pub no_color: bool,

    /// Path to config file (TOML/JSON). Defaults to ./loadfleet.toml or ./loadfleet.json if present.
    #[arg(long, global = true)]
    pub config: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the configured benchmark and wait for it to complete
    Controller(ControllerArgs),
    /// Join a controller and execute phases on its behalf
    Agent(AgentArgs),
    /// Print the compiled phase graph of the configured benchmark
    Compile(CompileArgs),
    /// List persisted runs
    Runs(RunsArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct ControllerArgs {
    /// Address agents join (e.g. 0.0.0.0:7100); without it agents run in-process
    #[arg(long)]
    pub listen: Option<String>,

    /// Directory run records are written to
    #[arg(long = "root-dir")]
    pub root_dir: Option<String>,

    /// How long to wait for every agent to join (supports ms/s/m/h)
    #[arg(long = "deploy-timeout", value_parser = parse_duration_arg)]
    pub deploy_timeout: Option<Duration>,

    /// Completed runs kept fully loaded in memory
    #[arg(long = "max-in-memory-runs", value_parser = parse_positive_usize)]
    pub max_in_memory_runs: Option<PositiveUsize>,

    /// Wait for agents to join instead of starting them in-process
    #[arg(long)]
    pub manual: bool,

    /// Free-form description stored with the run
    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct AgentArgs {
    /// Controller address to join (host:port)
    #[arg(long)]
    pub join: Option<String>,

    /// Agent name as listed in the benchmark
    #[arg(long)]
    pub name: Option<String>,

    /// Run to join; any run expecting this agent when unset
    #[arg(long = "run-id")]
    pub run_id: Option<String>,

    /// Keep reconnecting after a session ends
    #[arg(long)]
    pub standby: bool,

    /// Delay between reconnect attempts (supports ms/s/m/h)
    #[arg(long = "reconnect-delay", value_parser = parse_duration_arg)]
    pub reconnect_delay: Option<Duration>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct CompileArgs {
    /// Print the compiled phases as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args, Clone, Default)]
pub struct RunsArgs {
    /// Directory run records are read from
    #[arg(long = "root-dir")]
    pub root_dir: Option<String>,
}
