//! Core library for the `loadfleet` CLI.
//!
//! A benchmark is authored as phase templates, compiled into a graph of
//! concrete phases and driven by a controller across a fleet of agents.
//! The controller schedules phases from their dependencies and timing,
//! aggregates the phase status every agent reports, collects statistics
//! and persists each run. The binary wraps this with configuration files
//! and subcommands; library APIs may evolve as the CLI grows.
pub mod args;
pub mod benchmark;
pub mod config;
pub mod distributed;
mod entry;
pub mod error;
pub mod phase;
pub mod stats;
mod system;

/// Parses the command line and runs the selected subcommand.
///
/// # Errors
///
/// Returns an error when configuration is invalid, the subcommand fails or
/// a run completes with errors.
pub fn run() -> error::AppResult<()> {
    entry::run()
}
