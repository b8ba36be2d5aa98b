//! CLI argument types and parsing helpers.
mod cli;
pub(crate) mod parsers;
mod types;

#[cfg(test)]
mod tests;

pub use cli::{AgentArgs, Command, CompileArgs, ControllerArgs, LoadfleetArgs, RunsArgs};
pub use types::PositiveUsize;
