//! Configuration loading and application.
mod apply;
mod loader;
mod parse;
pub mod types;


pub use apply::{DEFAULT_AGENT_NAME, apply_agent_config, apply_controller_config, build_benchmark};
pub use loader::{load_config, load_config_in};

#[cfg(test)]
pub(crate) use loader::load_config_file;
pub(crate) use parse::parse_duration_value;
