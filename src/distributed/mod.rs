//! Controller/agent split: the run coordinator and the agent runtime talking
//! newline-delimited JSON over TCP or in-process pipes.
mod agent;
mod controller;
mod protocol;
mod utils;

pub use agent::{
    AgentOptions, IdleDriver, PhaseProgress, SessionDriver, run_agent, serve_agent,
};
pub use controller::{
    AgentEndpoint, AgentStatus, AgentView, ControllerHandle, ControllerSettings, DeployedAgent,
    Deployer, FailureCallback, LocalDeployer, ManualDeployer, PhaseView, RunError, RunSummary,
    RunView, load_runs, start_controller,
};
