use std::path::PathBuf;

use crate::benchmark::Benchmark;
use crate::config::types::DeployerKind;
use crate::distributed::{AgentOptions, ControllerSettings};

pub(in crate::entry) struct ControllerPlan {
    pub(super) settings: ControllerSettings,
    pub(super) deployer: DeployerKind,
    pub(super) benchmark: Benchmark,
    pub(super) description: Option<String>,
}

pub(in crate::entry) enum RunPlan {
    Controller(Box<ControllerPlan>),
    Agent(AgentOptions),
    Compile { benchmark: Benchmark, json: bool },
    Runs { root_dir: PathBuf },
}
