use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::benchmark::AgentSpec;
use crate::distributed::agent::{AgentOptions, IdleDriver, serve_agent};
use crate::error::AppResult;

use super::connections::{RouteTable, serve_connection};

const IN_PROCESS_BUFFER: usize = 256 * 1024;

/// Where deployed agents reach the controller.
#[derive(Clone)]
pub struct AgentEndpoint {
    address: Option<SocketAddr>,
    routes: RouteTable,
}

impl AgentEndpoint {
    pub(super) const fn new(address: Option<SocketAddr>, routes: RouteTable) -> Self {
        Self { address, routes }
    }

    /// TCP address agents join, when the controller listens on one.
    #[must_use]
    pub const fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// Opens an in-process connection that the controller serves exactly
    /// like a TCP agent connection.
    #[must_use]
    pub fn connect_in_process(&self, agent: &str) -> DuplexStream {
        let (agent_side, controller_side) = tokio::io::duplex(IN_PROCESS_BUFFER);
        tokio::spawn(serve_connection(
            controller_side,
            format!("in-process:{}", agent),
            self.routes.clone(),
        ));
        agent_side
    }
}

/// Invoked at most once when a deployed agent dies on its own.
pub type FailureCallback = Box<dyn FnOnce(String) + Send>;

/// Starts agent processes for a run.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Starts `agent` for `run_id`. The agent is expected to join through
    /// `endpoint` and say hello.
    ///
    /// # Errors
    ///
    /// Returns an error when the agent cannot be started.
    async fn start(
        &self,
        agent: &AgentSpec,
        run_id: &str,
        endpoint: &AgentEndpoint,
        on_failure: FailureCallback,
    ) -> AppResult<Box<dyn DeployedAgent>>;
}

/// Handle of a started agent.
pub trait DeployedAgent: Send {
    /// Releases the agent; called once the run no longer needs it.
    fn stop(&mut self);
}

/// Runs every agent as a task of the controller process, driven by
/// [`IdleDriver`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalDeployer;

struct LocalAgent {
    name: String,
    task: JoinHandle<()>,
}

impl DeployedAgent for LocalAgent {
    fn stop(&mut self) {
        if !self.task.is_finished() {
            info!("Stopping in-process agent {}", self.name);
            self.task.abort();
        }
    }
}

#[async_trait]
impl Deployer for LocalDeployer {
    async fn start(
        &self,
        agent: &AgentSpec,
        run_id: &str,
        endpoint: &AgentEndpoint,
        on_failure: FailureCallback,
    ) -> AppResult<Box<dyn DeployedAgent>> {
        let stream = endpoint.connect_in_process(&agent.name);
        let mut options = AgentOptions::new(agent.name.clone(), "in-process");
        options.run_id = Some(run_id.to_owned());
        let name = agent.name.clone();
        let task = tokio::spawn(async move {
            let mut driver = IdleDriver::new();
            if let Err(err) = serve_agent(stream, &options, &mut driver).await {
                warn!("In-process agent {} failed: {}", options.name, err);
                on_failure(err.to_string());
            }
        });
        info!("Started in-process agent {} for run {}", name, run_id);
        Ok(Box::new(LocalAgent { name, task }))
    }
}

/// Expects agents to be started by the operator; they join the listening
/// endpoint on their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualDeployer;

struct ManualAgent;

impl DeployedAgent for ManualAgent {
    fn stop(&mut self) {}
}

#[async_trait]
impl Deployer for ManualDeployer {
    async fn start(
        &self,
        agent: &AgentSpec,
        run_id: &str,
        endpoint: &AgentEndpoint,
        _on_failure: FailureCallback,
    ) -> AppResult<Box<dyn DeployedAgent>> {
        match endpoint.address() {
            Some(address) => info!(
                "Waiting for agent {} to join run {} at {}",
                agent.name, run_id, address
            ),
            None => warn!(
                "Agent {} of run {} has no endpoint to join",
                agent.name, run_id
            ),
        }
        Ok(Box::new(ManualAgent))
    }
}
