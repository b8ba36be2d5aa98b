//! Run coordinator: a registry task owning every run, one task per live run
//! driving its phases, and the connection tasks agents talk through.
mod agent;
mod connections;
mod deploy;
mod driver;
mod events;
mod persist;
mod registry;
mod run;
mod schedule;
mod view;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arcshift::ArcShift;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::benchmark::Benchmark;
use crate::error::{AppError, AppResult, DistributedError};
use crate::stats::PhaseSummary;

pub use agent::AgentStatus;
pub use deploy::{
    AgentEndpoint, DeployedAgent, Deployer, FailureCallback, LocalDeployer, ManualDeployer,
};
pub use persist::{RunSummary, load_runs};
pub use run::RunError;
pub use view::{AgentView, PhaseView, RunView};

use events::ListKind;
use registry::{ControlCommand, Registry, RegistrySettings};

const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_IN_MEMORY_RUNS: usize = 20;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// TCP address agents join; in-process agents only when unset.
    pub listen: Option<String>,
    /// Parent directory of persisted run records.
    pub root_dir: PathBuf,
    pub deploy_timeout: Duration,
    pub max_in_memory_runs: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            listen: None,
            root_dir: PathBuf::from("runs"),
            deploy_timeout: DEFAULT_DEPLOY_TIMEOUT,
            max_in_memory_runs: DEFAULT_MAX_IN_MEMORY_RUNS,
        }
    }
}

/// Cloneable handle to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    control: mpsc::UnboundedSender<ControlCommand>,
    endpoint: AgentEndpoint,
}

/// Loads persisted runs, binds the agent listener and spawns the controller.
///
/// # Errors
///
/// Returns an error when the run directory cannot be listed or the listen
/// address cannot be bound.
pub async fn start_controller(
    settings: ControllerSettings,
    deployer: Arc<dyn Deployer>,
) -> AppResult<ControllerHandle> {
    let root_dir = settings.root_dir.clone();
    let persisted = tokio::task::spawn_blocking(move || load_runs(&root_dir)).await??;

    let routes = ArcShift::new(HashMap::new());
    let address = match settings.listen.as_deref() {
        Some(listen) => {
            let listener = TcpListener::bind(listen).await.map_err(|err| {
                AppError::distributed(DistributedError::Bind {
                    addr: listen.to_owned(),
                    source: err,
                })
            })?;
            let address = listener.local_addr().map_err(|err| {
                AppError::distributed(DistributedError::Io {
                    context: "local address",
                    source: err,
                })
            })?;
            info!("Controller accepting agents on {}", address);
            tokio::spawn(connections::accept_agents(listener, routes.clone()));
            Some(address)
        }
        None => None,
    };

    let endpoint = AgentEndpoint::new(address, routes.clone());
    let registry = Registry::new(
        persisted,
        routes,
        deployer,
        endpoint.clone(),
        RegistrySettings {
            root_dir: settings.root_dir,
            deploy_timeout: settings.deploy_timeout,
            max_in_memory_runs: settings.max_in_memory_runs,
        },
    );
    let (control, control_rx) = mpsc::unbounded_channel();
    tokio::spawn(registry.serve(control_rx));
    Ok(ControllerHandle { control, endpoint })
}

impl ControllerHandle {
    /// Address agents join over TCP, if the controller listens.
    #[must_use]
    pub const fn agent_address(&self) -> Option<SocketAddr> {
        self.endpoint.address()
    }

    #[must_use]
    pub const fn endpoint(&self) -> &AgentEndpoint {
        &self.endpoint
    }

    async fn call<T, F>(&self, build: F) -> AppResult<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> ControlCommand,
    {
        let (respond_to, response) = oneshot::channel();
        self.control
            .send(build(respond_to))
            .map_err(|_err| AppError::distributed(DistributedError::ControlChannelClosed))?;
        response
            .await
            .map_err(|_err| AppError::distributed(DistributedError::ControlChannelClosed))
    }

    /// Creates a run for `benchmark` and starts deploying its agents.
    ///
    /// # Errors
    ///
    /// Returns an error when the benchmark has no agents, one of its agents
    /// is used by another live run, or the controller is gone.
    pub async fn start_benchmark(
        &self,
        benchmark: Benchmark,
        description: Option<String>,
    ) -> AppResult<String> {
        self.call(|respond_to| ControlCommand::Start {
            benchmark: Box::new(benchmark),
            description,
            respond_to,
        })
        .await?
    }

    /// Kills a run and waits until its terminate time is set.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown runs.
    pub async fn kill(&self, run_id: &str) -> AppResult<u64> {
        self.call(|respond_to| ControlCommand::Kill {
            run_id: run_id.to_owned(),
            respond_to,
        })
        .await?
    }

    /// Streams one line per session from every agent of a live run into
    /// `lines`; returns once all agents answered.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or completed runs and when an agent
    /// fails to answer.
    pub async fn list_sessions(
        &self,
        run_id: &str,
        include_inactive: bool,
        lines: mpsc::UnboundedSender<String>,
    ) -> AppResult<()> {
        self.list(run_id, ListKind::Sessions, include_inactive, lines)
            .await
    }

    /// Streams one line per connection from every agent of a live run.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or completed runs and when an agent
    /// fails to answer.
    pub async fn list_connections(
        &self,
        run_id: &str,
        lines: mpsc::UnboundedSender<String>,
    ) -> AppResult<()> {
        self.list(run_id, ListKind::Connections, false, lines).await
    }

    async fn list(
        &self,
        run_id: &str,
        kind: ListKind,
        include_inactive: bool,
        lines: mpsc::UnboundedSender<String>,
    ) -> AppResult<()> {
        self.call(|respond_to| ControlCommand::List {
            run_id: run_id.to_owned(),
            kind,
            include_inactive,
            lines,
            respond_to,
        })
        .await?
    }

    /// Summaries of every known run, live or persisted.
    ///
    /// # Errors
    ///
    /// Returns an error when the controller is gone.
    pub async fn runs(&self) -> AppResult<Vec<RunSummary>> {
        self.call(|respond_to| ControlCommand::Runs { respond_to })
            .await
    }

    /// Current view of one run.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown runs.
    pub async fn run(&self, run_id: &str) -> AppResult<RunView> {
        self.call(|respond_to| ControlCommand::View {
            run_id: run_id.to_owned(),
            respond_to,
        })
        .await?
    }

    /// Per-phase statistics of a run: everything since `since_ms`, or the
    /// whole run when unset.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown runs or unreadable persisted statistics.
    pub async fn statistics(
        &self,
        run_id: &str,
        since_ms: Option<u64>,
    ) -> AppResult<Vec<PhaseSummary>> {
        self.call(|respond_to| ControlCommand::Statistics {
            run_id: run_id.to_owned(),
            since_ms,
            respond_to,
        })
        .await?
    }

    /// Waits until the run is persisted and returns its final view.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown runs.
    pub async fn wait_for_completion(&self, run_id: &str) -> AppResult<RunView> {
        self.call(|respond_to| ControlCommand::WaitFor {
            run_id: run_id.to_owned(),
            respond_to,
        })
        .await?
    }

    /// Stops the controller task. Live runs keep running to completion.
    ///
    /// # Errors
    ///
    /// Returns an error when the controller is already gone.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.call(|respond_to| ControlCommand::Shutdown { respond_to })
            .await
    }
}

#[cfg(test)]
mod tests;
