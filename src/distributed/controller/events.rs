use tokio::sync::{mpsc, oneshot};

use crate::distributed::protocol::{AgentHello, WireMessage};
use crate::error::AppResult;
use crate::stats::PhaseSummary;

use super::deploy::DeployedAgent;
use super::view::RunView;

/// Freshly registered connection offered to a run.
pub(super) struct AgentConnection {
    pub(super) connection: u64,
    pub(super) hello: AgentHello,
    pub(super) sender: mpsc::UnboundedSender<WireMessage>,
}

/// Everything that can wake a run task.
pub(super) enum RunEvent {
    AgentConnected(Box<AgentConnection>),
    AgentMessage {
        connection: u64,
        message: WireMessage,
    },
    AgentDisconnected {
        connection: u64,
        message: String,
    },
    Deployed {
        agent: String,
        handle: Box<dyn DeployedAgent>,
    },
    DeployFailed {
        agent: String,
        message: String,
    },
    AgentFailed {
        agent: String,
        message: String,
    },
    Command(RunCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ListKind {
    Sessions,
    Connections,
}

/// Operator requests forwarded to a live run.
pub(super) enum RunCommand {
    Kill {
        respond_to: oneshot::Sender<u64>,
    },
    List {
        kind: ListKind,
        include_inactive: bool,
        lines: mpsc::UnboundedSender<String>,
        respond_to: oneshot::Sender<AppResult<()>>,
    },
    View {
        respond_to: oneshot::Sender<RunView>,
    },
    Statistics {
        since_ms: Option<u64>,
        respond_to: oneshot::Sender<Vec<PhaseSummary>>,
    },
}
