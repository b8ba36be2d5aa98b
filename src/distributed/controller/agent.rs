use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::distributed::protocol::WireMessage;
use crate::phase::PhaseStatus;

/// Lifecycle of one agent within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Starting,
    Registered,
    Initializing,
    Initialized,
    Stopping,
    Stopped,
    Failed,
}

impl AgentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Starting => "STARTING",
            AgentStatus::Registered => "REGISTERED",
            AgentStatus::Initializing => "INITIALIZING",
            AgentStatus::Initialized => "INITIALIZED",
            AgentStatus::Stopping => "STOPPING",
            AgentStatus::Stopped => "STOPPED",
            AgentStatus::Failed => "FAILED",
        }
    }

    /// Whether the agent no longer takes part in the run.
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, AgentStatus::Stopped | AgentStatus::Failed)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller-side record of one agent of a run.
pub(super) struct AgentInfo {
    pub(super) id: u32,
    pub(super) name: String,
    pub(super) address: Option<String>,
    pub(super) status: AgentStatus,
    pub(super) connection: Option<u64>,
    sender: Option<mpsc::UnboundedSender<WireMessage>>,
    phases: HashMap<String, PhaseStatus>,
}

impl AgentInfo {
    pub(super) fn new(id: u32, name: String) -> Self {
        Self {
            id,
            name,
            address: None,
            status: AgentStatus::Starting,
            connection: None,
            sender: None,
            phases: HashMap::new(),
        }
    }

    pub(super) fn attach(
        &mut self,
        connection: u64,
        address: String,
        sender: mpsc::UnboundedSender<WireMessage>,
    ) {
        self.connection = Some(connection);
        self.address = Some(address);
        self.sender = Some(sender);
    }

    pub(super) fn detach(&mut self) {
        self.connection = None;
        self.sender = None;
    }

    /// Queues a message for the agent; `false` when it is not connected.
    pub(super) fn send(&self, message: WireMessage) -> bool {
        self.sender
            .as_ref()
            .is_some_and(|sender| sender.send(message).is_ok())
    }

    /// Records a reported phase status, ignoring regressions.
    pub(super) fn set_phase_status(&mut self, phase: &str, status: PhaseStatus) -> bool {
        match self.phases.get_mut(phase) {
            Some(current) if *current >= status => false,
            Some(current) => {
                *current = status;
                true
            }
            None => {
                self.phases.insert(phase.to_owned(), status);
                true
            }
        }
    }

    pub(super) fn phase_status(&self, phase: &str) -> Option<PhaseStatus> {
        self.phases.get(phase).copied()
    }
}

/// Authoritative status of `phase`: the lowest status any agent reported, or
/// nothing while some agent has not reported at all.
pub(super) fn aggregate_phase_status(agents: &[AgentInfo], phase: &str) -> Option<PhaseStatus> {
    let mut minimum: Option<PhaseStatus> = None;
    for agent in agents {
        let status = agent.phase_status(phase)?;
        minimum = Some(minimum.map_or(status, |current| current.min(status)));
    }
    minimum
}
