use serde::{Deserialize, Serialize};

use crate::benchmark::Benchmark;
use crate::phase::PhaseStatus;
use crate::stats::{CustomValue, StatisticsSample};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(in crate::distributed) enum WireMessage {
    Hello(AgentHello),
    HelloReply(HelloReply),
    AgentControl(Box<AgentControlMessage>),
    AgentReply(AgentReplyMessage),
    PhaseControl(PhaseControlMessage),
    PhaseChange(PhaseChangeMessage),
    Stats(StatsMessage),
    CustomData(CustomDataMessage),
    Error(ErrorMessage),
}

impl WireMessage {
    pub(in crate::distributed) const fn kind(&self) -> &'static str {
        match self {
            WireMessage::Hello(_) => "hello",
            WireMessage::HelloReply(_) => "hello_reply",
            WireMessage::AgentControl(_) => "agent_control",
            WireMessage::AgentReply(_) => "agent_reply",
            WireMessage::PhaseControl(_) => "phase_control",
            WireMessage::PhaseChange(_) => "phase_change",
            WireMessage::Stats(_) => "stats",
            WireMessage::CustomData(_) => "custom_data",
            WireMessage::Error(_) => "error",
        }
    }
}

/// Discovery message an agent sends right after connecting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(in crate::distributed) struct AgentHello {
    pub(in crate::distributed) name: String,
    pub(in crate::distributed) address: String,
    #[serde(default)]
    pub(in crate::distributed) run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(in crate::distributed) struct HelloReply {
    pub(in crate::distributed) accepted: bool,
    #[serde(default)]
    pub(in crate::distributed) run_id: Option<String>,
    #[serde(default)]
    pub(in crate::distributed) message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(in crate::distributed) enum AgentCommand {
    Initialize,
    Reset,
    ListSessions,
    ListConnections,
}

/// Controller request; always answered by an [`AgentReplyMessage`] carrying
/// the same request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(in crate::distributed) struct AgentControlMessage {
    pub(in crate::distributed) request_id: u64,
    pub(in crate::distributed) command: AgentCommand,
    pub(in crate::distributed) run_id: String,
    pub(in crate::distributed) agent_id: u32,
    #[serde(default)]
    pub(in crate::distributed) benchmark: Option<Benchmark>,
    #[serde(default)]
    pub(in crate::distributed) include_inactive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(in crate::distributed) struct AgentReplyMessage {
    pub(in crate::distributed) request_id: u64,
    pub(in crate::distributed) success: bool,
    #[serde(default)]
    pub(in crate::distributed) error: Option<String>,
    #[serde(default)]
    pub(in crate::distributed) lines: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(in crate::distributed) enum PhaseCommand {
    Run,
    Finish,
    TryTerminate,
    Terminate,
}

impl PhaseCommand {
    pub(in crate::distributed) const fn as_str(self) -> &'static str {
        match self {
            PhaseCommand::Run => "RUN",
            PhaseCommand::Finish => "FINISH",
            PhaseCommand::TryTerminate => "TRY_TERMINATE",
            PhaseCommand::Terminate => "TERMINATE",
        }
    }
}

/// Broadcast to every agent of a run; never answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(in crate::distributed) struct PhaseControlMessage {
    pub(in crate::distributed) command: PhaseCommand,
    pub(in crate::distributed) run_id: String,
    pub(in crate::distributed) phase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(in crate::distributed) struct PhaseChangeMessage {
    pub(in crate::distributed) sender_id: String,
    pub(in crate::distributed) run_id: String,
    pub(in crate::distributed) phase: String,
    pub(in crate::distributed) status: PhaseStatus,
    pub(in crate::distributed) successful: bool,
    #[serde(default)]
    pub(in crate::distributed) session_limit_exceeded: bool,
    #[serde(default)]
    pub(in crate::distributed) error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(in crate::distributed) struct StatsMessage {
    pub(in crate::distributed) sender_id: String,
    pub(in crate::distributed) run_id: String,
    pub(in crate::distributed) samples: Vec<StatisticsSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(in crate::distributed) struct CustomDataMessage {
    pub(in crate::distributed) sender_id: String,
    pub(in crate::distributed) run_id: String,
    pub(in crate::distributed) phase: String,
    pub(in crate::distributed) key: String,
    pub(in crate::distributed) value: CustomValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(in crate::distributed) struct ErrorMessage {
    pub(in crate::distributed) message: String,
}
