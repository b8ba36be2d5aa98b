use crate::error::AppError;

use crate::distributed::protocol::{AgentControlMessage, HelloReply, PhaseControlMessage};

pub(super) enum ControllerEvent {
    HelloReply(HelloReply),
    Control(Box<AgentControlMessage>),
    Phase(PhaseControlMessage),
    Error(AppError),
    Disconnected(AppError),
}
