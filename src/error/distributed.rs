use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributedError {
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection error to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection closed.")]
    ConnectionClosed,
    #[error("Wire message exceeded max size ({max_bytes} bytes).")]
    WireMessageTooLarge { max_bytes: usize },
    #[error("Wire message was not valid UTF-8: {source}")]
    WireMessageInvalidUtf8 {
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("Serialization error during {context}: {source}")]
    Serialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Deserialization error during {context}: {source}")]
    Deserialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Timed out waiting for agent hello.")]
    AgentHelloTimeout,
    #[error("Expected hello from agent.")]
    ExpectedHelloFromAgent,
    #[error("Unknown run ID {run_id}")]
    UnknownRun { run_id: String },
    #[error("Unknown agent {agent} in run {run_id}")]
    UnknownAgent { agent: String, run_id: String },
    #[error("Agent {agent} is already used; try starting the benchmark later")]
    AgentInUse { agent: String },
    #[error("Agent {agent} failed to {action}: {message}")]
    AgentFailure {
        agent: String,
        action: &'static str,
        message: String,
    },
    #[error("Benchmark {benchmark} has no agents.")]
    NoAgents { benchmark: String },
    #[error("Deployment timed out.")]
    DeployTimeout,
    #[error("Failed to deploy agent {agent}: {message}")]
    Deploy { agent: String, message: String },
    #[error("Agent unexpectedly left: {message}")]
    AgentLeft { message: String },
    #[error("Controller rejected registration: {message}")]
    RegistrationRejected { message: String },
    #[error("Unexpected message from controller.")]
    UnexpectedMessageFromController,
    #[error("Another simulation is running!")]
    AgentBusy,
    #[error("Controller connection closed.")]
    ControllerConnectionClosed,
    #[error("Control channel closed.")]
    ControlChannelClosed,
    #[error("Run {run_id} was already completed.")]
    RunAlreadyCompleted { run_id: String },
    #[error("Remote error: {message}")]
    Remote { message: String },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
