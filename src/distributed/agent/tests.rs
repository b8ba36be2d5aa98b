use tokio::io::{BufReader, DuplexStream, ReadHalf, WriteHalf};

use crate::benchmark::Benchmark;
use crate::error::{AppError, AppResult, DistributedError};
use crate::phase::compiler::{ModelTemplate, PhaseTemplate};
use crate::phase::{PhaseStatus, Scenario};
use crate::stats::CustomValue;

use super::{AgentOptions, IdleDriver, serve_agent};
use crate::distributed::protocol::{
    AgentCommand, AgentControlMessage, AgentReplyMessage, HelloReply, PhaseChangeMessage,
    PhaseCommand, PhaseControlMessage, WireMessage, read_message, send_message,
};

struct FakeController {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    custom: Vec<(String, CustomValue)>,
}

impl FakeController {
    fn new(stream: DuplexStream) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer,
            custom: Vec::new(),
        }
    }

    async fn send(&mut self, message: WireMessage) -> AppResult<()> {
        send_message(&mut self.writer, &message).await
    }

    /// Next message that is not a periodic statistics flush.
    async fn next(&mut self) -> AppResult<WireMessage> {
        loop {
            let message = read_message(&mut self.reader).await?;
            match message {
                WireMessage::Stats(_) => {}
                WireMessage::CustomData(custom) => {
                    self.custom.push((custom.key, custom.value));
                }
                WireMessage::Hello(_)
                | WireMessage::HelloReply(_)
                | WireMessage::AgentControl(_)
                | WireMessage::AgentReply(_)
                | WireMessage::PhaseControl(_)
                | WireMessage::PhaseChange(_)
                | WireMessage::Error(_) => return Ok(message),
            }
        }
    }

    async fn control(
        &mut self,
        request_id: u64,
        command: AgentCommand,
        benchmark: Option<Benchmark>,
    ) -> AppResult<AgentReplyMessage> {
        self.send(WireMessage::AgentControl(Box::new(AgentControlMessage {
            request_id,
            command,
            run_id: "0001".to_owned(),
            agent_id: 0,
            benchmark,
            include_inactive: true,
        })))
        .await?;
        let message = self.next().await?;
        let kind = message.kind();
        let WireMessage::AgentReply(reply) = message else {
            return Err(AppError::distributed(format!(
                "Expected reply to {}, got {}",
                request_id, kind
            )));
        };
        if reply.request_id != request_id {
            return Err(AppError::distributed(format!(
                "Reply {} does not match request {}",
                reply.request_id, request_id
            )));
        }
        Ok(reply)
    }

    async fn phase(&mut self, command: PhaseCommand, phase: &str) -> AppResult<()> {
        self.send(WireMessage::PhaseControl(PhaseControlMessage {
            command,
            run_id: "0001".to_owned(),
            phase: phase.to_owned(),
        }))
        .await
    }

    async fn phase_change(&mut self) -> AppResult<PhaseChangeMessage> {
        let message = self.next().await?;
        let kind = message.kind();
        let WireMessage::PhaseChange(change) = message else {
            return Err(AppError::distributed(format!(
                "Expected phase change, got {}",
                kind
            )));
        };
        Ok(change)
    }

    async fn accept_hello(&mut self) -> AppResult<String> {
        let WireMessage::Hello(hello) = self.next().await? else {
            return Err(AppError::distributed("Expected hello first"));
        };
        self.send(WireMessage::HelloReply(HelloReply {
            accepted: true,
            run_id: Some("0001".to_owned()),
            message: None,
        }))
        .await?;
        Ok(hello.name)
    }
}

fn benchmark() -> AppResult<Benchmark> {
    let template = PhaseTemplate::new("warmup", ModelTemplate::at_once(5))
        .scenario(Scenario::new(vec!["main".to_owned()]))?;
    Ok(Benchmark::builder("agent-test")
        .phase(template)
        .statistics_period(50)
        .build()?)
}

async fn scripted_run(controller: &mut FakeController) -> AppResult<()> {
    let name = controller.accept_hello().await?;
    if name != "agent-a" {
        return Err(AppError::distributed(format!("Unexpected agent {}", name)));
    }

    let reply = controller
        .control(1, AgentCommand::Initialize, Some(benchmark()?))
        .await?;
    if !reply.success {
        return Err(AppError::distributed("Initialize should succeed"));
    }
    let busy = controller
        .control(2, AgentCommand::Initialize, Some(benchmark()?))
        .await?;
    if busy.success || busy.error.as_deref() != Some("Another simulation is running!") {
        return Err(AppError::distributed("Second initialize should be refused"));
    }

    controller.phase(PhaseCommand::Run, "warmup").await?;
    for expected in [PhaseStatus::Running, PhaseStatus::Finished] {
        let change = controller.phase_change().await?;
        if change.status != expected || change.phase != "warmup" || !change.successful {
            return Err(AppError::distributed(format!(
                "Expected {} got {}",
                expected, change.status
            )));
        }
    }

    let sessions = controller.control(3, AgentCommand::ListSessions, None).await?;
    if sessions.lines.len() != 1 {
        return Err(AppError::distributed("Expected one session line"));
    }

    controller.phase(PhaseCommand::TryTerminate, "warmup").await?;
    let terminated = controller.phase_change().await?;
    if terminated.status != PhaseStatus::Terminated {
        return Err(AppError::distributed("Expected termination"));
    }
    if controller.custom != vec![("sessions".to_owned(), CustomValue::Counter(5))] {
        return Err(AppError::distributed(
            "Custom data should arrive before termination",
        ));
    }

    let reset = controller.control(4, AgentCommand::Reset, None).await?;
    if !reset.success {
        return Err(AppError::distributed("Reset should succeed"));
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn agent_serves_a_run_until_reset() -> AppResult<()> {
    let (agent_side, controller_side) = tokio::io::duplex(64 * 1024);
    let options = AgentOptions::new("agent-a", "local");
    let mut driver = IdleDriver::new();
    let mut controller = FakeController::new(controller_side);

    let (agent_result, script_result) = tokio::join!(
        serve_agent(agent_side, &options, &mut driver),
        scripted_run(&mut controller)
    );
    script_result?;
    agent_result
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_phase_is_reported_as_failed() -> AppResult<()> {
    let (agent_side, controller_side) = tokio::io::duplex(64 * 1024);
    let options = AgentOptions::new("agent-a", "local");
    let mut driver = IdleDriver::new();
    let mut controller = FakeController::new(controller_side);

    let script = async {
        controller.accept_hello().await?;
        controller
            .control(1, AgentCommand::Initialize, Some(benchmark()?))
            .await?;
        controller.phase(PhaseCommand::Run, "missing").await?;
        let change = controller.phase_change().await?;
        if change.successful || change.status != PhaseStatus::Terminated {
            return Err(AppError::distributed("Unknown phase should fail"));
        }
        controller.control(2, AgentCommand::Reset, None).await?;
        Ok::<(), AppError>(())
    };
    let (agent_result, script_result) =
        tokio::join!(serve_agent(agent_side, &options, &mut driver), script);
    script_result?;
    agent_result
}

#[tokio::test(flavor = "current_thread")]
async fn rejected_registration_ends_session() -> AppResult<()> {
    let (agent_side, controller_side) = tokio::io::duplex(4096);
    let options = AgentOptions::new("agent-a", "local");
    let mut driver = IdleDriver::new();
    let mut controller = FakeController::new(controller_side);

    let script = async {
        controller.next().await?;
        controller
            .send(WireMessage::HelloReply(HelloReply {
                accepted: false,
                run_id: None,
                message: Some("Unknown agent".to_owned()),
            }))
            .await
    };
    let (agent_result, script_result) =
        tokio::join!(serve_agent(agent_side, &options, &mut driver), script);
    script_result?;
    match agent_result {
        Err(AppError::Distributed(DistributedError::RegistrationRejected { message }))
            if message == "Unknown agent" =>
        {
            Ok(())
        }
        Err(err) => Err(AppError::distributed(format!("Unexpected error {}", err))),
        Ok(()) => Err(AppError::distributed("Rejected agent should fail")),
    }
}
