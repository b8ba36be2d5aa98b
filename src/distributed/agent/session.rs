use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, DistributedError};

use super::AgentOptions;
use super::command::ControllerEvent;
use super::driver::SessionDriver;
use super::runner::{AgentRunner, send_wire};
use crate::distributed::protocol::{
    AgentCommand, AgentControlMessage, AgentHello, AgentReplyMessage, HelloReply, WireMessage,
    read_message, send_message,
};

const HELLO_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Registers with the controller over `stream` and serves one run until the
/// controller resets the agent.
pub(in crate::distributed) async fn run_agent_session<S>(
    stream: S,
    address: String,
    options: &AgentOptions,
    driver: &mut dyn SessionDriver,
) -> AppResult<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();
    let writer_handle = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if send_message(&mut write_half, &message).await.is_err() {
                break;
            }
        }
    });

    let mut reader = BufReader::new(read_half);
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ControllerEvent>();
    let reader_handle = tokio::spawn(async move {
        loop {
            let message = match read_message(&mut reader).await {
                Ok(message) => message,
                Err(err) => {
                    if cmd_tx.send(ControllerEvent::Disconnected(err)).is_err() {
                        // Session already finished.
                    }
                    break;
                }
            };

            let event = match message {
                WireMessage::HelloReply(reply) => ControllerEvent::HelloReply(reply),
                WireMessage::AgentControl(message) => ControllerEvent::Control(message),
                WireMessage::PhaseControl(message) => ControllerEvent::Phase(message),
                WireMessage::Error(message) => {
                    ControllerEvent::Error(AppError::distributed(DistributedError::Remote {
                        message: message.message,
                    }))
                }
                WireMessage::Hello(_)
                | WireMessage::AgentReply(_)
                | WireMessage::PhaseChange(_)
                | WireMessage::Stats(_)
                | WireMessage::CustomData(_) => ControllerEvent::Error(AppError::distributed(
                    DistributedError::UnexpectedMessageFromController,
                )),
            };

            if cmd_tx.send(event).is_err() {
                break;
            }
        }
    });

    let hello = AgentHello {
        name: options.name.clone(),
        address,
        run_id: options.run_id.clone(),
    };
    send_wire(&out_tx, WireMessage::Hello(hello))?;
    debug!("Sent hello as {}", options.name);

    let session_result = match wait_for_hello_reply(&mut cmd_rx).await {
        Ok(reply) => {
            info!(
                "Agent {} registered with run {}",
                options.name,
                reply.run_id.as_deref().unwrap_or("<unknown>")
            );
            serve_controller(options, driver, &out_tx, &mut cmd_rx).await
        }
        Err(err) => Err(err),
    };

    drop(out_tx);
    if writer_handle.await.is_err() {
        // Writer panicked; nothing left to flush.
    }
    reader_handle.abort();
    session_result
}

async fn wait_for_hello_reply(
    cmd_rx: &mut mpsc::UnboundedReceiver<ControllerEvent>,
) -> AppResult<HelloReply> {
    let event = timeout(HELLO_REPLY_TIMEOUT, cmd_rx.recv())
        .await
        .map_err(|_elapsed| AppError::distributed(DistributedError::AgentHelloTimeout))?;
    match event {
        Some(ControllerEvent::HelloReply(reply)) => {
            if reply.accepted {
                Ok(reply)
            } else {
                Err(AppError::distributed(
                    DistributedError::RegistrationRejected {
                        message: reply.message.unwrap_or_default(),
                    },
                ))
            }
        }
        Some(ControllerEvent::Disconnected(err) | ControllerEvent::Error(err)) => Err(err),
        Some(ControllerEvent::Control(_) | ControllerEvent::Phase(_)) => Err(
            AppError::distributed(DistributedError::UnexpectedMessageFromController),
        ),
        None => Err(AppError::distributed(
            DistributedError::ControllerConnectionClosed,
        )),
    }
}

async fn next_statistics_tick(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn serve_controller(
    options: &AgentOptions,
    driver: &mut dyn SessionDriver,
    out_tx: &mpsc::UnboundedSender<WireMessage>,
    cmd_rx: &mut mpsc::UnboundedReceiver<ControllerEvent>,
) -> AppResult<()> {
    let mut runner: Option<AgentRunner> = None;
    let mut statistics: Option<tokio::time::Interval> = None;
    loop {
        let event = tokio::select! {
            event = cmd_rx.recv() => event,
            () = next_statistics_tick(statistics.as_mut()) => {
                if let Some(runner) = runner.as_ref() {
                    runner.flush_statistics(driver)?;
                }
                continue;
            }
        };
        let Some(event) = event else {
            return Err(AppError::distributed(
                DistributedError::ControllerConnectionClosed,
            ));
        };
        match event {
            ControllerEvent::Control(message) => {
                let AgentControlMessage {
                    request_id,
                    command,
                    run_id,
                    benchmark,
                    include_inactive,
                    ..
                } = *message;
                match command {
                    AgentCommand::Initialize => {
                        let reply = match (runner.as_ref(), benchmark) {
                            (Some(_), _) => failure(request_id, DistributedError::AgentBusy),
                            (None, None) => failure(
                                request_id,
                                DistributedError::Remote {
                                    message: "Initialize without benchmark".to_owned(),
                                },
                            ),
                            (None, Some(benchmark)) => {
                                let initialized = AgentRunner::new(
                                    options.name.clone(),
                                    run_id,
                                    benchmark,
                                    out_tx.clone(),
                                );
                                let period =
                                    Duration::from_millis(initialized.statistics_period_ms().max(1));
                                let mut interval = tokio::time::interval(period);
                                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                                statistics = Some(interval);
                                runner = Some(initialized);
                                success(request_id, Vec::new())
                            }
                        };
                        send_wire(out_tx, WireMessage::AgentReply(reply))?;
                    }
                    AgentCommand::Reset => {
                        if let Some(runner) = runner.as_ref() {
                            runner.flush_statistics(driver)?;
                            info!("Agent {} stopping run {}", options.name, runner.run_id());
                        }
                        send_wire(out_tx, WireMessage::AgentReply(success(request_id, Vec::new())))?;
                        return Ok(());
                    }
                    AgentCommand::ListSessions => {
                        let lines = driver.list_sessions(include_inactive);
                        send_wire(out_tx, WireMessage::AgentReply(success(request_id, lines)))?;
                    }
                    AgentCommand::ListConnections => {
                        let lines = driver.list_connections();
                        send_wire(out_tx, WireMessage::AgentReply(success(request_id, lines)))?;
                    }
                }
            }
            ControllerEvent::Phase(message) => match runner.as_mut() {
                Some(runner) => runner.handle_phase(message, driver).await?,
                None => warn!(
                    "Agent {} got {} for {} before initialization",
                    options.name,
                    message.command.as_str(),
                    message.phase
                ),
            },
            ControllerEvent::HelloReply(_) => {
                warn!("Agent {} got a duplicate hello reply", options.name);
            }
            ControllerEvent::Error(err) => warn!("Controller error: {}", err),
            ControllerEvent::Disconnected(err) => return Err(err),
        }
    }
}

fn success(request_id: u64, lines: Vec<String>) -> AgentReplyMessage {
    AgentReplyMessage {
        request_id,
        success: true,
        error: None,
        lines,
    }
}

fn failure(request_id: u64, error: DistributedError) -> AgentReplyMessage {
    AgentReplyMessage {
        request_id,
        success: false,
        error: Some(error.to_string()),
        lines: Vec::new(),
    }
}
