use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arcshift::ArcShift;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::distributed::protocol::{
    AgentHello, HelloReply, WireMessage, read_message, send_message,
};
use crate::error::{AppError, AppResult, DistributedError};

use super::events::{AgentConnection, RunEvent};

const AGENT_HELLO_TIMEOUT: Duration = Duration::from_secs(10);

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// How connection tasks reach a live run.
#[derive(Clone)]
pub(super) struct RunRoute {
    pub(super) events: mpsc::UnboundedSender<RunEvent>,
    pub(super) agents: Vec<String>,
}

/// Live runs by id, swapped wholesale by the registry and read by every
/// connection task.
pub(super) type RouteTable = ArcShift<HashMap<String, RunRoute>>;

pub(super) fn insert_route(routes: &mut RouteTable, run_id: &str, route: RunRoute) {
    routes.rcu(|current| {
        let mut next = current.clone();
        next.insert(run_id.to_owned(), route.clone());
        next
    });
}

pub(super) fn remove_route(routes: &mut RouteTable, run_id: &str) {
    routes.rcu(|current| {
        let mut next = current.clone();
        next.remove(run_id);
        next
    });
}

/// Picks the run an agent belongs to: by the run id it announces, else by
/// its name among the agents of live runs.
fn find_route(routes: &RouteTable, hello: &AgentHello) -> Option<RunRoute> {
    let table = routes.shared_get();
    match hello.run_id.as_deref() {
        Some(run_id) => table.get(run_id).cloned(),
        None => table
            .values()
            .find(|route| route.agents.iter().any(|agent| *agent == hello.name))
            .cloned(),
    }
}

pub(super) async fn accept_agents(listener: TcpListener, routes: RouteTable) {
    info!("Controller listening for agents");
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(result) => result,
            Err(err) => {
                warn!("Failed to accept agent: {}", err);
                continue;
            }
        };
        tokio::spawn(serve_connection(stream, peer.to_string(), routes.clone()));
    }
}

async fn read_hello<R>(reader: &mut R) -> AppResult<AgentHello>
where
    R: AsyncBufRead + Unpin,
{
    let message = timeout(AGENT_HELLO_TIMEOUT, read_message(reader))
        .await
        .map_err(|_elapsed| AppError::distributed(DistributedError::AgentHelloTimeout))??;
    match message {
        WireMessage::Hello(hello) => Ok(hello),
        WireMessage::Error(message) => Err(AppError::distributed(DistributedError::Remote {
            message: message.message,
        })),
        WireMessage::HelloReply(_)
        | WireMessage::AgentControl(_)
        | WireMessage::AgentReply(_)
        | WireMessage::PhaseControl(_)
        | WireMessage::PhaseChange(_)
        | WireMessage::Stats(_)
        | WireMessage::CustomData(_) => Err(AppError::distributed(
            DistributedError::ExpectedHelloFromAgent,
        )),
    }
}

/// Serves one agent connection: waits for its hello, hands it to the run it
/// belongs to and then pumps messages both ways until either side closes.
pub(super) async fn serve_connection<S>(stream: S, peer: String, routes: RouteTable)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let hello = match read_hello(&mut reader).await {
        Ok(hello) => hello,
        Err(err) => {
            warn!("Agent connection from {} rejected: {}", peer, err);
            return;
        }
    };
    let Some(route) = find_route(&routes, &hello) else {
        let message = match hello.run_id.as_deref() {
            Some(run_id) => DistributedError::UnknownRun {
                run_id: run_id.to_owned(),
            },
            None => DistributedError::UnknownAgent {
                agent: hello.name.clone(),
                run_id: "<any>".to_owned(),
            },
        };
        warn!("Agent {} from {} rejected: {}", hello.name, peer, message);
        let reply = WireMessage::HelloReply(HelloReply {
            accepted: false,
            run_id: hello.run_id.clone(),
            message: Some(message.to_string()),
        });
        if send_message(&mut writer, &reply).await.is_err() {
            // Agent already gone.
        }
        return;
    };

    let connection = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
    debug!(
        "Agent {} connected from {} as connection {}",
        hello.name, peer, connection
    );
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();
    let events_writer = route.events.clone();
    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(err) = send_message(&mut writer, &message).await {
                if events_writer
                    .send(RunEvent::AgentDisconnected {
                        connection,
                        message: err.to_string(),
                    })
                    .is_err()
                {
                    // Run task is gone; nothing left to notify.
                }
                break;
            }
        }
    });

    let offered = RunEvent::AgentConnected(Box::new(AgentConnection {
        connection,
        hello,
        sender: out_tx,
    }));
    if route.events.send(offered).is_err() {
        return;
    }

    loop {
        let message = match read_message(&mut reader).await {
            Ok(message) => message,
            Err(err) => {
                if route
                    .events
                    .send(RunEvent::AgentDisconnected {
                        connection,
                        message: err.to_string(),
                    })
                    .is_err()
                {
                    // Run task is gone; nothing left to notify.
                }
                break;
            }
        };
        if route
            .events
            .send(RunEvent::AgentMessage {
                connection,
                message,
            })
            .is_err()
        {
            break;
        }
    }
}
