use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::benchmark::Benchmark;
use crate::distributed::protocol::{
    AgentCommand, AgentControlMessage, AgentReplyMessage, HelloReply, PhaseCommand,
    PhaseControlMessage, WireMessage,
};
use crate::distributed::utils::{current_time_ms, duration_to_ms};
use crate::error::{AppError, AppResult, DistributedError};
use crate::phase::PhaseStatus;
use crate::stats::StatisticsSnapshot;

use super::agent::AgentStatus;
use super::deploy::{AgentEndpoint, DeployedAgent, Deployer, FailureCallback};
use super::events::{AgentConnection, ListKind, RunCommand, RunEvent};
use super::persist::{RunSummary, write_run};
use super::registry::RegistryEvent;
use super::run::{PhaseReport, Run};
use super::schedule::{self, MAX_WAKE_MS, PhaseAction};
use super::view::RunView;

/// How long an agent has to answer a control request.
const REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Final state of a run handed back to the registry.
pub(super) struct RunReport {
    pub(super) view: RunView,
    pub(super) snapshot: StatisticsSnapshot,
}

pub(super) struct RunSettings {
    pub(super) root_dir: PathBuf,
    pub(super) deploy_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Deploying { deadline: u64 },
    Initializing,
    Running,
    Stopping,
    Done,
}

#[derive(Debug, Clone, Copy)]
enum RequestKind {
    Initialize,
    Reset,
    List { listing: u64 },
}

struct PendingRequest {
    agent: String,
    kind: RequestKind,
    deadline: u64,
}

struct Listing {
    remaining: usize,
    lines: mpsc::UnboundedSender<String>,
    respond_to: oneshot::Sender<AppResult<()>>,
    failures: Vec<String>,
}

/// The single task that owns and mutates one run.
pub(super) struct RunDriver {
    run: Run,
    stage: Stage,
    events: mpsc::UnboundedReceiver<RunEvent>,
    events_tx: mpsc::UnboundedSender<RunEvent>,
    registry: mpsc::UnboundedSender<RegistryEvent>,
    deployer: Arc<dyn Deployer>,
    endpoint: AgentEndpoint,
    settings: RunSettings,
    deployed: HashMap<String, Box<dyn DeployedAgent>>,
    pending: HashMap<u64, PendingRequest>,
    listings: HashMap<u64, Listing>,
    next_request: u64,
}

fn sleep_deadline(wake_ms: u64) -> Instant {
    let now = Instant::now();
    now.checked_add(Duration::from_millis(wake_ms))
        .unwrap_or(now)
}

impl RunDriver {
    #[expect(
        clippy::too_many_arguments,
        reason = "Run task wiring assembled by the registry"
    )]
    pub(super) fn new(
        run: Run,
        events: mpsc::UnboundedReceiver<RunEvent>,
        events_tx: mpsc::UnboundedSender<RunEvent>,
        registry: mpsc::UnboundedSender<RegistryEvent>,
        deployer: Arc<dyn Deployer>,
        endpoint: AgentEndpoint,
        settings: RunSettings,
        now: u64,
    ) -> Self {
        let deadline = now.saturating_add(duration_to_ms(settings.deploy_timeout));
        Self {
            run,
            stage: Stage::Deploying { deadline },
            events,
            events_tx,
            registry,
            deployer,
            endpoint,
            settings,
            deployed: HashMap::new(),
            pending: HashMap::new(),
            listings: HashMap::new(),
            next_request: 1,
        }
    }

    /// Drives the run from deployment to persistence.
    pub(super) async fn drive(mut self) {
        info!(
            "{} Deploying {} agent(s) for benchmark {}",
            self.run.id,
            self.run.agents.len(),
            self.run.benchmark.name
        );
        self.deploy_agents();
        let sleep = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(sleep);
        loop {
            let wake_ms = self.step(current_time_ms());
            if self.stage == Stage::Done {
                break;
            }
            sleep.as_mut().reset(sleep_deadline(wake_ms));
            let event = tokio::select! {
                event = self.events.recv() => event,
                () = &mut sleep => continue,
            };
            match event {
                Some(event) => self.handle_event(event, current_time_ms()),
                None => {
                    warn!("{} Event channel closed", self.run.id);
                    break;
                }
            }
        }
        self.finalize().await;
    }

    fn deploy_agents(&self) {
        for spec in &self.run.benchmark.agents {
            let spec = spec.clone();
            let deployer = Arc::clone(&self.deployer);
            let endpoint = self.endpoint.clone();
            let events = self.events_tx.clone();
            let run_id = self.run.id.clone();
            tokio::spawn(async move {
                let failure_events = events.clone();
                let failed_agent = spec.name.clone();
                let on_failure: FailureCallback = Box::new(move |message| {
                    if failure_events
                        .send(RunEvent::AgentFailed {
                            agent: failed_agent,
                            message,
                        })
                        .is_err()
                    {
                        // Run already finished.
                    }
                });
                let event = match deployer.start(&spec, &run_id, &endpoint, on_failure).await {
                    Ok(handle) => RunEvent::Deployed {
                        agent: spec.name,
                        handle,
                    },
                    Err(err) => RunEvent::DeployFailed {
                        agent: spec.name,
                        message: err.to_string(),
                    },
                };
                if events.send(event).is_err() {
                    // Run already finished.
                }
            });
        }
    }

    /// One pass of the control loop. Returns how long to sleep before the
    /// next pass unless an event arrives first.
    fn step(&mut self, now: u64) -> u64 {
        self.expire_requests(now);
        let mut wake_ms = MAX_WAKE_MS;
        match self.stage {
            Stage::Deploying { deadline } => {
                if now >= deadline {
                    self.deploy_timed_out(now);
                } else {
                    wake_ms = wake_ms.min(deadline.saturating_sub(now));
                }
            }
            Stage::Running => {
                let tick = schedule::tick(&mut self.run, now);
                for action in &tick.actions {
                    self.broadcast(action);
                }
                wake_ms = tick.wake_ms;
                if tick.completed {
                    self.begin_stop(now);
                }
            }
            Stage::Initializing | Stage::Stopping | Stage::Done => {}
        }
        if self.stage == Stage::Stopping && self.run.agents_done() {
            info!("{} All agents stopped", self.run.id);
            self.stage = Stage::Done;
        }
        if let Some(deadline) = self.pending.values().map(|request| request.deadline).min() {
            wake_ms = wake_ms.min(deadline.saturating_sub(now));
        }
        wake_ms
    }

    fn handle_event(&mut self, event: RunEvent, now: u64) {
        match event {
            RunEvent::AgentConnected(offer) => self.agent_connected(*offer, now),
            RunEvent::AgentMessage {
                connection,
                message,
            } => self.agent_message(connection, message, now),
            RunEvent::AgentDisconnected {
                connection,
                message,
            } => self.agent_disconnected(connection, &message, now),
            RunEvent::Deployed { agent, handle } => {
                debug!("{} Agent {} deployed", self.run.id, agent);
                self.deployed.insert(agent, handle);
            }
            RunEvent::DeployFailed { agent, message } => {
                let error = DistributedError::Deploy {
                    agent: agent.clone(),
                    message,
                };
                self.fail_agent(&agent, error.to_string(), now);
            }
            RunEvent::AgentFailed { agent, message } => {
                let already_done = self
                    .run
                    .agent(&agent)
                    .is_none_or(|info| info.status.is_done());
                if !already_done {
                    let error = DistributedError::AgentLeft { message };
                    self.fail_agent(&agent, error.to_string(), now);
                }
            }
            RunEvent::Command(command) => self.handle_command(command, now),
        }
    }

    fn handle_command(&mut self, command: RunCommand, now: u64) {
        match command {
            RunCommand::Kill { respond_to } => {
                self.run.on_terminate(respond_to);
                self.kill(now);
            }
            RunCommand::List {
                kind,
                include_inactive,
                lines,
                respond_to,
            } => self.list(kind, include_inactive, lines, respond_to, now),
            RunCommand::View { respond_to } => {
                if respond_to.send(RunView::capture(&self.run)).is_err() {
                    // Requester dropped the response channel.
                }
            }
            RunCommand::Statistics {
                since_ms,
                respond_to,
            } => {
                let summary = match since_ms {
                    Some(since) => self.run.store.recent_summary(since),
                    None => self.run.store.total_summary(),
                };
                if respond_to.send(summary).is_err() {
                    // Requester dropped the response channel.
                }
            }
        }
    }

    fn agent_connected(&mut self, offer: AgentConnection, now: u64) {
        let AgentConnection {
            connection,
            hello,
            sender,
        } = offer;
        let run_id = self.run.id.clone();
        let rejection = match self.run.agent_mut(&hello.name) {
            None => Some(
                DistributedError::UnknownAgent {
                    agent: hello.name.clone(),
                    run_id: run_id.clone(),
                }
                .to_string(),
            ),
            Some(agent) if agent.status != AgentStatus::Starting => Some(format!(
                "Agent {} is in status {}",
                agent.name, agent.status
            )),
            Some(agent) => {
                agent.attach(connection, hello.address.clone(), sender.clone());
                agent.status = AgentStatus::Registered;
                None
            }
        };
        let reply = HelloReply {
            accepted: rejection.is_none(),
            run_id: Some(run_id.clone()),
            message: rejection.clone(),
        };
        if sender.send(WireMessage::HelloReply(reply)).is_err() {
            debug!("{} Agent {} left before registration", run_id, hello.name);
        }
        match rejection {
            Some(message) => warn!("{} Rejected agent {}: {}", run_id, hello.name, message),
            None => {
                info!(
                    "{} Agent {} registered from {}",
                    run_id, hello.name, hello.address
                );
                if matches!(self.stage, Stage::Deploying { .. })
                    && self.run.all_agents(AgentStatus::Registered)
                {
                    self.initialize_agents(now);
                }
            }
        }
    }

    fn initialize_agents(&mut self, now: u64) {
        info!("{} All agents registered, initializing", self.run.id);
        self.stage = Stage::Initializing;
        let names: Vec<String> = self
            .run
            .agents
            .iter()
            .map(|agent| agent.name.clone())
            .collect();
        let benchmark = Benchmark::clone(&self.run.benchmark);
        for name in names {
            if let Some(agent) = self.run.agent_mut(&name) {
                agent.status = AgentStatus::Initializing;
            }
            let sent = self.request(
                &name,
                AgentCommand::Initialize,
                Some(benchmark.clone()),
                false,
                RequestKind::Initialize,
                now,
            );
            if !sent {
                self.fail_agent(&name, format!("Agent {} is not connected", name), now);
                return;
            }
        }
    }

    fn request(
        &mut self,
        agent: &str,
        command: AgentCommand,
        benchmark: Option<Benchmark>,
        include_inactive: bool,
        kind: RequestKind,
        now: u64,
    ) -> bool {
        let request_id = self.next_request;
        self.next_request = self.next_request.saturating_add(1);
        let run_id = self.run.id.clone();
        let Some(info) = self.run.agent(agent) else {
            return false;
        };
        let message = WireMessage::AgentControl(Box::new(AgentControlMessage {
            request_id,
            command,
            run_id,
            agent_id: info.id,
            benchmark,
            include_inactive,
        }));
        if !info.send(message) {
            return false;
        }
        self.pending.insert(
            request_id,
            PendingRequest {
                agent: agent.to_owned(),
                kind,
                deadline: now.saturating_add(REQUEST_TIMEOUT_MS),
            },
        );
        true
    }

    fn broadcast(&self, action: &PhaseAction) {
        for agent in &self.run.agents {
            if agent.status.is_done() {
                continue;
            }
            let message = WireMessage::PhaseControl(PhaseControlMessage {
                command: action.command,
                run_id: self.run.id.clone(),
                phase: action.phase.clone(),
            });
            if !agent.send(message) {
                warn!(
                    "{} Failed to send {} {} to agent {}",
                    self.run.id,
                    action.command.as_str(),
                    action.phase,
                    agent.name
                );
            }
        }
    }

    fn agent_message(&mut self, connection: u64, message: WireMessage, now: u64) {
        let Some(agent) = self
            .run
            .agent_by_connection(connection)
            .map(|agent| agent.name.clone())
        else {
            debug!(
                "{} Dropping {} from a stale connection",
                self.run.id,
                message.kind()
            );
            return;
        };
        match message {
            WireMessage::AgentReply(reply) => self.agent_reply(&agent, reply, now),
            WireMessage::PhaseChange(change) => {
                if change.run_id != self.run.id {
                    warn!(
                        "{} Agent {} reported {} for run {}",
                        self.run.id, agent, change.phase, change.run_id
                    );
                    return;
                }
                debug!(
                    "{} Agent {} reports {} {}",
                    self.run.id, agent, change.phase, change.status
                );
                let report = PhaseReport {
                    agent: &agent,
                    phase: &change.phase,
                    status: change.status,
                    successful: change.successful,
                    session_limit_exceeded: change.session_limit_exceeded,
                    error: change.error,
                };
                self.run.apply_phase_report(&report, now);
            }
            WireMessage::Stats(stats) => {
                for sample in &stats.samples {
                    self.run.store.record(&agent, sample);
                }
            }
            WireMessage::CustomData(custom) => {
                self.run.add_custom(&custom.phase, &custom.key, custom.value);
            }
            WireMessage::Error(error) => {
                warn!("{} Agent {} error: {}", self.run.id, agent, error.message);
            }
            WireMessage::Hello(_)
            | WireMessage::HelloReply(_)
            | WireMessage::AgentControl(_)
            | WireMessage::PhaseControl(_) => {
                warn!(
                    "{} Unexpected {} from agent {}",
                    self.run.id,
                    message.kind(),
                    agent
                );
            }
        }
    }

    fn agent_reply(&mut self, agent: &str, reply: AgentReplyMessage, now: u64) {
        let Some(request) = self.pending.remove(&reply.request_id) else {
            debug!(
                "{} Late reply {} from agent {}",
                self.run.id, reply.request_id, agent
            );
            return;
        };
        let error = reply.error.unwrap_or_else(|| "unknown error".to_owned());
        match request.kind {
            RequestKind::Initialize => {
                if reply.success {
                    if let Some(info) = self.run.agent_mut(agent) {
                        info.status = AgentStatus::Initialized;
                    }
                    if self.stage == Stage::Initializing
                        && self.run.all_agents(AgentStatus::Initialized)
                    {
                        self.run.start_time = Some(now);
                        self.stage = Stage::Running;
                        info!("{} Run started", self.run.id);
                    }
                } else {
                    let failure = DistributedError::AgentFailure {
                        agent: agent.to_owned(),
                        action: "initialize",
                        message: error,
                    };
                    self.fail_agent(agent, failure.to_string(), now);
                }
            }
            RequestKind::Reset => {
                if !reply.success {
                    let failure = DistributedError::AgentFailure {
                        agent: agent.to_owned(),
                        action: "stop",
                        message: error,
                    };
                    self.run.record_error(Some(agent), failure.to_string());
                }
                self.agent_stopped(agent);
            }
            RequestKind::List { listing } => {
                let failure = (!reply.success).then(|| format!("{}: {}", agent, error));
                self.listing_reply(listing, reply.lines, failure);
            }
        }
    }

    fn agent_stopped(&mut self, agent: &str) {
        if let Some(info) = self.run.agent_mut(agent) {
            if info.status != AgentStatus::Failed {
                info.status = AgentStatus::Stopped;
            }
            info.detach();
        }
        if let Some(mut handle) = self.deployed.remove(agent) {
            handle.stop();
        }
        debug!("{} Agent {} stopped", self.run.id, agent);
    }

    fn expire_requests(&mut self, now: u64) {
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, request)| request.deadline <= now)
            .map(|(request_id, _)| *request_id)
            .collect();
        for request_id in expired {
            let Some(request) = self.pending.remove(&request_id) else {
                continue;
            };
            warn!(
                "{} Request {} to agent {} timed out",
                self.run.id, request_id, request.agent
            );
            self.request_failed(request, "timed out", now);
        }
    }

    fn request_failed(&mut self, request: PendingRequest, reason: &str, now: u64) {
        match request.kind {
            RequestKind::Initialize => {
                let failure = DistributedError::AgentFailure {
                    agent: request.agent.clone(),
                    action: "initialize",
                    message: reason.to_owned(),
                };
                self.fail_agent(&request.agent, failure.to_string(), now);
            }
            RequestKind::Reset => {
                let failure = DistributedError::AgentFailure {
                    agent: request.agent.clone(),
                    action: "stop",
                    message: reason.to_owned(),
                };
                self.run.record_error(Some(&request.agent), failure.to_string());
                if let Some(info) = self.run.agent_mut(&request.agent) {
                    info.status = AgentStatus::Failed;
                }
                self.agent_stopped(&request.agent);
            }
            RequestKind::List { listing } => {
                let failure = format!("{}: {}", request.agent, reason);
                self.listing_reply(listing, Vec::new(), Some(failure));
            }
        }
    }

    fn agent_disconnected(&mut self, connection: u64, message: &str, now: u64) {
        let Some(agent) = self.run.agent_by_connection(connection) else {
            return;
        };
        let name = agent.name.clone();
        let status = agent.status;
        agent.detach();
        let pending: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, request)| request.agent == name)
            .map(|(request_id, _)| *request_id)
            .collect();
        for request_id in pending {
            if let Some(request) = self.pending.remove(&request_id) {
                match request.kind {
                    RequestKind::Reset => self.agent_stopped(&name),
                    RequestKind::Initialize | RequestKind::List { .. } => {
                        self.request_failed(request, "agent disconnected", now);
                    }
                }
            }
        }
        match status {
            AgentStatus::Stopping | AgentStatus::Stopped | AgentStatus::Failed => {
                debug!("{} Agent {} disconnected: {}", self.run.id, name, message);
                self.agent_stopped(&name);
            }
            AgentStatus::Starting
            | AgentStatus::Registered
            | AgentStatus::Initializing
            | AgentStatus::Initialized => {
                let error = DistributedError::AgentLeft {
                    message: message.to_owned(),
                };
                self.fail_agent(&name, error.to_string(), now);
            }
        }
    }

    /// Marks the agent failed and takes the run down through the stop path.
    fn fail_agent(&mut self, agent: &str, message: String, now: u64) {
        if let Some(info) = self.run.agent_mut(agent) {
            info.status = AgentStatus::Failed;
        }
        self.run.record_error(Some(agent), message);
        self.kill(now);
        self.begin_stop(now);
    }

    fn deploy_timed_out(&mut self, now: u64) {
        let missing: Vec<String> = self
            .run
            .agents
            .iter()
            .filter(|agent| agent.status == AgentStatus::Starting)
            .map(|agent| agent.name.clone())
            .collect();
        for agent in &missing {
            self.run
                .record_error(Some(agent), DistributedError::DeployTimeout.to_string());
            if let Some(info) = self.run.agent_mut(agent) {
                info.status = AgentStatus::Failed;
            }
        }
        self.kill(now);
        self.begin_stop(now);
    }

    /// Cancels phases that have not started and forces the others to
    /// terminate.
    fn kill(&mut self, now: u64) {
        if matches!(self.stage, Stage::Stopping | Stage::Done) {
            return;
        }
        if !self.run.cancelled {
            info!("{} Killing run", self.run.id);
        }
        self.run.cancelled = true;
        self.run.cancel_not_started(now);
        if self.stage != Stage::Running {
            self.begin_stop(now);
            return;
        }
        let terminating: Vec<usize> = self
            .run
            .phases()
            .iter()
            .enumerate()
            .filter(|(_, phase)| phase.status() < PhaseStatus::Terminating)
            .map(|(position, _)| position)
            .collect();
        for position in terminating {
            let Some(name) = self
                .run
                .phases()
                .get(position)
                .map(|phase| phase.name().to_owned())
            else {
                continue;
            };
            self.run
                .set_phase_status(position, PhaseStatus::Terminating, now);
            self.broadcast(&PhaseAction {
                command: PhaseCommand::Terminate,
                phase: name,
            });
        }
    }

    /// Enters the single stop path: fixes the terminate time and asks every
    /// connected agent to reset.
    fn begin_stop(&mut self, now: u64) {
        if matches!(self.stage, Stage::Stopping | Stage::Done) {
            return;
        }
        self.stage = Stage::Stopping;
        let terminate_time = self.run.set_terminate_time(now);
        info!("{} Stopping run at {}", self.run.id, terminate_time);
        let names: Vec<String> = self
            .run
            .agents
            .iter()
            .filter(|agent| !agent.status.is_done())
            .map(|agent| agent.name.clone())
            .collect();
        for name in names {
            let sent = self.request(&name, AgentCommand::Reset, None, false, RequestKind::Reset, now);
            if sent {
                if let Some(info) = self.run.agent_mut(&name) {
                    info.status = AgentStatus::Stopping;
                }
            } else {
                self.agent_stopped(&name);
            }
        }
    }

    fn list(
        &mut self,
        kind: ListKind,
        include_inactive: bool,
        lines: mpsc::UnboundedSender<String>,
        respond_to: oneshot::Sender<AppResult<()>>,
        now: u64,
    ) {
        let listing = self.next_request;
        self.next_request = self.next_request.saturating_add(1);
        let command = match kind {
            ListKind::Sessions => AgentCommand::ListSessions,
            ListKind::Connections => AgentCommand::ListConnections,
        };
        let names: Vec<String> = self
            .run
            .agents
            .iter()
            .filter(|agent| agent.connection.is_some() && !agent.status.is_done())
            .map(|agent| agent.name.clone())
            .collect();
        let mut remaining = 0_usize;
        for name in names {
            if self.request(
                &name,
                command,
                None,
                include_inactive,
                RequestKind::List { listing },
                now,
            ) {
                remaining = remaining.saturating_add(1);
            }
        }
        if remaining == 0 {
            if respond_to.send(Ok(())).is_err() {
                // Requester dropped the response channel.
            }
            return;
        }
        self.listings.insert(
            listing,
            Listing {
                remaining,
                lines,
                respond_to,
                failures: Vec::new(),
            },
        );
    }

    fn listing_reply(&mut self, listing: u64, lines: Vec<String>, failure: Option<String>) {
        let Some(state) = self.listings.get_mut(&listing) else {
            return;
        };
        for line in lines {
            if state.lines.send(line).is_err() {
                break;
            }
        }
        state.failures.extend(failure);
        state.remaining = state.remaining.saturating_sub(1);
        if state.remaining > 0 {
            return;
        }
        let Some(done) = self.listings.remove(&listing) else {
            return;
        };
        let result = if done.failures.is_empty() {
            Ok(())
        } else {
            Err(AppError::distributed(DistributedError::Remote {
                message: done.failures.join("; "),
            }))
        };
        if done.respond_to.send(result).is_err() {
            // Requester dropped the response channel.
        }
    }

    async fn finalize(mut self) {
        let now = current_time_ms();
        self.run.set_terminate_time(now);
        self.run.complete_custom();
        for (_, mut handle) in self.deployed.drain() {
            handle.stop();
        }
        for (_, listing) in self.listings.drain() {
            let closed = Err(AppError::distributed(DistributedError::RunAlreadyCompleted {
                run_id: self.run.id.clone(),
            }));
            if listing.respond_to.send(closed).is_err() {
                // Requester dropped the response channel.
            }
        }

        let view = RunView::capture(&self.run);
        let summary: RunSummary = view.summary.clone();
        let snapshot = self.run.store.snapshot();
        let root = self.settings.root_dir.clone();
        let persisted = tokio::task::spawn_blocking(move || {
            let result = write_run(&root, &summary, &snapshot);
            (result, snapshot)
        })
        .await;
        let snapshot = match persisted {
            Ok((Ok(dir), snapshot)) => {
                info!("{} Run persisted to {}", self.run.id, dir.display());
                snapshot
            }
            Ok((Err(err), snapshot)) => {
                error!("{} Failed to persist run: {}", self.run.id, err);
                snapshot
            }
            Err(err) => {
                error!("{} Persistence task failed: {}", self.run.id, err);
                self.run.store.snapshot()
            }
        };
        info!(
            "{} Run finished ({} error(s), cancelled={})",
            self.run.id,
            view.summary.errors.len(),
            view.summary.cancelled
        );
        let report = RunReport { view, snapshot };
        if self
            .registry
            .send(RegistryEvent::RunFinished(Box::new(report)))
            .is_err()
        {
            // Controller is shutting down.
        }
    }
}
