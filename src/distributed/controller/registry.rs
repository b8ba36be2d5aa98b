use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::benchmark::Benchmark;
use crate::distributed::utils::{current_time_ms, format_run_id, parse_run_id};
use crate::error::{AppError, AppResult, DistributedError};
use crate::stats::{PhaseSummary, StatisticsSnapshot};

use super::connections::{RouteTable, RunRoute, insert_route, remove_route};
use super::deploy::{AgentEndpoint, Deployer};
use super::driver::{RunDriver, RunReport, RunSettings};
use super::events::{ListKind, RunCommand, RunEvent};
use super::persist::{RunSummary, read_statistics};
use super::run::Run;
use super::view::RunView;

/// Requests served by the controller task.
pub(super) enum ControlCommand {
    Start {
        benchmark: Box<Benchmark>,
        description: Option<String>,
        respond_to: oneshot::Sender<AppResult<String>>,
    },
    Kill {
        run_id: String,
        respond_to: oneshot::Sender<AppResult<u64>>,
    },
    List {
        run_id: String,
        kind: ListKind,
        include_inactive: bool,
        lines: mpsc::UnboundedSender<String>,
        respond_to: oneshot::Sender<AppResult<()>>,
    },
    View {
        run_id: String,
        respond_to: oneshot::Sender<AppResult<RunView>>,
    },
    Statistics {
        run_id: String,
        since_ms: Option<u64>,
        respond_to: oneshot::Sender<AppResult<Vec<PhaseSummary>>>,
    },
    WaitFor {
        run_id: String,
        respond_to: oneshot::Sender<AppResult<RunView>>,
    },
    Runs {
        respond_to: oneshot::Sender<Vec<RunSummary>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

pub(super) enum RegistryEvent {
    RunFinished(Box<RunReport>),
}

pub(super) struct RegistrySettings {
    pub(super) root_dir: PathBuf,
    pub(super) deploy_timeout: Duration,
    pub(super) max_in_memory_runs: usize,
}

struct RunEntry {
    summary: RunSummary,
    agents: Vec<String>,
    live: Option<mpsc::UnboundedSender<RunEvent>>,
    view: Option<RunView>,
    snapshot: Option<StatisticsSnapshot>,
    waiters: Vec<oneshot::Sender<AppResult<RunView>>>,
}

impl RunEntry {
    const fn loaded(summary: RunSummary) -> Self {
        Self {
            summary,
            agents: Vec::new(),
            live: None,
            view: None,
            snapshot: None,
            waiters: Vec::new(),
        }
    }

    fn final_view(&self) -> RunView {
        self.view
            .clone()
            .unwrap_or_else(|| RunView::unloaded(self.summary.clone()))
    }
}

fn respond<T>(respond_to: oneshot::Sender<T>, value: T) {
    if respond_to.send(value).is_err() {
        // Requester dropped the response channel.
    }
}

fn unknown_run(run_id: &str) -> AppError {
    AppError::distributed(DistributedError::UnknownRun {
        run_id: run_id.to_owned(),
    })
}

/// Owns every run known to the controller, live or persisted.
pub(super) struct Registry {
    runs: BTreeMap<String, RunEntry>,
    completed: VecDeque<String>,
    next_run: u32,
    routes: RouteTable,
    deployer: Arc<dyn Deployer>,
    endpoint: AgentEndpoint,
    settings: RegistrySettings,
    events_tx: mpsc::UnboundedSender<RegistryEvent>,
    events_rx: mpsc::UnboundedReceiver<RegistryEvent>,
}

impl Registry {
    pub(super) fn new(
        persisted: Vec<RunSummary>,
        routes: RouteTable,
        deployer: Arc<dyn Deployer>,
        endpoint: AgentEndpoint,
        settings: RegistrySettings,
    ) -> Self {
        let next_run = persisted
            .iter()
            .filter_map(|summary| parse_run_id(&summary.id))
            .max()
            .map_or(0, |highest| highest.saturating_add(1));
        info!(
            "Loaded {} persisted run(s); next run id {}",
            persisted.len(),
            format_run_id(next_run)
        );
        let runs = persisted
            .into_iter()
            .map(|summary| (summary.id.clone(), RunEntry::loaded(summary)))
            .collect();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            runs,
            completed: VecDeque::new(),
            next_run,
            routes,
            deployer,
            endpoint,
            settings,
            events_tx,
            events_rx,
        }
    }

    pub(super) async fn serve(mut self, mut control_rx: mpsc::UnboundedReceiver<ControlCommand>) {
        loop {
            tokio::select! {
                command = control_rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if let ControlCommand::Shutdown { respond_to } = command {
                        info!("Controller shutting down");
                        respond(respond_to, ());
                        break;
                    }
                    self.handle(command);
                }
                event = self.events_rx.recv() => {
                    if let Some(RegistryEvent::RunFinished(report)) = event {
                        self.run_finished(*report);
                    }
                }
            }
        }
    }

    fn handle(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Start {
                benchmark,
                description,
                respond_to,
            } => {
                let result = self.start(*benchmark, description);
                respond(respond_to, result);
            }
            ControlCommand::Kill { run_id, respond_to } => self.kill(&run_id, respond_to),
            ControlCommand::List {
                run_id,
                kind,
                include_inactive,
                lines,
                respond_to,
            } => match self.runs.get(&run_id) {
                Some(RunEntry {
                    live: Some(events), ..
                }) => {
                    let command = RunCommand::List {
                        kind,
                        include_inactive,
                        lines,
                        respond_to,
                    };
                    if let Err(err) = events.send(RunEvent::Command(command))
                        && let RunEvent::Command(RunCommand::List { respond_to, .. }) = err.0
                    {
                        respond(respond_to, Err(completed_run(&run_id)));
                    }
                }
                Some(RunEntry { live: None, .. }) => {
                    respond(respond_to, Err(completed_run(&run_id)));
                }
                None => respond(respond_to, Err(unknown_run(&run_id))),
            },
            ControlCommand::View { run_id, respond_to } => self.view(&run_id, respond_to),
            ControlCommand::Statistics {
                run_id,
                since_ms,
                respond_to,
            } => self.statistics(&run_id, since_ms, respond_to),
            ControlCommand::WaitFor { run_id, respond_to } => match self.runs.get_mut(&run_id) {
                Some(entry) if entry.live.is_some() => entry.waiters.push(respond_to),
                Some(entry) => respond(respond_to, Ok(entry.final_view())),
                None => respond(respond_to, Err(unknown_run(&run_id))),
            },
            ControlCommand::Runs { respond_to } => {
                respond(respond_to, self.runs.values().map(|entry| entry.summary.clone()).collect());
            }
            ControlCommand::Shutdown { respond_to } => respond(respond_to, ()),
        }
    }

    fn start(&mut self, benchmark: Benchmark, description: Option<String>) -> AppResult<String> {
        if benchmark.agents.is_empty() {
            return Err(AppError::distributed(DistributedError::NoAgents {
                benchmark: benchmark.name,
            }));
        }
        for entry in self.runs.values().filter(|entry| entry.live.is_some()) {
            if let Some(agent) = benchmark
                .agent_names()
                .find(|name| entry.agents.iter().any(|used| used == name))
            {
                return Err(AppError::distributed(DistributedError::AgentInUse {
                    agent: agent.to_owned(),
                }));
            }
        }

        let run_id = format_run_id(self.next_run);
        self.next_run = self.next_run.saturating_add(1);
        self.unload_completed();

        let agents: Vec<String> = benchmark.agent_names().map(str::to_owned).collect();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        insert_route(
            &mut self.routes,
            &run_id,
            RunRoute {
                events: events_tx.clone(),
                agents: agents.clone(),
            },
        );
        let run = Run::new(run_id.clone(), Arc::new(benchmark), description);
        let summary = RunSummary::of(&run);
        info!(
            "{} Starting benchmark {} with {} phase(s)",
            run_id,
            summary.benchmark,
            run.phases().len()
        );
        let driver = RunDriver::new(
            run,
            events_rx,
            events_tx.clone(),
            self.events_tx.clone(),
            Arc::clone(&self.deployer),
            self.endpoint.clone(),
            RunSettings {
                root_dir: self.settings.root_dir.clone(),
                deploy_timeout: self.settings.deploy_timeout,
            },
            current_time_ms(),
        );
        tokio::spawn(driver.drive());
        self.runs.insert(
            run_id.clone(),
            RunEntry {
                summary,
                agents,
                live: Some(events_tx),
                view: None,
                snapshot: None,
                waiters: Vec::new(),
            },
        );
        Ok(run_id)
    }

    /// Drops the detailed state of the oldest completed runs beyond the
    /// in-memory limit; their summaries stay listed.
    fn unload_completed(&mut self) {
        while self.completed.len() > self.settings.max_in_memory_runs {
            let Some(run_id) = self.completed.pop_front() else {
                break;
            };
            if let Some(entry) = self.runs.get_mut(&run_id) {
                debug!("{} Unloading run", run_id);
                entry.view = None;
                entry.snapshot = None;
            }
        }
    }

    fn kill(&mut self, run_id: &str, respond_to: oneshot::Sender<AppResult<u64>>) {
        let Some(entry) = self.runs.get(run_id) else {
            respond(respond_to, Err(unknown_run(run_id)));
            return;
        };
        let Some(events) = entry.live.as_ref() else {
            let terminate_time = entry.summary.terminate_time.unwrap_or_default();
            respond(respond_to, Ok(terminate_time));
            return;
        };
        let (terminated_tx, terminated_rx) = oneshot::channel();
        if events
            .send(RunEvent::Command(RunCommand::Kill {
                respond_to: terminated_tx,
            }))
            .is_err()
        {
            respond(respond_to, Err(completed_run(run_id)));
            return;
        }
        let run_id = run_id.to_owned();
        tokio::spawn(async move {
            let result = terminated_rx
                .await
                .map_err(|_err| completed_run(&run_id));
            respond(respond_to, result);
        });
    }

    fn view(&self, run_id: &str, respond_to: oneshot::Sender<AppResult<RunView>>) {
        let Some(entry) = self.runs.get(run_id) else {
            respond(respond_to, Err(unknown_run(run_id)));
            return;
        };
        let Some(events) = entry.live.as_ref() else {
            respond(respond_to, Ok(entry.final_view()));
            return;
        };
        let (view_tx, view_rx) = oneshot::channel();
        if events
            .send(RunEvent::Command(RunCommand::View { respond_to: view_tx }))
            .is_err()
        {
            respond(respond_to, Ok(entry.final_view()));
            return;
        }
        let run_id = run_id.to_owned();
        tokio::spawn(async move {
            let result = view_rx.await.map_err(|_err| completed_run(&run_id));
            respond(respond_to, result);
        });
    }

    fn statistics(
        &self,
        run_id: &str,
        since_ms: Option<u64>,
        respond_to: oneshot::Sender<AppResult<Vec<PhaseSummary>>>,
    ) {
        let Some(entry) = self.runs.get(run_id) else {
            respond(respond_to, Err(unknown_run(run_id)));
            return;
        };
        if let Some(events) = entry.live.as_ref() {
            let (summary_tx, summary_rx) = oneshot::channel();
            if events
                .send(RunEvent::Command(RunCommand::Statistics {
                    since_ms,
                    respond_to: summary_tx,
                }))
                .is_ok()
            {
                let run_id = run_id.to_owned();
                tokio::spawn(async move {
                    let result = summary_rx.await.map_err(|_err| completed_run(&run_id));
                    respond(respond_to, result);
                });
                return;
            }
        }
        if let Some(snapshot) = entry.snapshot.as_ref() {
            respond(respond_to, Ok(snapshot.phases.clone()));
            return;
        }
        let root = self.settings.root_dir.clone();
        let run_id = run_id.to_owned();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || read_statistics(&root, &run_id))
                .await
                .map_err(AppError::from)
                .and_then(|read| read.map(|snapshot| snapshot.phases));
            respond(respond_to, result);
        });
    }

    fn run_finished(&mut self, report: RunReport) {
        let RunReport { view, snapshot } = report;
        let run_id = view.summary.id.clone();
        remove_route(&mut self.routes, &run_id);
        let Some(entry) = self.runs.get_mut(&run_id) else {
            warn!("{} Finished run is not registered", run_id);
            return;
        };
        entry.summary = view.summary.clone();
        entry.live = None;
        for waiter in entry.waiters.drain(..) {
            respond(waiter, Ok(view.clone()));
        }
        entry.view = Some(view);
        entry.snapshot = Some(snapshot);
        self.completed.push_back(run_id);
    }
}

fn completed_run(run_id: &str) -> AppError {
    AppError::distributed(DistributedError::RunAlreadyCompleted {
        run_id: run_id.to_owned(),
    })
}
