mod support_distributed;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use loadfleet::benchmark::{AgentSpec, Benchmark};
use loadfleet::distributed::{
    AgentOptions, ControllerSettings, IdleDriver, ManualDeployer, run_agent, start_controller,
};
use loadfleet::phase::compiler::{ModelTemplate, PhaseTemplate};
use loadfleet::phase::{PhaseStatus, Scenario};

use support_distributed::{
    pick_port, read_child_output, spawn_loadfleet, spawn_loadfleet_with_output, wait_for_exit,
};

const PROCESS_TIMEOUT: Duration = Duration::from_secs(30);

fn write_config(dir: &Path, listen: &str) -> Result<(), String> {
    let config = format!(
        r#"
[controller]
listen = "{listen}"
root_dir = "runs"
deployer = "manual"
deploy_timeout = "20s"

[benchmark]
name = "e2e"
agents = ["east", "west"]
statistics_period = "100ms"

[[benchmark.phases]]
name = "warmup"
model = {{ type = "at_once", users = 3 }}
scenario = ["main"]

[[benchmark.phases]]
name = "steady"
model = {{ type = "constant_rate", users_per_sec = 10.0 }}
duration = "300ms"
start_after_strict = ["warmup"]
forks = [
  {{ name = "buy", weight = 1.0, scenario = ["main", "buy"] }},
  {{ name = "look", weight = 3.0, scenario = ["main"] }},
]
"#
    );
    fs::write(dir.join("loadfleet.toml"), config)
        .map_err(|err| format!("write config failed: {}", err))
}

#[test]
fn controller_and_agents_complete_a_run() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let port = pick_port()?;
    let listen = format!("127.0.0.1:{}", port);
    write_config(dir.path(), &listen)?;

    let mut controller = spawn_loadfleet_with_output(dir.path(), ["controller"])?;
    std::thread::sleep(Duration::from_millis(300));
    let mut agents = Vec::new();
    for name in ["east", "west"] {
        agents.push(spawn_loadfleet(
            dir.path(),
            ["agent", "--join", listen.as_str(), "--name", name],
        )?);
    }

    let status = wait_for_exit(&mut controller, PROCESS_TIMEOUT)?;
    let (stdout, stderr) = read_child_output(&mut controller)?;
    for agent in &mut agents {
        let agent_status = wait_for_exit(agent, PROCESS_TIMEOUT)?;
        if !agent_status.success() {
            return Err("Agent failed.".to_owned());
        }
    }
    if !status.success() {
        return Err(format!(
            "Controller failed. stdout: {} stderr: {}",
            stdout, stderr
        ));
    }
    if !stdout.contains("0000  OK") {
        return Err(format!("Missing run summary: {}", stdout));
    }
    for phase in ["warmup", "steady/buy", "steady/look"] {
        let reported = stdout
            .lines()
            .any(|line| line.trim_start().starts_with(phase) && line.contains("TERMINATED"));
        if !reported {
            return Err(format!("Phase {} missing from report: {}", phase, stdout));
        }
    }
    if !dir.path().join("runs").join("0000").join("all.json").is_file() {
        return Err("Statistics were not persisted.".to_owned());
    }

    let mut runs = spawn_loadfleet_with_output(dir.path(), ["runs"])?;
    let runs_status = wait_for_exit(&mut runs, PROCESS_TIMEOUT)?;
    let (runs_stdout, _) = read_child_output(&mut runs)?;
    if !runs_status.success() || !runs_stdout.contains("0000  OK") {
        return Err(format!("Unexpected runs output: {}", runs_stdout));
    }
    Ok(())
}

#[test]
fn compile_prints_the_phase_graph() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    write_config(dir.path(), "127.0.0.1:0")?;

    let mut compile = spawn_loadfleet_with_output(dir.path(), ["compile"])?;
    let status = wait_for_exit(&mut compile, PROCESS_TIMEOUT)?;
    let (stdout, stderr) = read_child_output(&mut compile)?;
    if !status.success() {
        return Err(format!("compile failed: {}", stderr));
    }
    let look = stdout
        .lines()
        .find(|line| line.contains("steady/look"))
        .ok_or_else(|| format!("Missing steady/look: {}", stdout))?;
    if !look.contains("after-strict=[warmup]") {
        return Err(format!("Unexpected dependencies: {}", look));
    }
    Ok(())
}

#[test]
fn controller_without_benchmark_fails() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let mut controller = spawn_loadfleet_with_output(dir.path(), ["controller"])?;
    let status = wait_for_exit(&mut controller, PROCESS_TIMEOUT)?;
    if status.success() {
        return Err("Controller should fail without a benchmark.".to_owned());
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn library_controller_serves_tcp_agents() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let settings = ControllerSettings {
        listen: Some("127.0.0.1:0".to_owned()),
        root_dir: dir.path().to_path_buf(),
        ..ControllerSettings::default()
    };
    let controller = start_controller(settings, Arc::new(ManualDeployer))
        .await
        .map_err(|err| err.to_string())?;
    let address = controller
        .agent_address()
        .ok_or("Controller should listen for agents")?;

    let benchmark = Benchmark::builder("library")
        .agent(AgentSpec::new("solo"))
        .statistics_period(50)
        .phase(
            PhaseTemplate::new("burst", ModelTemplate::at_once(5))
                .scenario(Scenario::new(vec!["main".to_owned()]))
                .map_err(|err| err.to_string())?,
        )
        .build()
        .map_err(|err| err.to_string())?;
    let run_id = controller
        .start_benchmark(benchmark, None)
        .await
        .map_err(|err| err.to_string())?;

    let mut options = AgentOptions::new("solo", address.to_string());
    options.run_id = Some(run_id.clone());
    let agent = tokio::spawn(async move { run_agent(&options, &mut IdleDriver::new()).await });

    let view = tokio::time::timeout(PROCESS_TIMEOUT, controller.wait_for_completion(&run_id))
        .await
        .map_err(|_elapsed| "Run did not complete".to_owned())?
        .map_err(|err| err.to_string())?;
    agent
        .await
        .map_err(|err| err.to_string())?
        .map_err(|err| err.to_string())?;

    if view.phase("burst").map(|phase| phase.status) != Some(PhaseStatus::Terminated) {
        return Err(format!("Unexpected phases {:?}", view.phases));
    }
    let statistics = controller
        .statistics(&run_id, None)
        .await
        .map_err(|err| err.to_string())?;
    if statistics.first().map(|summary| summary.requests) != Some(5) {
        return Err(format!("Unexpected statistics {:?}", statistics));
    }
    controller.shutdown().await.map_err(|err| err.to_string())
}
