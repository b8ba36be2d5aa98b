use std::sync::Arc;

use tracing::{info, warn};

use crate::benchmark::Benchmark;
use crate::config::types::DeployerKind;
use crate::distributed::{
    Deployer, IdleDriver, LocalDeployer, ManualDeployer, load_runs, run_agent, start_controller,
};
use crate::error::{AppError, AppResult, ValidationError};
use crate::system::summary_output::{run_lines, summary_line};

use super::types::{ControllerPlan, RunPlan};

pub(crate) async fn execute_plan(plan: RunPlan) -> AppResult<()> {
    match plan {
        RunPlan::Controller(plan) => run_controller(*plan).await,
        RunPlan::Agent(options) => run_agent(&options, &mut IdleDriver::new()).await,
        RunPlan::Compile { benchmark, json } => print_compiled(&benchmark, json),
        RunPlan::Runs { root_dir } => {
            let runs = tokio::task::spawn_blocking(move || load_runs(&root_dir)).await??;
            for summary in &runs {
                println!("{}", summary_line(summary));
            }
            Ok(())
        }
    }
}

async fn run_controller(plan: ControllerPlan) -> AppResult<()> {
    let ControllerPlan {
        settings,
        deployer,
        benchmark,
        description,
    } = plan;
    let deployer: Arc<dyn Deployer> = match deployer {
        DeployerKind::Local => Arc::new(LocalDeployer),
        DeployerKind::Manual => Arc::new(ManualDeployer),
    };
    let controller = start_controller(settings, deployer).await?;
    if let Some(address) = controller.agent_address() {
        info!("Agents join at {}", address);
    }

    let run_id = controller.start_benchmark(benchmark, description).await?;
    let view = tokio::select! {
        view = controller.wait_for_completion(&run_id) => view?,
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!("Failed to listen for Ctrl+C: {}", err);
            }
            info!("{} Interrupted, killing run", run_id);
            controller.kill(&run_id).await?;
            controller.wait_for_completion(&run_id).await?
        }
    };
    let statistics = controller.statistics(&run_id, None).await?;
    controller.shutdown().await?;

    for line in run_lines(&view, &statistics) {
        println!("{}", line);
    }
    if view.summary.errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::validation(ValidationError::RunErrors {
            count: view.summary.errors.len(),
        }))
    }
}

fn print_compiled(benchmark: &Benchmark, json: bool) -> AppResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&benchmark.phases)?);
        return Ok(());
    }
    for phase in &benchmark.phases {
        let mut line = format!(
            "{:>4}  {:<32} {}",
            phase.id,
            phase.name,
            phase.model.description()
        );
        for (label, names) in [
            ("after", &phase.start_after),
            ("after-strict", &phase.start_after_strict),
            ("terminate-after", &phase.terminate_after_strict),
        ] {
            if !names.is_empty() {
                let joined: Vec<&str> = names.iter().map(String::as_str).collect();
                line.push_str(&format!("  {}=[{}]", label, joined.join(", ")));
            }
        }
        if let Some(start_with) = phase.start_with_delay.as_ref() {
            line.push_str(&format!(
                "  with={}+{}ms",
                start_with.phase, start_with.delay_ms
            ));
        }
        println!("{}", line);
    }
    Ok(())
}
