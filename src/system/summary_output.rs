use chrono::{DateTime, Utc};

use crate::distributed::{RunSummary, RunView};
use crate::stats::PhaseSummary;

fn format_timestamp(ms: Option<u64>) -> String {
    ms.and_then(|ms| i64::try_from(ms).ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map_or_else(
            || "-".to_owned(),
            |time| time.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        )
}

/// One line per persisted or live run, as printed by `runs`.
pub(crate) fn summary_line(summary: &RunSummary) -> String {
    let state = if !summary.is_completed() {
        "RUNNING"
    } else if summary.cancelled {
        "CANCELLED"
    } else if summary.errors.is_empty() {
        "OK"
    } else {
        "FAILED"
    };
    let mut line = format!(
        "{}  {:<9}  {}  {} -> {}",
        summary.id,
        state,
        summary.benchmark,
        format_timestamp(summary.start_time),
        format_timestamp(summary.terminate_time)
    );
    if let Some(description) = summary.description.as_deref() {
        line.push_str("  ");
        line.push_str(description);
    }
    line
}

/// Final report of a run: header, phases with their statistics, then errors.
pub(crate) fn run_lines(view: &RunView, statistics: &[PhaseSummary]) -> Vec<String> {
    let mut lines = vec![summary_line(&view.summary)];
    for phase in &view.phases {
        let mut line = format!("  {:<32} {}", phase.name, phase.status);
        if phase.failed {
            line.push_str(" (failed)");
        }
        if let Some(stats) = statistics.iter().find(|stats| stats.phase == phase.name) {
            line.push_str(&format!(
                "  requests={} errors={} timeouts={} mean={}ms max={}ms",
                stats.requests,
                stats.errors,
                stats.timeouts,
                stats.mean_response_ms(),
                stats.max_response_ms
            ));
        }
        lines.push(line);
    }
    for error in &view.summary.errors {
        match error.agent.as_deref() {
            Some(agent) => lines.push(format!("  error [{}]: {}", agent, error.message)),
            None => lines.push(format!("  error: {}", error.message)),
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{PhaseView, RunError};
    use crate::error::{AppError, AppResult};
    use crate::phase::PhaseStatus;

    fn summary() -> RunSummary {
        RunSummary {
            id: "002A".to_owned(),
            benchmark: "checkout".to_owned(),
            description: Some("nightly".to_owned()),
            start_time: Some(0),
            terminate_time: Some(1_500),
            cancelled: false,
            errors: vec![RunError {
                agent: None,
                message: "Error ratio too high".to_owned(),
            }],
        }
    }

    #[test]
    fn summary_line_reports_state_and_times() -> AppResult<()> {
        let line = summary_line(&summary());
        if !line.starts_with("002A  FAILED") {
            return Err(AppError::validation(format!("Unexpected line {}", line)));
        }
        if !line.contains("1970-01-01 00:00:01.500") || !line.ends_with("nightly") {
            return Err(AppError::validation(format!("Unexpected times {}", line)));
        }
        Ok(())
    }

    #[test]
    fn run_lines_join_phase_statistics() -> AppResult<()> {
        let view = RunView {
            summary: summary(),
            phases: vec![PhaseView {
                name: "steady".to_owned(),
                status: PhaseStatus::Terminated,
                failed: true,
                start_time: Some(0),
                completion_time: Some(1_000),
            }],
            agents: Vec::new(),
        };
        let statistics = [PhaseSummary {
            phase: "steady".to_owned(),
            requests: 10,
            responses: 4,
            errors: 6,
            total_response_ms: 40,
            max_response_ms: 25,
            ..PhaseSummary::default()
        }];
        let lines = run_lines(&view, &statistics);
        let phase_line = lines.get(1).map(String::as_str).unwrap_or_default();
        if !phase_line.contains("(failed)") || !phase_line.contains("requests=10 errors=6") {
            return Err(AppError::validation(format!("Unexpected phase line {}", phase_line)));
        }
        if !phase_line.contains("mean=10ms max=25ms") {
            return Err(AppError::validation(format!("Unexpected timings {}", phase_line)));
        }
        if lines.last().map(String::as_str) != Some("  error: Error ratio too high") {
            return Err(AppError::validation("Run errors should close the report"));
        }
        Ok(())
    }
}
