use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, PersistenceError};
use crate::stats::StatisticsSnapshot;

use super::run::{Run, RunError};

const INFO_FILE: &str = "info.json";
const STATISTICS_FILE: &str = "all.json";

/// Metadata record written once per run; enough to list runs without
/// loading their statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub benchmark: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_time: Option<u64>,
    #[serde(default)]
    pub terminate_time: Option<u64>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub errors: Vec<RunError>,
}

impl RunSummary {
    pub(super) fn of(run: &Run) -> Self {
        Self {
            id: run.id.clone(),
            benchmark: run.benchmark.name.clone(),
            description: run.description.clone(),
            start_time: run.start_time,
            terminate_time: run.terminate_time(),
            cancelled: run.cancelled,
            errors: run.errors.clone(),
        }
    }

    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.terminate_time.is_some()
    }
}

pub(super) fn run_dir(root: &Path, run_id: &str) -> PathBuf {
    root.join(run_id)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let encoded = serde_json::to_vec_pretty(value).map_err(|err| PersistenceError::Encode {
        path: path.to_path_buf(),
        source: err,
    })?;
    fs::write(path, encoded).map_err(|err| PersistenceError::Write {
        path: path.to_path_buf(),
        source: err,
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, PersistenceError> {
    let content = fs::read(path).map_err(|err| PersistenceError::Read {
        path: path.to_path_buf(),
        source: err,
    })?;
    serde_json::from_slice(&content).map_err(|err| PersistenceError::Decode {
        path: path.to_path_buf(),
        source: err,
    })
}

/// Writes the run record and its statistics snapshot under `root/<id>/`.
///
/// # Errors
///
/// Returns an error when the directory or either file cannot be written.
pub(super) fn write_run(
    root: &Path,
    summary: &RunSummary,
    snapshot: &StatisticsSnapshot,
) -> AppResult<PathBuf> {
    let dir = run_dir(root, &summary.id);
    fs::create_dir_all(&dir).map_err(|err| {
        AppError::persistence(PersistenceError::CreateDir {
            path: dir.clone(),
            source: err,
        })
    })?;
    write_json(&dir.join(INFO_FILE), summary)?;
    write_json(&dir.join(STATISTICS_FILE), snapshot)?;
    debug!("Persisted run {} to {}", summary.id, dir.display());
    Ok(dir)
}

/// Reads the statistics snapshot of a persisted run.
///
/// # Errors
///
/// Returns an error when the snapshot is missing or malformed.
pub(super) fn read_statistics(root: &Path, run_id: &str) -> AppResult<StatisticsSnapshot> {
    Ok(read_json(&run_dir(root, run_id).join(STATISTICS_FILE))?)
}

/// Loads the summaries of every run persisted under `root`, sorted by id.
/// Directories without a readable record are skipped.
///
/// # Errors
///
/// Returns an error when `root` exists but cannot be listed.
pub fn load_runs(root: &Path) -> AppResult<Vec<RunSummary>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(root).map_err(|err| {
        AppError::persistence(PersistenceError::ListDir {
            path: root.to_path_buf(),
            source: err,
        })
    })?;
    let mut runs = Vec::new();
    for entry in entries.flatten() {
        let info = entry.path().join(INFO_FILE);
        if !info.is_file() {
            continue;
        }
        match read_json::<RunSummary>(&info) {
            Ok(summary) => runs.push(summary),
            Err(err) => warn!("Skipping run record: {}", err),
        }
    }
    runs.sort_by(|left, right| left.id.cmp(&right.id));
    Ok(runs)
}
