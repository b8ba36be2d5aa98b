use std::path::Path;

use tracing::debug;

use crate::error::{AppError, AppResult, ConfigError};

use super::types::ConfigFile;

/// Looked up in order in the working directory when no path is given.
const DEFAULT_CONFIG_FILES: [&str; 2] = ["loadfleet.toml", "loadfleet.json"];

/// Loads the config file at `path`, or the first default file present in
/// the working directory.
///
/// # Errors
///
/// Returns an error when the config file cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> AppResult<Option<ConfigFile>> {
    load_config_in(Path::new("."), path)
}

/// Like [`load_config`], resolving relative paths and defaults against
/// `dir`.
///
/// # Errors
///
/// Returns an error when the config file cannot be read or parsed.
pub fn load_config_in(dir: &Path, path: Option<&str>) -> AppResult<Option<ConfigFile>> {
    let candidate = match path {
        Some(path) => Some(dir.join(path)),
        None => DEFAULT_CONFIG_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.exists()),
    };
    let Some(candidate) = candidate else {
        debug!("No config file found in {}", dir.display());
        return Ok(None);
    };
    debug!("Loading config {}", candidate.display());
    load_config_file(&candidate).map(Some)
}

pub(crate) fn load_config_file(path: &Path) -> AppResult<ConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        AppError::config(ConfigError::ReadConfig {
            path: path.to_path_buf(),
            source: err,
        })
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|err| {
            AppError::config(ConfigError::ParseToml {
                path: path.to_path_buf(),
                source: err,
            })
        }),
        Some("json") => serde_json::from_str(&content).map_err(|err| {
            AppError::config(ConfigError::ParseJson {
                path: path.to_path_buf(),
                source: err,
            })
        }),
        Some(ext) => Err(AppError::config(ConfigError::UnsupportedExtension {
            ext: ext.to_owned(),
        })),
        None => Err(AppError::config(ConfigError::MissingExtension)),
    }
}
