use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::phase::Sla;
use crate::phase::compiler::{ModelTemplate, PhaseReference, RelativeIteration};

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub controller: Option<ControllerConfig>,
    pub agent: Option<AgentConfig>,
    pub benchmark: Option<BenchmarkConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ControllerConfig {
    pub listen: Option<String>,
    pub root_dir: Option<String>,
    pub deploy_timeout: Option<DurationValue>,
    pub max_in_memory_runs: Option<usize>,
    pub deployer: Option<DeployerKind>,
}

/// How the controller brings up the agents of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployerKind {
    /// In-process agents on the controller's runtime.
    #[default]
    Local,
    /// Agents are started elsewhere and join on their own.
    Manual,
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentConfig {
    pub join: Option<String>,
    pub name: Option<String>,
    pub run_id: Option<String>,
    pub standby: Option<bool>,
    pub reconnect_delay: Option<DurationValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BenchmarkConfig {
    pub name: Option<String>,
    #[serde(default)]
    pub agents: Vec<String>,
    pub statistics_period: Option<DurationValue>,
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
}

#[derive(Debug, Deserialize)]
pub struct PhaseConfig {
    pub name: String,
    pub model: ModelTemplate,
    pub start_time: Option<DurationValue>,
    pub duration: Option<DurationValue>,
    pub max_duration: Option<DurationValue>,
    pub max_iterations: Option<u32>,
    pub force_iterations: Option<bool>,
    #[serde(default)]
    pub start_after: Vec<ReferenceConfig>,
    #[serde(default)]
    pub start_after_strict: Vec<ReferenceConfig>,
    #[serde(default)]
    pub terminate_after_strict: Vec<ReferenceConfig>,
    pub start_with: Option<StartWithConfig>,
    pub scenario: Option<Vec<String>>,
    pub forks: Option<Vec<ForkConfig>>,
    #[serde(default)]
    pub sla: Vec<Sla>,
}

/// A dependency written either as a bare phase name or in full.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReferenceConfig {
    Name(String),
    Detailed(PhaseReference),
}

impl From<ReferenceConfig> for PhaseReference {
    fn from(config: ReferenceConfig) -> Self {
        match config {
            ReferenceConfig::Name(name) => PhaseReference::new(name),
            ReferenceConfig::Detailed(reference) => reference,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartWithConfig {
    pub phase: String,
    #[serde(default)]
    pub iteration: RelativeIteration,
    pub fork: Option<String>,
    pub delay: Option<DurationValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForkConfig {
    pub name: String,
    pub weight: Option<f64>,
    pub scenario: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self, field: &str) -> Result<Duration, ConfigError> {
        match self {
            DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationValue::Text(text) => {
                super::parse_duration_value(text).map_err(|message| ConfigError::InvalidDuration {
                    field: field.to_owned(),
                    message,
                })
            }
        }
    }

    pub(crate) fn to_millis(&self, field: &str) -> Result<u64, ConfigError> {
        let duration = self.to_duration(field)?;
        u64::try_from(duration.as_millis()).map_err(|_err| ConfigError::InvalidDuration {
            field: field.to_owned(),
            message: "Duration overflow.".to_owned(),
        })
    }
}
