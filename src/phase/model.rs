use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DefinitionError;

/// What happens when an open model would exceed its session cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLimitPolicy {
    #[default]
    Fail,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedModel {
    pub users: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RampRateModel {
    pub initial_users_per_sec: f64,
    pub target_users_per_sec: f64,
    pub variance: bool,
    pub max_sessions: u32,
    pub session_limit_policy: SessionLimitPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstantRateModel {
    pub users_per_sec: f64,
    pub variance: bool,
    pub max_sessions: u32,
    pub session_limit_policy: SessionLimitPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequentiallyModel {
    pub repeats: u32,
}

/// How sessions are generated for one concrete phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Model {
    AtOnce(ClosedModel),
    Always(ClosedModel),
    RampRate(RampRateModel),
    ConstantRate(ConstantRateModel),
    Sequentially(SequentiallyModel),
    Noop,
}

impl Model {
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Model::AtOnce(model) => closed_description(model.users, "at once"),
            Model::Always(model) => closed_description(model.users, "always"),
            Model::RampRate(model) => format!(
                "{:.2} - {:.2} users per second",
                model.initial_users_per_sec, model.target_users_per_sec
            ),
            Model::ConstantRate(model) => format!("{:.2} users per second", model.users_per_sec),
            Model::Sequentially(model) => format!("{} times", model.repeats),
            Model::Noop => "No-op phase".to_owned(),
        }
    }

    /// Session cap for open models; closed models have none.
    #[must_use]
    pub const fn max_sessions(&self) -> Option<u32> {
        match self {
            Model::RampRate(model) => Some(model.max_sessions),
            Model::ConstantRate(model) => Some(model.max_sessions),
            Model::AtOnce(_) | Model::Always(_) | Model::Sequentially(_) | Model::Noop => None,
        }
    }

    #[must_use]
    pub const fn session_limit_policy(&self) -> Option<SessionLimitPolicy> {
        match self {
            Model::RampRate(model) => Some(model.session_limit_policy),
            Model::ConstantRate(model) => Some(model.session_limit_policy),
            Model::AtOnce(_) | Model::Always(_) | Model::Sequentially(_) | Model::Noop => None,
        }
    }

    pub(crate) fn validate(
        &self,
        phase: &str,
        duration_ms: Option<u64>,
    ) -> Result<(), DefinitionError> {
        match self {
            Model::AtOnce(_) | Model::Always(_) => {
                if let Some(duration) = duration_ms.filter(|value| *value > 0) {
                    warn!("Duration {}ms for phase {} is ignored.", duration, phase);
                }
                Ok(())
            }
            Model::RampRate(_) | Model::ConstantRate(_) => {
                if duration_ms.is_none() {
                    return Err(DefinitionError::MissingDuration {
                        phase: phase.to_owned(),
                    });
                }
                Ok(())
            }
            Model::Sequentially(_) | Model::Noop => Ok(()),
        }
    }
}

fn closed_description(users: u32, suffix: &str) -> String {
    if users > 0 {
        format!("{} users {}", users, suffix)
    } else {
        "no users will be started".to_owned()
    }
}
