//! Phase definitions, the graph compiler that expands phase templates, and
//! the per-instance runtime state machine.
pub mod compiler;
mod definition;
mod model;
mod state;
mod status;

pub use definition::{PhaseDefinition, PhaseDraft, Scenario, Sla, StartWithDelay};
pub use model::{
    ClosedModel, ConstantRateModel, Model, RampRateModel, SequentiallyModel, SessionLimitPolicy,
};
pub use state::PhaseState;
pub use status::PhaseStatus;

#[cfg(test)]
mod tests;
