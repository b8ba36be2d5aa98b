use thiserror::Error;

/// Malformed benchmark or phase graph. Raised while compiling, before any run
/// exists.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Scenario for {phase} is not defined.")]
    MissingScenario { phase: String },
    #[error("Scenario for {phase} already set!")]
    ScenarioAlreadySet { phase: String },
    #[error("Scenario for {phase} is forked; you need to specify another fork.")]
    ScenarioForked { phase: String },
    #[error("{phase} has single fork: define scenario directly.")]
    SingleNamedFork { phase: String },
    #[error("Scenario was not set for phase '{phase}'")]
    ScenarioNotSet { phase: String },
    #[error(
        "Phase {phase} tries to reference {reference} but this phase does not have any iterations (cannot determine relative iteration)."
    )]
    RelativeIterationWithoutIterations { phase: String, reference: String },
    #[error("Phase {reference} referenced from {phase} is not defined.{suggestion}")]
    UnknownPhase {
        phase: String,
        reference: String,
        suggestion: String,
    },
    #[error("Phase '{phase}' already defined.")]
    DuplicatePhase { phase: String },
    #[error("Phase dependencies contain cycle: {path}")]
    DependencyCycle { path: String },
    #[error("Phase {phase}.{field} must be positive.")]
    NotPositive { phase: String, field: &'static str },
    #[error("Phase {phase}.{field} must be non-negative.")]
    Negative { phase: String, field: &'static str },
    #[error("In phase {phase} both initialUsersPerSec and targetUsersPerSec are 0")]
    ZeroRampRates { phase: String },
    #[error("Duration was not set for phase '{phase}'")]
    MissingDuration { phase: String },
    #[error("Phase {phase} must have at least one iteration.")]
    NoIterations { phase: String },
    #[error("Benchmark '{benchmark}' has no phases.")]
    NoPhases { benchmark: String },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
