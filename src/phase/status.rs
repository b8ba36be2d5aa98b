use serde::{Deserialize, Serialize};

/// Lifecycle of one phase instance. Ordering follows declaration order and
/// is what the monotonic transition guard compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    NotStarted,
    Starting,
    Running,
    Finishing,
    Finished,
    Terminating,
    Terminated,
    Cancelled,
}

impl PhaseStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::NotStarted => "NOT_STARTED",
            PhaseStatus::Starting => "STARTING",
            PhaseStatus::Running => "RUNNING",
            PhaseStatus::Finishing => "FINISHING",
            PhaseStatus::Finished => "FINISHED",
            PhaseStatus::Terminating => "TERMINATING",
            PhaseStatus::Terminated => "TERMINATED",
            PhaseStatus::Cancelled => "CANCELLED",
        }
    }

    #[must_use]
    pub const fn is_started(self) -> bool {
        self as u8 >= PhaseStatus::Running as u8
    }

    #[must_use]
    pub const fn is_finished(self) -> bool {
        self as u8 >= PhaseStatus::Finished as u8
    }

    #[must_use]
    pub const fn is_terminated(self) -> bool {
        self as u8 >= PhaseStatus::Terminated as u8
    }

    /// Statuses an agent may legitimately report for a phase it executes.
    #[must_use]
    pub const fn is_agent_reportable(self) -> bool {
        matches!(
            self,
            PhaseStatus::Running | PhaseStatus::Finished | PhaseStatus::Terminated
        )
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
