use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Lifecycle of a single run.
///
/// `Pending -> Running -> {Completed, Failed, TimedOut}`. A launch failure goes straight from
/// `Pending` to `Failed`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed(FailureReason),
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The process could not be started.
    Launch,
    /// The process exited with a non-zero status.
    ExitCode(i32),
    /// The process was ended by a signal that we did not send.
    Signal,
    /// The run was cancelled by the caller.
    Cancelled,
    /// Waiting on the process failed, so its exit status is unknown.
    Supervision,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed(_) | RunState::TimedOut
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunState::Failed(FailureReason::Cancelled))
    }
}

impl Display for RunState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Pending => f.write_str("pending"),
            RunState::Running => f.write_str("running"),
            RunState::Completed => f.write_str("completed"),
            RunState::Failed(FailureReason::Launch) => f.write_str("failed (launch)"),
            RunState::Failed(FailureReason::ExitCode(code)) => write!(f, "failed (exit {code})"),
            RunState::Failed(FailureReason::Signal) => f.write_str("failed (signal)"),
            RunState::Failed(FailureReason::Cancelled) => f.write_str("cancelled"),
            RunState::Failed(FailureReason::Supervision) => f.write_str("failed (supervision)"),
            RunState::TimedOut => f.write_str("timed out"),
        }
    }
}
