use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Lifecycle state of a [`WorkerController`](crate::controller::WorkerController).
///
/// `Idle -> Starting -> Running -> Stopped`, and `reset()` takes a stopped
/// controller back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Idle,
    Starting,
    Running,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// How a worker's execution context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The worker returned on its own (naturally or after a stop message).
    Graceful(i32),
    /// The controller killed the context after the grace period elapsed.
    Forced,
    /// The context died without being asked to: killed by an outside
    /// signal, or the worker task panicked.
    Abnormal,
}

impl WorkerExit {
    pub fn is_graceful(&self) -> bool {
        matches!(self, WorkerExit::Graceful(_))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            WorkerExit::Graceful(code) => Some(*code),
            WorkerExit::Forced | WorkerExit::Abnormal => None,
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Graceful(code) => write!(f, "exited({code})"),
            WorkerExit::Forced => write!(f, "forced"),
            WorkerExit::Abnormal => write!(f, "abnormal"),
        }
    }
}

/// Snapshot of a controller as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStatus {
    pub state: WorkerState,
    /// Recorded result of the last run; only set once the controller has
    /// stopped at least once since its last `reset()`.
    pub exit: Option<WorkerExit>,
}

/// Which execution backend the CLI should build controllers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One child process per worker.
    Process,
    /// One Tokio task per worker inside the current process.
    Task,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Process
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "process" => Ok(BackendKind::Process),
            "task" => Ok(BackendKind::Task),
            other => Err(format!(
                "invalid backend: {other} (expected \"process\" or \"task\")"
            )),
        }
    }
}
