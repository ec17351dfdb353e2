use thiserror::Error;

/// Errors raised by scheduler lifecycle operations.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("global scheduler is already installed")]
    GlobalAlreadyInstalled,
}

/// Why a scheduled task did not produce a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Submitted while the scheduler was stopped.
    #[error("task was never scheduled")]
    NotScheduled,

    #[error("task was cancelled before it ran")]
    Cancelled,

    /// Still queued when the scheduler stopped.
    #[error("task was abandoned at scheduler shutdown")]
    Abandoned,

    #[error("task panicked: {0}")]
    Panicked(String),
}
