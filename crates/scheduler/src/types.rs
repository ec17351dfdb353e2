use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process-unique identifier of a scheduled task. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Allocate the next id from the global counter.
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Task execution priority. Lower ordinal = more urgent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Drains before anything else, e.g. loads the user is staring at.
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
    /// Housekeeping that may wait indefinitely behind other work.
    VeryLow = 4,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::VeryLow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::VeryLow => "verylow",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown priority name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown priority: {0}")]
pub struct ParsePriorityError(String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            "verylow" | "very_low" | "very-low" => Ok(Priority::VeryLow),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}

/// Scheduler configuration, typically parsed from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Upper bound applied to the resolved worker count.
    #[serde(default = "default_max_worker_threads")]
    pub max_worker_threads: usize,
    /// Dispatcher poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_worker_threads() -> usize {
    0
}

fn default_max_worker_threads() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            max_worker_threads: default_max_worker_threads(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Config with an explicit worker count and default everything else.
    pub fn with_workers(worker_threads: usize) -> Self {
        Self {
            worker_threads,
            max_worker_threads: worker_threads.max(1),
            ..Self::default()
        }
    }

    /// Resolve the worker count: 0 means hardware threads, clamped to `1..=max_worker_threads`.
    pub fn resolved_worker_threads(&self) -> usize {
        let requested = if self.worker_threads == 0 {
            hardware_threads()
        } else {
            self.worker_threads
        };
        requested.clamp(1, self.max_worker_threads.max(1))
    }

    /// Dispatcher poll interval, never below one millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Number of hardware threads available to the process (at least 1).
pub fn hardware_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Point-in-time snapshot of scheduler occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub num_workers: usize,
    /// Waiting + pending.
    pub num_queued_tasks: usize,
    pub num_waiting_tasks: usize,
    pub num_pending_tasks: usize,
    pub num_tasks_in_progress: usize,
    pub num_interval_tasks: usize,
    pub num_incomplete_tasks: usize,
}
