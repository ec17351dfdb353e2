//! Background task scheduler.
//!
//! A [`Scheduler`] runs closures on a fixed pool of worker threads, either
//! once after a delay or repeatedly on an interval. A dedicated dispatcher
//! thread moves tasks whose due time has passed from the waiting queue to the
//! pending queue; workers drain the pending queue in priority order
//! (priority, then due time, then submission order).
//!
//! Tasks can be cancelled, awaited, and queried from any thread. Cancellation
//! is cooperative for running tasks: the current run finishes, only the next
//! re-arm is suppressed.

pub mod completion;
pub mod current;
pub mod error;
pub mod global;
pub mod metrics;
pub mod queue;
pub mod runner;
pub mod task;
pub mod types;

pub use completion::{Completion, TaskHandle, TaskOutcome};
pub use current::{current_task_id, current_worker_index, is_worker_thread};
pub use error::{SchedulerError, TaskError};
pub use global::{global, install_global};
pub use metrics::{PriorityMetrics, SchedulerMetrics};
pub use runner::Scheduler;
pub use task::{ScheduledTask, ThreadEntry};
pub use types::{hardware_threads, Priority, SchedulerConfig, SchedulerStats, TaskId};
