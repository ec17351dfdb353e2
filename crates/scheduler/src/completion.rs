//! Per-task completion signals and the value handle returned by `schedule_once`.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::TaskError;
use crate::types::TaskId;

/// How one execution generation of a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    /// The callable ran to completion.
    Completed,
    /// The callable panicked; the worker caught it.
    Panicked,
    /// Removed from a queue by `cancel_task` before it ran.
    Cancelled,
    /// Still queued when the scheduler stopped.
    Abandoned,
}

#[derive(Debug)]
struct Generations {
    /// Generation currently open for waiters.
    armed: u64,
    /// Last generation that has been signalled.
    resolved: u64,
    outcome: Option<TaskOutcome>,
    /// Payload message of the panic that ended the task, if any.
    panic: Option<String>,
}

/// Completion signal shared between a task record and everyone waiting on it.
///
/// Each execution of a task is one generation. A waiter blocks until the
/// generation that was open when it started waiting has been signalled, so
/// re-arming an interval task never strands or double-releases a waiter.
#[derive(Debug)]
pub struct Completion {
    state: Mutex<Generations>,
    cond: Condvar,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Generations {
                armed: 1,
                resolved: 0,
                outcome: None,
                panic: None,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Generations> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the open generation. Signalling twice is a no-op.
    pub fn signal(&self, outcome: TaskOutcome) {
        self.resolve(outcome, None);
    }

    /// Resolve the open generation as [`TaskOutcome::Panicked`], keeping the
    /// panic message for [`TaskHandle::join`].
    pub fn signal_panicked(&self, message: String) {
        self.resolve(TaskOutcome::Panicked, Some(message));
    }

    fn resolve(&self, outcome: TaskOutcome, panic: Option<String>) {
        let mut state = self.lock();
        if state.resolved == state.armed {
            return;
        }
        state.resolved = state.armed;
        state.outcome = Some(outcome);
        state.panic = panic;
        drop(state);
        self.cond.notify_all();
    }

    /// Resolve the open generation and immediately open the next one.
    pub fn signal_and_rearm(&self, outcome: TaskOutcome) {
        let mut state = self.lock();
        state.resolved = state.armed;
        state.outcome = Some(outcome);
        state.armed += 1;
        drop(state);
        self.cond.notify_all();
    }

    /// True once the open generation has been signalled.
    pub fn is_resolved(&self) -> bool {
        let state = self.lock();
        state.resolved == state.armed
    }

    /// Generation currently open. Read it under the scheduler lock to pin
    /// the run a later [`wait_generation`](Self::wait_generation) refers to.
    pub fn armed_generation(&self) -> u64 {
        self.lock().armed
    }

    /// Block until the generation open right now has been signalled.
    pub fn wait(&self) -> TaskOutcome {
        let generation = self.armed_generation();
        self.wait_generation(generation)
    }

    /// Block until `generation` has been signalled. Returns at once if it
    /// already was, even when later generations have opened since.
    pub fn wait_generation(&self, generation: u64) -> TaskOutcome {
        let state = self.lock();
        let state = self
            .cond
            .wait_while(state, |s| s.resolved < generation)
            .unwrap_or_else(PoisonError::into_inner);
        state.outcome.unwrap_or(TaskOutcome::Completed)
    }

    /// Bounded [`wait`](Self::wait); `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        let target = state.armed;
        while state.resolved < target {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .cond
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        state.outcome
    }

    fn panic_message(&self) -> Option<String> {
        self.lock().panic.clone()
    }
}

/// Handle to a one-shot task's completion and return value.
///
/// An invalid handle (`id() == None`) means the task was never scheduled.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: Option<TaskId>,
    completion: Option<Arc<Completion>>,
    result: Option<Receiver<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: TaskId, completion: Arc<Completion>, result: Receiver<T>) -> Self {
        Self {
            id: Some(id),
            completion: Some(completion),
            result: Some(result),
        }
    }

    pub(crate) fn invalid() -> Self {
        Self {
            id: None,
            completion: None,
            result: None,
        }
    }

    pub fn id(&self) -> Option<TaskId> {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.id.is_some()
    }

    /// True once the task has finished, failed, or been discarded.
    pub fn is_finished(&self) -> bool {
        self.completion.as_ref().map_or(true, |c| c.is_resolved())
    }

    /// Wait up to `timeout` for the task to finish. Returns true if it did.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match &self.completion {
            Some(completion) => completion.wait_timeout(timeout).is_some(),
            None => true,
        }
    }

    /// Block until the task finishes and take its return value.
    pub fn join(self) -> Result<T, TaskError> {
        let (Some(completion), Some(result)) = (self.completion, self.result) else {
            return Err(TaskError::NotScheduled);
        };

        match completion.wait() {
            TaskOutcome::Completed => result.try_recv().map_err(|_| TaskError::Cancelled),
            TaskOutcome::Panicked => Err(TaskError::Panicked(
                completion.panic_message().unwrap_or_else(|| {
                    format!("task {} panicked", self.id.map(|id| id.to_string()).unwrap_or_default())
                }),
            )),
            TaskOutcome::Cancelled => Err(TaskError::Cancelled),
            TaskOutcome::Abandoned => Err(TaskError::Abandoned),
        }
    }
}
