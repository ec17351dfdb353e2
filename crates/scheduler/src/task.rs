use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::completion::Completion;
use crate::types::{Priority, TaskId};

/// Callable stored in a task record. The return value asks for a re-arm and
/// is ignored for one-shot tasks.
pub type TaskFn = Box<dyn FnMut() -> bool + Send + 'static>;

/// Long-running unit of work that can run on a scheduler worker instead of
/// a dedicated thread.
pub trait ThreadEntry: Send + Sync {
    /// Body of the entry. Runs once on a worker thread.
    fn entry(&self);

    /// Human-readable name for logging.
    fn debug_name(&self) -> String {
        String::new()
    }
}

const NO_WORKER: usize = usize::MAX;

/// A schedulable unit of work, shared between the incomplete-task index,
/// at most one queue, and the worker executing it.
///
/// The due time is not stored here: it belongs to the queue slot the record
/// currently occupies (see [`QueuedTask`](crate::queue::QueuedTask)).
pub struct ScheduledTask {
    id: TaskId,
    priority: Priority,
    interval: Option<Duration>,
    label: Option<String>,
    callable: Mutex<TaskFn>,
    completion: Arc<Completion>,
    assigned_worker: AtomicUsize,
}

impl ScheduledTask {
    pub(crate) fn once(priority: Priority, label: Option<String>, callable: TaskFn) -> Self {
        Self::build(priority, None, label, callable)
    }

    pub(crate) fn with_interval(
        priority: Priority,
        interval: Duration,
        label: Option<String>,
        callable: TaskFn,
    ) -> Self {
        debug_assert!(!interval.is_zero(), "interval tasks need a non-zero interval");
        Self::build(priority, Some(interval), label, callable)
    }

    fn build(
        priority: Priority,
        interval: Option<Duration>,
        label: Option<String>,
        callable: TaskFn,
    ) -> Self {
        Self {
            id: TaskId::next(),
            priority,
            interval,
            label,
            callable: Mutex::new(callable),
            completion: Arc::new(Completion::new()),
            assigned_worker: AtomicUsize::new(NO_WORKER),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Re-arm interval, `None` for one-shot tasks.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn is_interval(&self) -> bool {
        self.interval.is_some()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn completion(&self) -> &Arc<Completion> {
        &self.completion
    }

    /// Worker currently executing this task, if any.
    pub fn assigned_worker(&self) -> Option<usize> {
        match self.assigned_worker.load(Ordering::Acquire) {
            NO_WORKER => None,
            index => Some(index),
        }
    }

    pub(crate) fn set_assigned_worker(&self, worker: Option<usize>) {
        self.assigned_worker
            .store(worker.unwrap_or(NO_WORKER), Ordering::Release);
    }

    /// Invoke the callable. Only the worker that popped the record calls this,
    /// so the lock is never contended.
    pub(crate) fn invoke(&self) -> bool {
        let mut callable = self.callable.lock().unwrap_or_else(PoisonError::into_inner);
        (*callable)()
    }

    #[cfg(test)]
    pub(crate) fn noop(priority: Priority) -> Self {
        Self::once(priority, None, Box::new(|| false))
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("interval", &self.interval)
            .field("label", &self.label)
            .field("assigned_worker", &self.assigned_worker())
            .finish_non_exhaustive()
    }
}

/// Describe a panic payload for logs.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
