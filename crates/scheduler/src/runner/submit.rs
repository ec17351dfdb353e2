use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::completion::TaskHandle;
use crate::queue::{QueuedTask, Waiting};
use crate::task::{ScheduledTask, TaskFn, ThreadEntry};
use crate::types::{Priority, TaskId};

use super::Scheduler;

/// Upper bound for delays, keeps `Instant` arithmetic from overflowing.
const MAX_DELAY: Duration = Duration::from_secs(60 * 60 * 24 * 365);

fn due_after(delay: Duration) -> Instant {
    Instant::now() + delay.min(MAX_DELAY)
}

impl Scheduler {
    /// Run `f` once on a worker after `delay`.
    ///
    /// The returned handle yields `f`'s return value. If the scheduler is not
    /// running nothing is queued and the handle is invalid.
    pub fn schedule_once<F, T>(&self, priority: Priority, delay: Duration, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit_once(priority, delay, None, f)
    }

    /// [`schedule_once`](Self::schedule_once) with a label that shows up in logs.
    pub fn schedule_once_labeled<F, T>(
        &self,
        priority: Priority,
        delay: Duration,
        label: impl Into<String>,
        f: F,
    ) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit_once(priority, delay, Some(label.into()), f)
    }

    fn submit_once<F, T>(
        &self,
        priority: Priority,
        delay: Duration,
        label: Option<String>,
        f: F,
    ) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let mut f = Some(f);
        let callable: TaskFn = Box::new(move || {
            if let Some(f) = f.take() {
                // The handle may already be gone; nobody wants the value then.
                let _ = tx.send(f());
            }
            false
        });

        let task = Arc::new(ScheduledTask::once(priority, label, callable));
        let id = task.id();
        let completion = Arc::clone(task.completion());

        if self.enqueue(task, due_after(delay)) {
            TaskHandle::new(id, completion, rx)
        } else {
            TaskHandle::invalid()
        }
    }

    /// Run `f` every `interval` until it returns false or the task is cancelled.
    ///
    /// With `start_immediately` the first run is due now, otherwise after one
    /// interval. Each re-arm is due one interval after the previous run
    /// finished. Returns `None` if the scheduler is not running or `interval`
    /// is zero.
    pub fn schedule_with_interval<F>(
        &self,
        priority: Priority,
        interval: Duration,
        start_immediately: bool,
        f: F,
    ) -> Option<TaskId>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.submit_interval(priority, interval, start_immediately, None, f)
    }

    pub fn schedule_with_interval_labeled<F>(
        &self,
        priority: Priority,
        interval: Duration,
        start_immediately: bool,
        label: impl Into<String>,
        f: F,
    ) -> Option<TaskId>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.submit_interval(priority, interval, start_immediately, Some(label.into()), f)
    }

    fn submit_interval<F>(
        &self,
        priority: Priority,
        interval: Duration,
        start_immediately: bool,
        label: Option<String>,
        f: F,
    ) -> Option<TaskId>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        if interval.is_zero() {
            warn!(label = label.as_deref().unwrap_or(""), "Rejected interval task with zero interval");
            return None;
        }
        let interval = interval.min(MAX_DELAY);

        let task = Arc::new(ScheduledTask::with_interval(
            priority,
            interval,
            label,
            Box::new(f),
        ));
        let id = task.id();
        let delay = if start_immediately { Duration::ZERO } else { interval };

        self.enqueue(task, due_after(delay)).then_some(id)
    }

    /// Run a [`ThreadEntry`] once on a worker instead of a dedicated thread.
    ///
    /// Long entries occupy a worker for their whole run, so a pool full of
    /// them starves every other task.
    pub fn schedule_thread_entry(
        &self,
        entry: Arc<dyn ThreadEntry>,
        priority: Priority,
        delay: Duration,
    ) -> Option<TaskId> {
        let name = entry.debug_name();
        let label = if name.is_empty() { "thread-entry".to_string() } else { name };
        let log_name = label.clone();

        let handle = self.submit_once(priority, delay, Some(label), move || {
            debug!(entry = %log_name, "Entered thread entry task");
            entry.entry();
            debug!(entry = %log_name, "Exiting thread entry task");
        });
        handle.id()
    }

    /// Insert a new record into the index and the waiting queue.
    /// Returns false, queuing nothing, when the scheduler is stopped.
    fn enqueue(&self, task: Arc<ScheduledTask>, due: Instant) -> bool {
        {
            let mut state = self.shared.lock();
            if !state.running {
                debug!(task = %task.id(), "Scheduler not running, task dropped");
                return false;
            }

            debug!(
                task = %task.id(),
                priority = %task.priority(),
                interval = ?task.interval(),
                label = task.label().unwrap_or(""),
                "Task scheduled"
            );
            state.incomplete.insert(task.id(), Arc::clone(&task));
            state.waiting.push(Waiting(QueuedTask::new(due, task)));
        }

        self.shared.dispatcher_wakeup.notify_one();
        self.shared.with_metrics(|m| m.tasks_submitted += 1);
        true
    }
}
