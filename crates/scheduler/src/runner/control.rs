use std::sync::Arc;

use tracing::{debug, warn};

use crate::completion::TaskOutcome;
use crate::current::current_task_id;
use crate::task::ScheduledTask;
use crate::types::TaskId;

use super::Scheduler;

impl Scheduler {
    /// Cancel a task.
    ///
    /// Returns false if the id is unknown (already finished or never issued).
    /// A queued task is removed at once and its completion resolves as
    /// [`TaskOutcome::Cancelled`]. An executing task finishes its current run
    /// but is never re-armed; with `wait_for_completion` the caller blocks
    /// until that run ends.
    pub fn cancel_task(&self, id: TaskId, wait_for_completion: bool) -> bool {
        let (task, generation) = {
            let mut state = self.shared.lock();
            let Some(task) = state.incomplete.get(&id).map(Arc::clone) else {
                return false;
            };

            if state.remove_queued(id).is_some() {
                state.incomplete.remove(&id);
                state.cancelled.remove(&id);
                drop(state);

                task.completion().signal(TaskOutcome::Cancelled);
                self.shared.with_metrics(|m| m.tasks_cancelled += 1);
                debug!(task = %id, "Cancelled queued task");
                return true;
            }

            // Not queued but still incomplete: a worker is running it.
            if state.cancelled.insert(id) {
                self.shared.with_metrics(|m| m.tasks_cancelled += 1);
            }
            let generation = task.completion().armed_generation();
            (task, generation)
        };

        debug!(task = %id, wait = wait_for_completion, "Cancelled executing task");
        if wait_for_completion && !self.is_self_wait(&task) {
            task.completion().wait_generation(generation);
        }
        true
    }

    /// True while a cancelled task's final run is still executing.
    ///
    /// Long-running callables can poll this with
    /// [`current_task_id`](crate::current_task_id) to bail out early.
    pub fn is_task_cancelled(&self, id: TaskId) -> bool {
        self.shared.lock().cancelled.contains(&id)
    }

    /// True if the task sits in the waiting or the pending queue.
    pub fn is_task_queued(&self, id: TaskId) -> bool {
        self.shared.lock().is_queued(id)
    }

    /// Block until the task's current run completes.
    ///
    /// Returns `None` immediately for unknown ids (already finished or never
    /// issued). For an interval task this waits for the run that is queued
    /// or executing at the time of the call, never a later one.
    pub fn wait_until_task_complete(&self, id: TaskId) -> Option<TaskOutcome> {
        let (task, generation) = {
            let state = self.shared.lock();
            let task = state.incomplete.get(&id).map(Arc::clone)?;
            let generation = task.completion().armed_generation();
            (task, generation)
        };
        if self.is_self_wait(&task) {
            return None;
        }
        Some(task.completion().wait_generation(generation))
    }

    /// A task waiting on itself would never wake up.
    fn is_self_wait(&self, task: &ScheduledTask) -> bool {
        if current_task_id() == Some(task.id()) {
            warn!(task = %task.id(), "Task tried to wait for its own completion; not blocking");
            true
        } else {
            false
        }
    }
}
