use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use tracing::{debug, error, trace};

use crate::completion::TaskOutcome;
use crate::current::{self, TaskScope};
use crate::queue::{QueuedTask, Ready, Waiting};
use crate::task::{panic_message, ScheduledTask};

use super::core::Shared;

/// Worker thread body: pop the most urgent pending task, run it, then either
/// retire it or re-arm it.
///
/// Once stop is requested the worker finishes its current task and exits;
/// whatever is still pending is left for `stop` to abandon. A worker also
/// exits when a newer `start` has replaced the run it was spawned for.
pub(super) fn run(shared: Arc<Shared>, epoch: u64, index: usize) {
    current::set_worker_index(Some(index));
    debug!(worker = index, "Worker running, waiting for tasks");

    loop {
        let task = {
            let state = shared.lock();
            let mut state = shared
                .worker_wakeup
                .wait_while(state, |s| s.is_current(epoch) && s.pending.is_empty())
                .unwrap_or_else(PoisonError::into_inner);

            if !state.is_current(epoch) {
                break;
            }
            let Some(Ready(slot)) = state.pending.pop() else {
                continue;
            };
            if let Some(entry) = state.worker_tasks.get_mut(index) {
                *entry = Some(slot.task.id());
            }
            slot.task
        };

        execute(&shared, epoch, index, task);
    }

    current::set_worker_index(None);
    debug!(worker = index, "Worker quitting");
}

fn execute(shared: &Shared, epoch: u64, index: usize, task: Arc<ScheduledTask>) {
    let id = task.id();
    trace!(worker = index, task = %id, priority = %task.priority(), "Executing task");

    task.set_assigned_worker(Some(index));
    let started = Instant::now();
    let result = {
        let _scope = TaskScope::enter(id);
        panic::catch_unwind(AssertUnwindSafe(|| task.invoke()))
    };
    let elapsed = started.elapsed();
    task.set_assigned_worker(None);

    // A panic counts as "do not reschedule"; the worker carries on.
    let (wants_rearm, panic) = match result {
        Ok(again) => (again, None),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                worker = index,
                task = %id,
                label = task.label().unwrap_or(""),
                panic = %message,
                "Task panicked"
            );
            (false, Some(message))
        }
    };
    let panicked = panic.is_some();

    let rescheduled = {
        let mut state = shared.lock();
        if let Some(entry) = state.worker_tasks.get_mut(index) {
            if *entry == Some(id) {
                *entry = None;
            }
        }

        let cancelled = state.cancelled.contains(&id);
        match task.interval() {
            Some(interval) if wants_rearm && !cancelled && state.is_current(epoch) => {
                task.completion().signal_and_rearm(TaskOutcome::Completed);
                let due = Instant::now() + interval;
                state.waiting.push(Waiting(QueuedTask::new(due, Arc::clone(&task))));
                shared.dispatcher_wakeup.notify_one();
                true
            }
            _ => {
                state.incomplete.remove(&id);
                state.cancelled.remove(&id);
                match panic {
                    Some(message) => task.completion().signal_panicked(message),
                    None => task.completion().signal(TaskOutcome::Completed),
                }
                false
            }
        }
    };

    trace!(
        worker = index,
        task = %id,
        elapsed_us = elapsed.as_micros() as u64,
        rescheduled,
        "Task finished"
    );

    shared.with_metrics(|m| {
        m.record_execution(task.priority(), elapsed, panicked);
        if rescheduled {
            m.tasks_rescheduled += 1;
        }
    });
}
