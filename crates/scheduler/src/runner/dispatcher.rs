use std::sync::{Arc, PoisonError};
use std::time::Instant;

use tracing::{debug, trace};

use crate::queue::{Ready, Waiting};

use super::core::Shared;

/// Dispatcher thread body: promotes due tasks from waiting to pending.
///
/// Every wake promotes all tasks that are due and wakes one worker per
/// promoted task. It then sleeps until the earliest remaining due time, at
/// most one poll interval. A submission with an earlier due time wakes it
/// early through `dispatcher_wakeup`.
pub(super) fn run(shared: Arc<Shared>, epoch: u64) {
    let poll = shared.config.poll_interval();
    debug!(poll_ms = poll.as_millis() as u64, "Dispatcher running");

    let mut state = shared.lock();
    while state.is_current(epoch) {
        let now = Instant::now();

        let mut promoted = 0usize;
        while state.waiting.peek().is_some_and(|w| w.0.due <= now) {
            let Some(Waiting(slot)) = state.waiting.pop() else {
                break;
            };
            trace!(task = %slot.task.id(), priority = %slot.task.priority(), "Task due, moved to pending");
            state.pending.push(Ready(slot));
            promoted += 1;
        }

        for _ in 0..promoted {
            shared.worker_wakeup.notify_one();
        }

        let timeout = state
            .waiting
            .peek()
            .map_or(poll, |w| w.0.due.saturating_duration_since(now).min(poll));

        state = shared
            .dispatcher_wakeup
            .wait_timeout(state, timeout)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }

    debug!("Dispatcher quitting");
}
