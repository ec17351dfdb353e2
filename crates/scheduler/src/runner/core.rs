use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::completion::TaskOutcome;
use crate::error::SchedulerError;
use crate::metrics::SchedulerMetrics;
use crate::queue::{PriorityQueue, Ready, Waiting};
use crate::task::ScheduledTask;
use crate::types::{SchedulerConfig, SchedulerStats, TaskId};

use super::{dispatcher, worker};

/// Everything guarded by the single scheduler lock.
#[derive(Debug, Default)]
pub(super) struct SchedulerState {
    pub(super) running: bool,
    /// Bumped by every `start`. Threads of an older run exit instead of serving this one.
    pub(super) epoch: u64,
    /// Tasks whose due time has not passed yet.
    pub(super) waiting: PriorityQueue<Waiting>,
    /// Due tasks ready for the next free worker.
    pub(super) pending: PriorityQueue<Ready>,
    /// Every submitted task that has not reached a terminal state.
    pub(super) incomplete: BTreeMap<TaskId, Arc<ScheduledTask>>,
    /// Executing tasks that must not be re-armed.
    pub(super) cancelled: BTreeSet<TaskId>,
    /// Task executed by each worker, indexed by worker.
    pub(super) worker_tasks: Vec<Option<TaskId>>,
}

impl SchedulerState {
    pub(super) fn is_queued(&self, id: TaskId) -> bool {
        self.waiting.iter().any(|w| w.0.task.id() == id)
            || self.pending.iter().any(|r| r.0.task.id() == id)
    }

    /// Pull a task out of whichever queue holds it.
    pub(super) fn remove_queued(&mut self, id: TaskId) -> Option<Arc<ScheduledTask>> {
        self.waiting
            .remove_first(|w| w.0.task.id() == id)
            .map(|w| w.0.task)
            .or_else(|| {
                self.pending
                    .remove_first(|r| r.0.task.id() == id)
                    .map(|r| r.0.task)
            })
    }

    /// True while threads spawned for `epoch` should keep serving.
    pub(super) fn is_current(&self, epoch: u64) -> bool {
        self.running && self.epoch == epoch
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            num_workers: self.worker_tasks.len(),
            num_queued_tasks: self.waiting.len() + self.pending.len(),
            num_waiting_tasks: self.waiting.len(),
            num_pending_tasks: self.pending.len(),
            num_tasks_in_progress: self.worker_tasks.iter().flatten().count(),
            num_interval_tasks: self.incomplete.values().filter(|t| t.is_interval()).count(),
            num_incomplete_tasks: self.incomplete.len(),
        }
    }
}

/// State shared between the facade, the dispatcher thread and the workers.
#[derive(Debug)]
pub(super) struct Shared {
    pub(super) config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    /// Wakes the dispatcher: new submissions, re-arms, shutdown.
    pub(super) dispatcher_wakeup: Condvar,
    /// Wakes workers: promoted tasks, shutdown.
    pub(super) worker_wakeup: Condvar,
    pub(super) metrics: RwLock<SchedulerMetrics>,
}

impl Shared {
    /// Callables never run under this lock, so a poisoned guard still holds
    /// consistent queues.
    pub(super) fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn with_metrics(&self, update: impl FnOnce(&mut SchedulerMetrics)) {
        if let Ok(mut metrics) = self.metrics.write() {
            update(&mut metrics);
        }
    }
}

/// Background task scheduler: one dispatcher thread promotes due tasks, a
/// fixed pool of workers executes them in priority order.
///
/// Tasks may run once after a delay or repeatedly on an interval. Every
/// operation is safe to call from any thread, including from inside a task.
#[derive(Debug)]
pub struct Scheduler {
    pub(super) shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a stopped scheduler. Call [`start`](Self::start) to spawn its threads.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(SchedulerState::default()),
                dispatcher_wakeup: Condvar::new(),
                worker_wakeup: Condvar::new(),
                metrics: RwLock::new(SchedulerMetrics::default()),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Create and start a scheduler in one step.
    pub fn start_new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let scheduler = Self::new(config);
        scheduler.start()?;
        Ok(scheduler)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Spawn the dispatcher and the worker pool.
    ///
    /// Any spawn failure tears down the threads already started.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        let num_workers = self.shared.config.resolved_worker_threads();

        let epoch = {
            let mut state = self.shared.lock();
            if state.running {
                return Err(SchedulerError::AlreadyRunning);
            }
            state.running = true;
            state.epoch += 1;
            state.worker_tasks = vec![None; num_workers];
            state.epoch
        };

        let mut spawned = Vec::with_capacity(num_workers + 1);
        let result = self.spawn_threads(epoch, num_workers, &mut spawned);
        if let Err(e) = result {
            error!(error = %e, "Scheduler failed to start");
            self.shared.lock().running = false;
            self.halt(spawned);
            self.abandon_outstanding();
            return Err(e);
        }

        *threads = spawned;
        info!(
            workers = num_workers,
            poll_ms = self.shared.config.poll_interval().as_millis() as u64,
            "Scheduler started"
        );
        Ok(())
    }

    fn spawn_threads(
        &self,
        epoch: u64,
        num_workers: usize,
        spawned: &mut Vec<JoinHandle<()>>,
    ) -> Result<(), SchedulerError> {
        let name = "ivie-dispatcher".to_string();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || dispatcher::run(shared, epoch))
            .map_err(|source| SchedulerError::Spawn { name, source })?;
        spawned.push(handle);

        for index in 0..num_workers {
            let name = format!("ivie-worker-{}", index);
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker::run(shared, epoch, index))
                .map_err(|source| SchedulerError::Spawn { name, source })?;
            spawned.push(handle);
        }
        Ok(())
    }

    /// Stop the dispatcher and workers.
    ///
    /// Tasks mid-execution finish. Tasks that have not started, whether still
    /// waiting or already pending, are abandoned: their completion resolves as
    /// [`TaskOutcome::Abandoned`]. Calling this on a stopped scheduler, or while
    /// another `stop` is in progress, returns at once.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock();
            if !state.running {
                return;
            }
            state.running = false;
        }
        info!("Scheduler shutdown requested");

        let handles = {
            let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
            mem::take(&mut *threads)
        };
        self.halt(handles);
        self.abandon_outstanding();
    }

    /// Wake every scheduler thread and join them. `running` must already be false.
    fn halt(&self, handles: Vec<JoinHandle<()>>) {
        self.shared.dispatcher_wakeup.notify_all();
        self.shared.worker_wakeup.notify_all();

        let me = thread::current().id();
        for handle in handles {
            if handle.thread().id() == me {
                warn!("Scheduler stopped from one of its own workers; not joining that worker");
                continue;
            }
            let name = handle.thread().name().unwrap_or("scheduler").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "Scheduler thread panicked");
            }
        }
    }

    /// Empty both queues and resolve every task they held as abandoned.
    ///
    /// A task still executing (on a worker that stopped the scheduler from
    /// inside a task) stays indexed; its worker retires it when the run ends.
    fn abandon_outstanding(&self) {
        let abandoned: Vec<Arc<ScheduledTask>> = {
            let mut state = self.shared.lock();
            let mut queued: Vec<Arc<ScheduledTask>> =
                state.waiting.drain().map(|Waiting(slot)| slot.task).collect();
            queued.extend(state.pending.drain().map(|Ready(slot)| slot.task));
            for task in &queued {
                state.incomplete.remove(&task.id());
                state.cancelled.remove(&task.id());
            }
            state.worker_tasks.clear();
            queued
        };

        for task in &abandoned {
            task.completion().signal(TaskOutcome::Abandoned);
        }

        let count = abandoned.len();
        self.shared.with_metrics(|m| m.tasks_abandoned += count as u64);
        info!(abandoned = count, "Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Number of queued tasks (waiting + pending), excluding executing ones.
    pub fn num_tasks(&self) -> usize {
        let state = self.shared.lock();
        state.waiting.len() + state.pending.len()
    }

    /// True if any task is waiting or pending.
    pub fn has_tasks(&self) -> bool {
        let state = self.shared.lock();
        !state.waiting.is_empty() || !state.pending.is_empty()
    }

    pub fn num_tasks_in_progress(&self) -> usize {
        self.shared.lock().worker_tasks.iter().flatten().count()
    }

    /// Worker pool size; 0 while stopped.
    pub fn num_workers(&self) -> usize {
        self.shared.lock().worker_tasks.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.lock().stats()
    }

    /// Task the given worker is executing right now.
    pub fn worker_task(&self, worker_index: usize) -> Option<TaskId> {
        self.shared
            .lock()
            .worker_tasks
            .get(worker_index)
            .copied()
            .flatten()
    }

    /// Worker executing the given task right now.
    pub fn task_worker(&self, id: TaskId) -> Option<usize> {
        self.shared
            .lock()
            .worker_tasks
            .iter()
            .position(|t| *t == Some(id))
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.shared
            .metrics
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
