#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::completion::TaskOutcome;
    use crate::current::{current_task_id, current_worker_index};
    use crate::error::{SchedulerError, TaskError};
    use crate::runner::Scheduler;
    use crate::task::ThreadEntry;
    use crate::types::{Priority, SchedulerConfig, TaskId};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn config(workers: usize) -> SchedulerConfig {
        SchedulerConfig {
            worker_threads: workers,
            max_worker_threads: workers,
            poll_interval_ms: 5,
        }
    }

    fn started(workers: usize) -> Scheduler {
        Scheduler::start_new(config(workers)).unwrap()
    }

    /// Poll `cond` until it holds or `TIMEOUT` elapses.
    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    /// Occupy a worker until the returned sender is dropped or sent to.
    fn block_worker(scheduler: &Scheduler) -> (TaskId, mpsc::Sender<()>) {
        let (release, gate) = mpsc::channel::<()>();
        let handle = scheduler.schedule_once(Priority::Critical, Duration::ZERO, move || {
            let _ = gate.recv();
        });
        let id = handle.id().unwrap();
        assert!(wait_for(|| scheduler.task_worker(id).is_some()));
        (id, release)
    }

    #[test]
    fn scheduler_creation() {
        let scheduler = Scheduler::new(config(2));
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.num_workers(), 0);
        assert_eq!(scheduler.num_tasks(), 0);
        assert!(!scheduler.has_tasks());
        assert_eq!(scheduler.metrics().tasks_submitted, 0);
    }

    #[test]
    fn start_spawns_workers_and_rejects_double_start() {
        let scheduler = started(3);
        assert!(scheduler.is_running());
        assert_eq!(scheduler.num_workers(), 3);
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyRunning)));

        scheduler.stop();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.num_workers(), 0);
        // Idempotent.
        scheduler.stop();
    }

    #[test]
    fn restart_after_stop() {
        let scheduler = started(1);
        scheduler.stop();
        scheduler.start().unwrap();

        let handle = scheduler.schedule_once(Priority::Normal, Duration::ZERO, || 5);
        assert_eq!(handle.join(), Ok(5));
    }

    #[test]
    fn submission_while_stopped_is_a_noop() {
        let scheduler = Scheduler::new(config(1));

        let handle = scheduler.schedule_once(Priority::High, Duration::ZERO, || 1);
        assert!(!handle.is_valid());
        assert_eq!(handle.join(), Err(TaskError::NotScheduled));

        let id = scheduler.schedule_with_interval(
            Priority::High,
            Duration::from_millis(10),
            true,
            || true,
        );
        assert_eq!(id, None);
        assert_eq!(scheduler.num_tasks(), 0);
        assert_eq!(scheduler.metrics().tasks_submitted, 0);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let scheduler = started(1);
        let id = scheduler.schedule_with_interval(Priority::Normal, Duration::ZERO, true, || true);
        assert_eq!(id, None);
        assert_eq!(scheduler.stats().num_incomplete_tasks, 0);
    }

    #[test]
    fn once_task_returns_value() {
        let scheduler = started(2);
        let handle = scheduler.schedule_once_labeled(
            Priority::Normal,
            Duration::ZERO,
            "answer",
            || 6 * 7,
        );
        assert!(handle.is_valid());
        assert_eq!(handle.join(), Ok(42));
    }

    #[test]
    fn queued_task_introspection() {
        let scheduler = started(1);
        let handle = scheduler.schedule_once(Priority::Low, Duration::from_secs(30), || ());
        let id = handle.id().unwrap();

        assert!(scheduler.is_task_queued(id));
        assert!(scheduler.has_tasks());
        assert_eq!(scheduler.num_tasks(), 1);
        assert_eq!(scheduler.task_worker(id), None);
        let stats = scheduler.stats();
        assert_eq!(stats.num_waiting_tasks, 1);
        assert_eq!(stats.num_pending_tasks, 0);
        assert_eq!(stats.num_incomplete_tasks, 1);
        assert!(!handle.is_finished());
    }

    #[test]
    fn executing_task_introspection() {
        let scheduler = started(1);
        let (gate_id, release) = block_worker(&scheduler);

        assert_eq!(scheduler.worker_task(0), Some(gate_id));
        assert_eq!(scheduler.task_worker(gate_id), Some(0));
        assert_eq!(scheduler.num_tasks_in_progress(), 1);
        assert!(!scheduler.is_task_queued(gate_id));

        let queued = scheduler.schedule_once(Priority::Normal, Duration::ZERO, || ());
        let queued_id = queued.id().unwrap();
        assert!(wait_for(|| scheduler.stats().num_pending_tasks == 1));
        assert!(scheduler.is_task_queued(queued_id));

        release.send(()).unwrap();
        assert_eq!(queued.join(), Ok(()));
        assert!(wait_for(|| scheduler.num_tasks_in_progress() == 0));
        assert_eq!(scheduler.worker_task(0), None);
    }

    #[test]
    fn current_task_and_worker_inside_task() {
        let scheduler = started(1);
        let handle = scheduler.schedule_once(Priority::Normal, Duration::ZERO, || {
            (current_task_id(), current_worker_index())
        });
        let id = handle.id();
        let (task, worker) = handle.join().unwrap();
        assert_eq!(task, id);
        assert_eq!(worker, Some(0));
        assert_eq!(current_task_id(), None);
    }

    #[test]
    fn cancel_queued_task() {
        let scheduler = started(1);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let handle = scheduler.schedule_once(Priority::Normal, Duration::from_secs(10), move || {
            flag.store(true, Ordering::SeqCst);
        });
        let id = handle.id().unwrap();

        assert!(scheduler.cancel_task(id, false));
        assert!(!scheduler.is_task_queued(id));
        assert!(!scheduler.is_task_cancelled(id));
        assert_eq!(handle.join(), Err(TaskError::Cancelled));
        // Already terminal.
        assert!(!scheduler.cancel_task(id, true));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(scheduler.metrics().tasks_cancelled, 1);
    }

    #[test]
    fn cancel_pending_task_behind_busy_worker() {
        let scheduler = started(1);
        let (_gate, release) = block_worker(&scheduler);

        let handle = scheduler.schedule_once(Priority::Normal, Duration::ZERO, || "ran");
        let id = handle.id().unwrap();
        assert!(wait_for(|| scheduler.stats().num_pending_tasks == 1));

        assert!(scheduler.cancel_task(id, true));
        release.send(()).unwrap();
        assert_eq!(handle.join(), Err(TaskError::Cancelled));
    }

    #[test]
    fn cancel_executing_interval_task_suppresses_rearm() {
        let scheduler = started(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = mpsc::channel();
        let counter = Arc::clone(&runs);
        let id = scheduler
            .schedule_with_interval(Priority::Normal, Duration::from_millis(5), true, move || {
                if counter.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                    let _ = started_tx.send(());
                    thread::sleep(Duration::from_millis(80));
                }
                true
            })
            .unwrap();

        started_rx.recv_timeout(TIMEOUT).unwrap();
        assert!(scheduler.cancel_task(id, false));
        assert!(scheduler.is_task_cancelled(id));

        assert_eq!(scheduler.wait_until_task_complete(id), Some(TaskOutcome::Completed));
        assert!(wait_for(|| !scheduler.is_task_cancelled(id)));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!scheduler.is_task_queued(id));
        assert_eq!(scheduler.wait_until_task_complete(id), None);
    }

    #[test]
    fn cancel_and_wait_blocks_until_run_finishes() {
        let scheduler = started(1);
        let finished = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = mpsc::channel();
        let flag = Arc::clone(&finished);
        let handle = scheduler.schedule_once(Priority::Normal, Duration::ZERO, move || {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_millis(60));
            flag.store(true, Ordering::SeqCst);
        });
        let id = handle.id().unwrap();

        started_rx.recv_timeout(TIMEOUT).unwrap();
        assert!(scheduler.cancel_task(id, true));
        assert!(finished.load(Ordering::SeqCst));
        // The run was already underway, so it still completes normally.
        assert_eq!(handle.join(), Ok(()));
    }

    #[test]
    fn unknown_ids_never_block() {
        let scheduler = started(1);
        let never_issued = TaskId::next();
        assert!(!scheduler.cancel_task(never_issued, true));
        assert_eq!(scheduler.wait_until_task_complete(never_issued), None);
        assert!(!scheduler.is_task_queued(never_issued));
        assert!(!scheduler.is_task_cancelled(never_issued));
        assert_eq!(scheduler.task_worker(never_issued), None);
        assert_eq!(scheduler.worker_task(99), None);
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let scheduler = started(1);
        let bad = scheduler.schedule_once(Priority::High, Duration::ZERO, || -> u32 {
            panic!("decoder exploded");
        });
        assert_eq!(
            bad.join(),
            Err(TaskError::Panicked("decoder exploded".to_string()))
        );

        let good = scheduler.schedule_once(Priority::High, Duration::ZERO, || 1u32);
        assert_eq!(good.join(), Ok(1));

        scheduler.stop();
        let metrics = scheduler.metrics();
        assert_eq!(metrics.by_priority[&Priority::High].executions, 2);
        assert_eq!(metrics.total_panics(), 1);
    }

    #[test]
    fn panicking_interval_task_is_not_rearmed() {
        let scheduler = started(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let id = scheduler
            .schedule_with_interval(Priority::Normal, Duration::from_millis(5), true, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("interval task failure");
            })
            .unwrap();

        assert!(wait_for(|| scheduler.stats().num_incomplete_tasks == 0));
        thread::sleep(Duration::from_millis(40));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_task_queued(id));
    }

    #[test]
    fn stop_lets_executing_task_finish() {
        let scheduler = started(1);
        let finished = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = mpsc::channel();
        let flag = Arc::clone(&finished);
        let handle = scheduler.schedule_once(Priority::Normal, Duration::ZERO, move || {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_millis(80));
            flag.store(true, Ordering::SeqCst);
        });

        started_rx.recv_timeout(TIMEOUT).unwrap();
        scheduler.stop();
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(handle.join(), Ok(()));
    }

    #[test]
    fn stop_abandons_waiting_tasks_and_releases_waiters() {
        let scheduler = Arc::new(started(1));
        let handle = scheduler.schedule_once(Priority::Normal, Duration::from_secs(30), || ());
        let id = handle.id().unwrap();

        let waiter = {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || scheduler.wait_until_task_complete(id))
        };
        assert!(wait_for(|| scheduler.is_task_queued(id)));
        thread::sleep(Duration::from_millis(50));

        scheduler.stop();
        assert_eq!(waiter.join().unwrap(), Some(TaskOutcome::Abandoned));
        assert_eq!(handle.join(), Err(TaskError::Abandoned));
        assert_eq!(scheduler.wait_until_task_complete(id), None);
        assert_eq!(scheduler.metrics().tasks_abandoned, 1);
    }

    #[test]
    fn stop_abandons_pending_tasks() {
        let scheduler = started(1);
        let (_gate, release) = block_worker(&scheduler);
        let runs = Arc::new(AtomicUsize::new(0));

        let pending: Vec<_> = (0..20)
            .map(|_| {
                let counter = Arc::clone(&runs);
                scheduler.schedule_once(Priority::Normal, Duration::ZERO, move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(25));
                })
            })
            .collect();
        assert!(wait_for(|| scheduler.stats().num_pending_tasks == 20));

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            release.send(()).unwrap();
        });
        let started_at = Instant::now();
        scheduler.stop();
        releaser.join().unwrap();

        assert!(started_at.elapsed() < Duration::from_millis(400));
        for handle in pending {
            assert_eq!(handle.join(), Err(TaskError::Abandoned));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.metrics().tasks_abandoned, 20);
    }

    #[test]
    fn stop_from_task_during_shutdown_does_not_deadlock() {
        let scheduler = Arc::new(started(1));
        let inner = Arc::clone(&scheduler);
        let (started_tx, started_rx) = mpsc::channel();
        let handle = scheduler.schedule_once(Priority::Normal, Duration::ZERO, move || {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_millis(100));
            inner.stop();
        });
        started_rx.recv_timeout(TIMEOUT).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let outer = Arc::clone(&scheduler);
        let stopper = thread::spawn(move || {
            outer.stop();
            let _ = done_tx.send(());
        });

        done_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("outer stop blocked on the task's nested stop");
        stopper.join().unwrap();
        assert_eq!(handle.join(), Ok(()));
        assert!(!scheduler.is_running());
    }

    #[test]
    fn stop_from_task_then_restart_keeps_old_worker_out() {
        let scheduler = Arc::new(started(1));
        let inner = Arc::clone(&scheduler);
        let stopper = scheduler.schedule_once(Priority::Normal, Duration::ZERO, move || {
            inner.stop();
        });
        assert_eq!(stopper.join(), Ok(()));
        assert!(!scheduler.is_running());

        scheduler.start().unwrap();
        let (_gate, release) = block_worker(&scheduler);

        let queued = scheduler.schedule_once(Priority::Normal, Duration::ZERO, || ());
        assert!(wait_for(|| scheduler.stats().num_pending_tasks == 1));
        // Only the new worker may serve this run, and it is blocked.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(scheduler.stats().num_pending_tasks, 1);
        assert_eq!(scheduler.num_workers(), 1);

        release.send(()).unwrap();
        assert_eq!(queued.join(), Ok(()));
        scheduler.stop();
    }

    #[test]
    fn waiting_on_self_does_not_deadlock() {
        let scheduler = Arc::new(started(1));
        let inner = Arc::clone(&scheduler);
        let handle = scheduler.schedule_once(Priority::Normal, Duration::ZERO, move || {
            let me = current_task_id().unwrap();
            let waited = inner.wait_until_task_complete(me);
            let cancelled = inner.cancel_task(me, true);
            (waited, cancelled)
        });
        let (waited, cancelled) = handle.join().unwrap();
        assert_eq!(waited, None);
        assert!(cancelled);
        scheduler.stop();
    }

    struct FlagEntry {
        ran: AtomicBool,
    }

    impl ThreadEntry for FlagEntry {
        fn entry(&self) {
            self.ran.store(true, Ordering::SeqCst);
        }

        fn debug_name(&self) -> String {
            "flag-entry".to_string()
        }
    }

    #[test]
    fn thread_entry_runs_on_worker() {
        let scheduler = started(1);
        let entry = Arc::new(FlagEntry {
            ran: AtomicBool::new(false),
        });
        let id = scheduler
            .schedule_thread_entry(entry.clone(), Priority::High, Duration::from_millis(5))
            .unwrap();

        scheduler.wait_until_task_complete(id);
        assert!(wait_for(|| entry.ran.load(Ordering::SeqCst)));
    }

    #[test]
    fn interval_tasks_counted_in_stats() {
        let scheduler = started(1);
        let id = scheduler
            .schedule_with_interval_labeled(
                Priority::VeryLow,
                Duration::from_secs(60),
                false,
                "thumbnail-cache-sweep",
                || true,
            )
            .unwrap();

        let stats = scheduler.stats();
        assert_eq!(stats.num_interval_tasks, 1);
        assert_eq!(stats.num_queued_tasks, 1);
        assert!(scheduler.cancel_task(id, false));
        assert_eq!(scheduler.stats().num_interval_tasks, 0);
    }

    #[test]
    fn metrics_track_submissions_and_reschedules() {
        let scheduler = started(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        scheduler
            .schedule_with_interval(Priority::Low, Duration::from_millis(5), true, move || {
                counter.fetch_add(1, Ordering::SeqCst) + 1 < 3
            })
            .unwrap();

        assert!(wait_for(|| runs.load(Ordering::SeqCst) == 3));
        assert!(wait_for(|| scheduler.stats().num_incomplete_tasks == 0));
        scheduler.stop();

        let metrics = scheduler.metrics();
        assert_eq!(metrics.tasks_submitted, 1);
        assert_eq!(metrics.tasks_rescheduled, 2);
        assert_eq!(metrics.by_priority[&Priority::Low].executions, 3);
        assert!(metrics.last_run.is_some());
    }
}
