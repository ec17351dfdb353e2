mod cli;
mod config;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use ivie_scheduler::{
    Priority, Scheduler, SchedulerMetrics, SchedulerStats, TaskError, TaskHandle, TaskId,
};

use crate::cli::CliArgs;
use crate::config::CliConfig;

/// What the run printed at the end.
#[derive(Debug, Serialize)]
struct Report {
    once_completed: u64,
    once_failed: u64,
    interval_runs: u64,
    stats_before_stop: SchedulerStats,
    stats_after_stop: SchedulerStats,
    metrics: SchedulerMetrics,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    // Load config
    let config = CliConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    let scheduler_config = config.resolve_scheduler(&args);

    let scheduler = Scheduler::start_new(scheduler_config).context("failed to start scheduler")?;
    info!(
        workers = scheduler.num_workers(),
        max_workers = scheduler.config().max_worker_threads,
        poll_ms = scheduler.config().poll_interval_ms,
        once = args.once_tasks,
        interval = args.interval_tasks,
        "Submitting workload"
    );

    let work = Duration::from_millis(args.work_ms);
    let run_for = Duration::from_secs(args.duration_secs);

    let handles = submit_once_tasks(&scheduler, &args, work, run_for);
    let interval_runs = Arc::new(AtomicU64::new(0));
    let interval_ids = submit_interval_tasks(&scheduler, &args, work, &interval_runs);

    thread::sleep(run_for);

    for id in &interval_ids {
        scheduler.cancel_task(*id, true);
    }
    let stats_before_stop = scheduler.stats();
    scheduler.stop();

    let mut once_completed = 0;
    let mut once_failed = 0;
    for handle in handles {
        match handle.join() {
            Ok(()) => once_completed += 1,
            Err(TaskError::Abandoned) => once_failed += 1,
            Err(e) => {
                warn!(error = %e, "Task did not complete");
                once_failed += 1;
            }
        }
    }

    let report = Report {
        once_completed,
        once_failed,
        interval_runs: interval_runs.load(Ordering::Relaxed),
        stats_before_stop,
        stats_after_stop: scheduler.stats(),
        metrics: scheduler.metrics(),
    };
    print_report(&report, args.json)
}

/// One-shot tasks spread over every priority, with delays inside the first
/// half of the run so most of them finish before shutdown.
fn submit_once_tasks(
    scheduler: &Scheduler,
    args: &CliArgs,
    work: Duration,
    run_for: Duration,
) -> Vec<TaskHandle<()>> {
    let spread_ms = (run_for.as_millis() / 2).max(1) as u64;
    (0..args.once_tasks)
        .map(|i| {
            let priority = Priority::ALL[i % Priority::ALL.len()];
            let delay = Duration::from_millis((i as u64 * 7) % spread_ms);
            scheduler.schedule_once_labeled(priority, delay, format!("once-{i}"), move || {
                thread::sleep(work);
            })
        })
        .collect()
}

fn submit_interval_tasks(
    scheduler: &Scheduler,
    args: &CliArgs,
    work: Duration,
    runs: &Arc<AtomicU64>,
) -> Vec<TaskId> {
    let interval = Duration::from_millis(args.interval_ms);
    (0..args.interval_tasks)
        .filter_map(|i| {
            let runs = Arc::clone(runs);
            let priority = Priority::ALL[(i + 1) % Priority::ALL.len()];
            scheduler.schedule_with_interval_labeled(
                priority,
                interval,
                i % 2 == 0,
                format!("interval-{i}"),
                move || {
                    thread::sleep(work);
                    runs.fetch_add(1, Ordering::Relaxed);
                    true
                },
            )
        })
        .collect()
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(report).context("failed to serialize report")?;
        println!("{out}");
        return Ok(());
    }

    println!("once tasks:     {} completed, {} not run", report.once_completed, report.once_failed);
    println!("interval runs:  {}", report.interval_runs);
    println!("before stop:    {:?}", report.stats_before_stop);
    println!("after stop:     {:?}", report.stats_after_stop);
    println!(
        "submitted={} cancelled={} rescheduled={} abandoned={}",
        report.metrics.tasks_submitted,
        report.metrics.tasks_cancelled,
        report.metrics.tasks_rescheduled,
        report.metrics.tasks_abandoned
    );
    for (priority, m) in &report.metrics.by_priority {
        println!(
            "  {:<9} executions={:<6} panics={:<3} avg={:?}",
            priority.as_str(),
            m.executions,
            m.panics,
            m.avg_duration
        );
    }
    Ok(())
}
