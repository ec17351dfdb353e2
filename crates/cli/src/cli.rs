use clap::Parser;

/// Background task scheduler demo driver.
///
/// Starts a scheduler, submits a mixed workload across every priority,
/// lets it run for a while and prints the resulting stats and metrics.
#[derive(Parser, Debug)]
#[command(name = "ivie-sched", about = "Run a workload through the ivie task scheduler")]
pub struct CliArgs {
    /// Path to config file (default: ./ivie.toml)
    #[arg(long, env = "IVIE_CONFIG")]
    pub config: Option<String>,

    /// Worker threads to start; 0 uses the hardware thread count
    #[arg(long, env = "IVIE_WORKERS")]
    pub workers: Option<usize>,

    /// Upper bound on worker threads
    #[arg(long, env = "IVIE_MAX_WORKERS")]
    pub max_workers: Option<usize>,

    /// Dispatcher poll interval in milliseconds
    #[arg(long, env = "IVIE_POLL_MS")]
    pub poll_ms: Option<u64>,

    /// One-shot tasks to submit
    #[arg(long, default_value = "200")]
    pub once_tasks: usize,

    /// Interval tasks to submit
    #[arg(long, default_value = "4")]
    pub interval_tasks: usize,

    /// Interval between runs of each interval task, in milliseconds
    #[arg(long, default_value = "50")]
    pub interval_ms: u64,

    /// How long to let the workload run before shutting down
    #[arg(long, default_value = "2")]
    pub duration_secs: u64,

    /// Simulated work per task, in milliseconds
    #[arg(long, default_value = "2")]
    pub work_ms: u64,

    /// Print the report as JSON instead of plain text
    #[arg(long)]
    pub json: bool,
}
