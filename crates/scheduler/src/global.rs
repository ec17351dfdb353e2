//! Process-wide scheduler instance.

use std::sync::OnceLock;

use crate::error::SchedulerError;
use crate::runner::Scheduler;
use crate::types::SchedulerConfig;

static GLOBAL: OnceLock<Scheduler> = OnceLock::new();

/// Install and start the process-wide scheduler. Fails if one is already installed.
///
/// The instance lives until process exit; call `global().stop()` during
/// application shutdown to join its threads. If starting fails the instance
/// stays installed in the stopped state and `start` may be retried.
pub fn install_global(config: SchedulerConfig) -> Result<&'static Scheduler, SchedulerError> {
    let mut installed = false;
    let scheduler = GLOBAL.get_or_init(|| {
        installed = true;
        Scheduler::new(config)
    });
    if !installed {
        return Err(SchedulerError::GlobalAlreadyInstalled);
    }
    scheduler.start()?;
    Ok(scheduler)
}

/// The process-wide scheduler, if installed.
pub fn global() -> Option<&'static Scheduler> {
    GLOBAL.get()
}
