use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::Priority;

/// Per-priority execution counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriorityMetrics {
    /// Callable invocations, including ones that panicked.
    pub executions: u64,
    pub panics: u64,
    /// Rolling mean of callable run time.
    pub avg_duration: Duration,
}

/// Scheduler operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    pub by_priority: BTreeMap<Priority, PriorityMetrics>,
    pub tasks_submitted: u64,
    /// Removed from a queue before running, or stopped from re-arming.
    pub tasks_cancelled: u64,
    /// Interval re-arms.
    pub tasks_rescheduled: u64,
    /// Left queued at shutdown.
    pub tasks_abandoned: u64,
    /// Wall-clock time of the most recent execution.
    pub last_run: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    /// Record one callable execution.
    pub fn record_execution(&mut self, priority: Priority, duration: Duration, panicked: bool) {
        let entry = self.by_priority.entry(priority).or_default();
        entry.executions += 1;
        if panicked {
            entry.panics += 1;
        }

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        entry.avg_duration = if entry.executions == 1 {
            duration
        } else {
            let prev_nanos = entry.avg_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / entry.executions as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.last_run = Some(Utc::now());
    }

    /// Total executions across all priorities.
    pub fn total_executions(&self) -> u64 {
        self.by_priority.values().map(|m| m.executions).sum()
    }

    pub fn total_panics(&self) -> u64 {
        self.by_priority.values().map(|m| m.panics).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_execution() {
        let mut m = SchedulerMetrics::default();
        m.record_execution(Priority::High, Duration::from_millis(100), false);

        let high = &m.by_priority[&Priority::High];
        assert_eq!(high.executions, 1);
        assert_eq!(high.panics, 0);
        assert_eq!(high.avg_duration, Duration::from_millis(100));
        assert!(m.last_run.is_some());
    }

    #[test]
    fn record_multiple_executions_averages() {
        let mut m = SchedulerMetrics::default();
        m.record_execution(Priority::Normal, Duration::from_millis(100), false);
        m.record_execution(Priority::Normal, Duration::from_millis(200), true);

        let normal = &m.by_priority[&Priority::Normal];
        assert_eq!(normal.executions, 2);
        assert_eq!(normal.panics, 1);
        // Average of 100ms and 200ms = 150ms
        let avg = normal.avg_duration.as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn totals_span_priorities() {
        let mut m = SchedulerMetrics::default();
        m.record_execution(Priority::Critical, Duration::from_millis(1), true);
        m.record_execution(Priority::VeryLow, Duration::from_millis(1), false);
        assert_eq!(m.total_executions(), 2);
        assert_eq!(m.total_panics(), 1);
    }

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert!(m.by_priority.is_empty());
        assert_eq!(m.tasks_submitted, 0);
        assert!(m.last_run.is_none());
    }

    #[test]
    fn serializes_priority_keys() {
        let mut m = SchedulerMetrics::default();
        m.record_execution(Priority::Low, Duration::from_millis(3), false);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["by_priority"]["low"]["executions"], 1);
    }
}
