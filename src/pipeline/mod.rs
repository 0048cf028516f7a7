//! Pipeline orchestration for hour processing.

mod metrics;
mod scheduler;

pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use scheduler::{
    Scheduler, SchedulerConfig, SchedulerStats, TaskResult, UnitError, MAX_WORKERS,
};
