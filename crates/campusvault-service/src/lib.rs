//! Service layer for campusvault.
//! Configuration, the backup scheduler and the scheduled backup job.

mod config;
mod job;
pub mod scheduler;

pub use config::{
    BackupConfig, Config, ConfigError, DatabaseConfig, LoggingConfig, RetentionConfig,
    SchedulerConfig, DEFAULT_CONFIG_FILE,
};
pub use job::BackupJob;
pub use scheduler::{
    ManualTimer, NextRun, ScheduledJob, Scheduler, SchedulerState, SchedulerStats, SystemTimer,
    Timer, Trigger,
};
