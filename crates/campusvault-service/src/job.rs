//! The scheduled backup job: one backup cycle per trigger.

use crate::scheduler::ScheduledJob;
use async_trait::async_trait;
use campusvault_core::CoreResult;
use campusvault_storage::{BackupCycleReport, BackupManager};
use std::sync::Arc;

/// Runs [`BackupManager::run_backup_cycle`] and logs its summary.
pub struct BackupJob {
    manager: Arc<BackupManager>,
}

impl BackupJob {
    pub fn new(manager: Arc<BackupManager>) -> Self {
        Self { manager }
    }

    /// Run one cycle outside the scheduler (run-on-start).
    pub async fn run_once(&self) -> CoreResult<BackupCycleReport> {
        let report = self.manager.run_backup_cycle().await?;
        log_summary(&report);
        Ok(report)
    }
}

#[async_trait]
impl ScheduledJob for BackupJob {
    async fn run(&self) -> CoreResult<()> {
        self.run_once().await.map(|_| ())
    }
}

fn log_summary(report: &BackupCycleReport) {
    tracing::info!(
        snapshot = %report.snapshot.name,
        size_mb = report.snapshot.size_mb(),
        compressed = report.snapshot.compressed,
        kept = report.retention.kept.len(),
        deleted = report.retention.deleted.len(),
        failed_deletions = report.retention.failed.len(),
        total_backups = report.stats.total_backups,
        total_size_mb = report.stats.total_size_mb,
        "Scheduled backup summary"
    );
}
