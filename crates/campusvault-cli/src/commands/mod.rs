pub mod create;
pub mod list;
pub mod restore;
pub mod scheduler;

use anyhow::{Context, Result};
use campusvault_core::Snapshot;
use campusvault_service::Config;
use campusvault_storage::{BackupManager, BackupStats};
use chrono::{DateTime, Local, TimeZone};

pub(crate) fn build_manager(config: &Config) -> Result<BackupManager> {
    BackupManager::new(config.backup_settings()).context("failed to set up backup manager")
}

/// One listing line: `name  (1.25 MB, 2026-10-18 03:00:00, 3 days old)`.
pub(crate) fn describe_snapshot<Tz: TimeZone>(snapshot: &Snapshot, now: &DateTime<Tz>) -> String {
    format!(
        "{}  ({:.2} MB, {}, {} days old)",
        snapshot.name,
        snapshot.size_mb(),
        snapshot
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S"),
        snapshot.age_days(now)
    )
}

pub(crate) fn print_stats(label: &str, stats: &BackupStats) {
    println!("{label}:");
    println!(
        "  Total backups: {} ({} compressed)",
        stats.total_backups, stats.compressed_backups
    );
    println!("  Total size: {:.2} MB", stats.total_size_mb);
    if let Some(newest) = stats.newest_backup {
        println!("  Newest: {}", newest.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(oldest) = stats.oldest_backup {
        println!("  Oldest: {}", oldest.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"));
    }
}
