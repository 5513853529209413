use super::{describe_snapshot, print_stats};
use anyhow::{Context, Result};
use campusvault_core::Snapshot;
use campusvault_service::Config;
use campusvault_storage::{BackupManager, RetentionBucket};
use chrono::Local;

/// Snapshots shown after a backup.
const RECENT_LIMIT: usize = 5;

/// Run one backup cycle and print before/after statistics.
pub async fn run(config: &Config, no_compress: bool) -> Result<()> {
    let mut settings = config.backup_settings();
    if no_compress {
        settings.compress = false;
    }
    let manager = BackupManager::new(settings).context("failed to set up backup manager")?;

    println!("Database: {}", manager.settings().database_path.display());
    println!("Backup directory: {}", manager.settings().backup_dir.display());
    println!();

    let before = manager
        .stats()
        .await
        .context("failed to read backup directory")?;
    print_stats("Before backup", &before);
    println!();

    let report = manager
        .run_backup_cycle()
        .await
        .context("backup failed")?;

    println!(
        "✅ Backup created: {} ({:.2} MB)",
        report.snapshot.name,
        report.snapshot.size_mb()
    );
    println!(
        "Retention: kept {} (daily {}, weekly {}, monthly {}), deleted {}",
        report.retention.kept.len(),
        report.retention.kept_in(RetentionBucket::Daily),
        report.retention.kept_in(RetentionBucket::Weekly),
        report.retention.kept_in(RetentionBucket::Monthly),
        report.retention.deleted.len()
    );
    for failure in &report.retention.failed {
        println!(
            "⚠️  Could not delete {}: {}",
            failure.snapshot.name, failure.error
        );
    }
    println!();

    print_stats("After backup", &report.stats);
    println!();

    let snapshots = manager
        .list_backups()
        .await
        .context("failed to list backups")?;
    println!("Recent backups:");
    for line in recent_lines(&snapshots, RECENT_LIMIT) {
        println!("  {line}");
    }

    Ok(())
}

fn recent_lines(snapshots: &[Snapshot], limit: usize) -> Vec<String> {
    let now = Local::now();
    let mut lines: Vec<String> = snapshots
        .iter()
        .take(limit)
        .map(|snapshot| describe_snapshot(snapshot, &now))
        .collect();
    if snapshots.len() > limit {
        lines.push(format!("... and {} more", snapshots.len() - limit));
    }
    lines
}
