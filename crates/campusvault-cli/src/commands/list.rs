use super::{build_manager, describe_snapshot, print_stats};
use anyhow::{Context, Result};
use campusvault_service::Config;
use campusvault_storage::inventory;
use chrono::Local;

/// Print every snapshot, newest first, followed by directory statistics.
pub async fn run(config: &Config, json: bool) -> Result<()> {
    let manager = build_manager(config)?;
    let snapshots = manager
        .list_backups()
        .await
        .context("failed to list backups")?;
    let stats = inventory::summarize(&snapshots);

    if json {
        let listing = serde_json::json!({
            "backup_dir": manager.settings().backup_dir,
            "snapshots": snapshots,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("Backups in {}:", manager.settings().backup_dir.display());
    if snapshots.is_empty() {
        println!("  (none)");
    } else {
        let now = Local::now();
        for (index, snapshot) in snapshots.iter().enumerate() {
            println!("  {:>3}. {}", index + 1, describe_snapshot(snapshot, &now));
        }
    }
    println!();
    print_stats("Summary", &stats);

    Ok(())
}
