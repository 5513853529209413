//! Listing of snapshot artifacts in a backup directory.

use campusvault_core::snapshot::bytes_to_mb;
use campusvault_core::{CoreError, CoreResult, Snapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// Summary of a backup directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackupStats {
    pub total_backups: usize,
    pub compressed_backups: usize,
    pub total_size_bytes: u64,
    pub total_size_mb: f64,
    pub newest_backup: Option<DateTime<Utc>>,
    pub oldest_backup: Option<DateTime<Utc>>,
}

/// All snapshot artifacts in `dir`, newest first.
///
/// A missing directory has no snapshots. Hidden staging files, directories
/// and unrelated files are ignored.
///
/// # Errors
///
/// Returns `CoreError::IoError` if the directory exists but cannot be read.
pub async fn list_snapshots(dir: &Path) -> CoreResult<Vec<Snapshot>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CoreError::IoError(e)),
    };

    let mut snapshots = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        // An entry can disappear between readdir and stat (concurrent cleanup).
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if let Some(snapshot) = Snapshot::from_metadata(&path, &metadata) {
            snapshots.push(snapshot);
        }
    }

    sort_newest_first(&mut snapshots);
    Ok(snapshots)
}

/// Sort by creation time, newest first; ties broken by name, descending.
pub fn sort_newest_first(snapshots: &mut [Snapshot]) {
    snapshots.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.name.cmp(&a.name))
    });
}

/// Statistics for the snapshots in `dir`.
///
/// # Errors
///
/// Returns `CoreError::IoError` if the directory exists but cannot be read.
pub async fn stats(dir: &Path) -> CoreResult<BackupStats> {
    let snapshots = list_snapshots(dir).await?;
    Ok(summarize(&snapshots))
}

/// Aggregate statistics over `snapshots`.
#[must_use]
pub fn summarize(snapshots: &[Snapshot]) -> BackupStats {
    let total_size_bytes = snapshots.iter().map(|s| s.size_bytes).sum();

    BackupStats {
        total_backups: snapshots.len(),
        compressed_backups: snapshots.iter().filter(|s| s.compressed).count(),
        total_size_bytes,
        total_size_mb: bytes_to_mb(total_size_bytes),
        newest_backup: snapshots.iter().map(|s| s.created_at).max(),
        oldest_backup: snapshots.iter().map(|s| s.created_at).min(),
    }
}
