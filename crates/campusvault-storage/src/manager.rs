use crate::compression::{CompressionConfig, Compressor, GzipCompressor};
use crate::engine::SnapshotEngine;
use crate::inventory::{self, BackupStats};
use crate::restore::{RestoreOperator, RestoreOutcome};
use crate::retention::{RetentionManager, RetentionPolicy, RetentionReport};
use campusvault_core::{CoreError, CoreResult, Snapshot};
use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where and how backups of one database are kept.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    /// Live database file.
    pub database_path: PathBuf,
    /// Directory holding the snapshots.
    pub backup_dir: PathBuf,
    /// Compress snapshots taken by the backup cycle.
    pub compress: bool,
    pub compression: CompressionConfig,
    pub retention: RetentionPolicy,
}

impl BackupSettings {
    pub fn new(database_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            backup_dir: backup_dir.into(),
            compress: true,
            compression: CompressionConfig::default(),
            retention: RetentionPolicy::default(),
        }
    }
}

/// One create-then-prune run.
#[derive(Debug, Clone, Serialize)]
pub struct BackupCycleReport {
    pub snapshot: Snapshot,
    pub retention: RetentionReport,
    pub stats: BackupStats,
}

/// Backup operations for a single configured database.
///
/// # Example
///
/// ```no_run
/// use campusvault_storage::{BackupManager, BackupSettings};
///
/// # async fn example() -> campusvault_core::CoreResult<()> {
/// let manager = BackupManager::new(BackupSettings::new("instance/database.db", "backups"))?;
/// let report = manager.run_backup_cycle().await?;
/// println!("created {}", report.snapshot.name);
/// # Ok(())
/// # }
/// ```
pub struct BackupManager {
    settings: BackupSettings,
    engine: SnapshotEngine,
    retention: RetentionManager,
    restorer: RestoreOperator,
}

impl BackupManager {
    /// Create new backup manager
    ///
    /// # Errors
    ///
    /// Returns error if the compression level or retention policy is invalid
    pub fn new(settings: BackupSettings) -> CoreResult<Self> {
        let compressor: Arc<dyn Compressor> = Arc::new(GzipCompressor::new(settings.compression)?);
        Self::with_compressor(settings, compressor)
    }

    /// Create a manager using a custom compressor.
    ///
    /// # Errors
    ///
    /// Returns error if the retention policy is invalid
    pub fn with_compressor(
        settings: BackupSettings,
        compressor: Arc<dyn Compressor>,
    ) -> CoreResult<Self> {
        Ok(Self {
            retention: RetentionManager::new(settings.retention)?,
            engine: SnapshotEngine::new(Arc::clone(&compressor)),
            restorer: RestoreOperator::new(compressor),
            settings,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    /// Snapshot the configured database.
    pub async fn create_backup(&self, compress: bool) -> CoreResult<Snapshot> {
        self.engine
            .create_snapshot(&self.settings.database_path, &self.settings.backup_dir, compress)
            .await
    }

    /// Prune the backup directory against the local clock.
    pub async fn apply_retention(&self) -> RetentionReport {
        self.apply_retention_at(&Local::now()).await
    }

    /// Prune the backup directory as of `now`.
    pub async fn apply_retention_at<Tz>(&self, now: &DateTime<Tz>) -> RetentionReport
    where
        Tz: TimeZone + Send + Sync,
        Tz::Offset: Send + Sync,
    {
        self.retention.apply(&self.settings.backup_dir, now).await
    }

    /// Snapshots on disk, newest first.
    pub async fn list_backups(&self) -> CoreResult<Vec<Snapshot>> {
        inventory::list_snapshots(&self.settings.backup_dir).await
    }

    pub async fn stats(&self) -> CoreResult<BackupStats> {
        inventory::stats(&self.settings.backup_dir).await
    }

    /// Look up a snapshot by file name.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` unless `name` is a snapshot file directly
    /// inside the backup directory.
    pub async fn find_backup(&self, name: &str) -> CoreResult<Snapshot> {
        self.list_backups()
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| CoreError::not_found("snapshot", name))
    }

    /// Replace the configured database with `snapshot`.
    pub async fn restore(&self, snapshot: &Path) -> CoreResult<RestoreOutcome> {
        self.restorer
            .restore(snapshot, &self.settings.database_path)
            .await
    }

    /// Create a snapshot, prune old ones, then summarize.
    ///
    /// Retention only runs once the new snapshot exists, so it is always
    /// among the candidates to keep.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::BackupFailed` if the snapshot cannot be taken; the
    /// backup directory is not pruned in that case. Failed deletions are
    /// reported in the retention report, not as an error, and a directory
    /// that cannot be re-read afterwards falls back to stats over the
    /// snapshots retention left in place.
    pub async fn run_backup_cycle(&self) -> CoreResult<BackupCycleReport> {
        let snapshot = self.create_backup(self.settings.compress).await?;
        let retention = self.apply_retention().await;
        if let Some(err) = retention.cleanup_error() {
            tracing::warn!(error = %err, "Retention pass left snapshots behind");
        }
        let stats = match self.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot read backup directory for stats");
                retained_stats(&snapshot, &retention)
            }
        };

        tracing::info!(
            snapshot = %snapshot.name,
            total_backups = stats.total_backups,
            total_size_mb = stats.total_size_mb,
            deleted = retention.deleted.len(),
            "Backup cycle complete"
        );

        Ok(BackupCycleReport {
            snapshot,
            retention,
            stats,
        })
    }
}

/// Stats over what a retention pass left on disk, including `snapshot`.
fn retained_stats(snapshot: &Snapshot, retention: &RetentionReport) -> BackupStats {
    let mut retained: Vec<Snapshot> = retention
        .kept
        .iter()
        .map(|d| d.snapshot.clone())
        .chain(retention.failed.iter().map(|f| f.snapshot.clone()))
        .collect();
    if !retained.iter().any(|s| s.name == snapshot.name) {
        retained.push(snapshot.clone());
    }
    inventory::summarize(&retained)
}
