//! Restore a snapshot over the live database.
//!
//! The snapshot is first materialized next to the live file under a hidden
//! staging name and checked for a SQLite header. Only then is the current
//! live file copied aside to `<live>.before_restore` and the staged file
//! renamed over it. Any failure before the rename leaves the live database
//! exactly as it was.

use crate::compression::{Compressor, GzipCompressor};
use campusvault_core::snapshot::SnapshotName;
use campusvault_core::{CoreError, CoreResult};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

/// Suffix of the single-slot safety copy of the replaced database.
pub const SAFETY_COPY_SUFFIX: &str = ".before_restore";

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// Result of a successful restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreOutcome {
    /// Snapshot that was restored.
    pub snapshot: PathBuf,
    /// Live database path, now holding the snapshot contents.
    pub live: PathBuf,
    /// Copy of the previous live database, if there was one.
    pub safety_copy: Option<PathBuf>,
    /// Size of the restored database.
    pub restored_bytes: u64,
}

/// Replaces a live database file with the contents of a snapshot.
pub struct RestoreOperator {
    compressor: Arc<dyn Compressor>,
}

impl Default for RestoreOperator {
    fn default() -> Self {
        Self::new(Arc::new(GzipCompressor::default()))
    }
}

impl RestoreOperator {
    pub fn new(compressor: Arc<dyn Compressor>) -> Self {
        Self { compressor }
    }

    /// Restore `snapshot` over `live`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::RestoreFailed` if the snapshot is missing or
    /// unreadable, decompression fails, the result is not a SQLite database,
    /// or the safety copy or final swap fails. The live database is unchanged
    /// in every one of those cases.
    pub async fn restore(&self, snapshot: &Path, live: &Path) -> CoreResult<RestoreOutcome> {
        match tokio::fs::metadata(snapshot).await {
            Ok(metadata) if metadata.is_file() => {}
            _ => {
                return Err(CoreError::restore_failed(format!(
                    "snapshot {} does not exist",
                    snapshot.display()
                )))
            }
        }

        if let Some(parent) = live.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CoreError::restore_failed(format!(
                    "cannot create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        tracing::info!(
            snapshot = %snapshot.display(),
            live = %live.display(),
            "Restoring snapshot"
        );

        let staging = staging_path(live);
        let result = self.swap_in(snapshot, live, &staging).await;
        if result.is_err() {
            discard(&staging).await;
        }
        let outcome = result?;

        move_sidecars(live).await;

        tracing::info!(
            live = %live.display(),
            restored_bytes = outcome.restored_bytes,
            safety_copy = ?outcome.safety_copy,
            "Restore complete"
        );
        Ok(outcome)
    }

    async fn swap_in(
        &self,
        snapshot: &Path,
        live: &Path,
        staging: &Path,
    ) -> CoreResult<RestoreOutcome> {
        let name = snapshot
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if SnapshotName::is_compressed(&name) {
            self.compressor
                .decompress(snapshot, staging)
                .await
                .map_err(|e| CoreError::restore_failed(e.to_string()))?;
        } else {
            tokio::fs::copy(snapshot, staging).await.map_err(|e| {
                CoreError::restore_failed(format!("cannot read {}: {e}", snapshot.display()))
            })?;
        }

        verify_sqlite_header(staging).await?;

        let safety_copy = if path_exists(live).await {
            let target = safety_copy_path(live);
            tokio::fs::copy(live, &target).await.map_err(|e| {
                CoreError::restore_failed(format!(
                    "cannot write safety copy {}: {e}",
                    target.display()
                ))
            })?;
            tracing::info!(path = %target.display(), "Saved current database");
            Some(target)
        } else {
            tracing::info!(live = %live.display(), "No live database, skipping safety copy");
            None
        };

        tokio::fs::rename(staging, live).await.map_err(|e| {
            CoreError::restore_failed(format!("cannot replace {}: {e}", live.display()))
        })?;

        let restored_bytes = tokio::fs::metadata(live)
            .await
            .map(|m| m.len())
            .unwrap_or_default();

        Ok(RestoreOutcome {
            snapshot: snapshot.to_path_buf(),
            live: live.to_path_buf(),
            safety_copy,
            restored_bytes,
        })
    }
}

/// `<live>.before_restore`
#[must_use]
pub fn safety_copy_path(live: &Path) -> PathBuf {
    with_suffix(live, SAFETY_COPY_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn staging_path(live: &Path) -> PathBuf {
    let name = live
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    live.with_file_name(format!(".{name}.restore-{}", Uuid::new_v4()))
}

async fn verify_sqlite_header(path: &Path) -> CoreResult<()> {
    match read_header(path).await {
        Ok(header) if &header == SQLITE_HEADER => Ok(()),
        Ok(_) => Err(CoreError::restore_failed(
            "snapshot is not a SQLite database",
        )),
        Err(e) => Err(CoreError::restore_failed(format!(
            "snapshot is too short to be a SQLite database: {e}"
        ))),
    }
}

async fn read_header(path: &Path) -> std::io::Result<[u8; 16]> {
    let mut header = [0u8; 16];
    let mut file = tokio::fs::File::open(path).await?;
    file.read_exact(&mut header).await?;
    Ok(header)
}

/// A journal left by the replaced database must not be replayed into the
/// restored one.
async fn move_sidecars(live: &Path) {
    let wal = with_suffix(live, "-wal");
    if path_exists(&wal).await {
        let target = with_suffix(&safety_copy_path(live), "-wal");
        if let Err(e) = tokio::fs::rename(&wal, &target).await {
            tracing::warn!(path = %wal.display(), error = %e, "Failed to move stale WAL journal");
        }
    }

    let shm = with_suffix(live, "-shm");
    if let Err(e) = tokio::fs::remove_file(&shm).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %shm.display(), error = %e, "Failed to remove stale shared-memory file");
        }
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove staged restore file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_database(tag: &str) -> Vec<u8> {
        let mut bytes = SQLITE_HEADER.to_vec();
        bytes.extend_from_slice(tag.as_bytes());
        bytes.extend(std::iter::repeat(0u8).take(4096));
        bytes
    }

    fn visible_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_restore_uncompressed_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("database.db");
        let snapshot = dir.path().join("database_backup_20261018_030000.db");
        std::fs::write(&live, fake_database("live")).unwrap();
        std::fs::write(&snapshot, fake_database("snapshot")).unwrap();

        let outcome = RestoreOperator::default()
            .restore(&snapshot, &live)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&live).unwrap(), fake_database("snapshot"));
        let safety = outcome.safety_copy.unwrap();
        assert_eq!(safety, dir.path().join("database.db.before_restore"));
        assert_eq!(std::fs::read(&safety).unwrap(), fake_database("live"));
        assert!(snapshot.exists(), "snapshot must not be consumed");
    }

    #[tokio::test]
    async fn test_restore_compressed_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("database.db");
        let raw = dir.path().join("database_backup_20261018_030000.db");
        std::fs::write(&live, fake_database("live")).unwrap();
        std::fs::write(&raw, fake_database("snapshot")).unwrap();
        let compressed = GzipCompressor::default().compress(&raw).await.unwrap();

        RestoreOperator::default()
            .restore(&compressed, &live)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&live).unwrap(), fake_database("snapshot"));
        assert_eq!(
            visible_entries(dir.path()),
            vec![
                "database.db",
                "database.db.before_restore",
                "database_backup_20261018_030000.db.gz",
            ]
        );
    }

    #[tokio::test]
    async fn test_restore_without_live_database() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("instance").join("database.db");
        let snapshot = dir.path().join("database_backup_20261018_030000.db");
        std::fs::write(&snapshot, fake_database("snapshot")).unwrap();

        let outcome = RestoreOperator::default()
            .restore(&snapshot, &live)
            .await
            .unwrap();

        assert!(outcome.safety_copy.is_none());
        assert!(!safety_copy_path(&live).exists());
        assert_eq!(std::fs::read(&live).unwrap(), fake_database("snapshot"));
    }

    #[tokio::test]
    async fn test_safety_copy_is_single_slot() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("database.db");
        let first = dir.path().join("database_backup_20261017_030000.db");
        let second = dir.path().join("database_backup_20261018_030000.db");
        std::fs::write(&live, fake_database("live")).unwrap();
        std::fs::write(&first, fake_database("first")).unwrap();
        std::fs::write(&second, fake_database("second")).unwrap();

        let operator = RestoreOperator::default();
        operator.restore(&first, &live).await.unwrap();
        operator.restore(&second, &live).await.unwrap();

        assert_eq!(std::fs::read(&live).unwrap(), fake_database("second"));
        assert_eq!(
            std::fs::read(safety_copy_path(&live)).unwrap(),
            fake_database("first")
        );
    }

    #[tokio::test]
    async fn test_missing_snapshot_leaves_live_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("database.db");
        std::fs::write(&live, fake_database("live")).unwrap();

        let err = RestoreOperator::default()
            .restore(&dir.path().join("database_backup_missing.db"), &live)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::RestoreFailed { .. }));
        assert_eq!(std::fs::read(&live).unwrap(), fake_database("live"));
        assert_eq!(visible_entries(dir.path()), vec!["database.db"]);
    }

    #[tokio::test]
    async fn test_corrupt_archive_leaves_live_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("database.db");
        let snapshot = dir.path().join("database_backup_20261018_030000.db.gz");
        std::fs::write(&live, fake_database("live")).unwrap();
        std::fs::write(&snapshot, b"\x1f\x8b definitely not a gzip stream").unwrap();

        let err = RestoreOperator::default()
            .restore(&snapshot, &live)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::RestoreFailed { .. }));
        assert_eq!(std::fs::read(&live).unwrap(), fake_database("live"));
        assert_eq!(
            visible_entries(dir.path()),
            vec!["database.db", "database_backup_20261018_030000.db.gz"]
        );
    }

    #[tokio::test]
    async fn test_non_database_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("database.db");
        let snapshot = dir.path().join("database_backup_20261018_030000.db");
        std::fs::write(&live, fake_database("live")).unwrap();
        std::fs::write(&snapshot, b"plain text, not sqlite").unwrap();

        let err = RestoreOperator::default()
            .restore(&snapshot, &live)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::RestoreFailed { .. }));
        assert_eq!(std::fs::read(&live).unwrap(), fake_database("live"));
        assert!(!safety_copy_path(&live).exists());
    }

    #[tokio::test]
    async fn test_stale_wal_moves_with_safety_copy() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("database.db");
        let snapshot = dir.path().join("database_backup_20261018_030000.db");
        std::fs::write(&live, fake_database("live")).unwrap();
        std::fs::write(dir.path().join("database.db-wal"), b"wal frames").unwrap();
        std::fs::write(dir.path().join("database.db-shm"), b"shm").unwrap();
        std::fs::write(&snapshot, fake_database("snapshot")).unwrap();

        RestoreOperator::default()
            .restore(&snapshot, &live)
            .await
            .unwrap();

        assert!(!dir.path().join("database.db-wal").exists());
        assert!(!dir.path().join("database.db-shm").exists());
        assert_eq!(
            std::fs::read(dir.path().join("database.db.before_restore-wal")).unwrap(),
            b"wal frames"
        );
    }

    #[test]
    fn test_safety_copy_path() {
        assert_eq!(
            safety_copy_path(Path::new("instance/database.db")),
            PathBuf::from("instance/database.db.before_restore")
        );
    }
}
