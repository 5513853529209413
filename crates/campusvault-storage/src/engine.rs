//! Consistent point-in-time snapshots of a live SQLite database.
//!
//! The copy is produced by SQLite itself (`VACUUM INTO`), which runs inside a
//! read transaction on the source. Writers that commit while the copy is in
//! progress are simply not part of it, so the output is always a state the
//! source was actually in. A raw file copy of a database with an active
//! writer (or an unflushed `-wal` journal) can tear and is never used here.
//!
//! ```text
//! source.db ──VACUUM INTO──► .database_backup_<uuid>.partial
//!                                   │ hard link (first free name)
//!                                   ▼
//!                     database_backup_YYYYMMDD_HHMMSS.db
//!                                   │ Compressor (optional)
//!                                   ▼
//!                     database_backup_YYYYMMDD_HHMMSS.db.gz
//! ```

use crate::compression::{CompressionConfig, Compressor, GzipCompressor};
use campusvault_core::snapshot::{SnapshotName, MAX_NAME_SEQUENCE, SNAPSHOT_PREFIX};
use campusvault_core::{CoreError, CoreResult, Snapshot};
use chrono::Local;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::io::ErrorKind;
use std::time::Instant;
use uuid::Uuid;

/// Creates snapshots of a SQLite database file.
pub struct SnapshotEngine {
    compressor: Arc<dyn Compressor>,
}

impl SnapshotEngine {
    /// Create an engine that compresses with `compressor`.
    pub fn new(compressor: Arc<dyn Compressor>) -> Self {
        Self { compressor }
    }

    /// Create an engine backed by the gzip compressor.
    ///
    /// # Errors
    ///
    /// Returns error if the compression level is invalid
    pub fn with_gzip(config: CompressionConfig) -> CoreResult<Self> {
        Ok(Self::new(Arc::new(GzipCompressor::new(config)?)))
    }

    /// Take a consistent snapshot of `source` into `dest_dir`.
    ///
    /// With `compress`, a compression failure is logged and the uncompressed
    /// snapshot is returned instead.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::BackupFailed` if the source is missing or not a
    /// database, the copy fails, or the destination cannot be written. No
    /// snapshot file is left behind in that case.
    pub async fn create_snapshot(
        &self,
        source: &Path,
        dest_dir: &Path,
        compress: bool,
    ) -> CoreResult<Snapshot> {
        let started = Instant::now();
        let taken_at = Local::now();

        match tokio::fs::metadata(source).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => {
                return Err(CoreError::backup_failed(format!(
                    "source {} is not a file",
                    source.display()
                )))
            }
            Err(e) => {
                return Err(CoreError::backup_failed(format!(
                    "source database {} not found: {e}",
                    source.display()
                )))
            }
        }

        tokio::fs::create_dir_all(dest_dir).await.map_err(|e| {
            CoreError::backup_failed(format!(
                "cannot create backup directory {}: {e}",
                dest_dir.display()
            ))
        })?;

        let staging = dest_dir.join(format!(".{SNAPSHOT_PREFIX}{}.partial", Uuid::new_v4()));
        tracing::info!(
            source = %source.display(),
            dest_dir = %dest_dir.display(),
            "Creating snapshot"
        );

        if let Err(e) = vacuum_into(source, &staging).await {
            discard_partial(&staging).await;
            return Err(e);
        }

        let path = match self.publish(&staging, dest_dir, SnapshotName::at(&taken_at)).await {
            Ok(path) => path,
            Err(e) => {
                discard_partial(&staging).await;
                return Err(e);
            }
        };

        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .unwrap_or_default();
        tracing::info!(
            path = %path.display(),
            size_bytes,
            duration_ms = started.elapsed().as_millis() as u64,
            "Snapshot created"
        );

        let path = if compress {
            match self.compressor.compress(&path).await {
                Ok(compressed) => {
                    let compressed_bytes = tokio::fs::metadata(&compressed)
                        .await
                        .map(|m| m.len())
                        .unwrap_or_default();
                    tracing::info!(
                        path = %compressed.display(),
                        size_bytes = compressed_bytes,
                        ratio = size_bytes as f64 / compressed_bytes.max(1) as f64,
                        "Snapshot compressed"
                    );
                    compressed
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Compression failed, keeping uncompressed snapshot"
                    );
                    path
                }
            }
        } else {
            path
        };

        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            CoreError::backup_failed(format!("snapshot {} vanished: {e}", path.display()))
        })?;

        Snapshot::from_metadata(&path, &metadata).ok_or_else(|| {
            CoreError::internal(format!("{} is not a snapshot artifact", path.display()))
        })
    }

    /// Move a finished copy to the first free name for `name`.
    ///
    /// A name is claimed by hard-linking the staging file to it, which fails
    /// if the name exists. This holds across engines and processes sharing
    /// `dest_dir`. The `.db.gz` of a claimed name is created before its `.db`
    /// is removed, so checking it after the claim cannot miss a finished
    /// snapshot.
    async fn publish(
        &self,
        staging: &Path,
        dest_dir: &Path,
        name: SnapshotName,
    ) -> CoreResult<PathBuf> {
        for sequence in 0..=MAX_NAME_SEQUENCE {
            let candidate = if sequence == 0 {
                name.clone()
            } else {
                name.with_sequence(sequence)
            };

            let plain = dest_dir.join(candidate.file_name());
            match tokio::fs::hard_link(staging, &plain).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!(name = %candidate, "Snapshot name taken, trying next sequence");
                    continue;
                }
                Err(e) => {
                    return Err(CoreError::backup_failed(format!(
                        "cannot publish {}: {e}",
                        plain.display()
                    )))
                }
            }

            if path_exists(&dest_dir.join(candidate.compressed_file_name())).await {
                tracing::debug!(name = %candidate, "Compressed snapshot holds this name, trying next sequence");
                if let Err(e) = tokio::fs::remove_file(&plain).await {
                    return Err(CoreError::backup_failed(format!(
                        "cannot release {}: {e}",
                        plain.display()
                    )));
                }
                continue;
            }

            discard_partial(staging).await;
            return Ok(plain);
        }

        Err(CoreError::backup_failed(format!(
            "no free snapshot name for {name} in {}",
            dest_dir.display()
        )))
    }
}

/// Run `VACUUM INTO` against `source`, writing a fresh database at `destination`.
async fn vacuum_into(source: &Path, destination: &Path) -> CoreResult<()> {
    let destination = destination.to_str().ok_or_else(|| {
        CoreError::backup_failed(format!(
            "destination path {} is not valid UTF-8",
            destination.display()
        ))
    })?;

    let mut conn = SqliteConnectOptions::new()
        .filename(source)
        .create_if_missing(false)
        .connect()
        .await
        .map_err(|e| {
            CoreError::backup_failed(format!(
                "cannot open source database {}: {e}",
                source.display()
            ))
        })?;

    let result = sqlx::query("VACUUM INTO ?")
        .bind(destination)
        .execute(&mut conn)
        .await;

    if let Err(e) = conn.close().await {
        tracing::warn!(source = %source.display(), error = %e, "Failed to close source connection");
    }

    result.map(|_| ()).map_err(|e| {
        CoreError::backup_failed(format!(
            "consistent copy of {} failed: {e}",
            source.display()
        ))
    })
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial snapshot"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to remove partial snapshot")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sqlx::Row;

    async fn seed_database(path: &Path, rows: i64) {
        let mut conn = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .connect()
            .await
            .unwrap();
        sqlx::query("CREATE TABLE students (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .execute(&mut conn)
            .await
            .unwrap();
        for i in 0..rows {
            sqlx::query("INSERT INTO students (name) VALUES (?)")
                .bind(format!("student-{i}"))
                .execute(&mut conn)
                .await
                .unwrap();
        }
        conn.close().await.unwrap();
    }

    async fn count_rows(path: &Path) -> i64 {
        let mut conn = SqliteConnectOptions::new()
            .filename(path)
            .connect()
            .await
            .unwrap();
        let row = sqlx::query("SELECT COUNT(*) AS n FROM students")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        row.get::<i64, _>("n")
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    struct FailingCompressor;

    #[async_trait]
    impl Compressor for FailingCompressor {
        async fn compress(&self, _snapshot: &Path) -> CoreResult<PathBuf> {
            Err(CoreError::compression_failed("disk full"))
        }

        async fn decompress(&self, _compressed: &Path, _destination: &Path) -> CoreResult<()> {
            Err(CoreError::compression_failed("disk full"))
        }
    }

    #[tokio::test]
    async fn test_uncompressed_snapshot_is_a_valid_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("database.db");
        seed_database(&source, 25).await;

        let engine = SnapshotEngine::with_gzip(CompressionConfig::default()).unwrap();
        let snapshot = engine
            .create_snapshot(&source, &dir.path().join("backups"), false)
            .await
            .unwrap();

        assert!(!snapshot.compressed);
        assert!(snapshot.name.starts_with(SNAPSHOT_PREFIX));
        assert!(snapshot.name.ends_with(".db"));
        assert!(snapshot.size_bytes > 0);
        assert_eq!(count_rows(&snapshot.path).await, 25);
    }

    #[tokio::test]
    async fn test_compressed_snapshot_replaces_raw_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("database.db");
        seed_database(&source, 10).await;
        let backups = dir.path().join("backups");

        let engine = SnapshotEngine::with_gzip(CompressionConfig::default()).unwrap();
        let snapshot = engine.create_snapshot(&source, &backups, true).await.unwrap();

        assert!(snapshot.compressed);
        assert!(snapshot.name.ends_with(".db.gz"));
        let entries = dir_entries(&backups);
        assert_eq!(entries, vec![snapshot.name.clone()]);
    }

    #[tokio::test]
    async fn test_missing_source_fails_without_creating_files() {
        let dir = tempfile::tempdir().unwrap();
        let backups = dir.path().join("backups");

        let engine = SnapshotEngine::with_gzip(CompressionConfig::default()).unwrap();
        let err = engine
            .create_snapshot(&dir.path().join("missing.db"), &backups, true)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::BackupFailed { .. }));
        assert!(dir_entries(&backups).is_empty());
    }

    #[tokio::test]
    async fn test_non_database_source_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, b"this is definitely not a sqlite database file").unwrap();
        let backups = dir.path().join("backups");

        let engine = SnapshotEngine::with_gzip(CompressionConfig::default()).unwrap();
        let err = engine
            .create_snapshot(&source, &backups, false)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::BackupFailed { .. }));
        assert!(dir_entries(&backups).is_empty());
    }

    #[tokio::test]
    async fn test_compression_failure_still_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("database.db");
        seed_database(&source, 5).await;
        let backups = dir.path().join("backups");

        let engine = SnapshotEngine::new(Arc::new(FailingCompressor));
        let snapshot = engine.create_snapshot(&source, &backups, true).await.unwrap();

        assert!(!snapshot.compressed);
        assert!(snapshot.path.exists());
        assert_eq!(count_rows(&snapshot.path).await, 5);
    }

    #[tokio::test]
    async fn test_same_second_snapshots_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("database.db");
        seed_database(&source, 3).await;
        let backups = dir.path().join("backups");

        let engine = SnapshotEngine::with_gzip(CompressionConfig::default()).unwrap();
        let mut names = Vec::new();
        for _ in 0..3 {
            let snapshot = engine.create_snapshot(&source, &backups, false).await.unwrap();
            names.push(snapshot.name);
        }

        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3, "every snapshot must keep its own file");
        assert_eq!(dir_entries(&backups).len(), 3);
    }

    #[tokio::test]
    async fn test_publish_skips_taken_names() {
        let dir = tempfile::tempdir().unwrap();
        let name = SnapshotName::at(&Local::now());
        std::fs::write(dir.path().join(name.file_name()), b"a").unwrap();
        std::fs::write(dir.path().join(name.with_sequence(1).compressed_file_name()), b"b")
            .unwrap();
        let staging = dir.path().join(".staged.partial");
        std::fs::write(&staging, b"c").unwrap();

        let engine = SnapshotEngine::with_gzip(CompressionConfig::default()).unwrap();
        let published = engine.publish(&staging, dir.path(), name.clone()).await.unwrap();

        assert_eq!(published, dir.path().join(name.with_sequence(2).file_name()));
        assert_eq!(std::fs::read(published).unwrap(), b"c");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_separate_engines_never_share_a_name() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("database.db");
        seed_database(&source, 3).await;
        let backups = dir.path().join("backups");

        let first = Arc::new(SnapshotEngine::with_gzip(CompressionConfig::default()).unwrap());
        let second = Arc::new(SnapshotEngine::with_gzip(CompressionConfig::default()).unwrap());

        let mut names = Vec::new();
        for round in 0..20 {
            let compress = round % 2 == 0;
            let (a, b) = tokio::join!(
                first.create_snapshot(&source, &backups, compress),
                second.create_snapshot(&source, &backups, compress),
            );
            names.push(a.unwrap().name);
            names.push(b.unwrap().name);
        }

        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total, "two engines published under one name");
        assert_eq!(dir_entries(&backups).len(), total);
    }
}
