//! E2E tests against real SQLite databases on disk
//!
//! 1. Snapshots taken while a writer commits are point-in-time consistent
//! 2. Restore round trip through a compressed snapshot
//! 3. Restore with no live database
//! 4. Retention pass over a directory of aged snapshots
//! 5. Second retention pass deletes nothing

use campusvault_storage::compression::{Compressor, GzipCompressor};
use campusvault_storage::restore::safety_copy_path;
use campusvault_storage::{
    BackupManager, BackupSettings, CompressionConfig, RetentionBucket, RetentionManager,
    RetentionPolicy, SnapshotEngine,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection, Row};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const ROWS_PER_TRANSACTION: i64 = 10;

async fn open(path: &Path) -> SqliteConnection {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .connect()
        .await
        .unwrap()
}

async fn create_ledger(path: &Path) {
    let mut conn = open(path).await;
    sqlx::query("CREATE TABLE ledger (id INTEGER PRIMARY KEY, txn INTEGER NOT NULL, note TEXT)")
        .execute(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();
}

async fn insert_transaction(conn: &mut SqliteConnection, txn: i64) {
    let mut tx = conn.begin().await.unwrap();
    for _ in 0..ROWS_PER_TRANSACTION {
        sqlx::query("INSERT INTO ledger (txn, note) VALUES (?, ?)")
            .bind(txn)
            .bind("fee payment")
            .execute(&mut *tx)
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();
}

async fn count_rows(path: &Path) -> i64 {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .connect()
        .await
        .unwrap();
    let row = sqlx::query("SELECT COUNT(*) AS n FROM ledger")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    let n = row.get::<i64, _>("n");
    conn.close().await.unwrap();
    n
}

async fn integrity_check(path: &Path) -> String {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .connect()
        .await
        .unwrap();
    let row = sqlx::query("PRAGMA integrity_check")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    let result = row.get::<String, _>(0);
    conn.close().await.unwrap();
    result
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_snapshots_under_concurrent_writes_are_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("database.db");
    let backups = dir.path().join("backups");
    create_ledger(&source).await;

    let stop = Arc::new(AtomicBool::new(false));
    let committed = Arc::new(AtomicU64::new(0));

    let writer = {
        let source = source.clone();
        let stop = Arc::clone(&stop);
        let committed = Arc::clone(&committed);
        tokio::spawn(async move {
            let mut conn = open(&source).await;
            let mut txn = 0;
            while !stop.load(Ordering::Relaxed) {
                insert_transaction(&mut conn, txn).await;
                committed.fetch_add(1, Ordering::Relaxed);
                txn += 1;
                tokio::task::yield_now().await;
            }
            conn.close().await.unwrap();
        })
    };

    while committed.load(Ordering::Relaxed) < 5 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let engine = SnapshotEngine::with_gzip(CompressionConfig::default()).unwrap();
    let mut snapshots = Vec::new();
    for _ in 0..5 {
        snapshots.push(engine.create_snapshot(&source, &backups, false).await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    writer.await.unwrap();

    for snapshot in &snapshots {
        assert_eq!(integrity_check(&snapshot.path).await, "ok");
        let rows = count_rows(&snapshot.path).await;
        assert_eq!(
            rows % ROWS_PER_TRANSACTION,
            0,
            "{} holds a partial transaction ({rows} rows)",
            snapshot.name
        );
    }

    let names: std::collections::HashSet<_> = snapshots.iter().map(|s| &s.name).collect();
    assert_eq!(names.len(), snapshots.len(), "snapshot names must be unique");
}

#[tokio::test]
async fn test_restore_round_trip_through_compressed_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let settings = BackupSettings::new(dir.path().join("database.db"), dir.path().join("backups"));
    let live = settings.database_path.clone();
    create_ledger(&live).await;
    {
        let mut conn = open(&live).await;
        insert_transaction(&mut conn, 1).await;
        conn.close().await.unwrap();
    }

    let manager = BackupManager::new(settings).unwrap();
    let snapshot = manager.create_backup(true).await.unwrap();
    assert!(snapshot.compressed);

    {
        let mut conn = open(&live).await;
        insert_transaction(&mut conn, 2).await;
        insert_transaction(&mut conn, 3).await;
        conn.close().await.unwrap();
    }
    let before_restore = std::fs::read(&live).unwrap();

    let outcome = manager.restore(&snapshot.path).await.unwrap();

    assert_eq!(outcome.safety_copy, Some(safety_copy_path(&live)));
    assert_eq!(std::fs::read(safety_copy_path(&live)).unwrap(), before_restore);

    let expanded = dir.path().join("expanded.db");
    GzipCompressor::default()
        .decompress(&snapshot.path, &expanded)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&live).unwrap(), std::fs::read(&expanded).unwrap());
    assert_eq!(count_rows(&live).await, ROWS_PER_TRANSACTION);
}

#[tokio::test]
async fn test_restore_into_empty_location() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.db");
    create_ledger(&source).await;
    {
        let mut conn = open(&source).await;
        insert_transaction(&mut conn, 1).await;
        conn.close().await.unwrap();
    }

    let settings = BackupSettings::new(
        dir.path().join("fresh").join("database.db"),
        dir.path().join("backups"),
    );
    let engine = SnapshotEngine::with_gzip(CompressionConfig::default()).unwrap();
    let snapshot = engine
        .create_snapshot(&source, &settings.backup_dir, true)
        .await
        .unwrap();

    let live = settings.database_path.clone();
    let manager = BackupManager::new(settings).unwrap();
    let outcome = manager.restore(&snapshot.path).await.unwrap();

    assert!(outcome.safety_copy.is_none());
    assert!(!safety_copy_path(&live).exists());
    assert_eq!(count_rows(&live).await, ROWS_PER_TRANSACTION);
}

fn reference_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 25, 12, 0, 0).unwrap()
}

fn place_snapshot(dir: &Path, created_at: DateTime<Utc>) -> std::path::PathBuf {
    let path = dir.join(format!(
        "database_backup_{}.db.gz",
        created_at.format("%Y%m%d_%H%M%S")
    ));
    std::fs::write(&path, b"archived").unwrap();
    let file = std::fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(created_at.into()).unwrap();
    path
}

#[tokio::test]
async fn test_retention_pass_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let now = reference_now();
    let today = place_snapshot(dir.path(), now - Duration::hours(1));
    let three = place_snapshot(dir.path(), now - Duration::days(3));
    let ten = place_snapshot(dir.path(), now - Duration::days(10));
    let twenty = place_snapshot(dir.path(), now - Duration::days(20));
    let forty = place_snapshot(dir.path(), now - Duration::days(40));
    let two_hundred = place_snapshot(dir.path(), now - Duration::days(200));
    std::fs::write(dir.path().join("README.txt"), b"not a backup").unwrap();

    let manager = RetentionManager::new(RetentionPolicy::default()).unwrap();
    let report = manager.apply(dir.path(), &now).await;

    assert_eq!(report.kept_in(RetentionBucket::Daily), 2);
    assert_eq!(report.kept_in(RetentionBucket::Weekly), 2);
    assert_eq!(report.kept_in(RetentionBucket::Monthly), 1);
    assert_eq!(report.deleted.len(), 1);
    assert!(report.failed.is_empty());
    assert!(report.cleanup_error().is_none());

    for kept in [&today, &three, &ten, &twenty, &forty] {
        assert!(kept.exists(), "{} should be kept", kept.display());
    }
    assert!(!two_hundred.exists());
    assert!(dir.path().join("README.txt").exists());
}

#[tokio::test]
async fn test_second_retention_pass_deletes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let now = reference_now();
    for hours in (0..24 * 90).step_by(11) {
        place_snapshot(dir.path(), now - Duration::hours(hours));
    }

    let manager = RetentionManager::new(RetentionPolicy::default()).unwrap();
    let first = manager.apply(dir.path(), &now).await;
    assert!(!first.deleted.is_empty());
    assert!(first.kept.len() as u64 <= RetentionPolicy::default().max_kept());

    let second = manager.apply(dir.path(), &now).await;
    assert!(second.deleted.is_empty());
    assert_eq!(second.kept.len(), first.kept.len());
}

#[tokio::test]
async fn test_retention_on_missing_directory_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let manager = RetentionManager::new(RetentionPolicy::default()).unwrap();
    let report = manager.apply(&dir.path().join("absent"), &reference_now()).await;
    assert!(report.kept.is_empty());
    assert!(report.deleted.is_empty());
}
