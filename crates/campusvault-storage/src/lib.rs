//! Snapshot storage for the campusvault backup system.
//!
//! - [`engine`]: consistent copies of a live SQLite file
//! - [`compression`]: gzip at rest
//! - [`retention`]: daily/weekly/monthly pruning
//! - [`restore`]: atomic replacement of the live database
//! - [`inventory`]: listing and statistics
//! - [`manager`]: the facade tying them to one configured database

pub mod compression;
pub mod engine;
pub mod inventory;
pub mod manager;
pub mod restore;
pub mod retention;

pub use compression::{CompressionConfig, Compressor, GzipCompressor};
pub use engine::SnapshotEngine;
pub use inventory::BackupStats;
pub use manager::{BackupCycleReport, BackupManager, BackupSettings};
pub use restore::{RestoreOperator, RestoreOutcome};
pub use retention::{
    FsRemover, RetentionBucket, RetentionDecision, RetentionManager, RetentionPlan,
    RetentionPolicy, RetentionReport, SnapshotRemover,
};
