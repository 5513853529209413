//! Snapshot artifacts and their on-disk naming scheme.
//!
//! A snapshot is stored as `database_backup_<YYYYMMDD_HHMMSS>.db`, or
//! `database_backup_<YYYYMMDD_HHMMSS>.db.gz` once compressed. When two
//! snapshots land in the same second the later one gets a zero-padded
//! sequence suffix (`database_backup_20261018_030000_01.db`), which keeps
//! lexical order equal to chronological order.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// File name prefix shared by every snapshot.
pub const SNAPSHOT_PREFIX: &str = "database_backup_";

/// Extension of an uncompressed snapshot.
pub const SNAPSHOT_EXTENSION: &str = ".db";

/// Extension of a gzip-compressed snapshot.
pub const COMPRESSED_EXTENSION: &str = ".db.gz";

/// Timestamp layout embedded in snapshot names (second resolution).
pub const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Largest sequence suffix tried before giving up on a free name.
pub const MAX_NAME_SEQUENCE: u32 = 99;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const SECONDS_PER_DAY: i64 = 86_400;

/// Timestamp-derived snapshot name, without extension.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotName {
    stem: String,
}

impl SnapshotName {
    /// Name for a snapshot taken at `timestamp`.
    #[must_use]
    pub fn at<Tz: TimeZone>(timestamp: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self {
            stem: format!(
                "{SNAPSHOT_PREFIX}{}",
                timestamp.format(NAME_TIMESTAMP_FORMAT)
            ),
        }
    }

    /// Same timestamp, disambiguated by a sequence number (`_01`, `_02`, ...).
    #[must_use]
    pub fn with_sequence(&self, sequence: u32) -> Self {
        Self {
            stem: format!("{}_{:02}", self.stem, sequence),
        }
    }

    /// Name without extension.
    #[must_use]
    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// File name of the uncompressed artifact.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}{SNAPSHOT_EXTENSION}", self.stem)
    }

    /// File name of the compressed artifact.
    #[must_use]
    pub fn compressed_file_name(&self) -> String {
        format!("{}{COMPRESSED_EXTENSION}", self.stem)
    }

    /// Returns true if `file_name` looks like a snapshot artifact.
    #[must_use]
    pub fn matches(file_name: &str) -> bool {
        file_name.starts_with(SNAPSHOT_PREFIX)
            && (file_name.ends_with(SNAPSHOT_EXTENSION) || file_name.ends_with(COMPRESSED_EXTENSION))
    }

    /// Returns true if `file_name` is a compressed artifact.
    #[must_use]
    pub fn is_compressed(file_name: &str) -> bool {
        file_name.ends_with(COMPRESSED_EXTENSION)
    }

    /// Recovers the embedded timestamp from a snapshot file name.
    ///
    /// The timestamp is interpreted as UTC; callers that need the local wall
    /// clock should prefer the file modification time.
    #[must_use]
    pub fn parse_timestamp(file_name: &str) -> Option<DateTime<Utc>> {
        let rest = file_name.strip_prefix(SNAPSHOT_PREFIX)?;
        let raw = rest.get(..15)?;
        NaiveDateTime::parse_from_str(raw, NAME_TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem)
    }
}

/// One backup artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// File name, unique within the backup directory.
    pub name: String,
    /// Full path of the artifact.
    pub path: PathBuf,
    /// Size on disk.
    pub size_bytes: u64,
    /// File modification time.
    pub created_at: DateTime<Utc>,
    /// Whether the artifact is gzip-compressed.
    pub compressed: bool,
}

impl Snapshot {
    /// Builds a snapshot from a directory entry.
    ///
    /// Returns `None` for files that are not snapshot artifacts. The creation
    /// time comes from the modification time; if the platform cannot report
    /// one, the timestamp embedded in the name is used instead.
    #[must_use]
    pub fn from_metadata(path: &Path, metadata: &std::fs::Metadata) -> Option<Self> {
        if !metadata.is_file() {
            return None;
        }

        let name = path.file_name()?.to_str()?.to_string();
        if !SnapshotName::matches(&name) {
            return None;
        }

        let created_at = match metadata.modified() {
            Ok(modified) => system_time_to_utc(modified),
            Err(_) => SnapshotName::parse_timestamp(&name)?,
        };

        Some(Self {
            compressed: SnapshotName::is_compressed(&name),
            name,
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            created_at,
        })
    }

    /// Size in mebibytes, for display.
    #[must_use]
    pub fn size_mb(&self) -> f64 {
        bytes_to_mb(self.size_bytes)
    }

    /// Whole days elapsed between creation and `now`, rounded down.
    #[must_use]
    pub fn age_days<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> i64 {
        let elapsed = now.with_timezone(&Utc) - self.created_at;
        elapsed.num_seconds().div_euclid(SECONDS_PER_DAY)
    }
}

/// Converts a byte count to mebibytes.
#[must_use]
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}
