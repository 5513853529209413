//! Tiered daily/weekly/monthly retention of snapshots.
//!
//! Snapshots are walked newest first and each one lands in exactly one
//! bucket:
//!
//! 1. **Daily**: younger than `keep_daily` days, while fewer than
//!    `keep_daily` dailies are kept.
//! 2. **Weekly**: younger than `keep_weekly * 7` days, while fewer than
//!    `keep_weekly` weeklies are kept, and no kept snapshot shares its ISO
//!    week number.
//! 3. **Monthly**: younger than `keep_monthly * 30` days, while fewer than
//!    `keep_monthly` monthlies are kept, and no kept snapshot shares its
//!    calendar month.
//! 4. **Discard**: everything else is deleted.
//!
//! Week and month comparisons use the bare week number and month number
//! (no year), evaluated in the time zone of the `now` passed in.

use crate::inventory;
use async_trait::async_trait;
use campusvault_core::{CoreError, Snapshot};
use chrono::{DateTime, Datelike, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Retention policy configuration
///
/// # Example
///
/// ```
/// use campusvault_storage::retention::RetentionPolicy;
///
/// let policy = RetentionPolicy::default();
/// assert_eq!(policy.keep_daily, 7);
/// assert_eq!(policy.keep_weekly, 4);
/// assert_eq!(policy.keep_monthly, 6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Daily snapshots to keep; also the daily window in days (default: 7)
    pub keep_daily: u32,

    /// Weekly snapshots to keep; the window is this many weeks (default: 4)
    pub keep_weekly: u32,

    /// Monthly snapshots to keep; the window is this many 30-day months (default: 6)
    pub keep_monthly: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_daily: 7,
            keep_weekly: 4,
            keep_monthly: 6,
        }
    }
}

impl RetentionPolicy {
    /// Validate policy configuration
    ///
    /// # Errors
    ///
    /// Returns error if every tier is zero, which would delete every snapshot
    /// including the one just taken.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_kept() == 0 {
            return Err("at least one of keep_daily, keep_weekly, keep_monthly must be >= 1".into());
        }
        Ok(())
    }

    /// Upper bound on snapshots surviving a pass.
    #[must_use]
    pub fn max_kept(&self) -> u64 {
        u64::from(self.keep_daily) + u64::from(self.keep_weekly) + u64::from(self.keep_monthly)
    }

    /// Classify `snapshots` as of `now` without touching the disk.
    pub fn plan<Tz: TimeZone>(&self, snapshots: &[Snapshot], now: &DateTime<Tz>) -> RetentionPlan {
        let mut ordered = snapshots.to_vec();
        inventory::sort_newest_first(&mut ordered);

        let fold = ordered
            .iter()
            .fold(RetentionFold::new(*self), |mut fold, snapshot| {
                fold.visit(snapshot, now);
                fold
            });

        RetentionPlan {
            decisions: fold.decisions,
        }
    }
}

/// Tier a snapshot was assigned to during a retention pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionBucket {
    Daily,
    Weekly,
    Monthly,
    Discard,
}

impl RetentionBucket {
    /// Whether snapshots in this bucket survive the pass.
    #[must_use]
    pub fn is_kept(self) -> bool {
        self != Self::Discard
    }
}

impl fmt::Display for RetentionBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Discard => "discard",
        };
        f.write_str(label)
    }
}

/// Outcome for one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RetentionDecision {
    pub snapshot: Snapshot,
    pub bucket: RetentionBucket,
    pub age_days: i64,
}

/// Classification of every snapshot, newest first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionPlan {
    pub decisions: Vec<RetentionDecision>,
}

impl RetentionPlan {
    /// Decisions that keep their snapshot.
    pub fn kept(&self) -> impl Iterator<Item = &RetentionDecision> {
        self.decisions.iter().filter(|d| d.bucket.is_kept())
    }

    /// Decisions that discard their snapshot.
    pub fn discarded(&self) -> impl Iterator<Item = &RetentionDecision> {
        self.decisions.iter().filter(|d| !d.bucket.is_kept())
    }

    /// Number of snapshots assigned to `bucket`.
    #[must_use]
    pub fn count(&self, bucket: RetentionBucket) -> usize {
        self.decisions.iter().filter(|d| d.bucket == bucket).count()
    }
}

/// State carried across the newest-first walk.
struct RetentionFold {
    policy: RetentionPolicy,
    daily: u32,
    weekly: u32,
    monthly: u32,
    weeks_seen: HashSet<u32>,
    months_seen: HashSet<u32>,
    decisions: Vec<RetentionDecision>,
}

impl RetentionFold {
    fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            daily: 0,
            weekly: 0,
            monthly: 0,
            weeks_seen: HashSet::new(),
            months_seen: HashSet::new(),
            decisions: Vec::new(),
        }
    }

    fn visit<Tz: TimeZone>(&mut self, snapshot: &Snapshot, now: &DateTime<Tz>) {
        let local = snapshot.created_at.with_timezone(&now.timezone());
        let week = local.iso_week().week();
        let month = local.month();
        let age_days = snapshot.age_days(now);
        let policy = self.policy;

        let bucket = if age_days < i64::from(policy.keep_daily) && self.daily < policy.keep_daily {
            self.daily += 1;
            RetentionBucket::Daily
        } else if age_days < i64::from(policy.keep_weekly) * 7
            && self.weekly < policy.keep_weekly
            && !self.weeks_seen.contains(&week)
        {
            self.weekly += 1;
            RetentionBucket::Weekly
        } else if age_days < i64::from(policy.keep_monthly) * 30
            && self.monthly < policy.keep_monthly
            && !self.months_seen.contains(&month)
        {
            self.monthly += 1;
            RetentionBucket::Monthly
        } else {
            RetentionBucket::Discard
        };

        if bucket.is_kept() {
            self.weeks_seen.insert(week);
            self.months_seen.insert(month);
        }

        self.decisions.push(RetentionDecision {
            snapshot: snapshot.clone(),
            bucket,
            age_days,
        });
    }
}

/// A discarded snapshot that could not be removed.
#[derive(Debug, Clone, Serialize)]
pub struct FailedDeletion {
    pub snapshot: Snapshot,
    pub error: String,
}

/// What a retention pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub kept: Vec<RetentionDecision>,
    pub deleted: Vec<Snapshot>,
    pub failed: Vec<FailedDeletion>,
}

impl RetentionReport {
    /// Number of kept snapshots in `bucket`.
    #[must_use]
    pub fn kept_in(&self, bucket: RetentionBucket) -> usize {
        self.kept.iter().filter(|d| d.bucket == bucket).count()
    }

    /// `CleanupPartialFailure` if any deletion failed.
    #[must_use]
    pub fn cleanup_error(&self) -> Option<CoreError> {
        if self.failed.is_empty() {
            return None;
        }
        Some(CoreError::CleanupPartialFailure {
            failed: self.failed.iter().map(|f| f.snapshot.path.clone()).collect(),
        })
    }
}

/// Deletes snapshot files discarded by a retention pass.
#[async_trait]
pub trait SnapshotRemover: Send + Sync {
    async fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Removes files from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRemover;

#[async_trait]
impl SnapshotRemover for FsRemover {
    async fn remove(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

/// Applies a [`RetentionPolicy`] to a backup directory.
#[derive(Clone)]
pub struct RetentionManager {
    policy: RetentionPolicy,
    remover: Arc<dyn SnapshotRemover>,
}

impl fmt::Debug for RetentionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetentionManager")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetentionManager {
    /// Create new retention manager
    ///
    /// # Errors
    ///
    /// Returns error if policy validation fails
    pub fn new(policy: RetentionPolicy) -> campusvault_core::CoreResult<Self> {
        Self::with_remover(policy, Arc::new(FsRemover))
    }

    /// Create a retention manager that deletes through `remover`.
    ///
    /// # Errors
    ///
    /// Returns error if policy validation fails
    pub fn with_remover(
        policy: RetentionPolicy,
        remover: Arc<dyn SnapshotRemover>,
    ) -> campusvault_core::CoreResult<Self> {
        policy.validate().map_err(CoreError::ValidationError)?;
        Ok(Self { policy, remover })
    }

    /// Policy in effect.
    #[must_use]
    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Run a pass over `dir` as of `now`.
    ///
    /// Never fails: an unreadable directory yields an empty report and each
    /// deletion error is logged and recorded in the report while the pass
    /// carries on.
    pub async fn apply<Tz>(&self, dir: &Path, now: &DateTime<Tz>) -> RetentionReport
    where
        Tz: TimeZone + Send + Sync,
        Tz::Offset: Send + Sync,
    {
        let snapshots = match inventory::list_snapshots(dir).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                tracing::error!(dir = %dir.display(), error = %e, "Cleanup failed: cannot list snapshots");
                return RetentionReport::default();
            }
        };

        if snapshots.is_empty() {
            tracing::info!(dir = %dir.display(), "No backups found to clean up");
            return RetentionReport::default();
        }

        let plan = self.policy.plan(&snapshots, now);
        let mut report = RetentionReport::default();

        for decision in plan.decisions {
            if decision.bucket.is_kept() {
                tracing::info!(
                    name = %decision.snapshot.name,
                    bucket = %decision.bucket,
                    age_days = decision.age_days,
                    "Keeping snapshot"
                );
                report.kept.push(decision);
                continue;
            }

            match self.remover.remove(&decision.snapshot.path).await {
                Ok(()) => {
                    tracing::info!(
                        name = %decision.snapshot.name,
                        age_days = decision.age_days,
                        "Deleted old snapshot"
                    );
                    report.deleted.push(decision.snapshot);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(name = %decision.snapshot.name, "Snapshot already gone");
                    report.deleted.push(decision.snapshot);
                }
                Err(e) => {
                    tracing::warn!(
                        name = %decision.snapshot.name,
                        error = %e,
                        "Failed to delete old snapshot"
                    );
                    report.failed.push(FailedDeletion {
                        snapshot: decision.snapshot,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            kept = report.kept.len(),
            daily = report.kept_in(RetentionBucket::Daily),
            weekly = report.kept_in(RetentionBucket::Weekly),
            monthly = report.kept_in(RetentionBucket::Monthly),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Cleanup complete"
        );

        report
    }
}
