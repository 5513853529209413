// Property-based tests for the retention planner
//
// Properties tested:
// 1. Bound: a pass keeps at most keep_daily + keep_weekly + keep_monthly snapshots
// 2. Tier caps: each tier respects its own count
// 3. Idempotence: planning the survivors again keeps all of them
// 4. Totality: every snapshot gets exactly one decision
// 5. Distinct weeks: no two weekly survivors share an ISO week number

use campusvault_core::Snapshot;
use campusvault_storage::retention::{RetentionBucket, RetentionPolicy};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashSet;
use std::path::PathBuf;

fn reference_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 25, 12, 0, 0).unwrap()
}

// Snapshot `minutes_ago` before now; `index` keeps names unique.
fn make_snapshot(index: usize, minutes_ago: i64) -> Snapshot {
    let created_at = reference_now() - Duration::minutes(minutes_ago);
    let name = format!(
        "database_backup_{}_{:02}.db.gz",
        created_at.format("%Y%m%d_%H%M%S"),
        index % 100
    );
    Snapshot {
        path: PathBuf::from("backups").join(&name),
        name,
        size_bytes: 4096,
        created_at,
        compressed: true,
    }
}

fn snapshots_strategy() -> impl Strategy<Value = Vec<Snapshot>> {
    // Up to ~400 days back, minute resolution.
    prop::collection::vec(0i64..400 * 24 * 60, 0..80).prop_map(|ages| {
        ages.into_iter()
            .enumerate()
            .map(|(i, age)| make_snapshot(i, age))
            .collect()
    })
}

fn policy_strategy() -> impl Strategy<Value = RetentionPolicy> {
    (0u32..10, 0u32..8, 0u32..12)
        .prop_filter("at least one tier", |(d, w, m)| d + w + m > 0)
        .prop_map(|(keep_daily, keep_weekly, keep_monthly)| RetentionPolicy {
            keep_daily,
            keep_weekly,
            keep_monthly,
        })
}

proptest! {
    #[test]
    fn prop_kept_count_is_bounded(
        policy in policy_strategy(),
        snapshots in snapshots_strategy(),
    ) {
        let plan = policy.plan(&snapshots, &reference_now());

        prop_assert!(plan.kept().count() as u64 <= policy.max_kept());
        prop_assert!(plan.count(RetentionBucket::Daily) <= policy.keep_daily as usize);
        prop_assert!(plan.count(RetentionBucket::Weekly) <= policy.keep_weekly as usize);
        prop_assert!(plan.count(RetentionBucket::Monthly) <= policy.keep_monthly as usize);
    }

    #[test]
    fn prop_every_snapshot_gets_one_decision(
        policy in policy_strategy(),
        snapshots in snapshots_strategy(),
    ) {
        let plan = policy.plan(&snapshots, &reference_now());

        prop_assert_eq!(plan.decisions.len(), snapshots.len());
        prop_assert_eq!(
            plan.kept().count() + plan.discarded().count(),
            snapshots.len()
        );
    }

    #[test]
    fn prop_second_pass_keeps_everything(
        policy in policy_strategy(),
        snapshots in snapshots_strategy(),
    ) {
        let now = reference_now();
        let first = policy.plan(&snapshots, &now);
        let survivors: Vec<Snapshot> = first.kept().map(|d| d.snapshot.clone()).collect();

        let second = policy.plan(&survivors, &now);
        prop_assert_eq!(second.discarded().count(), 0);

        let first_buckets: Vec<_> = first.kept().map(|d| (d.snapshot.name.clone(), d.bucket)).collect();
        let second_buckets: Vec<_> = second.kept().map(|d| (d.snapshot.name.clone(), d.bucket)).collect();
        prop_assert_eq!(first_buckets, second_buckets);
    }

    #[test]
    fn prop_weekly_survivors_have_distinct_weeks(
        policy in policy_strategy(),
        snapshots in snapshots_strategy(),
    ) {
        let plan = policy.plan(&snapshots, &reference_now());

        let mut weeks = HashSet::new();
        for decision in plan.decisions.iter().filter(|d| d.bucket == RetentionBucket::Weekly) {
            prop_assert!(weeks.insert(decision.snapshot.created_at.iso_week().week()));
        }
    }
}
