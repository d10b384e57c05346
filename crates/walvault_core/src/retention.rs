//! Retention policy evaluation.
//!
//! Evaluation is a pure function over a catalog snapshot and a clock
//! reading: it produces a report of what to keep and what to delete,
//! and never mutates anything itself. Enforcement (actually removing
//! backups and WAL from the store) is the server's job, so that the
//! decision can be logged, dry-run, and re-checked under the write
//! lock before anything is destroyed.
//!
//! Two safety rules hold regardless of policy:
//!
//! - A backup that is in progress, waiting for WAL, or pinned by an
//!   in-flight restore is never obsolete
//! - No WAL segment inside a retained backup's replay chain is ever
//!   marked obsolete

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::backup::{BackupInfo, BackupStatus};
use crate::catalog::Catalog;
use crate::error::{CatalogError, CatalogResult};
use crate::types::{BackupId, SegmentName, Timestamp};

/// How many backups, or how much history, to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep the newest N completed backups.
    Redundancy(u32),
    /// Keep every backup needed to recover to any instant within the
    /// trailing window.
    RecoveryWindow(Duration),
}

impl RetentionPolicy {
    /// Returns the redundancy count, clamped to at least one: a
    /// policy is never allowed to delete the last completed backup.
    #[must_use]
    fn effective_redundancy(count: u32) -> usize {
        count.max(1) as usize
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redundancy(n) => write!(f, "REDUNDANCY {n}"),
            Self::RecoveryWindow(d) => {
                write!(f, "RECOVERY WINDOW OF {} DAYS", d.as_secs() / 86_400)
            }
        }
    }
}

impl FromStr for RetentionPolicy {
    type Err = CatalogError;

    /// Parses the conventional policy syntax: `REDUNDANCY <n>` or
    /// `RECOVERY WINDOW OF <n> DAYS|WEEKS|MONTHS`.
    fn from_str(s: &str) -> CatalogResult<Self> {
        let tokens: Vec<String> = s.split_whitespace().map(str::to_uppercase).collect();
        match tokens.as_slice() {
            [kw, n] if kw == "REDUNDANCY" => {
                let n: u32 = n.parse().map_err(|_| {
                    CatalogError::invalid_state(format!("malformed retention policy: {s}"))
                })?;
                Ok(Self::Redundancy(n))
            }
            [rw, win, of, n, unit] if rw == "RECOVERY" && win == "WINDOW" && of == "OF" => {
                let n: u64 = n.parse().map_err(|_| {
                    CatalogError::invalid_state(format!("malformed retention policy: {s}"))
                })?;
                let days = match unit.as_str() {
                    "DAYS" | "DAY" => n,
                    "WEEKS" | "WEEK" => n * 7,
                    "MONTHS" | "MONTH" => n * 30,
                    _ => {
                        return Err(CatalogError::invalid_state(format!(
                            "unknown retention window unit: {unit}"
                        )))
                    }
                };
                Ok(Self::RecoveryWindow(Duration::from_secs(days * 86_400)))
            }
            _ => Err(CatalogError::invalid_state(format!(
                "malformed retention policy: {s}"
            ))),
        }
    }
}

/// How aggressively WAL beyond the backup chains is reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WalRetentionMode {
    /// Keep WAL from the oldest retained backup onward, including
    /// descendant timelines, so point-in-time recovery stays possible
    /// across the whole retained range.
    #[default]
    Main,
    /// Keep only the segments inside retained backups' replay chains.
    Simple,
}

/// The outcome of a retention evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Backups the policy keeps, oldest first.
    pub retained: Vec<BackupId>,
    /// Backups eligible for deletion, oldest first.
    pub obsolete: Vec<BackupId>,
    /// WAL segments no retained backup or mode needs, in index order.
    pub obsolete_segments: Vec<SegmentName>,
}

/// Evaluates `policy` against a catalog snapshot at instant `now`.
#[must_use]
pub fn evaluate(
    catalog: &Catalog,
    now: Timestamp,
    policy: RetentionPolicy,
    mode: WalRetentionMode,
) -> RetentionReport {
    let done = catalog.done_backups();

    let mut retained: Vec<BackupId> = Vec::new();
    let mut obsolete: Vec<BackupId> = Vec::new();

    match policy {
        RetentionPolicy::Redundancy(count) => {
            let keep = RetentionPolicy::effective_redundancy(count);
            let cut = done.len().saturating_sub(keep);
            for (i, backup) in done.iter().enumerate() {
                if i < cut {
                    obsolete.push(backup.id.clone());
                } else {
                    retained.push(backup.id.clone());
                }
            }
        }
        RetentionPolicy::RecoveryWindow(window) => {
            let cutoff = now.saturating_sub(window);
            // The newest backup at or before the cutoff anchors
            // recovery to the window's far edge and must be kept. The
            // boundary is inclusive: a backup created exactly at the
            // cutoff is inside the window.
            let anchor = done
                .iter()
                .rev()
                .find(|b| b.created_at <= cutoff)
                .map(|b| b.id.clone());
            for backup in &done {
                let keep = backup.created_at >= cutoff || anchor.as_ref() == Some(&backup.id);
                if keep {
                    retained.push(backup.id.clone());
                } else {
                    obsolete.push(backup.id.clone());
                }
            }
            // A policy is never allowed to empty the catalog.
            if retained.is_empty() {
                if let Some(id) = obsolete.pop() {
                    retained.push(id);
                }
            }
        }
    }

    // Safety overrides: active and pinned backups are untouchable.
    obsolete.retain(|id| {
        let sheltered = catalog.is_pinned(id)
            || catalog.backup(id).is_some_and(|b| {
                matches!(
                    b.status,
                    BackupStatus::InProgress | BackupStatus::WaitingForWals
                )
            });
        if sheltered {
            retained.push(id.clone());
        }
        !sheltered
    });
    // Non-done backups never entered `done`; shelter the active ones
    // and condemn the failed ones.
    for backup in catalog.backups() {
        match backup.status {
            BackupStatus::InProgress | BackupStatus::WaitingForWals => {
                retained.push(backup.id.clone());
            }
            BackupStatus::Failed => obsolete.push(backup.id.clone()),
            BackupStatus::Done => {}
        }
    }
    for id in catalog.pinned() {
        if !retained.contains(id) {
            retained.push(id.clone());
            obsolete.retain(|o| o != id);
        }
    }
    retained.sort();
    retained.dedup();
    obsolete.sort();
    obsolete.dedup();

    let obsolete_segments = obsolete_wal(catalog, &retained, mode);

    RetentionReport {
        retained,
        obsolete,
        obsolete_segments,
    }
}

/// Computes the WAL segments nothing retained still needs.
fn obsolete_wal(
    catalog: &Catalog,
    retained: &[BackupId],
    mode: WalRetentionMode,
) -> Vec<SegmentName> {
    let seg_size = catalog.wal().wal_segment_size();
    let retained_done: Vec<&BackupInfo> = retained
        .iter()
        .filter_map(|id| catalog.backup(id))
        .filter(|b| !matches!(b.status, BackupStatus::Failed))
        .collect();

    let mut obsolete = Vec::new();
    'segments: for segment in catalog.wal().iter() {
        let start = segment.name.start_lsn(seg_size);
        for backup in &retained_done {
            let chain_end = backup.end_lsn.unwrap_or(backup.begin_lsn);
            let chain_tli = backup.end_timeline.unwrap_or(backup.begin_timeline);
            // Inside the backup's own replay chain.
            let in_chain = catalog
                .wal()
                .segments_in_range(chain_tli, backup.begin_lsn, chain_end, catalog.timelines())
                .iter()
                .any(|s| s.name == segment.name);
            if in_chain {
                continue 'segments;
            }
            if mode == WalRetentionMode::Main {
                // WAL after the backup's end, on its own timeline or
                // any descendant, serves point-in-time recovery.
                let past_end = segment.name.timeline == chain_tli
                    && start.add(seg_size) > chain_end;
                let on_descendant = catalog
                    .timelines()
                    .is_ancestor(chain_tli, segment.name.timeline);
                if past_end || on_descendant {
                    continue 'segments;
                }
            }
        }
        obsolete.push(segment.name);
    }
    obsolete
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::ROOT_TIMELINE;
    use crate::types::{Lsn, TimelineId};
    use crate::wal::WalSegment;

    const SEG: u64 = 100;
    const DAY: u64 = 86_400_000;

    fn wal_segment(timeline: u32, start: u64) -> WalSegment {
        WalSegment {
            name: SegmentName::from_lsn(TimelineId::new(timeline), Lsn::new(start), SEG),
            archived_at: Timestamp::from_millis(start),
            size: SEG,
            checksum: format!("{start:064x}"),
            compression: None,
        }
    }

    /// One done backup per day, each spanning one segment, with WAL
    /// covering everything.
    fn daily_catalog(days: u32) -> (Catalog, Vec<BackupId>) {
        let mut cat = Catalog::new("main", SEG);
        let mut ids = Vec::new();
        for d in 0..u64::from(days) {
            cat.insert_segment(wal_segment(1, d * SEG));
        }
        for d in 0..u64::from(days) {
            let id = BackupId::new(format!("2026010{}T000000", d + 1));
            let begin = Lsn::new(d * SEG);
            cat.start_backup(id.clone(), Timestamp::from_millis(d * DAY), begin, ROOT_TIMELINE)
                .unwrap();
            cat.complete_backup(
                &id,
                begin.add(50),
                Timestamp::from_millis(d * DAY + 1_000),
                ROOT_TIMELINE,
                10,
            )
            .unwrap();
            ids.push(id);
        }
        (cat, ids)
    }

    #[test]
    fn parse_redundancy() {
        assert_eq!(
            "REDUNDANCY 3".parse::<RetentionPolicy>().unwrap(),
            RetentionPolicy::Redundancy(3)
        );
        assert_eq!(
            "redundancy 1".parse::<RetentionPolicy>().unwrap(),
            RetentionPolicy::Redundancy(1)
        );
    }

    #[test]
    fn parse_recovery_window() {
        assert_eq!(
            "RECOVERY WINDOW OF 7 DAYS".parse::<RetentionPolicy>().unwrap(),
            RetentionPolicy::RecoveryWindow(Duration::from_secs(7 * 86_400))
        );
        assert_eq!(
            "RECOVERY WINDOW OF 2 WEEKS".parse::<RetentionPolicy>().unwrap(),
            RetentionPolicy::RecoveryWindow(Duration::from_secs(14 * 86_400))
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("KEEP EVERYTHING".parse::<RetentionPolicy>().is_err());
        assert!("REDUNDANCY many".parse::<RetentionPolicy>().is_err());
        assert!("RECOVERY WINDOW OF 7 FORTNIGHTS".parse::<RetentionPolicy>().is_err());
    }

    #[test]
    fn policy_display_round_trips() {
        for text in ["REDUNDANCY 3", "RECOVERY WINDOW OF 7 DAYS"] {
            let policy: RetentionPolicy = text.parse().unwrap();
            assert_eq!(policy.to_string(), text);
        }
    }

    #[test]
    fn redundancy_keeps_newest_n() {
        let (cat, ids) = daily_catalog(5);
        let report = evaluate(
            &cat,
            Timestamp::from_millis(10 * DAY),
            RetentionPolicy::Redundancy(2),
            WalRetentionMode::Simple,
        );
        assert_eq!(report.obsolete, ids[..3].to_vec());
        assert_eq!(report.retained, ids[3..].to_vec());
    }

    #[test]
    fn redundancy_zero_still_keeps_one() {
        let (cat, ids) = daily_catalog(2);
        let report = evaluate(
            &cat,
            Timestamp::from_millis(10 * DAY),
            RetentionPolicy::Redundancy(0),
            WalRetentionMode::Simple,
        );
        assert_eq!(report.retained, vec![ids[1].clone()]);
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let (cat, ids) = daily_catalog(3);
        // now = day 4; 2-day window puts the cutoff exactly on the
        // backup created at day 2.
        let report = evaluate(
            &cat,
            Timestamp::from_millis(4 * DAY),
            RetentionPolicy::RecoveryWindow(Duration::from_millis(2 * DAY)),
            WalRetentionMode::Simple,
        );
        assert!(report.retained.contains(&ids[2]));
        // ids[1] (day 1) anchors recovery to the window edge? No:
        // ids[2] sits exactly on the cutoff, so it is the anchor and
        // day-1 and day-0 backups are obsolete.
        assert_eq!(report.obsolete, ids[..2].to_vec());
    }

    #[test]
    fn window_keeps_anchor_before_cutoff() {
        let (cat, ids) = daily_catalog(3);
        // Cutoff falls strictly between day 1 and day 2: the day-1
        // backup is needed to recover to the window's far edge.
        let report = evaluate(
            &cat,
            Timestamp::from_millis(3 * DAY + DAY / 2),
            RetentionPolicy::RecoveryWindow(Duration::from_millis(2 * DAY)),
            WalRetentionMode::Simple,
        );
        assert_eq!(report.retained, ids[1..].to_vec());
        assert_eq!(report.obsolete, vec![ids[0].clone()]);
    }

    #[test]
    fn active_backups_never_obsolete() {
        let (mut cat, _) = daily_catalog(3);
        let active = BackupId::new("20260109T000000");
        cat.start_backup(
            active.clone(),
            Timestamp::from_millis(9 * DAY),
            Lsn::new(900),
            ROOT_TIMELINE,
        )
        .unwrap();
        let report = evaluate(
            &cat,
            Timestamp::from_millis(10 * DAY),
            RetentionPolicy::Redundancy(1),
            WalRetentionMode::Simple,
        );
        assert!(report.retained.contains(&active));
        assert!(!report.obsolete.contains(&active));
    }

    #[test]
    fn pinned_backup_never_obsolete() {
        let (mut cat, ids) = daily_catalog(3);
        cat.pin(&ids[0]);
        let report = evaluate(
            &cat,
            Timestamp::from_millis(10 * DAY),
            RetentionPolicy::Redundancy(1),
            WalRetentionMode::Simple,
        );
        assert!(report.retained.contains(&ids[0]));
        assert!(!report.obsolete.contains(&ids[0]));
    }

    #[test]
    fn failed_backups_are_obsolete() {
        let (mut cat, _) = daily_catalog(2);
        let failed = BackupId::new("20260109T000000");
        cat.start_backup(
            failed.clone(),
            Timestamp::from_millis(9 * DAY),
            Lsn::new(900),
            ROOT_TIMELINE,
        )
        .unwrap();
        cat.fail_backup(&failed).unwrap();
        let report = evaluate(
            &cat,
            Timestamp::from_millis(10 * DAY),
            RetentionPolicy::Redundancy(5),
            WalRetentionMode::Simple,
        );
        assert!(report.obsolete.contains(&failed));
    }

    #[test]
    fn retained_chains_keep_their_wal() {
        let (cat, ids) = daily_catalog(5);
        let report = evaluate(
            &cat,
            Timestamp::from_millis(10 * DAY),
            RetentionPolicy::Redundancy(2),
            WalRetentionMode::Simple,
        );
        assert_eq!(report.retained, ids[3..].to_vec());
        // Segments 300 and 400 back the retained backups; 0..=200 are
        // reclaimable under Simple mode.
        let starts: Vec<u64> = report
            .obsolete_segments
            .iter()
            .map(|n| n.start_lsn(SEG).as_u64())
            .collect();
        assert_eq!(starts, vec![0, 100, 200]);
    }

    #[test]
    fn main_mode_keeps_wal_past_backup_end() {
        let (mut cat, _) = daily_catalog(2);
        // Trailing WAL beyond the newest backup's end.
        cat.insert_segment(wal_segment(1, 200));
        cat.insert_segment(wal_segment(1, 300));

        let simple = evaluate(
            &cat,
            Timestamp::from_millis(10 * DAY),
            RetentionPolicy::Redundancy(1),
            WalRetentionMode::Simple,
        );
        let simple_starts: Vec<u64> = simple
            .obsolete_segments
            .iter()
            .map(|n| n.start_lsn(SEG).as_u64())
            .collect();
        assert_eq!(simple_starts, vec![0, 200, 300]);

        let main = evaluate(
            &cat,
            Timestamp::from_millis(10 * DAY),
            RetentionPolicy::Redundancy(1),
            WalRetentionMode::Main,
        );
        let main_starts: Vec<u64> = main
            .obsolete_segments
            .iter()
            .map(|n| n.start_lsn(SEG).as_u64())
            .collect();
        // The retained backup spans segment 100; everything from it
        // onward stays, only segment 0 goes.
        assert_eq!(main_starts, vec![0]);
    }

    #[test]
    fn main_mode_keeps_descendant_timelines() {
        let (mut cat, _) = daily_catalog(2);
        cat.load_history_file(TimelineId::new(2), "1\t0/C8\tfailover").unwrap();
        cat.insert_segment(wal_segment(2, 200));

        let report = evaluate(
            &cat,
            Timestamp::from_millis(10 * DAY),
            RetentionPolicy::Redundancy(1),
            WalRetentionMode::Main,
        );
        assert!(report
            .obsolete_segments
            .iter()
            .all(|n| n.timeline != TimelineId::new(2)));
    }

    #[test]
    fn evaluation_does_not_mutate() {
        let (cat, _) = daily_catalog(3);
        let before = cat.clone();
        let _ = evaluate(
            &cat,
            Timestamp::from_millis(10 * DAY),
            RetentionPolicy::Redundancy(1),
            WalRetentionMode::Main,
        );
        assert_eq!(cat, before);
    }
}
