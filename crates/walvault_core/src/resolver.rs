//! Recovery-target resolution.
//!
//! Given a target specification and a catalog snapshot, resolution
//! selects exactly one backup and a replay boundary, or fails with a
//! typed error. It is a pure function of its inputs: repeated calls
//! over the same snapshot return identical plans.
//!
//! ## Rule order
//!
//! 1. Reject unsupported target kinds (named restore point,
//!    transaction ID, "immediate")
//! 2. Reject contradictory specifications (time and LSN together)
//! 3. An explicit backup ID selects that backup, then validates it
//!    against any remaining constraints
//! 4. No constraints at all selects the most recent `Done` backup
//! 5. A time or LSN target selects the closest preceding `Done`
//!    backup, timeline-filtered first when a timeline is also given
//! 6. A bare timeline target selects the most recent backup on that
//!    timeline, falling back to the closest ancestor timeline
//! 7. The chosen backup's WAL chain to the boundary must be unbroken

use crate::backup::BackupInfo;
use crate::catalog::Catalog;
use crate::error::{CatalogError, CatalogResult};
use crate::types::{BackupId, Lsn, SegmentName, TimelineId, Timestamp};

/// A caller-supplied restore request, before validation.
///
/// All fields are optional; the resolver decides whether the
/// combination is meaningful. The value is immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryTargetSpec {
    /// Restore this specific backup.
    pub backup_id: Option<BackupId>,
    /// Replay WAL until this wall-clock time.
    pub target_time: Option<Timestamp>,
    /// Replay WAL until this position.
    pub target_lsn: Option<Lsn>,
    /// Recover onto this timeline.
    pub target_timeline: Option<TimelineId>,
    /// Named restore point. Not supported; always rejected.
    pub target_name: Option<String>,
    /// Transaction ID target. Not supported; always rejected.
    pub target_xid: Option<String>,
    /// Stop at the first consistent state. Not supported.
    pub target_immediate: bool,
}

impl RecoveryTargetSpec {
    /// A spec with no constraints: restore the most recent backup.
    #[must_use]
    pub fn latest() -> Self {
        Self::default()
    }

    /// Restores the given backup.
    #[must_use]
    pub fn backup(id: BackupId) -> Self {
        Self {
            backup_id: Some(id),
            ..Self::default()
        }
    }

    /// Sets the target time.
    #[must_use]
    pub fn with_time(mut self, time: Timestamp) -> Self {
        self.target_time = Some(time);
        self
    }

    /// Sets the target LSN.
    #[must_use]
    pub fn with_lsn(mut self, lsn: Lsn) -> Self {
        self.target_lsn = Some(lsn);
        self
    }

    /// Sets the target timeline.
    #[must_use]
    pub fn with_timeline(mut self, timeline: TimelineId) -> Self {
        self.target_timeline = Some(timeline);
        self
    }

    fn has_point_target(&self) -> bool {
        self.target_time.is_some() || self.target_lsn.is_some() || self.target_timeline.is_some()
    }
}

/// Where replay stops after restoring the selected backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryBoundary {
    /// Plain backup restore: replay only the backup's own WAL range.
    EndOfBackup,
    /// Point-in-time recovery up to the given constraints.
    PointInTime {
        /// Stop at this wall-clock time, if given.
        time: Option<Timestamp>,
        /// Stop at this position, if given.
        lsn: Option<Lsn>,
        /// Recover onto this timeline, if given.
        timeline: Option<TimelineId>,
    },
}

/// The result of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPlan {
    /// The selected base backup.
    pub backup: BackupInfo,
    /// Where replay stops.
    pub boundary: RecoveryBoundary,
    /// The WAL segments required, in replay order.
    pub wal_segments: Vec<SegmentName>,
}

/// Resolves a recovery target against a catalog snapshot.
///
/// # Errors
///
/// Fails with a typed refusal: `InvalidTarget`,
/// `UnsupportedTarget`, `NoBackupAvailable`, `UnreachableTarget`,
/// `BackupNotFound`, or `IncompleteWalChain`.
pub fn resolve(catalog: &Catalog, spec: &RecoveryTargetSpec) -> CatalogResult<RecoveryPlan> {
    // Rule 1: unsupported target kinds are rejected outright, never
    // approximated.
    if spec.target_name.is_some() {
        return Err(CatalogError::unsupported_target("named restore point"));
    }
    if spec.target_xid.is_some() {
        return Err(CatalogError::unsupported_target("transaction ID"));
    }
    if spec.target_immediate {
        return Err(CatalogError::unsupported_target("recovery target immediate"));
    }

    // Rule 2: time and LSN are mutually exclusive.
    if spec.target_time.is_some() && spec.target_lsn.is_some() {
        return Err(CatalogError::invalid_target(
            "target time and target LSN are mutually exclusive",
        ));
    }

    let backup = select_backup(catalog, spec)?;

    let boundary = if spec.has_point_target() {
        RecoveryBoundary::PointInTime {
            time: spec.target_time,
            lsn: spec.target_lsn,
            timeline: spec.target_timeline,
        }
    } else {
        RecoveryBoundary::EndOfBackup
    };

    // Rule 7: the WAL chain from the backup's start record to the
    // boundary must be unbroken, crossing forks as needed.
    let replay_timeline = spec
        .target_timeline
        .or(backup.end_timeline)
        .unwrap_or(backup.begin_timeline);
    let chain_end = chain_end(catalog, &backup, spec, replay_timeline);
    if let Some(missing) =
        catalog
            .wal()
            .first_gap(replay_timeline, backup.begin_lsn, chain_end, catalog.timelines())
    {
        return Err(CatalogError::IncompleteWalChain { missing });
    }

    let wal_segments = catalog
        .wal()
        .segments_in_range(replay_timeline, backup.begin_lsn, chain_end, catalog.timelines())
        .into_iter()
        .map(|s| s.name)
        .collect();

    Ok(RecoveryPlan {
        backup,
        boundary,
        wal_segments,
    })
}

/// Determines the last position the chain check must cover.
///
/// An LSN target bounds the chain exactly. A time or bare-timeline
/// target has no catalog-known LSN, so the chain must reach the newest
/// archived segment on the replay timeline - replay stops somewhere
/// inside the archive. A plain restore needs the backup's own range
/// only.
fn chain_end(
    catalog: &Catalog,
    backup: &BackupInfo,
    spec: &RecoveryTargetSpec,
    replay_timeline: TimelineId,
) -> Lsn {
    if let Some(lsn) = spec.target_lsn {
        return lsn;
    }
    let backup_end = backup.end_lsn.unwrap_or(backup.begin_lsn);
    if spec.has_point_target() {
        let seg_size = catalog.wal().wal_segment_size();
        catalog
            .wal()
            .latest_segment(replay_timeline)
            .map_or(backup_end, |s| s.name.start_lsn(seg_size).max(backup_end))
    } else {
        backup_end
    }
}

fn select_backup(catalog: &Catalog, spec: &RecoveryTargetSpec) -> CatalogResult<BackupInfo> {
    // Rule 3: explicit backup ID.
    if let Some(id) = &spec.backup_id {
        let backup = catalog
            .backup(id)
            .ok_or_else(|| CatalogError::BackupNotFound { id: id.clone() })?;
        validate_explicit(catalog, backup, spec)?;
        return Ok(backup.clone());
    }

    // Rule 4: nothing specified at all.
    if !spec.has_point_target() {
        return catalog
            .latest_done_backup()
            .cloned()
            .ok_or(CatalogError::NoBackupAvailable);
    }

    // Rule 5: time and/or LSN target.
    if spec.target_time.is_some() || spec.target_lsn.is_some() {
        return select_preceding(catalog, spec);
    }

    // Rule 6: bare timeline target.
    select_for_timeline(
        catalog,
        spec.target_timeline
            .ok_or_else(|| CatalogError::invalid_target("empty target specification"))?,
    )
}

fn validate_explicit(
    catalog: &Catalog,
    backup: &BackupInfo,
    spec: &RecoveryTargetSpec,
) -> CatalogResult<()> {
    if !backup.is_done() {
        return Err(CatalogError::unreachable_target(format!(
            "backup {} has status {}, not DONE",
            backup.id, backup.status
        )));
    }
    if let Some(target_tli) = spec.target_timeline {
        if !catalog
            .timelines()
            .is_ancestor_or_self(backup.begin_timeline, target_tli)
        {
            return Err(CatalogError::unreachable_target(format!(
                "backup {} is on {}, which is not {target_tli} or an ancestor of it",
                backup.id, backup.begin_timeline
            )));
        }
    }
    // A backup cannot replay to a point before it started.
    if let Some(time) = spec.target_time {
        if time < backup.begin_time {
            return Err(CatalogError::unreachable_target(format!(
                "target time {time} precedes the start of backup {}",
                backup.id
            )));
        }
    }
    if let Some(lsn) = spec.target_lsn {
        if lsn < backup.begin_lsn {
            return Err(CatalogError::unreachable_target(format!(
                "target LSN {lsn} precedes the start of backup {}",
                backup.id
            )));
        }
    }
    Ok(())
}

fn select_preceding(catalog: &Catalog, spec: &RecoveryTargetSpec) -> CatalogResult<BackupInfo> {
    let mut candidates: Vec<&BackupInfo> = catalog.done_backups();

    // Timeline constraint narrows the field before the point search.
    if let Some(target_tli) = spec.target_timeline {
        candidates.retain(|b| {
            catalog
                .timelines()
                .is_ancestor_or_self(b.begin_timeline, target_tli)
        });
    }

    if let Some(time) = spec.target_time {
        candidates.retain(|b| b.begin_time <= time);
    }
    if let Some(lsn) = spec.target_lsn {
        candidates.retain(|b| {
            b.begin_lsn <= lsn
                && catalog.lsn_is_reachable(lsn, spec.target_timeline.unwrap_or(b.begin_timeline))
        });
    }

    // The closest preceding backup minimizes WAL replay volume.
    candidates
        .into_iter()
        .max_by(|a, b| {
            (a.begin_lsn, a.begin_time, a.created_at, &a.id)
                .cmp(&(b.begin_lsn, b.begin_time, b.created_at, &b.id))
        })
        .cloned()
        .ok_or_else(|| {
            CatalogError::unreachable_target("no completed backup precedes the requested target")
        })
}

fn select_for_timeline(catalog: &Catalog, target: TimelineId) -> CatalogResult<BackupInfo> {
    let done = catalog.done_backups();

    // Prefer a backup taken directly on the target timeline.
    if let Some(backup) = done
        .iter()
        .filter(|b| b.begin_timeline == target)
        .max_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)))
    {
        return Ok((*backup).clone());
    }

    // Otherwise the closest ancestor wins: deeper in the fork path
    // means less divergent history to replay.
    let path = catalog.timelines().fork_path(target);
    let depth_of = |tli: TimelineId| path.iter().position(|(t, _)| *t == tli);
    done.iter()
        .filter_map(|b| depth_of(b.begin_timeline).map(|depth| (depth, *b)))
        .max_by(|(da, a), (db, b)| (da, a.created_at, &a.id).cmp(&(db, b.created_at, &b.id)))
        .map(|(_, b)| b.clone())
        .ok_or_else(|| {
            CatalogError::unreachable_target(format!(
                "no backup exists on {target} or any of its ancestors"
            ))
        })
}
