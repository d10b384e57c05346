//! The per-server backup catalog aggregate.
//!
//! The catalog is the single source of truth consulted by the
//! recovery-target resolver and the retention manager: it owns the
//! backup set, the WAL segment index, and the timeline history of one
//! server. It is a plain value - concurrency control and persistence
//! sit in the [`crate::server`] facade, which hands out snapshot
//! clones for reads and serializes mutations.
//!
//! ## Persistence format
//!
//! ```text
//! | magic (4) | version (2) | server | timelines | backups | wal index | crc32 (4) |
//! ```
//!
//! The CRC trailer makes a torn write detectable; the facade writes
//! the whole record atomically through the store.

use crate::backup::{BackupInfo, BackupStatus};
use crate::checksum::compute_crc32;
use crate::error::{CatalogError, CatalogResult};
use crate::timeline::{Ancestry, TimelineHistory};
use crate::types::{BackupId, Lsn, SegmentName, TimelineId, Timestamp};
use crate::wal::{InsertOutcome, WalIndex, WalSegment};
use std::collections::{BTreeMap, BTreeSet};

/// Magic bytes for the persisted catalog.
pub const CATALOG_MAGIC: [u8; 4] = *b"WVCT";

/// Current catalog format version.
pub const CATALOG_VERSION: u16 = 1;

/// The backup catalog for a single server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    server: String,
    backups: BTreeMap<BackupId, BackupInfo>,
    wal: WalIndex,
    timelines: TimelineHistory,
    /// Backups selected by an in-flight restore. Runtime-only state:
    /// deliberately not persisted, so a crashed restore cannot pin a
    /// backup forever.
    pinned: BTreeSet<BackupId>,
}

impl Catalog {
    /// Creates an empty catalog for `server`.
    #[must_use]
    pub fn new(server: impl Into<String>, wal_segment_size: u64) -> Self {
        Self {
            server: server.into(),
            backups: BTreeMap::new(),
            wal: WalIndex::new(wal_segment_size),
            timelines: TimelineHistory::new(),
            pinned: BTreeSet::new(),
        }
    }

    /// Returns the server this catalog belongs to.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Returns the WAL segment index.
    #[must_use]
    pub fn wal(&self) -> &WalIndex {
        &self.wal
    }

    /// Returns the timeline history.
    #[must_use]
    pub fn timelines(&self) -> &TimelineHistory {
        &self.timelines
    }

    /// Looks up a backup by ID.
    #[must_use]
    pub fn backup(&self, id: &BackupId) -> Option<&BackupInfo> {
        self.backups.get(id)
    }

    /// Iterates all backups in ID (chronological) order.
    pub fn backups(&self) -> impl Iterator<Item = &BackupInfo> {
        self.backups.values()
    }

    /// Returns all `Done` backups, oldest first.
    #[must_use]
    pub fn done_backups(&self) -> Vec<&BackupInfo> {
        let mut done: Vec<&BackupInfo> = self.backups.values().filter(|b| b.is_done()).collect();
        done.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        done
    }

    /// Returns the most recent `Done` backup: maximum creation
    /// timestamp, ties broken by maximum ID.
    #[must_use]
    pub fn latest_done_backup(&self) -> Option<&BackupInfo> {
        self.backups
            .values()
            .filter(|b| b.is_done())
            .max_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)))
    }

    /// Generates an unused backup ID for the given instant.
    ///
    /// Two backups started within the same second advance the ID by
    /// one second so identifiers stay unique and time-ordered.
    #[must_use]
    pub fn next_backup_id(&self, now: Timestamp) -> BackupId {
        let mut ts = now;
        loop {
            let id = BackupId::from_timestamp(ts);
            if !self.backups.contains_key(&id) {
                return id;
            }
            ts = Timestamp::from_millis(ts.as_millis() + 1_000);
        }
    }

    /// Registers a new in-progress backup.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the ID is already taken.
    pub fn start_backup(
        &mut self,
        id: BackupId,
        created_at: Timestamp,
        begin_lsn: Lsn,
        begin_timeline: TimelineId,
    ) -> CatalogResult<()> {
        if self.backups.contains_key(&id) {
            return Err(CatalogError::invalid_state(format!(
                "backup {id} already registered"
            )));
        }
        self.timelines.observe(begin_timeline);
        let info = BackupInfo::start(id.clone(), self.server.clone(), created_at, begin_lsn, begin_timeline);
        self.backups.insert(id, info);
        Ok(())
    }

    /// Records backup completion.
    ///
    /// The backup becomes `Done` only if its WAL chain from the begin
    /// segment to the end segment is already archived; otherwise it
    /// parks in `WaitingForWals` until the archiver sees the missing
    /// segments.
    ///
    /// # Errors
    ///
    /// Returns `BackupNotFound` for an unknown ID or `InvalidState`
    /// for an illegal transition.
    pub fn complete_backup(
        &mut self,
        id: &BackupId,
        end_lsn: Lsn,
        end_time: Timestamp,
        end_timeline: TimelineId,
        size: u64,
    ) -> CatalogResult<BackupStatus> {
        self.timelines.observe(end_timeline);
        let chain_complete = self
            .wal
            .first_gap(end_timeline, self.backup_begin(id)?, end_lsn, &self.timelines)
            .is_none();
        let backup = self
            .backups
            .get_mut(id)
            .ok_or_else(|| CatalogError::BackupNotFound { id: id.clone() })?;
        backup.complete(end_lsn, end_time, end_timeline, size)?;
        if !chain_complete {
            backup.status = BackupStatus::WaitingForWals;
        }
        Ok(backup.status)
    }

    fn backup_begin(&self, id: &BackupId) -> CatalogResult<Lsn> {
        self.backups
            .get(id)
            .map(|b| b.begin_lsn)
            .ok_or_else(|| CatalogError::BackupNotFound { id: id.clone() })
    }

    /// Records backup failure.
    ///
    /// # Errors
    ///
    /// Returns `BackupNotFound` for an unknown ID or `InvalidState`
    /// if the backup already completed.
    pub fn fail_backup(&mut self, id: &BackupId) -> CatalogResult<()> {
        self.backups
            .get_mut(id)
            .ok_or_else(|| CatalogError::BackupNotFound { id: id.clone() })?
            .fail()
    }

    /// Removes a backup from the catalog.
    ///
    /// # Errors
    ///
    /// Returns `BackupNotFound` for an unknown ID.
    pub fn remove_backup(&mut self, id: &BackupId) -> CatalogResult<BackupInfo> {
        self.backups
            .remove(id)
            .ok_or_else(|| CatalogError::BackupNotFound { id: id.clone() })
    }

    /// Inserts an archived segment into the index.
    ///
    /// On acceptance, any backup waiting for WALs whose chain is now
    /// unbroken is promoted to `Done`.
    pub fn insert_segment(&mut self, segment: WalSegment) -> InsertOutcome {
        self.timelines.observe(segment.name.timeline);
        let outcome = self.wal.insert(segment);
        if outcome == InsertOutcome::Accepted {
            self.promote_waiting_backups();
        }
        outcome
    }

    /// Removes a segment from the index, returning it if present.
    pub fn remove_segment(&mut self, name: &SegmentName) -> Option<WalSegment> {
        self.wal.remove(name)
    }

    /// Records fork evidence from a timeline history file.
    ///
    /// # Errors
    ///
    /// Propagates malformed-history and conflicting-evidence errors.
    pub fn load_history_file(&mut self, child: TimelineId, content: &str) -> CatalogResult<()> {
        self.timelines.load_history_file(child, content)
    }

    /// Returns true if `lsn` is reachable by replaying toward
    /// `timeline`, bounded by the archived WAL head of each branch.
    #[must_use]
    pub fn lsn_is_reachable(&self, lsn: Lsn, timeline: TimelineId) -> bool {
        self.timelines
            .lsn_is_reachable(lsn, timeline, self.wal.head(timeline))
    }

    /// Pins a backup as selected by an in-flight restore.
    pub fn pin(&mut self, id: &BackupId) {
        self.pinned.insert(id.clone());
    }

    /// Releases a restore pin.
    pub fn unpin(&mut self, id: &BackupId) {
        self.pinned.remove(id);
    }

    /// Returns true if an in-flight restore holds this backup.
    #[must_use]
    pub fn is_pinned(&self, id: &BackupId) -> bool {
        self.pinned.contains(id)
    }

    /// Iterates the currently pinned backup IDs.
    pub fn pinned(&self) -> impl Iterator<Item = &BackupId> {
        self.pinned.iter()
    }

    fn promote_waiting_backups(&mut self) {
        let waiting: Vec<BackupId> = self
            .backups
            .values()
            .filter(|b| b.status == BackupStatus::WaitingForWals && b.end_lsn.is_some())
            .map(|b| b.id.clone())
            .collect();
        for id in waiting {
            let (begin, end, tli) = {
                let b = &self.backups[&id];
                (b.begin_lsn, b.end_lsn, b.end_timeline)
            };
            let (Some(end), Some(tli)) = (end, tli) else {
                continue;
            };
            if self.wal.first_gap(tli, begin, end, &self.timelines).is_none() {
                if let Some(b) = self.backups.get_mut(&id) {
                    tracing::info!(backup = %id, "WAL chain complete, promoting backup to DONE");
                    b.status = BackupStatus::Done;
                }
            }
        }
    }

    /// Serializes the catalog, including the integrity trailer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&CATALOG_MAGIC);
        buf.extend_from_slice(&CATALOG_VERSION.to_le_bytes());
        crate::wal::encode_string(&mut buf, &self.server);

        let timelines: Vec<_> = self.timelines.iter().collect();
        buf.extend_from_slice(&(timelines.len() as u32).to_le_bytes());
        for timeline in timelines {
            buf.extend_from_slice(&timeline.id.as_u32().to_le_bytes());
            match timeline.ancestry {
                Ancestry::Root => buf.push(0),
                Ancestry::Forked { parent, fork_lsn } => {
                    buf.push(1);
                    buf.extend_from_slice(&parent.as_u32().to_le_bytes());
                    buf.extend_from_slice(&fork_lsn.as_u64().to_le_bytes());
                }
                Ancestry::Pending => buf.push(2),
            }
        }

        buf.extend_from_slice(&(self.backups.len() as u32).to_le_bytes());
        for backup in self.backups.values() {
            buf.extend_from_slice(&backup.encode());
        }

        buf.extend_from_slice(&self.wal.encode());

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserializes a catalog, verifying magic, version, and CRC.
    ///
    /// # Errors
    ///
    /// Returns `CorruptCatalog` on any integrity failure. This is the
    /// fatal path: an unreadable catalog aborts the operation rather
    /// than degrading silently.
    pub fn decode(data: &[u8]) -> CatalogResult<Self> {
        if data.len() < 4 + 2 + 4 {
            return Err(CatalogError::corrupt_catalog("catalog file too small"));
        }
        if data[0..4] != CATALOG_MAGIC {
            return Err(CatalogError::corrupt_catalog("invalid catalog magic"));
        }

        let crc_offset = data.len() - 4;
        let stored_crc = u32::from_le_bytes([
            data[crc_offset],
            data[crc_offset + 1],
            data[crc_offset + 2],
            data[crc_offset + 3],
        ]);
        let computed_crc = compute_crc32(&data[..crc_offset]);
        if stored_crc != computed_crc {
            return Err(CatalogError::corrupt_catalog(format!(
                "checksum mismatch: stored {stored_crc:08x}, computed {computed_crc:08x}"
            )));
        }

        let body = &data[..crc_offset];
        let mut cursor = 4;
        let version = crate::wal::read_u16(body, &mut cursor)?;
        if version > CATALOG_VERSION {
            return Err(CatalogError::corrupt_catalog(format!(
                "unsupported catalog version: {version}"
            )));
        }
        let server = crate::wal::decode_string(body, &mut cursor)?;

        let timeline_count = crate::wal::read_u32(body, &mut cursor)?;
        let mut timelines = TimelineHistory::new();
        for _ in 0..timeline_count {
            let id = TimelineId::new(crate::wal::read_u32(body, &mut cursor)?);
            timelines.observe(id);
            match crate::wal::read_u8(body, &mut cursor)? {
                0 | 2 => {}
                1 => {
                    let parent = TimelineId::new(crate::wal::read_u32(body, &mut cursor)?);
                    let fork_lsn = Lsn::new(crate::wal::read_u64(body, &mut cursor)?);
                    timelines.observe_fork(id, parent, fork_lsn).map_err(|e| {
                        CatalogError::corrupt_catalog(format!("bad timeline record: {e}"))
                    })?;
                }
                other => {
                    return Err(CatalogError::corrupt_catalog(format!(
                        "unknown ancestry tag: {other}"
                    )))
                }
            }
        }

        let backup_count = crate::wal::read_u32(body, &mut cursor)?;
        let mut backups = BTreeMap::new();
        for _ in 0..backup_count {
            let backup = BackupInfo::decode(body, &mut cursor)?;
            backups.insert(backup.id.clone(), backup);
        }

        let wal = WalIndex::decode(body, &mut cursor)?;

        Ok(Self {
            server,
            backups,
            wal,
            timelines,
            pinned: BTreeSet::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::ROOT_TIMELINE;

    const SEG: u64 = 100;

    fn catalog() -> Catalog {
        Catalog::new("main", SEG)
    }

    fn wal_segment(timeline: u32, start: u64) -> WalSegment {
        WalSegment {
            name: SegmentName::from_lsn(TimelineId::new(timeline), Lsn::new(start), SEG),
            archived_at: Timestamp::from_millis(start),
            size: SEG,
            checksum: format!("{start:064x}"),
            compression: None,
        }
    }

    fn registered_backup(catalog: &mut Catalog, id: &str, created_millis: u64, begin: u64) -> BackupId {
        let id = BackupId::new(id);
        catalog
            .start_backup(
                id.clone(),
                Timestamp::from_millis(created_millis),
                Lsn::new(begin),
                ROOT_TIMELINE,
            )
            .unwrap();
        id
    }

    #[test]
    fn start_and_complete_backup() {
        let mut cat = catalog();
        cat.insert_segment(wal_segment(1, 0));
        cat.insert_segment(wal_segment(1, 100));
        let id = registered_backup(&mut cat, "20260101T000000", 1_000, 10);

        let status = cat
            .complete_backup(&id, Lsn::new(150), Timestamp::from_millis(2_000), ROOT_TIMELINE, 64)
            .unwrap();
        assert_eq!(status, BackupStatus::Done);
        assert!(cat.backup(&id).unwrap().is_done());
    }

    #[test]
    fn duplicate_backup_id_rejected() {
        let mut cat = catalog();
        registered_backup(&mut cat, "20260101T000000", 1_000, 0);
        let err = cat
            .start_backup(
                BackupId::new("20260101T000000"),
                Timestamp::from_millis(1_000),
                Lsn::new(0),
                ROOT_TIMELINE,
            )
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidState { .. }));
    }

    #[test]
    fn completion_without_wal_chain_waits() {
        let mut cat = catalog();
        // Only the begin segment archived; end segment missing.
        cat.insert_segment(wal_segment(1, 0));
        let id = registered_backup(&mut cat, "20260101T000000", 1_000, 10);

        let status = cat
            .complete_backup(&id, Lsn::new(250), Timestamp::from_millis(2_000), ROOT_TIMELINE, 64)
            .unwrap();
        assert_eq!(status, BackupStatus::WaitingForWals);
    }

    #[test]
    fn waiting_backup_promoted_when_wal_arrives() {
        let mut cat = catalog();
        cat.insert_segment(wal_segment(1, 0));
        let id = registered_backup(&mut cat, "20260101T000000", 1_000, 10);
        cat.complete_backup(&id, Lsn::new(250), Timestamp::from_millis(2_000), ROOT_TIMELINE, 64)
            .unwrap();

        cat.insert_segment(wal_segment(1, 100));
        assert_eq!(
            cat.backup(&id).unwrap().status,
            BackupStatus::WaitingForWals
        );
        cat.insert_segment(wal_segment(1, 200));
        assert_eq!(cat.backup(&id).unwrap().status, BackupStatus::Done);
    }

    #[test]
    fn latest_done_backup_tie_break() {
        let mut cat = catalog();
        cat.insert_segment(wal_segment(1, 0));
        let a = registered_backup(&mut cat, "20260101T000000", 1_000, 0);
        let b = registered_backup(&mut cat, "20260101T000001", 1_000, 0);
        for id in [&a, &b] {
            cat.complete_backup(id, Lsn::new(50), Timestamp::from_millis(2_000), ROOT_TIMELINE, 0)
                .unwrap();
        }

        // Same creation timestamp: maximum ID wins.
        assert_eq!(cat.latest_done_backup().unwrap().id, b);
    }

    #[test]
    fn failed_backup_not_done() {
        let mut cat = catalog();
        let id = registered_backup(&mut cat, "20260101T000000", 1_000, 0);
        cat.fail_backup(&id).unwrap();
        assert!(cat.latest_done_backup().is_none());
    }

    #[test]
    fn reachability_consults_wal_head() {
        let mut cat = catalog();
        cat.insert_segment(wal_segment(1, 0));
        // Archive ends at LSN 100; 150 was never written.
        assert!(cat.lsn_is_reachable(Lsn::new(50), ROOT_TIMELINE));
        assert!(!cat.lsn_is_reachable(Lsn::new(150), ROOT_TIMELINE));
    }

    #[test]
    fn pin_lifecycle() {
        let mut cat = catalog();
        let id = registered_backup(&mut cat, "20260101T000000", 1_000, 0);
        cat.pin(&id);
        assert!(cat.is_pinned(&id));
        cat.unpin(&id);
        assert!(!cat.is_pinned(&id));
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut cat = catalog();
        cat.insert_segment(wal_segment(1, 0));
        cat.insert_segment(wal_segment(1, 100));
        cat.load_history_file(TimelineId::new(2), "1\t0/96\treason").unwrap();
        let id = registered_backup(&mut cat, "20260101T000000", 1_000, 10);
        cat.complete_backup(&id, Lsn::new(150), Timestamp::from_millis(2_000), ROOT_TIMELINE, 64)
            .unwrap();

        let decoded = Catalog::decode(&cat.encode()).unwrap();
        assert_eq!(decoded, cat);
    }

    #[test]
    fn pins_are_not_persisted() {
        let mut cat = catalog();
        let id = registered_backup(&mut cat, "20260101T000000", 1_000, 0);
        cat.pin(&id);
        let decoded = Catalog::decode(&cat.encode()).unwrap();
        assert!(!decoded.is_pinned(&id));
    }

    #[test]
    fn corrupted_catalog_rejected() {
        let cat = catalog();
        let mut data = cat.encode();
        let mid = data.len() / 2;
        data[mid] ^= 0xFF;
        let err = Catalog::decode(&data).unwrap_err();
        assert!(matches!(err, CatalogError::CorruptCatalog { .. }));
    }

    #[test]
    fn next_backup_id_avoids_collision() {
        let mut cat = catalog();
        let now = Timestamp::from_millis(1_700_000_000_000);
        let first = cat.next_backup_id(now);
        cat.start_backup(first.clone(), now, Lsn::new(0), ROOT_TIMELINE)
            .unwrap();
        let second = cat.next_backup_id(now);
        assert_ne!(first, second);
        assert!(second > first);
    }
}
