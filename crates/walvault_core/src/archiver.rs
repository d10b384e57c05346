//! WAL archival with content-hash deduplication.
//!
//! The archiver sits between the WAL producer and the archive store.
//! Its contract toward the producer is: any segment handed over is
//! dealt with, one way or another, so the producer can recycle it.
//! Re-sent identical segments are absorbed silently; same-named
//! segments with different content are quarantined rather than
//! rejected, because refusing would stall the producer's archiving
//! pipeline.

use std::sync::Arc;

use walvault_storage::ArchiveStore;

use crate::catalog::Catalog;
use crate::checksum::sha256_hex;
use crate::clock::Clock;
use crate::error::{CatalogError, CatalogResult};
use crate::types::{parse_history_name, SegmentName};
use crate::wal::{InsertOutcome, WalSegment};

/// Prefix under which archived segments live in the store.
pub const WAL_PREFIX: &str = "wals";
/// Prefix under which quarantined files live in the store.
pub const QUARANTINE_PREFIX: &str = "errors";

/// What happened to an incoming WAL file.
///
/// Every variant is a success toward the producer; the distinction
/// matters only for observability and the catalog's own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// New segment, stored and indexed.
    Accepted,
    /// Byte-identical re-send of an already-archived segment.
    IgnoredDuplicate,
    /// Same name, different content. The incoming payload was moved
    /// aside; the archived original is untouched.
    MovedToQuarantine,
}

/// Archives WAL segments and timeline history files into a store,
/// keeping the catalog's segment index in sync.
pub struct WalArchiver {
    store: Arc<dyn ArchiveStore>,
    clock: Arc<dyn Clock>,
}

impl WalArchiver {
    /// Creates an archiver over the given store and clock.
    #[must_use]
    pub fn new(store: Arc<dyn ArchiveStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Archives one incoming file.
    ///
    /// Timeline history files are parsed and folded into the
    /// catalog's fork evidence. Segment files are deduplicated by
    /// SHA-256 before being stored and indexed. Files that are
    /// neither are quarantined.
    ///
    /// # Errors
    ///
    /// Returns an error only for store I/O failures or malformed
    /// history content; duplicates and conflicts are `Ok`.
    pub fn archive(
        &self,
        catalog: &mut Catalog,
        file_name: &str,
        payload: &[u8],
    ) -> CatalogResult<ArchiveOutcome> {
        if let Some(child) = parse_history_name(file_name) {
            return self.archive_history(catalog, child, file_name, payload);
        }

        let name = match SegmentName::parse(file_name) {
            Ok(name) => name,
            Err(_) => {
                tracing::warn!(file = file_name, "unrecognized file name, quarantining");
                self.quarantine(file_name, payload, "unknown")?;
                return Ok(ArchiveOutcome::MovedToQuarantine);
            }
        };

        let checksum = sha256_hex(payload);

        if let Some(existing) = catalog.wal().get(&name) {
            if existing.checksum == checksum {
                tracing::debug!(segment = %name, "duplicate segment ignored");
                return Ok(ArchiveOutcome::IgnoredDuplicate);
            }
            tracing::warn!(
                segment = %name,
                existing = %existing.checksum,
                incoming = %checksum,
                "conflicting segment content, quarantining incoming copy"
            );
            self.quarantine(file_name, payload, "duplicate")?;
            return Ok(ArchiveOutcome::MovedToQuarantine);
        }

        self.store.put(&segment_path(&name), payload)?;
        let segment = WalSegment {
            name,
            archived_at: self.clock.now(),
            size: payload.len() as u64,
            checksum,
            compression: None,
        };
        match catalog.insert_segment(segment) {
            InsertOutcome::Accepted => {
                tracing::info!(segment = %name, size = payload.len(), "segment archived");
                Ok(ArchiveOutcome::Accepted)
            }
            // The index was consulted above; a conflict here means the
            // catalog changed underneath us, which a &mut borrow rules
            // out. Handled anyway to keep the contract total.
            InsertOutcome::Duplicate => Ok(ArchiveOutcome::IgnoredDuplicate),
            InsertOutcome::Conflict { .. } => {
                self.quarantine(file_name, payload, "duplicate")?;
                Ok(ArchiveOutcome::MovedToQuarantine)
            }
        }
    }

    fn archive_history(
        &self,
        catalog: &mut Catalog,
        child: crate::types::TimelineId,
        file_name: &str,
        payload: &[u8],
    ) -> CatalogResult<ArchiveOutcome> {
        let content = std::str::from_utf8(payload).map_err(|_| {
            CatalogError::invalid_state(format!("history file {file_name} is not valid UTF-8"))
        })?;
        catalog.load_history_file(child, content)?;
        self.store
            .put(&format!("{WAL_PREFIX}/{file_name}"), payload)?;
        tracing::info!(timeline = %child, "timeline history archived");
        Ok(ArchiveOutcome::Accepted)
    }

    fn quarantine(&self, file_name: &str, payload: &[u8], reason: &str) -> CatalogResult<()> {
        let ts = self.clock.now().as_millis();
        let path = format!("{QUARANTINE_PREFIX}/{file_name}.{ts}.{reason}");
        self.store.put(&path, payload)?;
        Ok(())
    }
}

/// Store path for an archived segment, grouped by timeline.
#[must_use]
pub fn segment_path(name: &SegmentName) -> String {
    format!("{WAL_PREFIX}/{:08X}/{name}", name.timeline.as_u32())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::timeline::Ancestry;
    use crate::types::{Lsn, TimelineId, Timestamp};
    use walvault_storage::InMemoryStore;

    const SEG: u64 = 16 * 1024 * 1024;

    fn setup() -> (WalArchiver, Catalog, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::starting_at(Timestamp::from_millis(1_000)));
        let archiver = WalArchiver::new(store.clone(), clock);
        let catalog = Catalog::new("main", SEG);
        (archiver, catalog, store)
    }

    #[test]
    fn new_segment_accepted_and_indexed() {
        let (archiver, mut cat, store) = setup();
        let outcome = archiver
            .archive(&mut cat, "000000010000000000000003", b"payload")
            .unwrap();
        assert_eq!(outcome, ArchiveOutcome::Accepted);

        let name = SegmentName::parse("000000010000000000000003").unwrap();
        let seg = cat.wal().get(&name).unwrap();
        assert_eq!(seg.size, 7);
        assert_eq!(seg.checksum, sha256_hex(b"payload"));
        assert_eq!(
            store.get("wals/00000001/000000010000000000000003").unwrap(),
            b"payload"
        );
    }

    #[test]
    fn identical_resend_ignored() {
        let (archiver, mut cat, store) = setup();
        archiver
            .archive(&mut cat, "000000010000000000000003", b"payload")
            .unwrap();
        let outcome = archiver
            .archive(&mut cat, "000000010000000000000003", b"payload")
            .unwrap();
        assert_eq!(outcome, ArchiveOutcome::IgnoredDuplicate);
        // Nothing quarantined
        assert!(store.list("errors/").unwrap().is_empty());
    }

    #[test]
    fn conflicting_resend_quarantined() {
        let (archiver, mut cat, store) = setup();
        archiver
            .archive(&mut cat, "000000010000000000000003", b"original")
            .unwrap();
        let outcome = archiver
            .archive(&mut cat, "000000010000000000000003", b"different")
            .unwrap();
        assert_eq!(outcome, ArchiveOutcome::MovedToQuarantine);

        // The archived original and its index entry are untouched.
        let name = SegmentName::parse("000000010000000000000003").unwrap();
        assert_eq!(cat.wal().get(&name).unwrap().checksum, sha256_hex(b"original"));
        assert_eq!(
            store.get("wals/00000001/000000010000000000000003").unwrap(),
            b"original"
        );

        let quarantined = store.list("errors/").unwrap();
        assert_eq!(quarantined.len(), 1);
        assert!(quarantined[0].starts_with("errors/000000010000000000000003."));
        assert!(quarantined[0].ends_with(".duplicate"));
        assert_eq!(store.get(&quarantined[0]).unwrap(), b"different");
    }

    #[test]
    fn history_file_records_fork() {
        let (archiver, mut cat, store) = setup();
        let outcome = archiver
            .archive(&mut cat, "00000002.history", b"1\t0/3000028\tfailover")
            .unwrap();
        assert_eq!(outcome, ArchiveOutcome::Accepted);
        assert_eq!(
            cat.timelines().resolve(TimelineId::new(2)).map(|t| t.ancestry),
            Some(Ancestry::Forked {
                parent: TimelineId::new(1),
                fork_lsn: Lsn::new(0x3000028),
            })
        );
        assert!(store.contains("wals/00000002.history").unwrap());
    }

    #[test]
    fn malformed_history_rejected() {
        let (archiver, mut cat, _) = setup();
        let err = archiver
            .archive(&mut cat, "00000002.history", b"not a history line")
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidState { .. }));
    }

    #[test]
    fn unrecognized_file_quarantined() {
        let (archiver, mut cat, store) = setup();
        let outcome = archiver
            .archive(&mut cat, "backup_label.old", b"whatever")
            .unwrap();
        assert_eq!(outcome, ArchiveOutcome::MovedToQuarantine);
        let quarantined = store.list("errors/").unwrap();
        assert_eq!(quarantined.len(), 1);
        assert!(quarantined[0].ends_with(".unknown"));
    }

    #[test]
    fn archival_observes_timeline() {
        let (archiver, mut cat, _) = setup();
        archiver
            .archive(&mut cat, "000000030000000000000000", b"x")
            .unwrap();
        assert_eq!(
            cat.timelines().resolve(TimelineId::new(3)).map(|t| t.ancestry),
            Some(Ancestry::Pending)
        );
    }
}
