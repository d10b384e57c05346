//! Ordered index of archived WAL segments.

use crate::error::CatalogResult;
use crate::timeline::TimelineHistory;
use crate::types::{Lsn, SegmentName, TimelineId};
use crate::wal::{InsertOutcome, WalSegment};
use std::collections::BTreeMap;

/// Per-server ordered index of archived WAL segments.
///
/// Keys sort by (timeline, position), so all queries for one timeline
/// are contiguous map ranges. Range and gap queries walk across
/// timeline forks via [`TimelineHistory::fork_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalIndex {
    wal_segment_size: u64,
    segments: BTreeMap<SegmentName, WalSegment>,
}

impl WalIndex {
    /// Creates an empty index for the given segment size.
    #[must_use]
    pub fn new(wal_segment_size: u64) -> Self {
        Self {
            wal_segment_size,
            segments: BTreeMap::new(),
        }
    }

    /// Returns the fixed WAL segment size.
    #[must_use]
    pub const fn wal_segment_size(&self) -> u64 {
        self.wal_segment_size
    }

    /// Returns the number of indexed segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if no segments are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Iterates all segments in (timeline, position) order.
    pub fn iter(&self) -> impl Iterator<Item = &WalSegment> {
        self.segments.values()
    }

    /// Looks up a segment by name.
    #[must_use]
    pub fn get(&self, name: &SegmentName) -> Option<&WalSegment> {
        self.segments.get(name)
    }

    /// Returns true if a segment with this name is indexed.
    #[must_use]
    pub fn contains(&self, name: &SegmentName) -> bool {
        self.segments.contains_key(name)
    }

    /// Inserts a segment.
    ///
    /// An occupied position is never overwritten: an identical
    /// checksum reports [`InsertOutcome::Duplicate`], a different one
    /// reports [`InsertOutcome::Conflict`] and leaves the index
    /// untouched.
    pub fn insert(&mut self, segment: WalSegment) -> InsertOutcome {
        match self.segments.get(&segment.name) {
            None => {
                self.segments.insert(segment.name, segment);
                InsertOutcome::Accepted
            }
            Some(existing) if existing.checksum == segment.checksum => InsertOutcome::Duplicate,
            Some(existing) => InsertOutcome::Conflict {
                existing: existing.checksum.clone(),
                incoming: segment.checksum,
            },
        }
    }

    /// Removes a segment, returning it if it was indexed.
    pub fn remove(&mut self, name: &SegmentName) -> Option<WalSegment> {
        self.segments.remove(name)
    }

    /// Returns the newest segment on `timeline`, if any.
    #[must_use]
    pub fn latest_segment(&self, timeline: TimelineId) -> Option<&WalSegment> {
        self.timeline_range(timeline).next_back()
    }

    /// Returns the exclusive end position of `timeline`'s archived
    /// WAL, if any segment exists on it.
    #[must_use]
    pub fn head(&self, timeline: TimelineId) -> Option<Lsn> {
        self.latest_segment(timeline)
            .map(|s| s.name.start_lsn(self.wal_segment_size).add(self.wal_segment_size))
    }

    fn timeline_range(&self, timeline: TimelineId) -> impl DoubleEndedIterator<Item = &WalSegment> {
        let lo = SegmentName {
            timeline,
            log: 0,
            seg: 0,
        };
        let hi = SegmentName {
            timeline,
            log: u32::MAX,
            seg: u32::MAX,
        };
        self.segments.range(lo..=hi).map(|(_, s)| s)
    }

    /// Returns the segments covering `[from, to]` when replaying
    /// toward `timeline`, in replay order.
    ///
    /// A range spanning a fork includes the ancestor's segments up to
    /// the fork position, then the descendant's.
    #[must_use]
    pub fn segments_in_range(
        &self,
        timeline: TimelineId,
        from: Lsn,
        to: Lsn,
        history: &TimelineHistory,
    ) -> Vec<&WalSegment> {
        let from_floor = from.segment_floor(self.wal_segment_size);
        let mut result = Vec::new();
        for (portion, lower, upper) in self.portions(timeline, history) {
            let lo = from_floor.max(lower.segment_floor(self.wal_segment_size));
            for segment in self.timeline_range(portion) {
                let start = segment.name.start_lsn(self.wal_segment_size);
                if start < lo || start > to {
                    continue;
                }
                // A segment starting at or past the fork position is
                // divergent WAL, never part of the replay path.
                if let Some(bound) = upper {
                    if start >= bound {
                        continue;
                    }
                }
                result.push(segment);
            }
        }
        result
    }

    /// Returns the first missing segment on the replay path from
    /// `from` to `to` toward `timeline`, or `None` if the chain is
    /// unbroken.
    ///
    /// At a fork boundary the segment may live on either side of the
    /// fork (the forking segment is conventionally archived on the new
    /// timeline too), so both timelines are consulted before a
    /// position is declared missing.
    #[must_use]
    pub fn first_gap(
        &self,
        timeline: TimelineId,
        from: Lsn,
        to: Lsn,
        history: &TimelineHistory,
    ) -> Option<SegmentName> {
        if to < from {
            return None;
        }
        let portions: Vec<_> = self.portions(timeline, history).collect();
        let last_floor = to.segment_floor(self.wal_segment_size);
        let mut pos = from.segment_floor(self.wal_segment_size);
        while pos <= last_floor {
            let mut covered = false;
            let mut best: Option<TimelineId> = None;
            for &(portion, lower, upper) in &portions {
                let lower_floor = lower.segment_floor(self.wal_segment_size);
                let in_span = pos >= lower_floor && upper.map_or(true, |bound| pos < bound);
                if !in_span {
                    continue;
                }
                best = Some(portion);
                let name = SegmentName::from_lsn(portion, pos, self.wal_segment_size);
                if self.contains(&name) {
                    covered = true;
                    break;
                }
            }
            if !covered {
                let tli = best.unwrap_or(timeline);
                return Some(SegmentName::from_lsn(tli, pos, self.wal_segment_size));
            }
            pos = pos.add(self.wal_segment_size);
        }
        None
    }

    /// Decomposes `timeline`'s history into (timeline, inclusive lower
    /// LSN, inclusive upper LSN bound) portions, root-first.
    fn portions<'a>(
        &self,
        timeline: TimelineId,
        history: &'a TimelineHistory,
    ) -> impl Iterator<Item = (TimelineId, Lsn, Option<Lsn>)> + 'a {
        let mut lower = Lsn::new(0);
        history
            .fork_path(timeline)
            .into_iter()
            .map(move |(tli, bound)| {
                let portion = (tli, lower, bound);
                if let Some(b) = bound {
                    lower = b;
                }
                portion
            })
    }

    /// Serializes the index for catalog persistence.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.wal_segment_size.to_le_bytes());
        buf.extend_from_slice(&(self.segments.len() as u32).to_le_bytes());
        for segment in self.segments.values() {
            buf.extend_from_slice(&segment.encode());
        }
        buf
    }

    /// Deserializes an index, advancing `cursor` past it.
    ///
    /// # Errors
    ///
    /// Returns `CorruptCatalog` if the data is truncated or malformed.
    pub fn decode(data: &[u8], cursor: &mut usize) -> CatalogResult<Self> {
        let wal_segment_size = super::read_u64(data, cursor)?;
        let count = super::read_u32(data, cursor)?;
        let mut index = Self::new(wal_segment_size);
        for _ in 0..count {
            let segment = WalSegment::decode(data, cursor)?;
            index.segments.insert(segment.name, segment);
        }
        Ok(index)
    }
}
