//! Core type definitions for the backup catalog.

use crate::error::{CatalogError, CatalogResult};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default WAL segment size: 16 MiB, the conventional value.
pub const DEFAULT_WAL_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;

/// A log sequence number: a position within a WAL stream.
///
/// LSNs are monotonically increasing and unique within a timeline.
/// They display in the conventional `hi/lo` hexadecimal form
/// (for example `0/3000028`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Creates an LSN from a raw 64-bit position.
    #[must_use]
    pub const fn new(pos: u64) -> Self {
        Self(pos)
    }

    /// Returns the raw position.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the start LSN of the segment containing this position.
    #[must_use]
    pub const fn segment_floor(self, wal_segment_size: u64) -> Self {
        Self(self.0 - self.0 % wal_segment_size)
    }

    /// Returns the position advanced by `bytes`.
    #[must_use]
    pub const fn add(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = CatalogError;

    fn from_str(s: &str) -> CatalogResult<Self> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| CatalogError::invalid_target(format!("malformed LSN: {s}")))?;
        let hi = u64::from_str_radix(hi, 16)
            .map_err(|_| CatalogError::invalid_target(format!("malformed LSN: {s}")))?;
        let lo = u64::from_str_radix(lo, 16)
            .map_err(|_| CatalogError::invalid_target(format!("malformed LSN: {s}")))?;
        if hi > u64::from(u32::MAX) || lo > u64::from(u32::MAX) {
            return Err(CatalogError::invalid_target(format!("LSN out of range: {s}")));
        }
        Ok(Self((hi << 32) | lo))
    }
}

/// Identifier for one branch of WAL history.
///
/// Timelines form a forest: every timeline except a root has a parent
/// and a fork LSN at which it diverged. Timeline zero is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimelineId(pub u32);

impl TimelineId {
    /// Creates a timeline ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TimelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tli:{}", self.0)
    }
}

/// A wall-clock instant as milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Creates a timestamp from epoch milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns epoch milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns this instant moved back by `window`, clamped at the
    /// epoch.
    #[must_use]
    pub fn saturating_sub(self, window: Duration) -> Self {
        Self(self.0.saturating_sub(window.as_millis() as u64))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Unique identifier for a base backup.
///
/// Backup IDs are compact UTC timestamps (`YYYYMMDDThhmmss`), so their
/// lexicographic order matches their chronological order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupId(String);

impl BackupId {
    /// Creates a backup ID from an already-formatted string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives a backup ID from a creation timestamp.
    #[must_use]
    pub fn from_timestamp(ts: Timestamp) -> Self {
        let secs = ts.as_millis() / 1000;
        let (year, month, day) = civil_from_days((secs / 86_400) as i64);
        let rem = secs % 86_400;
        Self(format!(
            "{year:04}{month:02}{day:02}T{:02}{:02}{:02}",
            rem / 3600,
            (rem % 3600) / 60,
            rem % 60
        ))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Converts days since the Unix epoch to a civil (year, month, day).
///
/// Days-from-civil inverse, valid for the full u64-millisecond range.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if month <= 2 { year + 1 } else { year }, month, day)
}

/// The name of an archived WAL segment.
///
/// Segment names are the conventional 24-hex-character form: eight
/// digits each for the timeline, the log file number (the high half of
/// the LSN) and the segment number within the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentName {
    /// Timeline the segment belongs to.
    pub timeline: TimelineId,
    /// High 32 bits of the segment's starting LSN.
    pub log: u32,
    /// Segment number within the log file.
    pub seg: u32,
}

impl SegmentName {
    /// Builds the name of the segment containing `lsn` on `timeline`.
    #[must_use]
    pub fn from_lsn(timeline: TimelineId, lsn: Lsn, wal_segment_size: u64) -> Self {
        let pos = lsn.as_u64();
        Self {
            timeline,
            log: (pos >> 32) as u32,
            seg: ((pos & 0xFFFF_FFFF) / wal_segment_size) as u32,
        }
    }

    /// Returns the starting LSN of this segment.
    #[must_use]
    pub fn start_lsn(&self, wal_segment_size: u64) -> Lsn {
        Lsn((u64::from(self.log) << 32) + u64::from(self.seg) * wal_segment_size)
    }

    /// Parses a 24-hex-character segment name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTarget` if the name is not a segment name.
    pub fn parse(name: &str) -> CatalogResult<Self> {
        if name.len() != 24 || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CatalogError::invalid_target(format!(
                "not a WAL segment name: {name}"
            )));
        }
        let tli = u32::from_str_radix(&name[0..8], 16)
            .map_err(|_| CatalogError::invalid_target(format!("bad timeline in {name}")))?;
        let log = u32::from_str_radix(&name[8..16], 16)
            .map_err(|_| CatalogError::invalid_target(format!("bad log in {name}")))?;
        let seg = u32::from_str_radix(&name[16..24], 16)
            .map_err(|_| CatalogError::invalid_target(format!("bad segment in {name}")))?;
        if tli == 0 {
            return Err(CatalogError::invalid_target(format!(
                "timeline zero in segment name: {name}"
            )));
        }
        Ok(Self {
            timeline: TimelineId::new(tli),
            log,
            seg,
        })
    }
}

impl fmt::Display for SegmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}{:08X}{:08X}",
            self.timeline.as_u32(),
            self.log,
            self.seg
        )
    }
}

/// Parses a timeline history file name (`<TLI>.history`).
#[must_use]
pub fn parse_history_name(name: &str) -> Option<TimelineId> {
    let stem = name.strip_suffix(".history")?;
    if stem.len() != 8 || !stem.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let tli = u32::from_str_radix(stem, 16).ok()?;
    if tli == 0 {
        return None;
    }
    Some(TimelineId::new(tli))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsn_display_and_parse() {
        let lsn = Lsn::new((0x1 << 32) | 0x2A);
        assert_eq!(lsn.to_string(), "1/2A");
        assert_eq!("1/2A".parse::<Lsn>().unwrap(), lsn);
    }

    #[test]
    fn lsn_parse_rejects_garbage() {
        assert!("nonsense".parse::<Lsn>().is_err());
        assert!("1/ZZ".parse::<Lsn>().is_err());
        assert!("100000000/0".parse::<Lsn>().is_err());
    }

    #[test]
    fn lsn_segment_floor() {
        let size = DEFAULT_WAL_SEGMENT_SIZE;
        let lsn = Lsn::new(size + 123);
        assert_eq!(lsn.segment_floor(size), Lsn::new(size));
    }

    #[test]
    fn backup_id_epoch() {
        let id = BackupId::from_timestamp(Timestamp::from_millis(0));
        assert_eq!(id.as_str(), "19700101T000000");
    }

    #[test]
    fn backup_id_known_instant() {
        // 2026-08-30 12:34:56 UTC
        let id = BackupId::from_timestamp(Timestamp::from_millis(1_788_093_296_000));
        assert_eq!(id.as_str(), "20260830T123456");
    }

    #[test]
    fn backup_id_order_matches_time_order() {
        let earlier = BackupId::from_timestamp(Timestamp::from_millis(1_000_000));
        let later = BackupId::from_timestamp(Timestamp::from_millis(2_000_000_000));
        assert!(earlier < later);
    }

    #[test]
    fn segment_name_roundtrip() {
        let name = SegmentName::from_lsn(
            TimelineId::new(2),
            Lsn::new((0x3 << 32) + 5 * DEFAULT_WAL_SEGMENT_SIZE),
            DEFAULT_WAL_SEGMENT_SIZE,
        );
        assert_eq!(name.to_string(), "000000020000000300000005");
        let parsed = SegmentName::parse("000000020000000300000005").unwrap();
        assert_eq!(parsed, name);
        assert_eq!(
            parsed.start_lsn(DEFAULT_WAL_SEGMENT_SIZE),
            Lsn::new((0x3 << 32) + 5 * DEFAULT_WAL_SEGMENT_SIZE)
        );
    }

    #[test]
    fn segment_name_rejects_bad_input() {
        assert!(SegmentName::parse("short").is_err());
        assert!(SegmentName::parse("00000000000000000000000G").is_err());
        assert!(SegmentName::parse("000000000000000100000000").is_err());
    }

    #[test]
    fn history_name_parsing() {
        assert_eq!(
            parse_history_name("00000002.history"),
            Some(TimelineId::new(2))
        );
        assert_eq!(parse_history_name("00000002.partial"), None);
        assert_eq!(parse_history_name("2.history"), None);
        assert_eq!(parse_history_name("00000000.history"), None);
    }

    #[test]
    fn timestamp_window_subtraction() {
        let now = Timestamp::from_millis(10_000);
        assert_eq!(
            now.saturating_sub(Duration::from_secs(4)),
            Timestamp::from_millis(6_000)
        );
        assert_eq!(
            now.saturating_sub(Duration::from_secs(60)),
            Timestamp::from_millis(0)
        );
    }
}
