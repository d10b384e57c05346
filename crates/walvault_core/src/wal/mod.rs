//! WAL segment records and the per-server segment index.
//!
//! Archived segments are identified by their 24-hex-character name
//! (timeline + starting LSN). The index keeps them ordered per
//! timeline and answers the range and gap queries that recovery-target
//! resolution depends on.
//!
//! ## Invariants
//!
//! - Segments are **immutable** once accepted; only retention deletes
//! - Within a timeline, segments are contiguous and non-overlapping;
//!   a gap is legal only immediately after a timeline fork
//! - An insert at an occupied position never overwrites: identical
//!   checksums are idempotent, different checksums are a conflict

mod index;

pub use index::WalIndex;

use crate::error::{CatalogError, CatalogResult};
use crate::types::{SegmentName, Timestamp};

/// An archived WAL segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalSegment {
    /// Segment name (timeline and starting position).
    pub name: SegmentName,
    /// When the segment was accepted into the archive.
    pub archived_at: Timestamp,
    /// Stored size in bytes (after any compression).
    pub size: u64,
    /// Hex SHA-256 of the uncompressed payload.
    pub checksum: String,
    /// Compression codec tag, carried opaquely.
    pub compression: Option<String>,
}

/// Outcome of inserting a segment into the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The segment was new and is now indexed.
    Accepted,
    /// A segment with the same name and checksum already exists;
    /// idempotent re-archival.
    Duplicate,
    /// A segment with the same name but a different checksum exists.
    /// The index is unchanged.
    Conflict {
        /// Checksum of the segment already archived.
        existing: String,
        /// Checksum of the rejected incoming segment.
        incoming: String,
    },
}

impl WalSegment {
    /// Serializes the segment for catalog persistence.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.name.timeline.as_u32().to_le_bytes());
        buf.extend_from_slice(&self.name.log.to_le_bytes());
        buf.extend_from_slice(&self.name.seg.to_le_bytes());
        buf.extend_from_slice(&self.archived_at.as_millis().to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        encode_string(&mut buf, &self.checksum);
        match &self.compression {
            Some(codec) => {
                buf.push(1);
                encode_string(&mut buf, codec);
            }
            None => buf.push(0),
        }
        buf
    }

    /// Deserializes a segment, advancing `cursor` past it.
    ///
    /// # Errors
    ///
    /// Returns `CorruptCatalog` if the data is truncated or malformed.
    pub fn decode(data: &[u8], cursor: &mut usize) -> CatalogResult<Self> {
        let timeline = read_u32(data, cursor)?;
        let log = read_u32(data, cursor)?;
        let seg = read_u32(data, cursor)?;
        let archived_at = read_u64(data, cursor)?;
        let size = read_u64(data, cursor)?;
        let checksum = decode_string(data, cursor)?;
        let compression = match read_u8(data, cursor)? {
            0 => None,
            1 => Some(decode_string(data, cursor)?),
            other => {
                return Err(CatalogError::corrupt_catalog(format!(
                    "bad compression tag: {other}"
                )))
            }
        };
        Ok(Self {
            name: SegmentName {
                timeline: crate::types::TimelineId::new(timeline),
                log,
                seg,
            },
            archived_at: Timestamp::from_millis(archived_at),
            size,
            checksum,
            compression,
        })
    }
}

pub(crate) fn encode_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = u16::try_from(bytes.len()).unwrap_or(u16::MAX);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&bytes[..usize::from(len)]);
}

pub(crate) fn decode_string(data: &[u8], cursor: &mut usize) -> CatalogResult<String> {
    let len = usize::from(read_u16(data, cursor)?);
    if *cursor + len > data.len() {
        return Err(CatalogError::corrupt_catalog("string extends past end"));
    }
    let s = std::str::from_utf8(&data[*cursor..*cursor + len])
        .map_err(|_| CatalogError::corrupt_catalog("invalid UTF-8 string"))?
        .to_string();
    *cursor += len;
    Ok(s)
}

pub(crate) fn read_u8(data: &[u8], cursor: &mut usize) -> CatalogResult<u8> {
    let b = *data
        .get(*cursor)
        .ok_or_else(|| CatalogError::corrupt_catalog("unexpected end of data"))?;
    *cursor += 1;
    Ok(b)
}

pub(crate) fn read_u16(data: &[u8], cursor: &mut usize) -> CatalogResult<u16> {
    if *cursor + 2 > data.len() {
        return Err(CatalogError::corrupt_catalog("unexpected end of data"));
    }
    let v = u16::from_le_bytes([data[*cursor], data[*cursor + 1]]);
    *cursor += 2;
    Ok(v)
}

pub(crate) fn read_u32(data: &[u8], cursor: &mut usize) -> CatalogResult<u32> {
    if *cursor + 4 > data.len() {
        return Err(CatalogError::corrupt_catalog("unexpected end of data"));
    }
    let v = u32::from_le_bytes([
        data[*cursor],
        data[*cursor + 1],
        data[*cursor + 2],
        data[*cursor + 3],
    ]);
    *cursor += 4;
    Ok(v)
}

pub(crate) fn read_u64(data: &[u8], cursor: &mut usize) -> CatalogResult<u64> {
    if *cursor + 8 > data.len() {
        return Err(CatalogError::corrupt_catalog("unexpected end of data"));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[*cursor..*cursor + 8]);
    *cursor += 8;
    Ok(u64::from_le_bytes(bytes))
}
