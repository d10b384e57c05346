//! Base backup metadata and lifecycle.

use crate::error::{CatalogError, CatalogResult};
use crate::types::{BackupId, Lsn, TimelineId, Timestamp};
use crate::wal::{decode_string, encode_string, read_u32, read_u64, read_u8};
use std::fmt;

/// Lifecycle state of a base backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStatus {
    /// The backup process has started but not finished.
    InProgress,
    /// The backup completed and its full WAL chain is archived.
    Done,
    /// The backup process failed; the backup is unusable.
    Failed,
    /// The backup completed but its end WAL segment has not been
    /// archived yet.
    WaitingForWals,
}

impl BackupStatus {
    const fn as_u8(self) -> u8 {
        match self {
            Self::InProgress => 0,
            Self::Done => 1,
            Self::Failed => 2,
            Self::WaitingForWals => 3,
        }
    }

    fn from_u8(value: u8) -> CatalogResult<Self> {
        match value {
            0 => Ok(Self::InProgress),
            1 => Ok(Self::Done),
            2 => Ok(Self::Failed),
            3 => Ok(Self::WaitingForWals),
            other => Err(CatalogError::corrupt_catalog(format!(
                "unknown backup status: {other}"
            ))),
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::WaitingForWals => "WAITING_FOR_WALS",
        };
        f.write_str(s)
    }
}

/// Metadata for one physical base backup.
///
/// A backup is anchored to a timeline and an LSN/time range: replay
/// starts at `begin_lsn` on `begin_timeline` and, once the backup is
/// `Done`, extends at least to `end_lsn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    /// Unique, time-sortable identifier.
    pub id: BackupId,
    /// The server this backup belongs to.
    pub server: String,
    /// When the backup started.
    pub created_at: Timestamp,
    /// Current lifecycle state.
    pub status: BackupStatus,
    /// Position of the backup's start record.
    pub begin_lsn: Lsn,
    /// Timeline of the start record.
    pub begin_timeline: TimelineId,
    /// Wall-clock begin time.
    pub begin_time: Timestamp,
    /// Position the backup is consistent at, once completed.
    pub end_lsn: Option<Lsn>,
    /// Timeline at completion.
    pub end_timeline: Option<TimelineId>,
    /// Wall-clock end time.
    pub end_time: Option<Timestamp>,
    /// Total size in bytes, once known.
    pub size: u64,
}

impl BackupInfo {
    /// Creates a new in-progress backup record.
    #[must_use]
    pub fn start(
        id: BackupId,
        server: impl Into<String>,
        created_at: Timestamp,
        begin_lsn: Lsn,
        begin_timeline: TimelineId,
    ) -> Self {
        Self {
            id,
            server: server.into(),
            created_at,
            status: BackupStatus::InProgress,
            begin_lsn,
            begin_timeline,
            begin_time: created_at,
            end_lsn: None,
            end_timeline: None,
            end_time: None,
            size: 0,
        }
    }

    /// Returns true if this backup can serve as a restore base.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.status, BackupStatus::Done)
    }

    /// Records successful completion, fixing the end position.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the backup is `InProgress` or
    /// `WaitingForWals`, or if the end position precedes the begin
    /// position.
    pub fn complete(
        &mut self,
        end_lsn: Lsn,
        end_time: Timestamp,
        end_timeline: TimelineId,
        size: u64,
    ) -> CatalogResult<()> {
        match self.status {
            BackupStatus::InProgress | BackupStatus::WaitingForWals => {}
            other => {
                return Err(CatalogError::invalid_state(format!(
                    "backup {} cannot complete from status {other}",
                    self.id
                )))
            }
        }
        if end_lsn < self.begin_lsn && end_timeline == self.begin_timeline {
            return Err(CatalogError::invalid_state(format!(
                "backup {} end LSN {end_lsn} precedes begin LSN {}",
                self.id, self.begin_lsn
            )));
        }
        self.status = BackupStatus::Done;
        self.end_lsn = Some(end_lsn);
        self.end_time = Some(end_time);
        self.end_timeline = Some(end_timeline);
        self.size = size;
        Ok(())
    }

    /// Records a failure.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the backup already completed.
    pub fn fail(&mut self) -> CatalogResult<()> {
        if self.is_done() {
            return Err(CatalogError::invalid_state(format!(
                "backup {} is already done",
                self.id
            )));
        }
        self.status = BackupStatus::Failed;
        Ok(())
    }

    /// Marks a completed backup as waiting for its end WAL segment.
    pub fn mark_waiting_for_wals(&mut self) {
        if self.status == BackupStatus::InProgress {
            self.status = BackupStatus::WaitingForWals;
        }
    }

    /// Serializes the backup for catalog persistence.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_string(&mut buf, self.id.as_str());
        encode_string(&mut buf, &self.server);
        buf.extend_from_slice(&self.created_at.as_millis().to_le_bytes());
        buf.push(self.status.as_u8());
        buf.extend_from_slice(&self.begin_lsn.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.begin_timeline.as_u32().to_le_bytes());
        buf.extend_from_slice(&self.begin_time.as_millis().to_le_bytes());
        match self.end_lsn {
            Some(lsn) => {
                buf.push(1);
                buf.extend_from_slice(&lsn.as_u64().to_le_bytes());
                // end timeline / time are fixed together with end LSN
                buf.extend_from_slice(
                    &self.end_timeline.map_or(0, TimelineId::as_u32).to_le_bytes(),
                );
                buf.extend_from_slice(
                    &self.end_time.map_or(0, Timestamp::as_millis).to_le_bytes(),
                );
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Deserializes a backup, advancing `cursor` past it.
    ///
    /// # Errors
    ///
    /// Returns `CorruptCatalog` if the data is truncated or malformed.
    pub fn decode(data: &[u8], cursor: &mut usize) -> CatalogResult<Self> {
        let id = BackupId::new(decode_string(data, cursor)?);
        let server = decode_string(data, cursor)?;
        let created_at = Timestamp::from_millis(read_u64(data, cursor)?);
        let status = BackupStatus::from_u8(read_u8(data, cursor)?)?;
        let begin_lsn = Lsn::new(read_u64(data, cursor)?);
        let begin_timeline = TimelineId::new(read_u32(data, cursor)?);
        let begin_time = Timestamp::from_millis(read_u64(data, cursor)?);
        let (end_lsn, end_timeline, end_time) = match read_u8(data, cursor)? {
            0 => (None, None, None),
            1 => {
                let lsn = Lsn::new(read_u64(data, cursor)?);
                let tli = TimelineId::new(read_u32(data, cursor)?);
                let time = Timestamp::from_millis(read_u64(data, cursor)?);
                (Some(lsn), Some(tli), Some(time))
            }
            other => {
                return Err(CatalogError::corrupt_catalog(format!(
                    "bad end-position tag: {other}"
                )))
            }
        };
        let size = read_u64(data, cursor)?;
        Ok(Self {
            id,
            server,
            created_at,
            status,
            begin_lsn,
            begin_timeline,
            begin_time,
            end_lsn,
            end_timeline,
            end_time,
            size,
        })
    }
}
