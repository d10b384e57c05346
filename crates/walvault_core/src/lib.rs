//! Backup-and-recovery orchestration for write-ahead-logged servers.
//!
//! walvault tracks the two artifact kinds a physical backup scheme
//! produces - base backups and archived WAL segments - and answers
//! the question that matters when things go wrong: *given a recovery
//! target, which backup do I restore and which WAL do I replay?*
//!
//! The crate is organized around a per-server [`Catalog`] value
//! holding the backup set, the WAL segment index, and the timeline
//! forest. Three engines operate over catalog snapshots:
//!
//! - [`resolver`]: turns a [`RecoveryTargetSpec`] into a
//!   [`RecoveryPlan`] (one backup plus the exact WAL chain), or a
//!   typed refusal
//! - [`archiver`]: ingests WAL files with content-hash deduplication,
//!   quarantining same-name-different-content conflicts
//! - [`retention`]: evaluates redundancy and recovery-window policies
//!   without ever breaking a retained backup's replay chain
//!
//! [`BackupServer`] is the facade that owns the directory lock,
//! serializes mutations, and persists the catalog atomically.
//!
//! ```rust,ignore
//! use walvault_core::{BackupServer, RecoveryTargetSpec};
//!
//! let server = BackupServer::open(path, "main")?;
//! server.archive_wal("000000010000000000000001", &segment)?;
//! let plan = server.resolve_recovery_target(&RecoveryTargetSpec::latest())?;
//! ```

pub mod archiver;
pub mod backup;
pub mod catalog;
pub mod checksum;
pub mod clock;
pub mod config;
pub mod dir;
pub mod error;
pub mod resolver;
pub mod retention;
pub mod server;
pub mod timeline;
pub mod types;
pub mod wal;

pub use archiver::{ArchiveOutcome, WalArchiver};
pub use backup::{BackupInfo, BackupStatus};
pub use catalog::Catalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{CatalogError, CatalogResult};
pub use resolver::{RecoveryBoundary, RecoveryPlan, RecoveryTargetSpec};
pub use retention::{RetentionPolicy, RetentionReport, WalRetentionMode};
pub use server::BackupServer;
pub use timeline::{Ancestry, Timeline, TimelineHistory, ROOT_TIMELINE};
pub use types::{BackupId, Lsn, SegmentName, TimelineId, Timestamp};
pub use wal::{InsertOutcome, WalIndex, WalSegment};
