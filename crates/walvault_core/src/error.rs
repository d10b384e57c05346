//! Error types for catalog, resolution, and lifecycle operations.

use crate::types::{BackupId, SegmentName};
use std::io;
use thiserror::Error;

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors that can occur in walvault core operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Archive store error.
    #[error("store error: {0}")]
    Store(#[from] walvault_storage::StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The recovery target request is malformed or contradictory.
    #[error("invalid recovery target: {message}")]
    InvalidTarget {
        /// Description of the problem.
        message: String,
    },

    /// The recovery target kind is deliberately not implemented.
    #[error("unsupported recovery target: {feature}")]
    UnsupportedTarget {
        /// The rejected target kind.
        feature: String,
    },

    /// No completed backup exists for the server.
    #[error("no backup available for server")]
    NoBackupAvailable,

    /// The catalog holds no backup that can reach the requested target.
    #[error("unreachable recovery target: {message}")]
    UnreachableTarget {
        /// Why no candidate backup satisfies the target.
        message: String,
    },

    /// The WAL archive is missing a segment on the replay path.
    #[error("incomplete WAL chain: missing segment {missing}")]
    IncompleteWalChain {
        /// The first missing segment.
        missing: SegmentName,
    },

    /// Another mutation holds the per-server lock.
    #[error("catalog lock timeout: another operation is in progress")]
    LockTimeout,

    /// Another process holds the server directory's advisory lock.
    #[error("server directory is locked by another process")]
    ServerLocked,

    /// The referenced backup does not exist.
    #[error("backup not found: {id}")]
    BackupNotFound {
        /// The ID that was requested.
        id: BackupId,
    },

    /// Operation not permitted in the current catalog state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The persisted catalog is unreadable. Fatal.
    #[error("catalog corrupted: {message}")]
    CorruptCatalog {
        /// Description of the corruption.
        message: String,
    },
}

impl CatalogError {
    /// Creates an invalid-target error.
    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::InvalidTarget {
            message: message.into(),
        }
    }

    /// Creates an unsupported-target error.
    pub fn unsupported_target(feature: impl Into<String>) -> Self {
        Self::UnsupportedTarget {
            feature: feature.into(),
        }
    }

    /// Creates an unreachable-target error.
    pub fn unreachable_target(message: impl Into<String>) -> Self {
        Self::UnreachableTarget {
            message: message.into(),
        }
    }

    /// Creates an invalid-state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a corrupt-catalog error.
    pub fn corrupt_catalog(message: impl Into<String>) -> Self {
        Self::CorruptCatalog {
            message: message.into(),
        }
    }

    /// Returns true if retrying the operation can succeed without
    /// operator intervention (a pending fetch or a contended lock).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout | Self::IncompleteWalChain { .. }
        )
    }
}
