//! # walvault Storage
//!
//! Archive store trait and implementations for walvault.
//!
//! This crate provides the lowest-level storage abstraction for the
//! backup catalog and WAL archive. Stores are **opaque byte stores**
//! keyed by relative paths - they do not interpret the objects they
//! hold.
//!
//! ## Design Principles
//!
//! - Stores are simple object stores (get, put, delete, list)
//! - No knowledge of WAL segment formats, backups, or the catalog
//! - `put` is atomic, so a crash never leaves a torn object
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral catalogs
//! - [`FileStore`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use walvault_storage::{ArchiveStore, InMemoryStore};
//!
//! let store = InMemoryStore::new();
//! store.put("wals/00000001/seg", b"bytes").unwrap();
//! assert!(store.contains("wals/00000001/seg").unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::ArchiveStore;
