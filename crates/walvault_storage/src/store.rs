//! Archive store trait definition.

use crate::error::StoreResult;

/// A low-level object store for the WAL archive and backup catalog.
///
/// Archive stores are **opaque byte stores** keyed by relative,
/// slash-separated paths. They provide whole-object get/put/delete plus
/// prefix listing and bulk prefix removal. walvault owns all format
/// interpretation - stores do not understand WAL segments, backups, or
/// the catalog encoding.
///
/// # Invariants
///
/// - `put` is atomic: a crash mid-write leaves either the old object or
///   the new one, never a torn mix
/// - `get` returns exactly the bytes previously written at that path
/// - `list` returns paths in lexicographic order
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait ArchiveStore: Send + Sync {
    /// Reads the full contents of the object at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::NotFound`] if no object exists at
    /// `path`, or an I/O error.
    fn get(&self, path: &str) -> StoreResult<Vec<u8>>;

    /// Writes `data` as the object at `path`, replacing any existing
    /// object atomically.
    ///
    /// Parent "directories" are created implicitly.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable.
    fn put(&self, path: &str, data: &[u8]) -> StoreResult<()>;

    /// Deletes the object at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::NotFound`] if no object exists at
    /// `path`.
    fn delete(&self, path: &str) -> StoreResult<()>;

    /// Deletes every object whose path starts with `prefix` in one
    /// operation.
    ///
    /// Deleting an empty prefix subtree is not an error. This is the
    /// bulk-removal primitive used by retention when a whole WAL
    /// directory has become obsolete.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails partway.
    fn delete_prefix(&self, prefix: &str) -> StoreResult<()>;

    /// Lists the paths of all objects whose path starts with `prefix`,
    /// in lexicographic order.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be produced.
    fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Returns true if an object exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error only on I/O failure, never for absence.
    fn contains(&self, path: &str) -> StoreResult<bool> {
        match self.get(path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Moves the object at `from` to `to`, replacing any existing
    /// object at `to`.
    ///
    /// Used by the archiver to relocate conflicting payloads into the
    /// quarantine area.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::NotFound`] if `from` does not exist.
    fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        let data = self.get(from)?;
        self.put(to, &data)?;
        self.delete(from)
    }
}
