//! Server directory management.
//!
//! This module handles the file system layout for one backed-up
//! server:
//!
//! ```text
//! <server_path>/
//! ├─ catalog.bin       # Persisted backup catalog
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ wals/             # Archived WAL segments, one subdir per timeline
//! └─ errors/           # Quarantined archival conflicts
//! ```
//!
//! The LOCK file ensures only one process manages a server directory
//! at a time. The catalog file is replaced atomically via a
//! write-then-rename.

use crate::error::{CatalogError, CatalogResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// File names within the server directory.
const CATALOG_FILE: &str = "catalog.bin";
const LOCK_FILE: &str = "LOCK";
const WALS_DIR: &str = "wals";
const ERRORS_DIR: &str = "errors";
/// Temporary file for atomic catalog writes.
const CATALOG_TEMP: &str = "catalog.bin.tmp";

/// Manages the server directory structure and file locking.
///
/// Holds an exclusive advisory lock on the directory; only one
/// `ServerDir` instance can exist per directory at a time, across
/// processes.
#[derive(Debug)]
pub struct ServerDir {
    path: PathBuf,
    /// Lock file handle, held for the lifetime of the instance.
    _lock_file: File,
}

impl ServerDir {
    /// Opens or creates a server directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory doesn't exist and
    /// `create_if_missing` is false, if another process holds the
    /// lock (`ServerLocked`), or on I/O failure.
    pub fn open(path: &Path, create_if_missing: bool) -> CatalogResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CatalogError::invalid_state(format!(
                    "server directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CatalogError::invalid_state(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CatalogError::ServerLocked);
        }

        fs::create_dir_all(path.join(WALS_DIR))?;
        fs::create_dir_all(path.join(ERRORS_DIR))?;

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the server directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the persisted catalog.
    #[must_use]
    pub fn catalog_path(&self) -> PathBuf {
        self.path.join(CATALOG_FILE)
    }

    /// Returns the WAL archive directory.
    #[must_use]
    pub fn wals_dir(&self) -> PathBuf {
        self.path.join(WALS_DIR)
    }

    /// Returns the quarantine directory.
    #[must_use]
    pub fn errors_dir(&self) -> PathBuf {
        self.path.join(ERRORS_DIR)
    }

    /// True if no catalog has been persisted yet.
    #[must_use]
    pub fn is_new(&self) -> bool {
        !self.catalog_path().exists()
    }

    /// Loads the persisted catalog bytes, or `None` for a new
    /// directory.
    pub fn load_catalog(&self) -> CatalogResult<Option<Vec<u8>>> {
        let catalog_path = self.catalog_path();
        if !catalog_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&catalog_path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(data))
    }

    /// Saves the catalog bytes atomically.
    ///
    /// Write-then-rename for crash safety: the temp file is synced,
    /// renamed over the catalog, then the directory is fsynced so the
    /// rename itself is durable.
    pub fn save_catalog(&self, data: &[u8]) -> CatalogResult<()> {
        let temp_path = self.path.join(CATALOG_TEMP);
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.catalog_path())?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CatalogResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CatalogResult<()> {
        // NTFS journaling covers metadata durability on Windows.
        Ok(())
    }
}
