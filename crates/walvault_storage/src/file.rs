//! File-based archive store for persistent storage.

use crate::error::{StoreError, StoreResult};
use crate::store::ArchiveStore;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A file-based archive store rooted at a directory.
///
/// Object paths map directly onto the filesystem below the root, so the
/// archive layout is inspectable with ordinary tools. Writes go through
/// a temporary file in the same directory followed by a rename, which
/// gives atomic replacement on POSIX filesystems.
///
/// # Thread Safety
///
/// All operations take `&self`; concurrency control beyond atomic
/// replacement is the caller's responsibility (walvault serializes
/// catalog mutations itself).
///
/// # Example
///
/// ```no_run
/// use walvault_storage::{ArchiveStore, FileStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("/var/lib/walvault/main")).unwrap();
/// store.put("wals/00000001/seg", b"payload").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens a file store rooted at `root`, creating the directory if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created or is not a
    /// directory.
    pub fn open(root: &Path) -> StoreResult<Self> {
        fs::create_dir_all(root)?;
        if !root.is_dir() {
            return Err(StoreError::invalid_path(
                root.display().to_string(),
                "store root is not a directory",
            ));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves an object path, rejecting anything that would escape
    /// the root.
    fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        if path.is_empty() {
            return Err(StoreError::invalid_path(path, "empty path"));
        }
        for component in path.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(StoreError::invalid_path(path, "path traversal component"));
            }
        }
        Ok(self.root.join(path))
    }

    fn collect_files(&self, dir: &Path, out: &mut Vec<String>) -> StoreResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.collect_files(&path, out)?;
            } else if let Ok(rel) = path.strip_prefix(&self.root) {
                // Object paths are always slash-separated.
                let name = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(name);
            }
        }
        Ok(())
    }
}

impl ArchiveStore for FileStore {
    fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        let full = self.resolve(path)?;
        match fs::read(&full) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found(path))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write-then-rename so a crash never leaves a torn object.
        let tmp = full.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &full)?;
        Ok(())
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found(path))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete_prefix(&self, prefix: &str) -> StoreResult<()> {
        // A prefix naming a whole directory is removed in one call;
        // otherwise fall back to per-object removal of matches.
        let trimmed = prefix.trim_end_matches('/');
        if !trimmed.is_empty() {
            let full = self.resolve(trimmed)?;
            if full.is_dir() && (prefix.ends_with('/') || prefix == trimmed) {
                match fs::remove_dir_all(&full) {
                    Ok(()) => return Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                    Err(e) => return Err(e.into()),
                }
            }
        }

        for path in self.list(prefix)? {
            self.delete(&path)?;
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut all = Vec::new();
        self.collect_files(&self.root.clone(), &mut all)?;
        let mut matched: Vec<String> = all
            .into_iter()
            .filter(|p| p.starts_with(prefix) && !p.ends_with(".tmp"))
            .collect();
        matched.sort();
        Ok(matched)
    }

    fn contains(&self, path: &str) -> StoreResult<bool> {
        let full = self.resolve(path)?;
        Ok(full.is_file())
    }

    fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        let from_full = self.resolve(from)?;
        let to_full = self.resolve(to)?;
        if !from_full.is_file() {
            return Err(StoreError::not_found(from));
        }
        if let Some(parent) = to_full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&from_full, &to_full)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_and_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("wals/00000001/seg1", b"payload").unwrap();
        assert_eq!(store.get("wals/00000001/seg1").unwrap(), b"payload");
    }

    #[test]
    fn get_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.get("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn put_replaces_atomically() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("obj", b"old").unwrap();
        store.put("obj", b"new").unwrap();
        assert_eq!(store.get("obj").unwrap(), b"new");
        // No temp file left behind
        assert!(store.list("obj").unwrap().iter().all(|p| p == "obj"));
    }

    #[test]
    fn traversal_components_rejected() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(store.get("../escape").is_err());
        assert!(store.put("a/../../b", b"x").is_err());
        assert!(store.get("").is_err());
    }

    #[test]
    fn list_returns_sorted_matches() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("wals/1/b", b"").unwrap();
        store.put("wals/1/a", b"").unwrap();
        store.put("meta/x", b"").unwrap();

        let listed = store.list("wals/").unwrap();
        assert_eq!(listed, vec!["wals/1/a".to_string(), "wals/1/b".to_string()]);
    }

    #[test]
    fn delete_prefix_removes_directory() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("wals/1/a", b"").unwrap();
        store.put("wals/1/b", b"").unwrap();
        store.put("wals/2/a", b"").unwrap();

        store.delete_prefix("wals/1/").unwrap();

        assert!(store.list("wals/1/").unwrap().is_empty());
        assert_eq!(store.list("wals/2/").unwrap().len(), 1);
        assert!(!dir.path().join("wals/1").exists());
    }

    #[test]
    fn rename_moves_into_new_directory() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("incoming/seg", b"payload").unwrap();
        store.rename("incoming/seg", "errors/seg.duplicate").unwrap();

        assert!(!store.contains("incoming/seg").unwrap());
        assert_eq!(store.get("errors/seg.duplicate").unwrap(), b"payload");
    }

    #[test]
    fn persistence_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.put("catalog.bin", b"state").unwrap();
        }
        {
            let store = FileStore::open(dir.path()).unwrap();
            assert_eq!(store.get("catalog.bin").unwrap(), b"state");
        }
    }
}
