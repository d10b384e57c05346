//! Backup server facade.
//!
//! `BackupServer` is the primary entry point: it owns the catalog for
//! one backed-up server, the archive store, and the directory lock,
//! and serializes every mutation behind a single catalog mutex. Reads
//! hand out snapshot clones, so resolution and retention evaluation
//! see a frozen catalog and never block archival for long.
//!
//! Every mutation persists the catalog atomically before returning,
//! so a crash at any point leaves the previous on-disk catalog intact.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use walvault_storage::{ArchiveStore, FileStore, InMemoryStore, StoreError};

use crate::archiver::{segment_path, ArchiveOutcome, WalArchiver, WAL_PREFIX};
use crate::backup::BackupStatus;
use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::dir::ServerDir;
use crate::error::{CatalogError, CatalogResult};
use crate::resolver::{resolve, RecoveryPlan, RecoveryTargetSpec};
use crate::retention::{evaluate, RetentionReport};
use crate::types::{BackupId, Lsn, TimelineId};

/// The backup-and-recovery engine for one server.
///
/// # Opening
///
/// ```rust,ignore
/// use walvault_core::{BackupServer, Config};
/// use std::path::Path;
///
/// let server = BackupServer::open(Path::new("/srv/walvault/main"), "main")?;
/// server.archive_wal("000000010000000000000001", &payload)?;
/// server.close()?;
/// ```
///
/// For tests, `BackupServer::open_in_memory()` runs against an
/// in-memory store with no directory or lock file.
pub struct BackupServer {
    config: Config,
    /// Server directory (holds the advisory lock). None in memory.
    dir: Option<ServerDir>,
    store: Arc<dyn ArchiveStore>,
    clock: Arc<dyn Clock>,
    archiver: WalArchiver,
    catalog: Mutex<Catalog>,
    is_open: RwLock<bool>,
}

impl BackupServer {
    /// Opens a server directory with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `ServerLocked` if another process manages the
    /// directory, `CorruptCatalog` if the persisted catalog is
    /// unreadable, or an I/O error.
    pub fn open(path: &Path, server: &str) -> CatalogResult<Self> {
        Self::open_with_config(path, server, Config::default())
    }

    /// Opens a server directory with custom configuration.
    pub fn open_with_config(path: &Path, server: &str, config: Config) -> CatalogResult<Self> {
        let dir = ServerDir::open(path, config.create_if_missing)?;
        let store: Arc<dyn ArchiveStore> = Arc::new(FileStore::open(dir.path())?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let catalog = match dir.load_catalog()? {
            Some(data) => {
                let catalog = Catalog::decode(&data)?;
                if catalog.server() != server {
                    return Err(CatalogError::invalid_state(format!(
                        "directory belongs to server {:?}, not {server:?}",
                        catalog.server()
                    )));
                }
                catalog
            }
            None => Catalog::new(server, config.wal_segment_size),
        };

        tracing::info!(
            server,
            path = %dir.path().display(),
            backups = catalog.backups().count(),
            "server opened"
        );

        Ok(Self {
            archiver: WalArchiver::new(store.clone(), clock.clone()),
            config,
            dir: Some(dir),
            store,
            clock,
            catalog: Mutex::new(catalog),
            is_open: RwLock::new(true),
        })
    }

    /// Opens an in-memory server for testing.
    pub fn open_in_memory(server: &str) -> CatalogResult<Self> {
        Self::open_in_memory_with(server, Config::default(), Arc::new(SystemClock))
    }

    /// Opens an in-memory server with custom config and clock.
    pub fn open_in_memory_with(
        server: &str,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> CatalogResult<Self> {
        let store: Arc<dyn ArchiveStore> = Arc::new(InMemoryStore::new());
        Ok(Self {
            archiver: WalArchiver::new(store.clone(), clock.clone()),
            catalog: Mutex::new(Catalog::new(server, config.wal_segment_size)),
            config,
            dir: None,
            store,
            clock,
            is_open: RwLock::new(true),
        })
    }

    /// Returns the server's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a snapshot clone of the catalog.
    ///
    /// The snapshot is detached: later mutations are not reflected.
    pub fn catalog_snapshot(&self) -> CatalogResult<Catalog> {
        self.ensure_open()?;
        Ok(self.lock_catalog()?.clone())
    }

    /// Registers the start of a new base backup and returns its ID.
    pub fn start_backup(
        &self,
        begin_lsn: Lsn,
        begin_timeline: TimelineId,
    ) -> CatalogResult<BackupId> {
        self.ensure_open()?;
        let mut catalog = self.lock_catalog()?;
        let now = self.clock.now();
        let id = catalog.next_backup_id(now);
        catalog.start_backup(id.clone(), now, begin_lsn, begin_timeline)?;
        self.persist(&catalog)?;
        tracing::info!(backup = %id, begin = %begin_lsn, "backup started");
        Ok(id)
    }

    /// Registers the completion of a base backup.
    ///
    /// Returns `Done` if the backup's WAL chain is already fully
    /// archived, or `WaitingForWals` if segments are still in flight;
    /// a waiting backup is promoted automatically when the missing
    /// segments arrive.
    pub fn complete_backup(
        &self,
        id: &BackupId,
        end_lsn: Lsn,
        end_timeline: TimelineId,
        size: u64,
    ) -> CatalogResult<BackupStatus> {
        self.ensure_open()?;
        let mut catalog = self.lock_catalog()?;
        let status = catalog.complete_backup(id, end_lsn, self.clock.now(), end_timeline, size)?;
        self.persist(&catalog)?;
        tracing::info!(backup = %id, end = %end_lsn, %status, "backup completed");
        Ok(status)
    }

    /// Marks a backup as failed.
    pub fn fail_backup(&self, id: &BackupId) -> CatalogResult<()> {
        self.ensure_open()?;
        let mut catalog = self.lock_catalog()?;
        catalog.fail_backup(id)?;
        self.persist(&catalog)?;
        tracing::warn!(backup = %id, "backup failed");
        Ok(())
    }

    /// Archives one incoming WAL file (segment or history file).
    pub fn archive_wal(&self, file_name: &str, payload: &[u8]) -> CatalogResult<ArchiveOutcome> {
        self.ensure_open()?;
        let mut catalog = self.lock_catalog()?;
        let outcome = self.archiver.archive(&mut catalog, file_name, payload)?;
        self.persist(&catalog)?;
        Ok(outcome)
    }

    /// Resolves a recovery target and pins the selected backup.
    ///
    /// The pin shields the backup from retention while the restore is
    /// in flight; release it with [`BackupServer::release_restore`].
    /// Pins are process-local: they do not survive a restart.
    pub fn resolve_recovery_target(
        &self,
        spec: &RecoveryTargetSpec,
    ) -> CatalogResult<RecoveryPlan> {
        self.ensure_open()?;
        let mut catalog = self.lock_catalog()?;
        let plan = resolve(&catalog, spec)?;
        catalog.pin(&plan.backup.id);
        tracing::info!(backup = %plan.backup.id, segments = plan.wal_segments.len(),
            "recovery target resolved");
        Ok(plan)
    }

    /// Releases the restore pin on a backup.
    pub fn release_restore(&self, id: &BackupId) -> CatalogResult<()> {
        self.ensure_open()?;
        self.lock_catalog()?.unpin(id);
        Ok(())
    }

    /// Evaluates the configured retention policy without deleting
    /// anything.
    pub fn retention_report(&self) -> CatalogResult<RetentionReport> {
        self.ensure_open()?;
        let policy = self
            .config
            .retention_policy
            .ok_or_else(|| CatalogError::invalid_state("no retention policy configured"))?;
        let catalog = self.lock_catalog()?;
        Ok(evaluate(
            &catalog,
            self.clock.now(),
            policy,
            self.config.wal_retention_mode,
        ))
    }

    /// Applies the configured retention policy: deletes obsolete
    /// backups from the catalog and obsolete WAL from the store.
    ///
    /// The policy is re-evaluated under the catalog lock, so a backup
    /// pinned by a restore that started after a dry-run report is
    /// still protected.
    pub fn run_retention(&self) -> CatalogResult<RetentionReport> {
        self.ensure_open()?;
        let policy = self
            .config
            .retention_policy
            .ok_or_else(|| CatalogError::invalid_state("no retention policy configured"))?;

        let mut catalog = self.lock_catalog()?;
        let report = evaluate(
            &catalog,
            self.clock.now(),
            policy,
            self.config.wal_retention_mode,
        );

        for id in &report.obsolete {
            catalog.remove_backup(id)?;
            tracing::info!(backup = %id, "obsolete backup removed");
        }
        self.delete_segments(&mut catalog, &report)?;
        self.persist(&catalog)?;

        tracing::info!(
            retained = report.retained.len(),
            deleted_backups = report.obsolete.len(),
            deleted_segments = report.obsolete_segments.len(),
            "retention applied"
        );
        Ok(report)
    }

    /// Removes obsolete segments from the index and the store.
    ///
    /// When every remaining segment of a timeline is obsolete, the
    /// whole timeline directory goes in one `delete_prefix` call;
    /// otherwise segments are deleted one by one. A segment already
    /// absent from the store is not an error.
    fn delete_segments(
        &self,
        catalog: &mut Catalog,
        report: &RetentionReport,
    ) -> CatalogResult<()> {
        use std::collections::BTreeMap;

        let mut by_timeline: BTreeMap<TimelineId, Vec<_>> = BTreeMap::new();
        for name in &report.obsolete_segments {
            by_timeline.entry(name.timeline).or_default().push(*name);
        }

        for (timeline, names) in by_timeline {
            let total = catalog
                .wal()
                .iter()
                .filter(|s| s.name.timeline == timeline)
                .count();
            for name in &names {
                catalog.remove_segment(name);
            }
            if names.len() == total {
                let prefix = format!("{WAL_PREFIX}/{:08X}", timeline.as_u32());
                match self.store.delete_prefix(&prefix) {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
                tracing::debug!(%timeline, "timeline WAL directory removed");
            } else {
                for name in &names {
                    match self.store.delete(&segment_path(name)) {
                        Ok(()) => {}
                        Err(StoreError::NotFound { .. }) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        Ok(())
    }

    /// Persists the catalog and releases the directory lock.
    pub fn close(&self) -> CatalogResult<()> {
        let mut open = self.is_open.write();
        if !*open {
            return Ok(());
        }
        let catalog = self.lock_catalog()?;
        self.persist(&catalog)?;
        *open = false;
        tracing::info!(server = catalog.server(), "server closed");
        Ok(())
    }

    fn ensure_open(&self) -> CatalogResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CatalogError::invalid_state("server is closed"))
        }
    }

    fn lock_catalog(&self) -> CatalogResult<MutexGuard<'_, Catalog>> {
        self.catalog
            .try_lock_for(self.config.lock_timeout)
            .ok_or(CatalogError::LockTimeout)
    }

    fn persist(&self, catalog: &Catalog) -> CatalogResult<()> {
        if let Some(dir) = &self.dir {
            dir.save_catalog(&catalog.encode())?;
        }
        Ok(())
    }
}

impl Drop for BackupServer {
    fn drop(&mut self) {
        if self.close().is_err() {
            tracing::error!("failed to persist catalog on drop");
        }
    }
}
