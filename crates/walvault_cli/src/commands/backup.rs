//! Backup lifecycle commands.

use std::path::Path;

use walvault_core::{BackupId, BackupServer, Lsn, TimelineId};

/// Registers the start of a base backup and prints its ID.
pub fn start(
    path: &Path,
    server_name: &str,
    begin_lsn: Lsn,
    timeline: TimelineId,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = BackupServer::open(path, server_name)?;
    let id = server.start_backup(begin_lsn, timeline)?;
    println!("{id}");
    server.close()?;
    Ok(())
}

/// Registers the completion of a base backup.
pub fn finish(
    path: &Path,
    server_name: &str,
    id: &str,
    end_lsn: Lsn,
    timeline: TimelineId,
    size: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = BackupServer::open(path, server_name)?;
    let status = server.complete_backup(&BackupId::new(id), end_lsn, timeline, size)?;
    println!("{id}: {status}");
    server.close()?;
    Ok(())
}

/// Marks a backup as failed.
pub fn fail(path: &Path, server_name: &str, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let server = BackupServer::open(path, server_name)?;
    server.fail_backup(&BackupId::new(id))?;
    println!("{id}: failed");
    server.close()?;
    Ok(())
}
