//! Archive command implementation.

use std::fs;
use std::path::{Path, PathBuf};

use walvault_core::{ArchiveOutcome, BackupServer};

/// Archives the given WAL files into the server's catalog.
///
/// Each file is archived independently; a failure on one file stops
/// the run so the producer can retry from there.
pub fn run(
    path: &Path,
    server_name: &str,
    files: &[PathBuf],
) -> Result<(), Box<dyn std::error::Error>> {
    let server = BackupServer::open(path, server_name)?;

    let mut accepted = 0usize;
    let mut duplicates = 0usize;
    let mut quarantined = 0usize;
    for file in files {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("not a file name: {}", file.display()))?;
        let payload = fs::read(file)?;
        match server.archive_wal(name, &payload)? {
            ArchiveOutcome::Accepted => {
                accepted += 1;
                println!("{name}: archived");
            }
            ArchiveOutcome::IgnoredDuplicate => {
                duplicates += 1;
                println!("{name}: duplicate, ignored");
            }
            ArchiveOutcome::MovedToQuarantine => {
                quarantined += 1;
                println!("{name}: conflict, moved to quarantine");
            }
        }
    }

    println!("{accepted} archived, {duplicates} duplicates, {quarantined} quarantined");
    tracing::info!(accepted, duplicates, quarantined, "archive run finished");
    server.close()?;
    Ok(())
}
