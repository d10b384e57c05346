//! List command implementation.

use std::path::Path;

use walvault_core::{BackupServer, Config};

/// Lists the catalog's backups, timelines, and optionally WAL
/// segments.
pub fn run(path: &Path, server_name: &str, show_wal: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::new().create_if_missing(false);
    let server = BackupServer::open_with_config(path, server_name, config)?;
    let catalog = server.catalog_snapshot()?;

    println!("server: {}", catalog.server());

    println!("backups:");
    let mut any = false;
    for backup in catalog.backups() {
        any = true;
        let end = backup
            .end_lsn
            .map_or_else(|| "?".to_string(), |l| l.to_string());
        println!(
            "  {}  {:<15}  {} .. {}  {} bytes",
            backup.id, backup.status, backup.begin_lsn, end, backup.size
        );
    }
    if !any {
        println!("  (none)");
    }

    println!("timelines:");
    for timeline in catalog.timelines().iter() {
        println!("  {}  {:?}", timeline.id, timeline.ancestry);
    }

    if show_wal {
        println!("wal segments:");
        for segment in catalog.wal().iter() {
            println!(
                "  {}  {} bytes  archived {}",
                segment.name, segment.size, segment.archived_at
            );
        }
    }

    server.close()?;
    Ok(())
}
