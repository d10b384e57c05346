//! Recover command implementation.

use std::path::Path;

use walvault_core::{
    BackupId, BackupServer, Lsn, RecoveryBoundary, RecoveryTargetSpec, TimelineId, Timestamp,
};

/// Recovery target options gathered from the command line.
pub struct TargetArgs {
    /// Restore this specific backup.
    pub backup_id: Option<String>,
    /// Replay until this instant.
    pub target_time: Option<Timestamp>,
    /// Replay until this LSN.
    pub target_lsn: Option<Lsn>,
    /// Recover onto this timeline.
    pub target_timeline: Option<TimelineId>,
    /// Named restore point (always reported as unsupported).
    pub target_name: Option<String>,
}

/// Resolves a recovery target and prints the restore plan.
///
/// The plan lists the backup to restore and every WAL segment to
/// fetch, in replay order. The selected backup stays pinned only for
/// the lifetime of this process; a real restore driver would hold the
/// server open until the copy finishes.
pub fn run(
    path: &Path,
    server_name: &str,
    args: TargetArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = BackupServer::open(path, server_name)?;

    let spec = RecoveryTargetSpec {
        backup_id: args.backup_id.map(BackupId::new),
        target_time: args.target_time,
        target_lsn: args.target_lsn,
        target_timeline: args.target_timeline,
        target_name: args.target_name,
        target_xid: None,
        target_immediate: false,
    };

    let plan = server.resolve_recovery_target(&spec)?;

    println!("backup:   {}", plan.backup.id);
    println!("created:  {}", plan.backup.created_at);
    println!(
        "range:    {} .. {}",
        plan.backup.begin_lsn,
        plan.backup
            .end_lsn
            .map_or_else(|| "?".to_string(), |l| l.to_string())
    );
    match &plan.boundary {
        RecoveryBoundary::EndOfBackup => println!("boundary: end of backup"),
        RecoveryBoundary::PointInTime {
            time,
            lsn,
            timeline,
        } => {
            let mut parts = Vec::new();
            if let Some(t) = time {
                parts.push(format!("time {t}"));
            }
            if let Some(l) = lsn {
                parts.push(format!("lsn {l}"));
            }
            if let Some(tl) = timeline {
                parts.push(format!("{tl}"));
            }
            println!("boundary: {}", parts.join(", "));
        }
    }
    println!("wal segments ({}):", plan.wal_segments.len());
    for segment in &plan.wal_segments {
        println!("  {segment}");
    }

    server.release_restore(&plan.backup.id)?;
    server.close()?;
    Ok(())
}
