//! Retention command implementation.

use std::path::Path;

use walvault_core::{BackupServer, Config, RetentionPolicy, WalRetentionMode};

/// Evaluates or applies a retention policy.
pub fn run(
    path: &Path,
    server_name: &str,
    policy: &str,
    simple_wal: bool,
    apply: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let policy: RetentionPolicy = policy.parse()?;
    let mode = if simple_wal {
        WalRetentionMode::Simple
    } else {
        WalRetentionMode::Main
    };
    let config = Config::new()
        .create_if_missing(false)
        .retention_policy(policy)
        .wal_retention_mode(mode);
    let server = BackupServer::open_with_config(path, server_name, config)?;

    let report = if apply {
        server.run_retention()?
    } else {
        server.retention_report()?
    };

    let verb = if apply { "deleted" } else { "obsolete" };
    println!("policy:   {policy}");
    println!("retained: {}", report.retained.len());
    for id in &report.retained {
        println!("  {id}");
    }
    println!("{verb}: {}", report.obsolete.len());
    for id in &report.obsolete {
        println!("  {id}");
    }
    println!("{verb} wal segments: {}", report.obsolete_segments.len());

    server.close()?;
    Ok(())
}
