//! walvault CLI
//!
//! Command-line tools for managing a server's backup catalog and WAL
//! archive.
//!
//! # Commands
//!
//! - `archive` - Archive WAL files into the catalog
//! - `backup` - Register backup lifecycle events
//! - `recover` - Resolve a recovery target to a restore plan
//! - `retention` - Evaluate or apply the retention policy
//! - `list` - List backups and archived WAL

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use walvault_core::{Lsn, TimelineId, Timestamp};

/// walvault command-line backup tools.
#[derive(Parser)]
#[command(name = "walvault")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the server directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Server name recorded in the catalog
    #[arg(global = true, short, long, default_value = "main")]
    server: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive WAL files into the catalog
    Archive {
        /// WAL segment or history files to archive
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Register backup lifecycle events
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Resolve a recovery target to a restore plan
    Recover {
        /// Restore this specific backup
        #[arg(long)]
        backup_id: Option<String>,

        /// Replay until this instant (epoch milliseconds)
        #[arg(long)]
        target_time: Option<u64>,

        /// Replay until this LSN (hi/lo hex, e.g. 0/3000028)
        #[arg(long)]
        target_lsn: Option<Lsn>,

        /// Recover onto this timeline
        #[arg(long)]
        target_timeline: Option<u32>,

        /// Stop at a named restore point (reported as unsupported)
        #[arg(long)]
        target_name: Option<String>,
    },

    /// Evaluate or apply the retention policy
    Retention {
        /// Policy, e.g. "REDUNDANCY 3" or "RECOVERY WINDOW OF 7 DAYS"
        #[arg(long)]
        policy: String,

        /// Keep only retained backups' WAL chains
        #[arg(long)]
        simple_wal: bool,

        /// Delete obsolete backups and WAL instead of reporting
        #[arg(long)]
        apply: bool,
    },

    /// List backups and archived WAL
    List {
        /// Show individual WAL segments
        #[arg(short, long)]
        wal: bool,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum BackupAction {
    /// Register the start of a base backup
    Start {
        /// Backup starting LSN
        #[arg(long)]
        begin_lsn: Lsn,

        /// Timeline the backup started on
        #[arg(long, default_value = "1")]
        timeline: u32,
    },

    /// Register the completion of a base backup
    Finish {
        /// The backup ID returned by `backup start`
        id: String,

        /// Backup end LSN
        #[arg(long)]
        end_lsn: Lsn,

        /// Timeline the backup ended on
        #[arg(long, default_value = "1")]
        timeline: u32,

        /// Backup size in bytes
        #[arg(long, default_value = "0")]
        size: u64,
    },

    /// Mark a backup as failed
    Fail {
        /// The backup ID
        id: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if matches!(cli.command, Commands::Version) {
        println!("walvault CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let path = cli.path.ok_or("Server path required (--path)")?;

    match cli.command {
        Commands::Archive { files } => {
            commands::archive::run(&path, &cli.server, &files)?;
        }
        Commands::Backup { action } => match action {
            BackupAction::Start { begin_lsn, timeline } => {
                commands::backup::start(&path, &cli.server, begin_lsn, TimelineId::new(timeline))?;
            }
            BackupAction::Finish {
                id,
                end_lsn,
                timeline,
                size,
            } => {
                commands::backup::finish(
                    &path,
                    &cli.server,
                    &id,
                    end_lsn,
                    TimelineId::new(timeline),
                    size,
                )?;
            }
            BackupAction::Fail { id } => {
                commands::backup::fail(&path, &cli.server, &id)?;
            }
        },
        Commands::Recover {
            backup_id,
            target_time,
            target_lsn,
            target_timeline,
            target_name,
        } => {
            commands::recover::run(
                &path,
                &cli.server,
                commands::recover::TargetArgs {
                    backup_id,
                    target_time: target_time.map(Timestamp::from_millis),
                    target_lsn,
                    target_timeline: target_timeline.map(TimelineId::new),
                    target_name,
                },
            )?;
        }
        Commands::Retention {
            policy,
            simple_wal,
            apply,
        } => {
            commands::retention::run(&path, &cli.server, &policy, simple_wal, apply)?;
        }
        Commands::List { wal } => {
            commands::list::run(&path, &cli.server, wal)?;
        }
        Commands::Version => unreachable!("handled above"),
    }

    Ok(())
}
