//! Fiscaliza CLI
//!
//! Maintenance tools for a Fiscaliza local store.
//!
//! # Commands
//!
//! - `inspect` - Display record counts and sync state
//! - `validate` - Check the numbering and linkage invariants
//! - `repair` - Fix orphans and missing back-references in a unit
//! - `renumber` - Rewrite the sequence numbers of a case
//! - `queue` - List queued sync entries and id mappings
//!
//! Writes made by `repair` and `renumber` are queued for the next sync.

mod commands;

use clap::{Parser, Subcommand};
use commands::validate::Target;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Fiscaliza command-line store tools.
#[derive(Parser)]
#[command(name = "fiscaliza")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display record counts and sync state
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check the numbering and linkage invariants
    Validate {
        /// Unit to check
        #[arg(short, long, conflicts_with = "case", required_unless_present = "case")]
        unit: Option<String>,

        /// Case to check, numbering across all its units
        #[arg(short, long)]
        case: Option<String>,
    },

    /// Fix orphans and missing back-references in a unit
    Repair {
        /// Unit to repair
        #[arg(short, long)]
        unit: String,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Rewrite the sequence numbers of a case
    Renumber {
        /// Case to renumber
        #[arg(short, long)]
        case: String,

        /// Only rewrite this unit and the ones created after it
        #[arg(long)]
        from_unit: Option<String>,
    },

    /// List queued sync entries
    Queue {
        /// Only show failed entries
        #[arg(long)]
        failed: bool,

        /// Also list local to remote id mappings
        #[arg(short, long)]
        mappings: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Data directory required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Validate { unit, case } => {
            let path = cli.path.ok_or("Data directory required for validate")?;
            let target = match (unit, case) {
                (Some(unit), _) => Target::Unit(unit),
                (None, Some(case)) => Target::Case(case),
                (None, None) => return Err("Either --unit or --case is required".into()),
            };
            commands::validate::run(&path, &target)?;
        }
        Commands::Repair { unit, dry_run } => {
            let path = cli.path.ok_or("Data directory required for repair")?;
            commands::repair::run(&path, &unit, dry_run)?;
        }
        Commands::Renumber { case, from_unit } => {
            let path = cli.path.ok_or("Data directory required for renumber")?;
            commands::renumber::run(&path, &case, from_unit)?;
        }
        Commands::Queue {
            failed,
            mappings,
            format,
        } => {
            let path = cli.path.ok_or("Data directory required for queue")?;
            commands::queue::run(&path, failed, mappings, &format)?;
        }
        Commands::Version => {
            println!("Fiscaliza CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Local id prefix: {}, delete batch: {}",
                fiscaliza_sync_engine::LOCAL_ID_PREFIX,
                fiscaliza_sync_engine::MAX_DELETE_BATCH
            );
        }
    }

    Ok(())
}
