//! CLI command definitions and dispatch.
//!
//! Each subcommand lives in its own submodule:
//! - `duplicates`: scanning for duplicates and cleaning them up
//! - `cache`: tag cache maintenance

mod cache;
mod duplicates;

use clap::{Args, Parser, Subcommand};
use futures::{Stream, StreamExt};
use std::io::Write;
use std::path::PathBuf;
use tokio::runtime::Runtime;

use crate::config::{self, Config};
use crate::jobs::{CancelToken, JobEvent};

pub use cache::cmd_cache;
pub use duplicates::{cmd_clean, cmd_scan};

/// Music Dedupe CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that runs a duplicate scan
#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Directory to scan (defaults to the last scanned directory)
    pub path: Option<PathBuf>,
    /// Group by title and artist instead of title alone
    #[arg(long)]
    pub match_artist: bool,
    /// Read every file's tags from disk, ignoring the tag cache
    #[arg(long)]
    pub no_cache: bool,
    /// Tag cache database (defaults to the configured location)
    #[arg(long, env = "MUSIC_DEDUPE_CACHE_DB")]
    pub cache_db: Option<PathBuf>,
}

/// Options for `clean`
#[derive(Args, Debug, Clone)]
pub struct CleanArgs {
    #[command(flatten)]
    pub scan: ScanArgs,
    /// Show what would be deleted without touching any file
    #[arg(long)]
    pub dry_run: bool,
    /// Delete permanently instead of moving to the trash
    #[arg(long)]
    pub permanent: bool,
    /// Print the deletion report as JSON
    #[arg(long)]
    pub json: bool,
    /// Keep this file even if it is not the best copy (repeatable)
    #[arg(long = "keep", value_name = "PATH")]
    pub keep: Vec<PathBuf>,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Find duplicate tracks and show which copy would be kept
    Scan {
        #[command(flatten)]
        scan: ScanArgs,
        /// Print groups as JSON
        #[arg(long)]
        json: bool,
    },
    /// Find duplicates and delete every copy not marked to keep
    Clean(CleanArgs),
    /// Maintain the tag cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
        /// Tag cache database (defaults to the configured location)
        #[arg(long, global = true, env = "MUSIC_DEDUPE_CACHE_DB")]
        cache_db: Option<PathBuf>,
    },
}

/// Tag cache operations
#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Remove every cached entry
    Clear,
    /// Forget specific files so their tags are re-read next scan
    Invalidate {
        /// Files to drop from the cache
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show how many files are cached
    Stats,
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;
    let mut config = config::load();
    let token = CancelToken::new();
    install_interrupt_handler(&rt, token.clone());

    match &cli.command {
        Commands::Scan { scan, json } => {
            cmd_scan(&rt, &mut config, &token, scan, *json)?;
            save_config(&config);
            Ok(())
        }
        Commands::Clean(args) => {
            cmd_clean(&rt, &mut config, &token, args)?;
            save_config(&config);
            Ok(())
        }
        Commands::Cache { action, cache_db } => cmd_cache(&rt, &config, action, cache_db.as_ref()),
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// Route Ctrl-C to the command's cancel token.
///
/// The first press cancels whatever job is running or starts next; a second
/// press exits immediately.
fn install_interrupt_handler(rt: &Runtime, token: CancelToken) {
    rt.spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if token.is_cancelled() {
                eprintln!();
                std::process::exit(130);
            }
            eprintln!();
            tracing::warn!(target: "cli", "Interrupted, stopping after the current file (Ctrl-C again to quit)");
            token.cancel();
        }
    });
}

fn save_config(config: &Config) {
    if let Err(e) = config::save(config) {
        tracing::warn!(target: "cli", error = %e, "Failed to save config");
    }
}

/// Directory to scan: the argument, else the last scanned directory.
pub(crate) fn scan_root(config: &Config, args: &ScanArgs) -> anyhow::Result<PathBuf> {
    args.path
        .clone()
        .or_else(|| config.library.last_scan_path.clone())
        .ok_or_else(|| anyhow::anyhow!("No directory given and no previous scan to repeat"))
}

/// Cache database for a scan: CLI flags first, then config.
pub(crate) fn scan_cache_path(config: &Config, args: &ScanArgs) -> Option<PathBuf> {
    if args.no_cache {
        return None;
    }
    args.cache_db
        .clone()
        .or_else(|| config.cache.resolved_path())
}

/// Consume a job's event stream, drawing progress on stderr.
pub(crate) async fn drive_job<T>(events: impl Stream<Item = JobEvent<T>>) -> anyhow::Result<T> {
    let mut events = std::pin::pin!(events);
    let outcome = loop {
        let Some(event) = events.next().await else {
            break None;
        };
        if event.is_terminal() {
            break Some(event);
        }
        if let JobEvent::Progress {
            current,
            total,
            message,
        } = &event
        {
            if *total > 0 {
                eprint!("\r\x1b[2K[{current}/{total}] {message}");
            } else {
                eprint!("\r\x1b[2K{message}");
            }
            let _ = std::io::stderr().flush();
        }
    };
    eprintln!();

    match outcome {
        Some(JobEvent::Finished(value)) => Ok(value),
        Some(JobEvent::Cancelled) => anyhow::bail!("Cancelled"),
        Some(JobEvent::Failed(message)) => anyhow::bail!(message),
        Some(JobEvent::Progress { .. }) | None => {
            anyhow::bail!("Job ended without reporting a result")
        }
    }
}

/// Human-readable byte count.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
