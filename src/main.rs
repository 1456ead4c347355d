//! Music Dedupe - find and remove duplicate tracks in a music library.
//!
//! Tracks are grouped by normalized title (optionally title and artist) and
//! each group keeps its best copy: lossless over lossy, then higher bitrate,
//! then larger file.

pub mod cli;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod jobs;
pub mod metadata;
pub mod scanner;
pub mod tag_cache;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Log filter used when `RUST_LOG` is unset. Job targets stay at `warn` so
/// they don't interleave with the progress line.
const DEFAULT_LOG_FILTER: &str = "warn,cli=info,tag_cache=info";

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Logs go to stderr so JSON output on stdout stays parseable
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    cli::run_command(&args)
}
