//! Command-line interface for music-dedupe.
//!
//! Finds duplicate tracks under a directory, optionally deletes the
//! redundant copies, and maintains the tag cache.

mod commands;

pub use commands::{Cli, Commands, run_command};
