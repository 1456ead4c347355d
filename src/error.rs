//! Application-wide error types.
//!
//! Library modules return [`Error`] via `thiserror`, while the CLI and
//! `main` use `anyhow` for convenient propagation.
//!
//! The duplicate resolver itself never fails: missing tags degrade to
//! empty values and are handled as exclusion rules, not errors. Everything
//! here belongs to the surrounding I/O layers (discovery, tag reading, the
//! tag cache and deletion).
//!
//! # Example
//!
//! ```ignore
//! use crate::error::{Result, ResultExt};
//!
//! async fn open(path: &Path) -> Result<TagCache> {
//!     TagCache::open(path).await.with_context("opening tag cache")
//! }
//! ```

use std::path::PathBuf;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Tag cache database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Tag cache schema migration failed
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Tag reading error
    #[error("Metadata error for {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    /// Moving a file to the trash failed
    #[error("Trash error for {path}: {message}")]
    Trash { path: PathBuf, message: String },

    /// A blocking task panicked or was aborted
    #[error("Background task failed: {0}")]
    Task(String),

    /// A background job was cancelled before completion
    #[error("Operation was cancelled")]
    Cancelled,

    /// Error with additional context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a metadata error.
    pub fn metadata(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a trash error.
    pub fn trash(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Trash {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a background task error.
    pub fn task(message: impl Into<String>) -> Self {
        Self::Task(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}
