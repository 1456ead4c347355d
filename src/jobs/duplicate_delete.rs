//! Delete the copies a duplicate scan marked as redundant.
//!
//! Deletion goes to the OS trash by default so it can be undone. If the
//! trash is unavailable for a file (network mounts, some removable media)
//! the file is unlinked instead. Per-file failures are collected in the
//! [`DeleteReport`] rather than aborting the batch.

use futures::stream::Stream;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{CancelToken, EventSender, JobEvent, spawn_job};
use crate::duplicates::DuplicateGroup;
use crate::error::{Error, Result, ResultExt};
use crate::tag_cache::TagCache;

/// How files are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteMode {
    /// Move to the recycle bin, unlinking only if that fails
    #[default]
    Trash,
    /// Unlink immediately
    Permanent,
}

/// Outcome of a delete job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub deleted: Vec<PathBuf>,
    /// Paths that could not be removed, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

/// Every file not marked `keep`, in group order.
pub fn deletion_candidates(groups: &[DuplicateGroup]) -> Vec<PathBuf> {
    groups
        .iter()
        .flat_map(|g| g.deletable_files())
        .map(|f| f.path.clone())
        .collect()
}

/// A batch of files to delete.
#[derive(Debug, Clone)]
pub struct DuplicateDeleteJob {
    pub paths: Vec<PathBuf>,
    pub mode: DeleteMode,
    /// Tag cache to drop deleted files from
    pub cache_db: Option<PathBuf>,
}

impl DuplicateDeleteJob {
    pub fn new(paths: Vec<PathBuf>, mode: DeleteMode) -> Self {
        Self {
            paths,
            mode,
            cache_db: None,
        }
    }

    pub fn with_cache(mut self, cache_db: Option<PathBuf>) -> Self {
        self.cache_db = cache_db;
        self
    }

    /// Start deleting on the tokio runtime.
    pub fn run(self, token: CancelToken) -> impl Stream<Item = JobEvent<DeleteReport>> {
        spawn_job(token, move |tx, token| async move {
            let event = match self.execute(&tx, &token).await {
                Ok(report) => JobEvent::Finished(report),
                Err(Error::Cancelled) => JobEvent::Cancelled,
                Err(e) => JobEvent::Failed(e.to_string()),
            };
            tx.send(event).await;
        })
    }

    async fn execute(
        &self,
        tx: &EventSender<DeleteReport>,
        token: &CancelToken,
    ) -> Result<DeleteReport> {
        self.execute_with(tx, token, |path, mode| remove_file(&path, mode))
            .await
    }

    /// Delete every path with `remove`, run on the blocking pool.
    ///
    /// Files removed before a cancellation are still dropped from the tag
    /// cache and logged.
    async fn execute_with<R>(
        &self,
        tx: &EventSender<DeleteReport>,
        token: &CancelToken,
        remove: R,
    ) -> Result<DeleteReport>
    where
        R: Fn(PathBuf, DeleteMode) -> Result<()> + Clone + Send + 'static,
    {
        let total = self.paths.len();
        let mut report = DeleteReport::default();

        for (i, path) in self.paths.iter().enumerate() {
            if token.is_cancelled() {
                self.forget_deleted(&report.deleted).await;
                for removed in &report.deleted {
                    info!(target: "duplicates::delete", path = %removed.display(), "Deleted before cancel");
                }
                info!(
                    target: "duplicates::delete",
                    deleted = report.deleted.len(),
                    remaining = total - i,
                    "Deletion cancelled"
                );
                return Err(Error::Cancelled);
            }

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            tx.progress(i + 1, total, format!("Deleting: {name}")).await;

            let owned = path.clone();
            let mode = self.mode;
            let remove = remove.clone();
            let outcome = tokio::task::spawn_blocking(move || remove(owned, mode))
                .await
                .map_err(|e| Error::task(e.to_string()))?;

            match outcome {
                Ok(()) => {
                    debug!(target: "duplicates::delete", path = %path.display(), "Deleted");
                    report.deleted.push(path.clone());
                }
                Err(e) => {
                    warn!(target: "duplicates::delete", path = %path.display(), error = %e, "Delete failed");
                    report.failed.push((path.clone(), e.to_string()));
                }
            }
        }

        self.forget_deleted(&report.deleted).await;

        info!(
            target: "duplicates::delete",
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Deletion complete"
        );
        Ok(report)
    }

    /// Drop deleted files from the tag cache. Failures are logged only.
    async fn forget_deleted(&self, deleted: &[PathBuf]) {
        let Some(db_path) = &self.cache_db else {
            return;
        };
        if deleted.is_empty() {
            return;
        }

        match TagCache::open(db_path).await {
            Ok(cache) => {
                if let Err(e) = cache.invalidate_many(deleted).await {
                    warn!(target: "duplicates::delete", error = %e, "Failed to invalidate cache entries");
                }
                cache.close().await;
            }
            Err(e) => {
                warn!(target: "duplicates::delete", error = %e, "Tag cache unavailable");
            }
        }
    }
}

fn remove_file(path: &Path, mode: DeleteMode) -> Result<()> {
    match mode {
        DeleteMode::Permanent => {
            std::fs::remove_file(path).with_context(format!("removing {}", path.display()))
        }
        DeleteMode::Trash => match trash::delete(path) {
            Ok(()) => Ok(()),
            Err(trash_err) => {
                debug!(target: "duplicates::delete", path = %path.display(), error = %trash_err, "Trash failed, unlinking");
                std::fs::remove_file(path).map_err(|io_err| {
                    Error::trash(path, format!("{trash_err}; unlink also failed: {io_err}"))
                })
            }
        },
    }
}
