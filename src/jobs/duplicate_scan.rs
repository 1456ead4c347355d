//! Scan a directory tree and resolve duplicates.
//!
//! Three phases, each reported through [`JobEvent::Progress`]:
//! 1. Discover audio files (path-sorted)
//! 2. Read tags, consulting the tag cache first when one is configured
//! 3. Group and rank with [`find_duplicates`]
//!
//! Files whose tags cannot be read are skipped. A cache that fails to open
//! or to write only costs speed; the scan carries on without it.

use futures::stream::Stream;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{CancelToken, EventSender, JobEvent, spawn_job};
use crate::duplicates::{DuplicateGroup, FileRecord, find_duplicates};
use crate::error::{Error, Result};
use crate::metadata::{self, TagData};
use crate::scanner::{self, AudioFile};
use crate::tag_cache::{CacheEntry, TagCache};

/// Configuration for one duplicate scan.
#[derive(Debug, Clone)]
pub struct DuplicateScanJob {
    pub root: PathBuf,
    /// Group by title and artist instead of title alone
    pub match_artist: bool,
    /// Tag cache database (None = always read tags from disk)
    pub cache_db: Option<PathBuf>,
}

impl DuplicateScanJob {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            match_artist: false,
            cache_db: None,
        }
    }

    pub fn match_artist(mut self, match_artist: bool) -> Self {
        self.match_artist = match_artist;
        self
    }

    pub fn with_cache(mut self, cache_db: Option<PathBuf>) -> Self {
        self.cache_db = cache_db;
        self
    }

    /// Start the scan on the tokio runtime.
    pub fn run(self, token: CancelToken) -> impl Stream<Item = JobEvent<Vec<DuplicateGroup>>> {
        spawn_job(token, move |tx, token| async move {
            let event = match self.execute(&tx, &token).await {
                Ok(groups) => JobEvent::Finished(groups),
                Err(Error::Cancelled) => {
                    info!(target: "duplicates::scan", root = %self.root.display(), "Scan cancelled");
                    JobEvent::Cancelled
                }
                Err(e) => {
                    warn!(target: "duplicates::scan", error = %e, "Scan failed");
                    JobEvent::Failed(e.to_string())
                }
            };
            tx.send(event).await;
        })
    }

    async fn execute(
        &self,
        tx: &EventSender<Vec<DuplicateGroup>>,
        token: &CancelToken,
    ) -> Result<Vec<DuplicateGroup>> {
        tx.progress(0, 0, "Scanning for audio files...").await;

        let root = self.root.clone();
        let walk_token = token.clone();
        let files = tokio::task::spawn_blocking(move || discover_files(&root, &walk_token))
            .await
            .map_err(|e| Error::task(e.to_string()))??;

        if files.is_empty() {
            info!(target: "duplicates::scan", root = %self.root.display(), "No audio files found");
            return Ok(Vec::new());
        }

        let cache = match &self.cache_db {
            Some(path) => match TagCache::open(path).await {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!(target: "duplicates::scan", path = %path.display(), error = %e, "Tag cache unavailable, reading all tags from disk");
                    None
                }
            },
            None => None,
        };

        let records = read_records(&files, cache.as_ref(), tx, token).await;
        if let Some(cache) = cache {
            cache.close().await;
        }
        let records = records?;

        let total = files.len();
        tx.progress(total, total, "Analyzing duplicates...").await;
        let groups = find_duplicates(records, self.match_artist);

        info!(
            target: "duplicates::scan",
            files = total,
            groups = groups.len(),
            match_artist = self.match_artist,
            "Duplicate scan complete"
        );
        Ok(groups)
    }
}

/// Walk `root`, stopping as soon as cancellation is requested.
fn discover_files(root: &Path, token: &CancelToken) -> Result<Vec<AudioFile>> {
    let mut files = Vec::new();
    for file in scanner::discover(root) {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        files.push(file);
    }
    debug!(target: "duplicates::scan", count = files.len(), "Discovery finished");
    Ok(files)
}

/// Read tags for every file, preserving discovery order.
async fn read_records(
    files: &[AudioFile],
    cache: Option<&TagCache>,
    tx: &EventSender<Vec<DuplicateGroup>>,
    token: &CancelToken,
) -> Result<Vec<FileRecord>> {
    let total = files.len();
    let mut records = Vec::with_capacity(total);
    let mut fresh: Vec<CacheEntry> = Vec::new();
    let mut hits = 0usize;

    for (i, file) in files.iter().enumerate() {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tx.progress(i + 1, total, format!("Reading tags: {}", file.display_name()))
            .await;

        let cached = match cache {
            Some(cache) => cache
                .get(&file.path, file.mtime_ns, file.size)
                .await
                .unwrap_or_else(|e| {
                    debug!(target: "duplicates::scan", path = %file.path.display(), error = %e, "Cache lookup failed");
                    None
                }),
            None => None,
        };

        let tags = match cached {
            Some(tags) => {
                hits += 1;
                tags
            }
            None => match read_tags(&file.path).await? {
                Some(tags) => {
                    if cache.is_some() {
                        fresh.push(CacheEntry {
                            path: file.path.clone(),
                            mtime_ns: file.mtime_ns,
                            size: file.size,
                            tags: tags.clone(),
                        });
                    }
                    tags
                }
                None => continue,
            },
        };

        records.push(FileRecord::new(file.path.clone(), tags, file.size));
    }

    if let Some(cache) = cache
        && let Err(e) = cache.put_many(&fresh).await
    {
        warn!(target: "duplicates::scan", error = %e, "Failed to update tag cache");
    }

    debug!(
        target: "duplicates::scan",
        readable = records.len(),
        cache_hits = hits,
        cache_writes = fresh.len(),
        "Tag reading finished"
    );
    Ok(records)
}

/// Read one file's tags off the async runtime; unreadable files yield None.
async fn read_tags(path: &Path) -> Result<Option<TagData>> {
    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || metadata::read(&owned))
        .await
        .map_err(|e| Error::task(e.to_string()))?;

    match result {
        Ok(tags) => Ok(Some(tags)),
        Err(e) => {
            debug!(target: "duplicates::scan", path = %path.display(), error = %e, "Skipping unreadable file");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{titled, write_dummy_file};
    use futures::StreamExt;

    async fn run_to_end(
        job: DuplicateScanJob,
        token: CancelToken,
    ) -> Vec<JobEvent<Vec<DuplicateGroup>>> {
        job.run(token).collect().await
    }

    #[tokio::test]
    async fn test_empty_directory_finishes_with_no_groups() {
        let dir = tempfile::tempdir().unwrap();
        let events = run_to_end(DuplicateScanJob::new(dir.path()), CancelToken::new()).await;

        assert_eq!(events.first(), Some(&JobEvent::progress(0, 0, "Scanning for audio files...")));
        assert_eq!(events.last(), Some(&JobEvent::Finished(Vec::new())));
    }

    #[tokio::test]
    async fn test_unreadable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_dummy_file(&dir.path().join("a.mp3"), 100);
        write_dummy_file(&dir.path().join("b.flac"), 100);

        let events = run_to_end(DuplicateScanJob::new(dir.path()), CancelToken::new()).await;

        assert!(events.contains(&JobEvent::progress(1, 2, "Reading tags: a.mp3")));
        assert!(events.contains(&JobEvent::progress(2, 2, "Analyzing duplicates...")));
        assert_eq!(events.last(), Some(&JobEvent::Finished(Vec::new())));
    }

    #[tokio::test]
    async fn test_pre_cancelled_scan_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        write_dummy_file(&dir.path().join("a.mp3"), 10);

        let token = CancelToken::new();
        token.cancel();
        let events = run_to_end(DuplicateScanJob::new(dir.path()), token).await;

        assert_eq!(events.last(), Some(&JobEvent::Cancelled));
        assert!(!events.iter().any(|e| matches!(e, JobEvent::Finished(_))));
    }

    #[tokio::test]
    async fn test_cached_tags_drive_grouping() {
        let dir = tempfile::tempdir().unwrap();
        let music = dir.path().join("music");
        std::fs::create_dir(&music).unwrap();
        let mp3 = music.join("song.mp3");
        let flac = music.join("song.flac");
        write_dummy_file(&mp3, 300);
        write_dummy_file(&flac, 900);

        let db_path = dir.path().join("cache.db");
        let cache = TagCache::open(&db_path).await.unwrap();
        let entries: Vec<CacheEntry> = [&mp3, &flac]
            .into_iter()
            .map(|p| {
                let file = AudioFile::from_path(p).unwrap();
                CacheEntry {
                    path: file.path,
                    mtime_ns: file.mtime_ns,
                    size: file.size,
                    tags: titled("Same Song"),
                }
            })
            .collect();
        cache.put_many(&entries).await.unwrap();
        cache.close().await;

        let job = DuplicateScanJob::new(&music).with_cache(Some(db_path));
        let events = run_to_end(job, CancelToken::new()).await;

        let Some(JobEvent::Finished(groups)) = events.last() else {
            panic!("scan did not finish: {:?}", events.last());
        };
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].normalized_key, "same song");
        assert_eq!(groups[0].kept_file().unwrap().path, flac);
        assert_eq!(groups[0].deletable_files()[0].path, mp3);
    }

    #[tokio::test]
    async fn test_broken_cache_path_degrades_to_disk_reads() {
        let dir = tempfile::tempdir().unwrap();
        write_dummy_file(&dir.path().join("a.mp3"), 10);
        // A directory cannot be opened as a database file.
        let bogus = dir.path().join("not_a_db");
        std::fs::create_dir(&bogus).unwrap();

        let job = DuplicateScanJob::new(dir.path()).with_cache(Some(bogus));
        let events = run_to_end(job, CancelToken::new()).await;

        assert_eq!(events.last(), Some(&JobEvent::Finished(Vec::new())));
    }

    #[test]
    fn test_builder_defaults() {
        let job = DuplicateScanJob::new("/music").match_artist(true);
        assert!(job.match_artist);
        assert!(job.cache_db.is_none());
    }
}
