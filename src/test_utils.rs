//! Test utilities and fixtures for music-dedupe tests.
//!
//! Factories for tag data and resolver inputs, plus a throwaway tag cache.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{record, titled};
//!
//! let groups = find_duplicates(vec![
//!     record("a.mp3", titled("Song"), 1000),
//!     record("b.flac", titled("Song"), 2000),
//! ], false);
//! ```

use std::path::Path;
use tempfile::TempDir;

use crate::duplicates::FileRecord;
use crate::metadata::TagData;
use crate::tag_cache::TagCache;

/// Tag data with only a title set.
///
/// Customize with struct update syntax:
///
/// ```ignore
/// let tags = TagData { artist: "Queen".into(), ..titled("Bohemian Rhapsody") };
/// ```
pub fn titled(title: &str) -> TagData {
    TagData {
        title: title.to_string(),
        ..TagData::default()
    }
}

/// Tag data with a title and bitrate (bits/s).
pub fn tags_with_bitrate(title: &str, bitrate: u32) -> TagData {
    TagData {
        bitrate,
        ..titled(title)
    }
}

/// Resolver input for a path, tags and size.
pub fn record(path: &str, tags: TagData, size: u64) -> FileRecord {
    FileRecord::new(path, tags, size)
}

/// Write `len` zero bytes to `path` (not a decodable audio file).
pub fn write_dummy_file(path: &Path, len: usize) {
    std::fs::write(path, vec![0u8; len]).expect("Failed to write dummy file");
}

/// Creates a temporary tag cache.
///
/// The database lives at `test_cache.db` inside the returned directory,
/// which is deleted when the `TempDir` is dropped. Keep it alive for the
/// duration of the test.
pub async fn temp_cache() -> (TagCache, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let cache = TagCache::open(&dir.path().join("test_cache.db"))
        .await
        .expect("Failed to open test cache");
    (cache, dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_cache_starts_empty() {
        let (cache, dir) = temp_cache().await;
        assert_eq!(cache.len().await.unwrap(), 0);
        assert!(dir.path().join("test_cache.db").exists());
    }

    #[test]
    fn test_tag_factories() {
        let tags = tags_with_bitrate("Song", 192_000);
        assert_eq!(tags.title, "Song");
        assert_eq!(tags.bitrate, 192_000);
        assert!(tags.artist.is_empty());
    }

    #[test]
    fn test_record_factory() {
        let r = record("/music/a.flac", titled("A"), 42);
        assert_eq!(r.path, Path::new("/music/a.flac"));
        assert_eq!(r.size, 42);
    }
}
