//! SQLite-backed cache of tag reads.
//!
//! Reading tags means opening and parsing every audio file, which dominates
//! the cost of a duplicate scan. The cache stores one [`TagData`] snapshot
//! per absolute path together with the file's modification time and size;
//! a lookup only hits when both still match, so edited or replaced files
//! are re-read automatically.
//!
//! # Example
//!
//! ```ignore
//! let cache = TagCache::open(&db_path).await?;
//! if let Some(tags) = cache.get(&file.path, file.mtime_ns, file.size).await? {
//!     // fresh hit
//! }
//! cache.put_many(&entries).await?;
//! cache.close().await;
//! ```

use std::path::{Path, PathBuf};

use sqlx::FromRow;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::error::{Result, ResultExt};
use crate::metadata::TagData;

/// One pending cache write.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub mtime_ns: i64,
    pub size: u64,
    pub tags: TagData,
}

/// Row layout of the `tag_cache` table (tag columns only).
#[derive(Debug, FromRow)]
struct CachedTagRow {
    title: String,
    artist: String,
    album: String,
    albumartist: String,
    track: i64,
    disc: i64,
    year: i64,
    genre: String,
    composer: String,
    duration: f64,
    bitrate: i64,
}

impl From<CachedTagRow> for TagData {
    fn from(row: CachedTagRow) -> Self {
        let small = |v: i64| u32::try_from(v).unwrap_or(0);
        TagData {
            title: row.title,
            artist: row.artist,
            album: row.album,
            albumartist: row.albumartist,
            track: small(row.track),
            disc: small(row.disc),
            year: small(row.year),
            genre: row.genre,
            composer: row.composer,
            duration: row.duration,
            bitrate: small(row.bitrate),
        }
    }
}

/// Handle to an open tag cache database.
#[derive(Debug, Clone)]
pub struct TagCache {
    pool: SqlitePool,
}

impl TagCache {
    /// Open (creating if needed) the cache database at `db_path`.
    ///
    /// Parent directories are created, WAL mode is enabled and the schema
    /// migration is applied.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(format!(
                "creating tag cache directory {}",
                dir.display()
            ))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(format!("opening tag cache {}", db_path.display()))?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::debug!(target: "tag_cache", path = %db_path.display(), "Tag cache opened");
        Ok(Self { pool })
    }

    /// Close the connection pool.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Return cached tags when path, mtime and size all match.
    pub async fn get(&self, path: &Path, mtime_ns: i64, size: u64) -> Result<Option<TagData>> {
        let row = sqlx::query_as::<_, CachedTagRow>(
            r#"
            SELECT
                title, artist, album, albumartist,
                track, disc, year, genre, composer,
                duration, bitrate
            FROM tag_cache
            WHERE path = ? AND mtime_ns = ? AND size = ?
            "#,
        )
        .bind(normalize_path(path))
        .bind(mtime_ns)
        .bind(size_column(size))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TagData::from))
    }

    /// Upsert many records in a single transaction.
    pub async fn put_many(&self, entries: &[CacheEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            let tags = &entry.tags;
            sqlx::query(
                r#"
                INSERT INTO tag_cache (
                    path, mtime_ns, size,
                    title, artist, album, albumartist,
                    track, disc, year, genre, composer,
                    duration, bitrate
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(path) DO UPDATE SET
                    mtime_ns = excluded.mtime_ns,
                    size = excluded.size,
                    title = excluded.title,
                    artist = excluded.artist,
                    album = excluded.album,
                    albumartist = excluded.albumartist,
                    track = excluded.track,
                    disc = excluded.disc,
                    year = excluded.year,
                    genre = excluded.genre,
                    composer = excluded.composer,
                    duration = excluded.duration,
                    bitrate = excluded.bitrate
                "#,
            )
            .bind(normalize_path(&entry.path))
            .bind(entry.mtime_ns)
            .bind(size_column(entry.size))
            .bind(&tags.title)
            .bind(&tags.artist)
            .bind(&tags.album)
            .bind(&tags.albumartist)
            .bind(i64::from(tags.track))
            .bind(i64::from(tags.disc))
            .bind(i64::from(tags.year))
            .bind(&tags.genre)
            .bind(&tags.composer)
            .bind(tags.duration)
            .bind(i64::from(tags.bitrate))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(target: "tag_cache", count = entries.len(), "Cache entries written");
        Ok(())
    }

    /// Remove several paths; returns how many rows were deleted.
    pub async fn invalidate_many(&self, paths: &[PathBuf]) -> Result<u64> {
        if paths.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for path in paths {
            removed += sqlx::query("DELETE FROM tag_cache WHERE path = ?")
                .bind(normalize_path(path))
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    /// Delete every cache entry; returns how many rows were deleted.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tag_cache")
            .execute(&self.pool)
            .await?;
        tracing::info!(target: "tag_cache", removed = result.rows_affected(), "Tag cache cleared");
        Ok(result.rows_affected())
    }

    /// Number of cached files.
    pub async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tag_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

/// Absolute, resolved path string used as the cache key.
///
/// A file that no longer exists is resolved through its parent directory so
/// deleted files still map to the key they were cached under.
fn normalize_path(path: &Path) -> String {
    let resolved = std::fs::canonicalize(path).ok().or_else(|| {
        let parent = path.parent()?;
        let name = path.file_name()?;
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        std::fs::canonicalize(parent).ok().map(|p| p.join(name))
    });
    resolved
        .unwrap_or_else(|| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

fn size_column(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{temp_cache, titled};

    fn entry(path: &Path, mtime_ns: i64, size: u64, title: &str) -> CacheEntry {
        CacheEntry {
            path: path.to_path_buf(),
            mtime_ns,
            size,
            tags: TagData {
                artist: "Artist".to_string(),
                bitrate: 320_000,
                duration: 201.5,
                ..titled(title)
            },
        }
    }

    #[tokio::test]
    async fn test_open_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("cache.db");

        let cache = TagCache::open(&db_path).await.expect("Failed to open cache");
        assert!(db_path.exists());
        assert_eq!(cache.len().await.unwrap(), 0);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let (cache, dir) = temp_cache().await;
        let path = dir.path().join("song.mp3");

        cache.put_many(&[entry(&path, 100, 2048, "Song")]).await.unwrap();

        let tags = cache.get(&path, 100, 2048).await.unwrap().unwrap();
        assert_eq!(tags.title, "Song");
        assert_eq!(tags.artist, "Artist");
        assert_eq!(tags.bitrate, 320_000);
        assert_eq!(tags.duration, 201.5);
    }

    #[tokio::test]
    async fn test_get_misses_on_changed_fingerprint() {
        let (cache, dir) = temp_cache().await;
        let path = dir.path().join("song.mp3");
        cache.put_many(&[entry(&path, 100, 2048, "Song")]).await.unwrap();

        assert!(cache.get(&path, 101, 2048).await.unwrap().is_none());
        assert!(cache.get(&path, 100, 4096).await.unwrap().is_none());
        assert!(cache.get(&dir.path().join("other.mp3"), 100, 2048).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_many_upserts() {
        let (cache, dir) = temp_cache().await;
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.flac");

        cache
            .put_many(&[entry(&a, 1, 10, "Old"), entry(&b, 1, 10, "B")])
            .await
            .unwrap();
        cache.put_many(&[entry(&a, 2, 20, "New")]).await.unwrap();

        assert_eq!(cache.len().await.unwrap(), 2);
        assert!(cache.get(&a, 1, 10).await.unwrap().is_none());
        assert_eq!(cache.get(&a, 2, 20).await.unwrap().unwrap().title, "New");
    }

    #[tokio::test]
    async fn test_put_many_empty_is_noop() {
        let (cache, _dir) = temp_cache().await;
        cache.put_many(&[]).await.unwrap();
        assert_eq!(cache.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_keys_through_parent() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("song.mp3");
        std::fs::write(&existing, b"x").unwrap();

        let before = normalize_path(&existing);
        std::fs::remove_file(&existing).unwrap();
        assert_eq!(normalize_path(&existing), before);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let (cache, dir) = temp_cache().await;
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.mp3");
        let c = dir.path().join("c.mp3");
        cache
            .put_many(&[entry(&a, 1, 1, "A"), entry(&b, 1, 1, "B"), entry(&c, 1, 1, "C")])
            .await
            .unwrap();

        let removed = cache.invalidate_many(&[a.clone(), b.clone()]).await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get(&a, 1, 1).await.unwrap().is_none());
        assert_eq!(cache.len().await.unwrap(), 1);

        assert_eq!(cache.clear().await.unwrap(), 1);
        assert_eq!(cache.len().await.unwrap(), 0);
    }
}
