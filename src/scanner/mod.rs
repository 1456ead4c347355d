//! Audio file discovery.
//!
//! Walks a directory tree and yields [`AudioFile`] descriptors for every
//! supported file. Entries are visited sorted by file name within each
//! directory so repeated scans of an unchanged tree enumerate files in the
//! same order; duplicate resolution relies on that for its tie-breaks.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// Supported audio extensions (lowercase, without the dot).
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac"];

/// Lightweight descriptor for a discovered audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFile {
    pub path: PathBuf,
    /// Lowercase extension with leading dot, e.g. ".flac"
    pub extension: String,
    /// File size in bytes
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch (0 if unavailable)
    pub mtime_ns: i64,
}

impl AudioFile {
    /// Stat a file and build its descriptor.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0);

        Ok(Self {
            path: path.to_path_buf(),
            extension: dotted_extension(path),
            size: meta.len(),
            mtime_ns,
        })
    }

    /// File name for progress messages.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Lowercase extension including the leading dot, or "" if there is none.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Check whether a path has a supported audio extension (case-insensitive).
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            AUDIO_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Walk `root` recursively and yield audio files in a stable order.
///
/// Unreadable directory entries and files that can no longer be stat'ed
/// are skipped.
pub fn discover(root: &Path) -> impl Iterator<Item = AudioFile> + use<> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                tracing::debug!(target: "scanner", error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file() && is_audio_file(e.path()))
        .filter_map(|e| match AudioFile::from_path(e.path()) {
            Ok(file) => Some(file),
            Err(err) => {
                tracing::debug!(target: "scanner", path = %e.path().display(), error = %err, "Skipping file");
                None
            }
        })
}
