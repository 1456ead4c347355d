//! Tag-based duplicate detection and resolution.
//!
//! Files are bucketed by a normalized identity key built from their title
//! (and optionally artist) tags. Within every bucket of two or more files a
//! single copy is marked to keep, chosen by a fixed quality ranking:
//!
//! 1. Format priority: lossless (`.flac`) over lossy (`.mp3`) over anything
//!    unrecognised
//! 2. Bitrate, within the same format tier
//! 3. File size, within the same format and bitrate
//!
//! Exact ties keep discovery order, so callers should feed records in a
//! reproducible order (the scanner yields path-sorted files).
//!
//! Album is deliberately not part of the key: the same title on two albums
//! is treated as one track unless artist matching separates them.
//!
//! Everything in this module is pure: no I/O, no shared state.
//!
//! # Example
//!
//! ```ignore
//! let groups = find_duplicates(records, false);
//! for group in &groups {
//!     println!("{} keeps {:?}", group.normalized_key, group.kept_file());
//! }
//! ```

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::metadata::TagData;
use crate::scanner::dotted_extension;

/// Separator between title and artist in a grouping key.
pub const KEY_SEPARATOR: &str = " || ";

/// Format ranking table. Extensions not listed rank 0.
pub const FORMAT_PRIORITY: &[(&str, u8)] = &[(".flac", 2), (".mp3", 1)];

/// Look up the priority of a normalized (lowercase, dotted) extension.
pub fn format_priority(extension: &str) -> u8 {
    FORMAT_PRIORITY
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, rank)| *rank)
        .unwrap_or(0)
}

/// Lowercase, trim, and collapse every run of whitespace into one space.
///
/// The ASCII separator controls `\x1c`..=`\x1f` also count as whitespace.
pub fn normalize_title(text: &str) -> String {
    text.split(is_title_whitespace)
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_title_whitespace(c: char) -> bool {
    c.is_whitespace() || ('\x1c'..='\x1f').contains(&c)
}

/// One input to duplicate detection: a file and what we know about it.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub tags: TagData,
    /// File size in bytes
    pub size: u64,
}

impl FileRecord {
    pub fn new(path: impl Into<PathBuf>, tags: TagData, size: u64) -> Self {
        Self {
            path: path.into(),
            tags,
            size,
        }
    }
}

/// One file within a duplicate group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateFile {
    pub path: PathBuf,
    pub tags: TagData,
    /// Lowercase extension with leading dot
    pub extension: String,
    pub size: u64,
    /// Whether this is the copy to retain
    pub keep: bool,
}

impl DuplicateFile {
    fn from_record(record: FileRecord) -> Self {
        let extension = dotted_extension(&record.path);
        Self {
            path: record.path,
            tags: record.tags,
            extension,
            size: record.size,
            keep: false,
        }
    }

    /// Composite quality rank; greater is better.
    pub fn rank(&self) -> QualityRank {
        QualityRank {
            format_priority: format_priority(&self.extension),
            bitrate: self.tags.bitrate,
            size: self.size,
        }
    }
}

/// Ranking key compared field by field, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QualityRank {
    pub format_priority: u8,
    pub bitrate: u32,
    pub size: u64,
}

/// A set of files sharing the same normalized key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub normalized_key: String,
    /// Ranked best-first
    pub files: Vec<DuplicateFile>,
}

impl DuplicateGroup {
    /// The file marked to keep, if any.
    pub fn kept_file(&self) -> Option<&DuplicateFile> {
        self.files.iter().find(|f| f.keep)
    }

    /// All files not marked to keep.
    pub fn deletable_files(&self) -> Vec<&DuplicateFile> {
        self.files.iter().filter(|f| !f.keep).collect()
    }

    /// Bytes reclaimed by deleting every non-kept file.
    pub fn reclaimable_bytes(&self) -> u64 {
        self.files.iter().filter(|f| !f.keep).map(|f| f.size).sum()
    }
}

/// Build the grouping key for a tag set, or None if the title is blank.
pub fn grouping_key(tags: &TagData, match_artist: bool) -> Option<String> {
    let title = normalize_title(&tags.title);
    if title.is_empty() {
        return None;
    }

    if match_artist {
        Some(format!(
            "{title}{KEY_SEPARATOR}{}",
            normalize_title(&tags.artist)
        ))
    } else {
        Some(title)
    }
}

/// Bucket records by grouping key, dropping buckets with fewer than 2 files.
///
/// Records with a blank title are skipped entirely. Within a bucket, files
/// keep their input order.
pub fn group_records(
    records: impl IntoIterator<Item = FileRecord>,
    match_artist: bool,
) -> BTreeMap<String, Vec<DuplicateFile>> {
    let mut buckets: BTreeMap<String, Vec<DuplicateFile>> = BTreeMap::new();

    for record in records {
        let Some(key) = grouping_key(&record.tags, match_artist) else {
            continue;
        };
        buckets
            .entry(key)
            .or_default()
            .push(DuplicateFile::from_record(record));
    }

    buckets.retain(|_, files| files.len() >= 2);
    buckets
}

/// Sort best-first and mark exactly the first file to keep.
///
/// `sort_by` is stable, so equal ranks keep their input order.
pub fn rank_files(files: &mut [DuplicateFile]) {
    files.sort_by(|a, b| compare_quality(b, a));
    for (i, file) in files.iter_mut().enumerate() {
        file.keep = i == 0;
    }
}

fn compare_quality(a: &DuplicateFile, b: &DuplicateFile) -> Ordering {
    a.rank().cmp(&b.rank())
}

/// Find duplicate files by tag identity.
///
/// Returns groups of 2+ files, each ranked best-first with exactly one
/// file marked `keep`, ordered by normalized key.
pub fn find_duplicates(
    records: impl IntoIterator<Item = FileRecord>,
    match_artist: bool,
) -> Vec<DuplicateGroup> {
    // BTreeMap iteration already yields keys in ascending order.
    group_records(records, match_artist)
        .into_iter()
        .map(|(normalized_key, mut files)| {
            rank_files(&mut files);
            DuplicateGroup {
                normalized_key,
                files,
            }
        })
        .collect()
}
