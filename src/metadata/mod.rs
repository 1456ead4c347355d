//! Audio file tag reading.
//!
//! Uses the lofty crate for format-independent metadata access. Only the
//! read side lives here: duplicate detection needs title, artist, album and
//! the stream bitrate, and the remaining fields are carried along so the
//! tag cache can store a complete snapshot of a file.
//!
//! Missing fields are reported as empty strings / zero rather than
//! placeholders like "Unknown Title", because an empty title is what
//! excludes a file from duplicate grouping.

use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Tag snapshot for one audio file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagData {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub albumartist: String,
    pub track: u32,
    pub disc: u32,
    pub year: u32,
    pub genre: String,
    pub composer: String,
    /// Duration in seconds
    pub duration: f64,
    /// Audio bitrate in bits per second (0 = unknown)
    pub bitrate: u32,
}

/// Read tags and audio properties from a file.
pub fn read(path: &Path) -> Result<TagData> {
    let tagged_file = Probe::open(path)
        .map_err(|e| Error::metadata(path, format!("failed to open file for probing: {e}")))?
        .read()
        .map_err(|e| Error::metadata(path, format!("failed to read file metadata: {e}")))?;

    let properties = tagged_file.properties();
    let duration = properties.duration().as_secs_f64();
    let bitrate = properties
        .audio_bitrate()
        .map(|kbps| kbps.saturating_mul(1000))
        .unwrap_or(0);

    let Some(tag) = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())
    else {
        tracing::debug!(target: "metadata", path = %path.display(), "File has no tags");
        return Ok(TagData {
            duration,
            bitrate,
            ..TagData::default()
        });
    };

    let text = |value: Option<std::borrow::Cow<'_, str>>| {
        value.map(|s| s.into_owned()).unwrap_or_default()
    };
    let item = |key: ItemKey| tag.get_string(&key).map(str::to_string).unwrap_or_default();

    Ok(TagData {
        title: text(tag.title()),
        artist: text(tag.artist()),
        album: text(tag.album()),
        albumartist: item(ItemKey::AlbumArtist),
        track: tag.track().unwrap_or(0),
        disc: tag.disk().unwrap_or(0),
        year: tag.year().unwrap_or(0),
        genre: text(tag.genre()),
        composer: item(ItemKey::Composer),
        duration,
        bitrate,
    })
}
