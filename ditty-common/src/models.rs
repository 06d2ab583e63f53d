//! Song catalog and play-history model types
//!
//! These are read by the station core and owned by the storage service.
//! The core never mutates a [`Song`]; it only appends [`PlayRecord`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Song identifier (the catalog's post id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SongId(pub String);

impl SongId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SongId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Voice channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Listener (channel member) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Song metadata as stored in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    /// Source page for the song (informational only)
    #[serde(default)]
    pub url: Option<String>,
    /// Category label used to bias selection
    #[serde(default)]
    pub flair: Option<String>,
    /// Reviewed and approved for playback
    #[serde(default)]
    pub approved: bool,
    /// Cached audio file, present once downloaded
    #[serde(default)]
    pub audio_path: Option<PathBuf>,
}

impl Song {
    /// Ready to play: approved and downloaded
    pub fn is_ready(&self) -> bool {
        self.approved && self.audio_path.is_some()
    }

    /// Flair with surrounding whitespace removed, or None if blank
    pub fn flair_label(&self) -> Option<&str> {
        self.flair
            .as_deref()
            .map(str::trim)
            .filter(|flair| !flair.is_empty())
    }
}

/// Most recent play of one song on one channel
///
/// Unique per (channel, song); a replay overwrites `last_played`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayRecord {
    pub channel_id: ChannelId,
    pub song_id: SongId,
    pub last_played: DateTime<Utc>,
}
