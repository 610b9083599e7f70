//! Song model as handed over by a backend's catalog search.

use crate::error::{PrepareError, Result};
use serde::{Deserialize, Serialize};

/// Format tag used when a song does not name one.
pub const DEFAULT_FORMAT: &str = "opus";

/// Suffix that asks the image server for a 60px thumbnail.
const THUMBNAIL_SUFFIX: &str = "=s60-e100-c";

/// Album art references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumArt {
    /// Thumbnail
    pub lq: String,
    /// Full size
    pub hq: String,
}

impl AlbumArt {
    /// Derive both references from the full-size art URL.
    pub fn from_url(url: impl Into<String>) -> Self {
        let hq = url.into();
        Self {
            lq: format!("{}{}", hq, THUMBNAIL_SUFFIX),
            hq,
        }
    }
}

/// A song that can be prepared.
///
/// Immutable once handed to the pipeline; only `song_id` and `format`
/// influence where the artifact lands. The backend directory comes from the
/// controller's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub song_id: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub album_art: Option<AlbumArt>,
    #[serde(default)]
    pub duration_ms: u64,
    /// Search relevance reported by the catalog
    #[serde(default)]
    pub score: Option<f64>,
    pub backend_name: String,
    #[serde(default = "default_format")]
    pub format: String,
}

impl Song {
    pub fn new(song_id: impl Into<String>, backend_name: impl Into<String>) -> Self {
        Self {
            song_id: song_id.into(),
            artist: String::new(),
            title: String::new(),
            album: String::new(),
            album_art: None,
            duration_ms: 0,
            score: None,
            backend_name: backend_name.into(),
            format: default_format(),
        }
    }

    pub fn with_metadata(
        mut self,
        artist: impl Into<String>,
        title: impl Into<String>,
        album: impl Into<String>,
    ) -> Self {
        self.artist = artist.into();
        self.title = title.into();
        self.album = album.into();
        self
    }

    pub fn with_album_art(mut self, url: impl Into<String>) -> Self {
        self.album_art = Some(AlbumArt::from_url(url));
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Cache file name: `{song_id}.{format}`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.song_id, self.format)
    }

    /// Check that the song maps to a single file inside the backend directory.
    ///
    /// # Errors
    ///
    /// [`PrepareError::InvalidSong`] if `song_id` or `format` is empty, is `.`
    /// or `..`, or contains a path separator or NUL.
    pub fn validate(&self) -> Result<()> {
        check_name_component("song id", &self.song_id)?;
        check_name_component("format", &self.format)
    }
}

fn check_name_component(what: &str, value: &str) -> Result<()> {
    let problem = if value.is_empty() {
        "is empty"
    } else if value == "." || value == ".." {
        "is a relative path component"
    } else if value.contains(['/', '\\']) {
        "contains a path separator"
    } else if value.contains('\0') {
        "contains a NUL byte"
    } else {
        return Ok(());
    };

    Err(PrepareError::InvalidSong(format!("{} {:?} {}", what, value, problem)))
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}
