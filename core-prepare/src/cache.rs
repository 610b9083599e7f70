//! # Song Cache Store
//!
//! Path derivation and atomic publish for prepared songs.
//!
//! ## Layout
//!
//! ```text
//! {cache_root}/{backend}/{song_id}.{format}             published artifact
//! {cache_root}/{backend}/incomplete/{song_id}.{format}  staging, in flight only
//! ```
//!
//! There is no index: a published file existing on disk is the only
//! definition of "prepared". Artifacts only ever appear through a rename from
//! the staging directory, which lives on the same volume.

use crate::error::Result;
use crate::models::Song;
use core_runtime::config::CoreConfig;
use core_runtime::logging::strip_path;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Name of the staging subdirectory.
pub const STAGING_DIR_NAME: &str = "incomplete";

/// Result of moving a staging file into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The artifact is now visible at its final path.
    Published,
    /// Nothing was staged (e.g. the encoder produced no output file).
    StagingMissing,
}

/// Filesystem-backed cache for one backend.
#[derive(Debug, Clone)]
pub struct CacheStore {
    backend_dir: PathBuf,
    staging_dir: PathBuf,
}

impl CacheStore {
    pub fn new(cache_root: impl AsRef<Path>, backend_name: &str) -> Self {
        let backend_dir = cache_root.as_ref().join(backend_name);
        let staging_dir = backend_dir.join(STAGING_DIR_NAME);
        Self {
            backend_dir,
            staging_dir,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(&config.cache_dir, &config.backend_name)
    }

    pub fn backend_dir(&self) -> &Path {
        &self.backend_dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn final_path(&self, song: &Song) -> PathBuf {
        self.backend_dir.join(song.file_name())
    }

    pub fn staging_path(&self, song: &Song) -> PathBuf {
        self.staging_dir.join(song.file_name())
    }

    /// Create the backend and staging directories. Safe to call repeatedly.
    #[instrument(skip(self), fields(dir = %self.backend_dir.display()))]
    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        info!("Song cache initialized");
        Ok(())
    }

    /// Whether a published artifact exists for the song.
    ///
    /// Always `false` for a song that fails [`Song::validate`].
    pub async fn is_prepared(&self, song: &Song) -> bool {
        if song.validate().is_err() {
            return false;
        }

        match tokio::fs::metadata(self.final_path(song)).await {
            Ok(metadata) => metadata.is_file(),
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(song_id = %song.song_id, error = %e, "Failed to stat cache entry");
                }
                false
            }
        }
    }

    /// Atomically move the staging file to its final path.
    #[instrument(skip(self, song), fields(song_id = %song.song_id))]
    pub async fn publish(&self, song: &Song) -> Result<PublishOutcome> {
        song.validate()?;
        let staging = self.staging_path(song);
        let target = self.final_path(song);

        match tokio::fs::rename(&staging, &target).await {
            Ok(()) => {
                debug!(
                    file = %strip_path(&target.to_string_lossy()),
                    "Published cache entry"
                );
                Ok(PublishOutcome::Published)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // NotFound also covers a missing target directory
                if tokio::fs::try_exists(&staging).await? {
                    return Err(e.into());
                }
                warn!("Nothing staged to publish");
                Ok(PublishOutcome::StagingMissing)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a published artifact. Returns whether a file was removed.
    pub async fn evict(&self, song: &Song) -> Result<bool> {
        song.validate()?;
        match tokio::fs::remove_file(self.final_path(song)).await {
            Ok(()) => {
                debug!(song_id = %song.song_id, "Evicted cache entry");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the staging file if present. Returns whether a file was removed.
    pub async fn discard_staging(&self, song: &Song) -> Result<bool> {
        song.validate()?;
        match tokio::fs::remove_file(self.staging_path(song)).await {
            Ok(()) => {
                debug!(song_id = %song.song_id, "Discarded staging file");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
