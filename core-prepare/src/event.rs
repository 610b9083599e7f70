//! Progress and outcome types delivered to the caller of
//! [`prepare_song`](crate::PreparationController::prepare_song).

use crate::error::PrepareError;
use bytes::Bytes;

/// One notification from an in-flight preparation.
///
/// Zero or more `Chunk` events are followed by exactly one terminal event.
#[derive(Debug)]
pub enum PrepareEvent {
    /// Encoded bytes that have been written to the staging file.
    Chunk(Bytes),
    /// The song is available in the cache.
    Completed,
    /// The pipeline finished but nothing was staged, so nothing was published.
    CompletedNoArtifact,
    /// The preparation failed or was cancelled. Partial output has been removed.
    Failed(PrepareError),
}

impl PrepareEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PrepareEvent::Chunk(_))
    }
}

/// Successful outcome of [`Preparation::wait`](crate::Preparation::wait).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The song was in the cache before the call.
    AlreadyCached,
    /// The song was downloaded, encoded and published.
    Prepared { bytes: u64 },
    /// The pipeline finished without an artifact to publish.
    NoArtifact { bytes: u64 },
}

impl Completion {
    /// Whether the song can now be played from the cache.
    pub fn has_artifact(&self) -> bool {
        !matches!(self, Completion::NoArtifact { .. })
    }
}
