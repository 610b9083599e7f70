//! # Preparation Error Types
//!
//! Errors surfaced through [`PrepareEvent::Failed`](crate::PrepareEvent::Failed)
//! and [`Preparation::wait`](crate::Preparation::wait).

use thiserror::Error;

/// Errors that can occur while preparing a song.
#[derive(Error, Debug)]
pub enum PrepareError {
    // ========================================================================
    // Request Errors
    // ========================================================================
    /// The song cannot be mapped to a cache file (e.g. its id contains a path
    /// separator).
    #[error("Invalid song: {0}")]
    InvalidSong(String),

    // ========================================================================
    // Remote Errors
    // ========================================================================
    /// The backend could not produce a download URL for the song.
    #[error("Failed to resolve stream location: {0}")]
    Resolution(String),

    /// Transport failure that reconnecting could not recover from.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The server answered with a status the pipeline does not handle, or a
    /// redirect without a `Location` header.
    #[error("{message}")]
    Protocol { status: u16, message: String },

    /// Redirect chain exceeded the configured hop limit.
    #[error("Too many redirects ({hops} hops)")]
    TooManyRedirects { hops: u32 },

    /// Non-transport failure reported by the HTTP bridge (e.g. malformed URL).
    #[error("HTTP error: {0}")]
    Http(String),

    // ========================================================================
    // Encoder Errors
    // ========================================================================
    /// The encoder could not be spawned or exited unsuccessfully.
    #[error("Encoder failed: {0}")]
    Encoding(String),

    // ========================================================================
    // Lifecycle
    // ========================================================================
    /// The caller cancelled the preparation.
    #[error("canceled preparing: {song_id}: {reason}")]
    Cancelled { song_id: String, reason: String },

    /// A pipeline stage stopped because the pipeline was torn down.
    #[error("Preparation aborted")]
    Aborted,

    /// Staging write or publish failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PrepareError {
    /// Returns `true` if the preparation ended because it was cancelled.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PrepareError::Cancelled { .. } | PrepareError::Aborted)
    }

    /// Returns `true` if retrying the whole preparation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PrepareError::Connection(_) | PrepareError::Resolution(_)
        )
    }

    pub(crate) fn unknown_status(status: u16) -> Self {
        PrepareError::Protocol {
            status,
            message: format!("unknown status code {}", status),
        }
    }
}

/// Result type for preparation operations.
pub type Result<T> = std::result::Result<T, PrepareError>;
