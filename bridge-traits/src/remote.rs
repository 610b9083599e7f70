//! Remote Catalog Collaborators
//!
//! The streaming service behind a backend hands out short-lived download URLs
//! and occasionally needs its session re-established. Both capabilities are
//! provided by the host; the preparation pipeline only calls them.

use async_trait::async_trait;

use crate::error::Result;

/// Produces a direct, time-limited download URL for a song.
///
/// May be called many times for the same song: once per preparation and
/// again after every reconnect. Implementations must not cache the result
/// past its expiry.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve_stream_url(&self, song_id: &str) -> Result<String>;
}

/// Re-authenticates against the remote service after a transport failure.
#[async_trait]
pub trait SessionBootstrap: Send + Sync {
    async fn reinit_session(&self) -> Result<()>;
}
