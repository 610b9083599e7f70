//! Prepare a single URL into a local cache directory.
//!
//! ```bash
//! cargo run -p core-prepare --features desktop-shims --example prepare_url -- \
//!     https://example.com/track.mp3 demo-track /tmp/tunecache
//! ```
//!
//! Requires `ffmpeg` with libopus on `PATH`.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{LogLevel, SessionBootstrap, StreamResolver};
use core_prepare::{PrepareEvent, PreparationController, Song};
use core_runtime::config::CoreConfig;
use core_runtime::logging::{init_logging, LoggingConfig};
use std::env;
use std::sync::Arc;

/// Always hands out the URL given on the command line.
struct FixedUrl(String);

#[async_trait]
impl StreamResolver for FixedUrl {
    async fn resolve_stream_url(&self, _song_id: &str) -> BridgeResult<String> {
        Ok(self.0.clone())
    }
}

/// Public URLs need no login.
struct Anonymous;

#[async_trait]
impl SessionBootstrap for Anonymous {
    async fn reinit_session(&self) -> BridgeResult<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LoggingConfig::default().with_level(LogLevel::Debug))?;

    let mut args = env::args().skip(1);
    let (Some(url), Some(song_id)) = (args.next(), args.next()) else {
        eprintln!("usage: prepare_url <url> <song-id> [cache-dir]");
        return Ok(());
    };
    let cache_dir = args
        .next()
        .unwrap_or_else(|| env::temp_dir().join("tunecache").display().to_string());

    let config = CoreConfig::builder()
        .cache_dir(cache_dir)
        .backend_name("demo")
        .stream_resolver(Arc::new(FixedUrl(url)))
        .session(Arc::new(Anonymous))
        .build()?;

    let controller = PreparationController::new(config);
    controller.initialize().await?;

    let song = Song::new(song_id, "demo");
    let mut preparation = controller.prepare_song(&song).await;

    if let Some(handle) = preparation.cancel_handle() {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.cancel("interrupted");
            }
        });
    }

    let mut encoded = 0usize;
    while let Some(event) = preparation.next_event().await {
        match event {
            PrepareEvent::Chunk(chunk) => encoded += chunk.len(),
            PrepareEvent::Completed => {
                println!(
                    "ready: {} ({} bytes encoded)",
                    controller.store().final_path(&song).display(),
                    encoded
                );
            }
            PrepareEvent::CompletedNoArtifact => println!("finished without output"),
            PrepareEvent::Failed(e) => return Err(e.into()),
        }
    }

    Ok(())
}
