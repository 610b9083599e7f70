//! Staging file writer.
//!
//! Each encoded chunk is written to disk before it is reported as progress,
//! so a `Chunk` event always describes bytes that are already in the staging
//! file.

use crate::error::{PrepareError, Result};
use crate::event::PrepareEvent;
use bytes::Bytes;
use core_runtime::logging::strip_path;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct StagingWriter {
    path: PathBuf,
    file: File,
}

impl StagingWriter {
    /// Create (or truncate) the staging file, creating its directory if needed.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // File::create truncates leftovers from an interrupted run
        let file = File::create(&path).await?;
        debug!(file = %strip_path(&path.to_string_lossy()), "Opened staging file");

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every chunk from `input`, reporting each one on `events`.
    ///
    /// Returns the number of bytes written once `input` closes. The file is
    /// flushed and closed before returning, on success and on failure.
    pub async fn write_all(
        mut self,
        mut input: mpsc::Receiver<Bytes>,
        events: &mpsc::UnboundedSender<PrepareEvent>,
        cancel: CancellationToken,
    ) -> Result<u64> {
        let mut written = 0u64;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PrepareError::Aborted),
                chunk = input.recv() => chunk,
            };

            let Some(chunk) = chunk else {
                break;
            };

            self.file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            // A caller that stopped listening does not stop the preparation
            let _ = events.send(PrepareEvent::Chunk(chunk));
        }

        self.file.flush().await?;
        self.file.sync_all().await?;
        debug!(written, "Staging file complete");

        Ok(written)
    }
}
