//! # Transcoder
//!
//! Pipes source audio through an external encoder process.
//!
//! The encoder is a black box: bytes go in on stdin, encoded bytes come out
//! on stdout, diagnostics go to stderr. It never sees a file path. A nonzero
//! exit status fails the preparation with the tail of stderr attached.

use crate::error::{PrepareError, Result};
use bytes::Bytes;
use core_runtime::config::{CoreConfig, TranscodeConfig};
use futures::StreamExt;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 5;

/// Runs the configured encoder for one song.
pub struct Transcoder {
    config: TranscodeConfig,
}

impl Transcoder {
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.transcode.clone())
    }

    /// Encode everything received on `input`, forwarding output to `output`.
    ///
    /// Returns the number of encoded bytes forwarded. Output is forwarded as
    /// soon as the encoder produces it; it does not wait for input to end.
    ///
    /// # Errors
    ///
    /// - [`PrepareError::Encoding`] if the process cannot be spawned or exits
    ///   unsuccessfully
    /// - [`PrepareError::Aborted`] on cancellation or when `output` is closed;
    ///   the process is killed and reaped before returning
    #[instrument(skip(self, input, output, cancel), fields(program = %self.config.program))]
    pub async fn transcode(
        &self,
        song_id: &str,
        input: mpsc::Receiver<Bytes>,
        output: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<u64> {
        let mut child = self.spawn()?;
        debug!("Encoder started");

        let (stdin, stdout, stderr) = match (
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
        ) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                terminate(&mut child).await;
                return Err(PrepareError::Encoding(
                    "encoder stdio was not captured".to_string(),
                ));
            }
        };

        let streams = async {
            let reading = async {
                tokio::try_join!(
                    drain(stdout, &output, self.config.read_chunk_bytes),
                    read_all(stderr),
                )
            };
            tokio::pin!(reading);

            tokio::select! {
                // Output closed first: the encoder is done with its input
                read = &mut reading => read,
                _ = feed(stdin, input) => reading.await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PrepareError::Aborted),
            outcome = streams => outcome,
        };

        let (encoded, stderr) = match outcome {
            Ok(done) => done,
            Err(e) => {
                // An encoder that died on its own is what tore the pipeline down
                if let Ok(Some(status)) = child.try_wait() {
                    if !status.success() {
                        warn!(%status, "Encoder exited early");
                        return Err(self.exit_error(status, "no diagnostics"));
                    }
                }
                terminate(&mut child).await;
                debug!(error = %e, "Encoder stopped");
                return Err(e);
            }
        };

        // Output is closed, so exit is imminent
        let status = tokio::select! {
            biased;
            status = child.wait() => status.map_err(|e| {
                PrepareError::Encoding(format!("failed to wait for encoder: {}", e))
            })?,
            _ = cancel.cancelled() => {
                terminate(&mut child).await;
                return Err(PrepareError::Aborted);
            }
        };

        if !status.success() {
            let tail = stderr_tail(&stderr);
            warn!(%status, stderr = %tail, "Encoder failed");
            return Err(self.exit_error(status, &tail));
        }

        debug!(encoded, "Encoder finished");
        Ok(encoded)
    }

    fn exit_error(&self, status: ExitStatus, diagnostics: &str) -> PrepareError {
        PrepareError::Encoding(format!(
            "{} exited with {}: {}",
            self.config.program, status, diagnostics
        ))
    }

    fn spawn(&self) -> Result<Child> {
        Command::new(&self.config.program)
            .args(self.config.command_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PrepareError::Encoding(format!(
                    "failed to start {}: {}",
                    self.config.program, e
                ))
            })
    }
}

/// Copy input chunks into the encoder, closing stdin at end of input.
async fn feed(mut stdin: ChildStdin, mut input: mpsc::Receiver<Bytes>) {
    while let Some(chunk) = input.recv().await {
        if let Err(e) = stdin.write_all(&chunk).await {
            // Encoder closed its input; its exit status decides the outcome
            debug!(error = %e, "Encoder stopped accepting input");
            return;
        }
    }

    if let Err(e) = stdin.shutdown().await {
        debug!(error = %e, "Failed to close encoder input");
    }
}

async fn drain(stdout: ChildStdout, output: &mpsc::Sender<Bytes>, chunk_size: usize) -> Result<u64> {
    let mut chunks = ReaderStream::with_capacity(stdout, chunk_size);
    let mut total = 0u64;

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk
            .map_err(|e| PrepareError::Encoding(format!("failed to read encoder output: {}", e)))?;
        total += chunk.len() as u64;
        output.send(chunk).await.map_err(|_| PrepareError::Aborted)?;
    }

    Ok(total)
}

async fn read_all(mut reader: impl AsyncRead + Unpin) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .await
        .map_err(|e| PrepareError::Encoding(format!("failed to read encoder stderr: {}", e)))?;
    Ok(buf)
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Encoder already exited");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "Failed to reap encoder");
    }
}

fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        return "no diagnostics".to_string();
    }

    lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join(" | ")
}
