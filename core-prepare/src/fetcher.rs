//! # Stream Fetcher
//!
//! Downloads the source audio for a song and forwards it chunk by chunk.
//!
//! ## Overview
//!
//! Each attempt resolves a fresh, short-lived URL through the backend's
//! [`StreamResolver`], then issues a streaming GET:
//!
//! - `200`: body chunks are forwarded in order until the body ends
//! - `302`: the body is dropped and the `Location` is requested, up to
//!   `max_redirects` hops
//! - anything else: fatal [`PrepareError::Protocol`]
//!
//! A failure that produced no HTTP response triggers the reconnect protocol:
//! wait `reconnect_delay`, re-initialize the session once, re-resolve the URL
//! once, and start over with a fresh redirect budget. The wait and every
//! request race the cancellation token.

use crate::error::{PrepareError, Result};
use bridge_traits::{ByteStream, HttpClient, HttpRequest, SessionBootstrap, StreamResolver};
use bytes::Bytes;
use core_runtime::config::{CoreConfig, FetchConfig};
use core_runtime::logging::{redact_if_sensitive, redact_url};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Summary of a finished download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Bytes forwarded downstream
    pub bytes: u64,
    /// Redirects followed, across all attempts
    pub redirects: u32,
    /// Reconnect cycles performed
    pub reconnects: u32,
}

enum BodyOutcome {
    Finished,
    /// Transport failed before the first byte was forwarded.
    Interrupted(String),
}

/// Downloads song audio from the backend.
pub struct Fetcher {
    http_client: Arc<dyn HttpClient>,
    resolver: Arc<dyn StreamResolver>,
    session: Arc<dyn SessionBootstrap>,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        resolver: Arc<dyn StreamResolver>,
        session: Arc<dyn SessionBootstrap>,
        config: FetchConfig,
    ) -> Self {
        Self {
            http_client,
            resolver,
            session,
            config,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(
            Arc::clone(&config.http_client),
            Arc::clone(&config.stream_resolver),
            Arc::clone(&config.session),
            config.fetch.clone(),
        )
    }

    /// Download the song's source audio into `sink`.
    ///
    /// Returns when the body has been fully forwarded. The sink is dropped on
    /// return, which signals end of input to the next stage.
    ///
    /// # Errors
    ///
    /// - [`PrepareError::Resolution`] if a URL cannot be obtained
    /// - [`PrepareError::Protocol`] for unexpected statuses
    /// - [`PrepareError::TooManyRedirects`] when the hop limit is exceeded
    /// - [`PrepareError::Connection`] for unrecoverable transport failures
    /// - [`PrepareError::Aborted`] on cancellation or when the sink is closed
    #[instrument(skip(self, sink, cancel))]
    pub async fn fetch(
        &self,
        song_id: &str,
        sink: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<FetchReport> {
        let mut report = FetchReport::default();
        let mut url = self.resolve(song_id, &cancel).await?;
        let mut hops = 0u32;

        loop {
            debug!(url = %redact_url(&url), hops, "Requesting stream");

            let response =
                match cancellable(&cancel, self.http_client.open_stream(HttpRequest::get(&url)))
                    .await?
                {
                    Ok(response) => response,
                    Err(e) if e.is_connection_error() => {
                        url = self
                            .reconnect(song_id, &e.to_string(), &mut report, &cancel)
                            .await?;
                        hops = 0;
                        continue;
                    }
                    Err(e) => return Err(PrepareError::Http(e.to_string())),
                };

            match response.status {
                200 => {
                    match self
                        .forward_body(response.body, &sink, &cancel, &mut report)
                        .await?
                    {
                        BodyOutcome::Finished => {
                            info!(
                                bytes = report.bytes,
                                redirects = report.redirects,
                                reconnects = report.reconnects,
                                "Download finished"
                            );
                            return Ok(report);
                        }
                        BodyOutcome::Interrupted(cause) => {
                            url = self.reconnect(song_id, &cause, &mut report, &cancel).await?;
                            hops = 0;
                        }
                    }
                }
                302 => {
                    let location = response
                        .location()
                        .map(str::to_string)
                        .ok_or_else(|| PrepareError::Protocol {
                            status: 302,
                            message: "redirect without Location header".to_string(),
                        })?;

                    if hops >= self.config.max_redirects {
                        return Err(PrepareError::TooManyRedirects { hops });
                    }

                    hops += 1;
                    report.redirects += 1;
                    debug!(hop = hops, location = %redact_url(&location), "Following redirect");
                    url = location;
                }
                status => {
                    warn!(status, "Unexpected response status");
                    return Err(PrepareError::unknown_status(status));
                }
            }
        }
    }

    async fn resolve(&self, song_id: &str, cancel: &CancellationToken) -> Result<String> {
        cancellable(cancel, self.resolver.resolve_stream_url(song_id))
            .await?
            .map_err(|e| PrepareError::Resolution(e.to_string()))
    }

    /// Wait, re-initialize the session, and return a freshly resolved URL.
    async fn reconnect(
        &self,
        song_id: &str,
        cause: &str,
        report: &mut FetchReport,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if let Some(max) = self.config.max_reconnect_attempts {
            if report.reconnects >= max {
                return Err(PrepareError::Connection(format!(
                    "giving up after {} reconnect attempts: {}",
                    max, cause
                )));
            }
        }
        report.reconnects += 1;

        let delay = self.config.reconnect_delay();
        warn!(
            attempt = report.reconnects,
            delay_ms = delay.as_millis() as u64,
            error = %cause,
            "Connection lost while fetching, reconnecting"
        );

        cancellable(cancel, tokio::time::sleep(delay)).await?;

        if let Err(e) = cancellable(cancel, self.session.reinit_session()).await? {
            warn!(
                error = %redact_if_sensitive("error", &e.to_string()),
                "Session re-initialization failed, resolving anyway"
            );
        } else {
            debug!("Session re-initialized");
        }

        self.resolve(song_id, cancel).await
    }

    async fn forward_body(
        &self,
        mut body: ByteStream,
        sink: &mpsc::Sender<Bytes>,
        cancel: &CancellationToken,
        report: &mut FetchReport,
    ) -> Result<BodyOutcome> {
        while let Some(next) = cancellable(cancel, body.next()).await? {
            match next {
                Ok(chunk) if chunk.is_empty() => {}
                Ok(chunk) => {
                    let len = chunk.len() as u64;
                    cancellable(cancel, sink.send(chunk))
                        .await?
                        .map_err(|_| PrepareError::Aborted)?;
                    report.bytes += len;
                }
                // Nothing reached the encoder yet, so starting over is safe
                Err(e) if report.bytes == 0 && e.is_connection_error() => {
                    return Ok(BodyOutcome::Interrupted(e.to_string()));
                }
                Err(e) => {
                    return Err(PrepareError::Connection(format!(
                        "stream interrupted after {} bytes: {}",
                        report.bytes, e
                    )));
                }
            }
        }

        Ok(BodyOutcome::Finished)
    }
}

/// Run `future` unless `cancel` fires first.
async fn cancellable<F: Future>(cancel: &CancellationToken, future: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PrepareError::Aborted),
        output = future => Ok(output),
    }
}
