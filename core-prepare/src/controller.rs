//! # Preparation Controller
//!
//! Entry point of the crate: turns "make this song available locally" into a
//! running pipeline and hands back a [`Preparation`] to observe or cancel it.
//!
//! ## Pipeline
//!
//! ```text
//! Fetcher --(source chunks)--> Transcoder --(encoded chunks)--> StagingWriter
//!                                                                    |
//!                                              CacheStore::publish <-+
//! ```
//!
//! The three stages run concurrently in one task, joined by bounded channels.
//! They share a cancellation token derived from the caller's
//! [`CancelHandle`]; the first stage to fail cancels it so its siblings stop
//! instead of draining.

use crate::cache::{CacheStore, PublishOutcome};
use crate::error::{PrepareError, Result};
use crate::event::{Completion, PrepareEvent};
use crate::fetcher::{FetchReport, Fetcher};
use crate::models::Song;
use crate::transcoder::Transcoder;
use crate::writer::StagingWriter;
use core_runtime::config::CoreConfig;
use core_runtime::logging::redact_if_sensitive;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

/// Reason used when the token is cancelled without one being recorded.
const DEFAULT_CANCEL_REASON: &str = "cancelled";

/// Aborts an in-flight preparation.
///
/// Cloneable; every clone controls the same preparation.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Cancel the preparation.
    ///
    /// The first reason given is the one reported. Calling this again, or
    /// after the preparation finished, has no effect.
    pub fn cancel(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn to_error(&self, song_id: &str) -> PrepareError {
        PrepareError::Cancelled {
            song_id: song_id.to_string(),
            reason: self
                .reason
                .get()
                .cloned()
                .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string()),
        }
    }
}

/// Observer for one `prepare_song` call.
///
/// Dropping it does not stop the preparation; use the [`CancelHandle`].
#[derive(Debug)]
pub struct Preparation {
    song_id: String,
    events: mpsc::UnboundedReceiver<PrepareEvent>,
    cancel: Option<CancelHandle>,
    cached: bool,
    finished: bool,
}

impl Preparation {
    fn settled(song: &Song, terminal: PrepareEvent, cached: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(terminal);
        Self {
            song_id: song.song_id.clone(),
            events: rx,
            cancel: None,
            cached,
            finished: false,
        }
    }

    fn cached(song: &Song) -> Self {
        Self::settled(song, PrepareEvent::Completed, true)
    }

    fn rejected(song: &Song, error: PrepareError) -> Self {
        Self::settled(song, PrepareEvent::Failed(error), false)
    }

    fn in_flight(
        song: &Song,
        events: mpsc::UnboundedReceiver<PrepareEvent>,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            song_id: song.song_id.clone(),
            events,
            cancel: Some(cancel),
            cached: false,
            finished: false,
        }
    }

    pub fn song_id(&self) -> &str {
        &self.song_id
    }

    /// `true` when the song was already cached and no work was started.
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Handle for aborting the preparation; `None` when no work was started.
    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        self.cancel.clone()
    }

    /// Next event, or `None` once the terminal event has been returned.
    pub async fn next_event(&mut self) -> Option<PrepareEvent> {
        if self.finished {
            return None;
        }

        let event = self.events.recv().await;
        match &event {
            Some(event) if event.is_terminal() => self.finished = true,
            Some(_) => {}
            None => self.finished = true,
        }
        event
    }

    /// Drain all events and return the outcome.
    pub async fn wait(mut self) -> Result<Completion> {
        let cached = self.is_cached();
        let mut bytes = 0u64;

        while let Some(event) = self.next_event().await {
            match event {
                PrepareEvent::Chunk(chunk) => bytes += chunk.len() as u64,
                PrepareEvent::Completed if cached => return Ok(Completion::AlreadyCached),
                PrepareEvent::Completed => return Ok(Completion::Prepared { bytes }),
                PrepareEvent::CompletedNoArtifact => return Ok(Completion::NoArtifact { bytes }),
                PrepareEvent::Failed(e) => return Err(e),
            }
        }

        // The pipeline task ended without a terminal event
        Err(PrepareError::Aborted)
    }
}

/// Prepares songs of one backend into its cache.
pub struct PreparationController {
    store: CacheStore,
    fetcher: Arc<Fetcher>,
    transcoder: Arc<Transcoder>,
    channel_capacity: usize,
}

impl PreparationController {
    /// Create a controller from a validated configuration.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use core_prepare::{PreparationController, Song};
    ///
    /// let controller = PreparationController::new(config);
    /// controller.initialize().await?;
    ///
    /// let preparation = controller.prepare_song(&Song::new("Tqx7b", "gmusic")).await;
    /// let outcome = preparation.wait().await?;
    /// ```
    pub fn new(config: CoreConfig) -> Self {
        Self {
            store: CacheStore::from_config(&config),
            fetcher: Arc::new(Fetcher::from_config(&config)),
            transcoder: Arc::new(Transcoder::from_config(&config)),
            channel_capacity: config.fetch.channel_capacity.max(1),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Create the cache directories.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        self.store.initialize().await
    }

    pub async fn is_prepared(&self, song: &Song) -> bool {
        self.store.is_prepared(song).await
    }

    /// Make `song` available in the cache.
    ///
    /// Returns immediately; the work runs on a spawned task. A song that is
    /// already cached yields a `Preparation` with a single `Completed` event
    /// and no cancel handle. A song that fails [`Song::validate`] yields a
    /// single `Failed(InvalidSong)` event, also without touching the disk.
    #[instrument(skip(self, song), fields(song_id = %song.song_id))]
    pub async fn prepare_song(&self, song: &Song) -> Preparation {
        if let Err(e) = song.validate() {
            warn!(error = %e, "Rejected song");
            return Preparation::rejected(song, e);
        }

        if self.store.is_prepared(song).await {
            debug!("Song already cached");
            return Preparation::cached(song);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = CancelHandle::new();
        let session_id = Uuid::new_v4();

        let job = PipelineJob {
            song: song.clone(),
            store: self.store.clone(),
            fetcher: Arc::clone(&self.fetcher),
            transcoder: Arc::clone(&self.transcoder),
            channel_capacity: self.channel_capacity,
            events: events_tx,
            handle: handle.clone(),
        };

        info!(%session_id, "Preparing song");
        let span = info_span!("prepare", song_id = %song.song_id, %session_id);
        tokio::spawn(job.run().instrument(span));

        Preparation::in_flight(song, events_rx, handle)
    }
}

struct PipelineJob {
    song: Song,
    store: CacheStore,
    fetcher: Arc<Fetcher>,
    transcoder: Arc<Transcoder>,
    channel_capacity: usize,
    events: mpsc::UnboundedSender<PrepareEvent>,
    handle: CancelHandle,
}

impl PipelineJob {
    async fn run(self) {
        let terminal = match self.execute().await {
            Ok(PublishOutcome::Published) => PrepareEvent::Completed,
            Ok(PublishOutcome::StagingMissing) => PrepareEvent::CompletedNoArtifact,
            Err(e) => {
                if let Err(cleanup) = self.store.discard_staging(&self.song).await {
                    warn!(error = %cleanup, "Failed to remove staging file");
                }

                if e.is_cancellation() {
                    info!(reason = %e, "Preparation cancelled");
                } else {
                    warn!(
                        error = %redact_if_sensitive("error", &e.to_string()),
                        "Preparation failed"
                    );
                }
                PrepareEvent::Failed(e)
            }
        };

        let _ = self.events.send(terminal);
    }

    async fn execute(&self) -> Result<PublishOutcome> {
        let song_id = self.song.song_id.as_str();
        let pipeline = self.handle.token.child_token();

        let writer = StagingWriter::create(self.store.staging_path(&self.song)).await?;
        let (source_tx, source_rx) = mpsc::channel(self.channel_capacity);
        let (encoded_tx, encoded_rx) = mpsc::channel(self.channel_capacity);

        let (fetched, encoded, written) = tokio::join!(
            stage(
                &pipeline,
                self.fetcher.fetch(song_id, source_tx, pipeline.clone())
            ),
            stage(
                &pipeline,
                self.transcoder
                    .transcode(song_id, source_rx, encoded_tx, pipeline.clone())
            ),
            stage(
                &pipeline,
                writer.write_all(encoded_rx, &self.events, pipeline.clone())
            ),
        );

        if self.handle.is_cancelled() {
            return Err(self.handle.to_error(song_id));
        }

        let (report, _, written) = settle(fetched, encoded, written)?;

        let outcome = self.store.publish(&self.song).await?;
        confirm_publish(&self.store, &self.song, &self.handle, outcome).await?;
        log_success(&report, written, outcome);
        Ok(outcome)
    }
}

/// Take back an artifact whose publish raced with a cancel.
///
/// A cancel that lands after this check is treated as arriving after
/// completion.
async fn confirm_publish(
    store: &CacheStore,
    song: &Song,
    handle: &CancelHandle,
    outcome: PublishOutcome,
) -> Result<()> {
    if !handle.is_cancelled() {
        return Ok(());
    }

    if outcome == PublishOutcome::Published {
        if let Err(e) = store.evict(song).await {
            warn!(error = %e, "Failed to evict artifact published during cancel");
        }
    }
    Err(handle.to_error(&song.song_id))
}

/// Cancel the shared token when `work` fails so sibling stages stop.
async fn stage<T>(
    pipeline: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    let result = work.await;
    if result.is_err() {
        pipeline.cancel();
    }
    result
}

/// Combine stage results, reporting the root cause rather than the
/// `Aborted` errors of the stages it took down.
fn settle<A, B, C>(a: Result<A>, b: Result<B>, c: Result<C>) -> Result<(A, B, C)> {
    match (a, b, c) {
        (Ok(a), Ok(b), Ok(c)) => Ok((a, b, c)),
        (a, b, c) => Err([a.err(), b.err(), c.err()]
            .into_iter()
            .flatten()
            .find(|e| !matches!(e, PrepareError::Aborted))
            .unwrap_or(PrepareError::Aborted)),
    }
}

fn log_success(report: &FetchReport, written: u64, outcome: PublishOutcome) {
    match outcome {
        PublishOutcome::Published => info!(
            source_bytes = report.bytes,
            encoded_bytes = written,
            redirects = report.redirects,
            reconnects = report.reconnects,
            "Song prepared"
        ),
        PublishOutcome::StagingMissing => {
            warn!(source_bytes = report.bytes, "Pipeline finished without an artifact")
        }
    }
}
