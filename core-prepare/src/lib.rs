//! # Song Preparation
//!
//! Downloads a song from a streaming backend, encodes it with an external
//! encoder and publishes the result into an on-disk cache.
//!
//! ## Overview
//!
//! - [`PreparationController`] is the entry point; it is built from a
//!   [`CoreConfig`](core_runtime::config::CoreConfig)
//! - [`Preparation`] streams [`PrepareEvent`]s for one song and carries a
//!   [`CancelHandle`]
//! - [`CacheStore`] owns the cache layout and the atomic publish step
//! - [`Fetcher`], [`Transcoder`] and [`StagingWriter`] are the pipeline stages
//!
//! Partial output never becomes visible: encoded bytes go to a staging file
//! that is renamed into place only after the encoder exits successfully, and
//! is deleted on every failure or cancellation.

pub mod cache;
pub mod controller;
pub mod error;
pub mod event;
pub mod fetcher;
pub mod models;
pub mod transcoder;
pub mod writer;

pub use cache::{CacheStore, PublishOutcome};
pub use controller::{CancelHandle, Preparation, PreparationController};
pub use error::{PrepareError, Result};
pub use event::{Completion, PrepareEvent};
pub use fetcher::{FetchReport, Fetcher};
pub use models::{AlbumArt, Song};
pub use transcoder::Transcoder;
pub use writer::StagingWriter;
