//! Tunecache workspace facade.
//!
//! Enabling `desktop-shims` (the default) pulls in the preparation pipeline
//! together with the reqwest-backed HTTP client, so a desktop host only needs
//! to supply its catalog's `StreamResolver` and `SessionBootstrap`:
//!
//! ```rust,ignore
//! use tunecache_workspace::prepare::{PreparationController, Song};
//! use tunecache_workspace::runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .cache_dir(cache_root)
//!     .backend_name("gmusic")
//!     .stream_resolver(resolver)
//!     .session(session)
//!     .build()?;
//!
//! let controller = PreparationController::new(config);
//! controller.initialize().await?;
//! controller.prepare_song(&song).await.wait().await?;
//! ```

#[cfg(feature = "desktop-shims")]
pub use core_prepare as prepare;
#[cfg(feature = "desktop-shims")]
pub use core_runtime as runtime;
