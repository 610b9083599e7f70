//! # Core Configuration Module
//!
//! Provides the context object handed to the preparation pipeline.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds every collaborator and setting the pipeline needs. It
//! enforces fail-fast validation so a missing capability surfaces at startup
//! rather than halfway through a download.
//!
//! ## Required Dependencies
//!
//! - `StreamResolver` - Produces short-lived download URLs
//! - `SessionBootstrap` - Re-authenticates after connection loss
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `HttpClient` - Streaming GETs (desktop default: reqwest)
//!
//! When the `desktop-shims` feature is enabled, the reqwest-backed client is
//! injected automatically if none is provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, PrepareSettings};
//! use std::sync::Arc;
//!
//! let settings = PrepareSettings::load("/etc/tunecache/gmusic.json")?;
//! let config = CoreConfig::builder()
//!     .cache_dir("/var/cache/tunecache")
//!     .settings(settings)
//!     .stream_resolver(Arc::new(MyResolver))
//!     .session(Arc::new(MySession))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{HttpClient, SessionBootstrap, StreamResolver};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Backend name used when none is configured.
pub const DEFAULT_BACKEND_NAME: &str = "remote";

// ============================================================================
// Fetch settings
// ============================================================================

/// Settings for the download stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Wait before re-initializing the session after a connection failure.
    ///
    /// Default: 5000 ms.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum number of 302 hops followed for one resolved URL.
    ///
    /// Default: 10.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,

    /// Ceiling on reconnect cycles per preparation. `None` retries forever.
    ///
    /// Default: `None`.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,

    /// Connection-establishment timeout for the default HTTP client.
    ///
    /// Default: 10 seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Capacity, in chunks, of each channel between pipeline stages.
    ///
    /// Default: 16.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_redirects: default_max_redirects(),
            max_reconnect_attempts: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl FetchConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_redirects(mut self, hops: u32) -> Self {
        self.max_redirects = hops;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::Config(
                "channel_capacity must be at least 1".to_string(),
            ));
        }

        if self.connect_timeout_secs == 0 {
            return Err(Error::Config(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_max_redirects() -> u32 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_channel_capacity() -> usize {
    16
}

// ============================================================================
// Transcode settings
// ============================================================================

/// Settings for the external encoder process.
///
/// The default command line turns whatever audio arrives on stdin into
/// 192 kbit/s Opus on stdout, dropping any video stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Encoder executable, looked up on `PATH` when not absolute.
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_codec")]
    pub codec: String,

    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,

    /// Output container passed to the encoder as `-f`. The cache file
    /// extension comes from the song's `format`, not from this setting.
    #[serde(default = "default_container")]
    pub container: String,

    /// Size of each read from the encoder's stdout.
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,

    /// Replaces the generated argument list entirely when set.
    #[serde(default)]
    pub custom_args: Option<Vec<String>>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            codec: default_codec(),
            bitrate_kbps: default_bitrate_kbps(),
            container: default_container(),
            read_chunk_bytes: default_read_chunk_bytes(),
            custom_args: None,
        }
    }
}

impl TranscodeConfig {
    /// Run an arbitrary command instead of the generated ffmpeg invocation.
    pub fn with_command(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.program = program.into();
        self.custom_args = Some(args);
        self
    }

    pub fn with_bitrate_kbps(mut self, bitrate_kbps: u32) -> Self {
        self.bitrate_kbps = bitrate_kbps;
        self
    }

    /// Arguments passed to [`program`](Self::program).
    pub fn command_args(&self) -> Vec<String> {
        if let Some(args) = &self.custom_args {
            return args.clone();
        }

        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            "-vn".to_string(),
            "-c:a".to_string(),
            self.codec.clone(),
            "-b:a".to_string(),
            format!("{}k", self.bitrate_kbps),
            "-f".to_string(),
            self.container.clone(),
            "pipe:1".to_string(),
        ]
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(Error::Config("encoder program cannot be empty".to_string()));
        }

        if self.custom_args.is_none() && self.bitrate_kbps == 0 {
            return Err(Error::Config(
                "bitrate_kbps must be greater than 0".to_string(),
            ));
        }

        if self.container.is_empty() {
            return Err(Error::Config("container cannot be empty".to_string()));
        }

        if self.read_chunk_bytes == 0 {
            return Err(Error::Config(
                "read_chunk_bytes must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn default_program() -> String {
    "ffmpeg".to_string()
}

fn default_codec() -> String {
    "libopus".to_string()
}

fn default_bitrate_kbps() -> u32 {
    192
}

fn default_container() -> String {
    "opus".to_string()
}

fn default_read_chunk_bytes() -> usize {
    16 * 1024
}

// ============================================================================
// Settings file
// ============================================================================

/// Per-backend settings that can be kept in a JSON file next to the player
/// configuration. Every field is optional in the file.
///
/// ```json
/// {
///   "backend_name": "gmusic",
///   "fetch": { "reconnect_delay_ms": 5000 },
///   "transcode": { "bitrate_kbps": 160 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareSettings {
    #[serde(default = "default_backend_name")]
    pub backend_name: String,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub transcode: TranscodeConfig,
}

impl Default for PrepareSettings {
    fn default() -> Self {
        Self {
            backend_name: default_backend_name(),
            fetch: FetchConfig::default(),
            transcode: TranscodeConfig::default(),
        }
    }
}

impl PrepareSettings {
    /// Parse settings from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Settings {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    /// Read and parse a JSON settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| Error::Settings {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        serde_json::from_str(&contents).map_err(|e| Error::Settings {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

fn default_backend_name() -> String {
    DEFAULT_BACKEND_NAME.to_string()
}

// ============================================================================
// CoreConfig
// ============================================================================

/// Context object for the preparation pipeline.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Root of the song cache; each backend gets a subdirectory
    pub cache_dir: PathBuf,

    /// Name of the backend, used as the cache subdirectory
    pub backend_name: String,

    /// HTTP client for streaming downloads
    pub http_client: Arc<dyn HttpClient>,

    /// Source of time-limited download URLs (required)
    pub stream_resolver: Arc<dyn StreamResolver>,

    /// Session re-initialization after connection loss (required)
    pub session: Arc<dyn SessionBootstrap>,

    pub fetch: FetchConfig,

    pub transcode: TranscodeConfig,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("cache_dir", &self.cache_dir)
            .field("backend_name", &self.backend_name)
            .field("http_client", &"HttpClient { ... }")
            .field("stream_resolver", &"StreamResolver { ... }")
            .field("session", &"SessionBootstrap { ... }")
            .field("fetch", &self.fetch)
            .field("transcode", &self.transcode)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Directory holding this backend's finished artifacts.
    pub fn backend_dir(&self) -> PathBuf {
        self.cache_dir.join(&self.backend_name)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Cache directory is not empty
    /// - Backend name is a single, non-empty path component
    /// - Fetch and transcode settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.backend_name.is_empty()
            || self.backend_name.contains(['/', '\\'])
            || self.backend_name == "."
            || self.backend_name == ".."
        {
            return Err(Error::Config(format!(
                "Backend name must be a single path component, got {:?}",
                self.backend_name
            )));
        }

        self.fetch.validate()?;
        self.transcode.validate()?;

        Ok(())
    }
}

fn stream_resolver_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "StreamResolver".to_string(),
        message: "StreamResolver implementation is required to obtain download URLs. \
                 Inject the backend's catalog client via .stream_resolver()."
            .to_string(),
    }
}

fn session_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SessionBootstrap".to_string(),
        message: "SessionBootstrap implementation is required to recover from connection loss. \
                 Inject the backend's login routine via .session()."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(fetch: &FetchConfig) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::with_connect_timeout(fetch.connect_timeout())
        .map_err(|e| Error::Config(format!("Failed to create default HttpClient: {}", e)))?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_fetch: &FetchConfig) -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client implementation provided. \
                 Desktop: ensure the 'desktop-shims' feature is enabled. \
                 Other hosts: inject a platform adapter via .http_client()."
            .to_string(),
    })
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    cache_dir: Option<PathBuf>,
    backend_name: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    stream_resolver: Option<Arc<dyn StreamResolver>>,
    session: Option<Arc<dyn SessionBootstrap>>,
    fetch: Option<FetchConfig>,
    transcode: Option<TranscodeConfig>,
}

impl CoreConfigBuilder {
    /// Sets the cache root directory.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .cache_dir("/path/to/cache");
    /// ```
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Sets the backend name (cache subdirectory).
    ///
    /// Default: [`DEFAULT_BACKEND_NAME`]
    pub fn backend_name(mut self, name: impl Into<String>) -> Self {
        self.backend_name = Some(name.into());
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the stream resolver implementation (required).
    pub fn stream_resolver(mut self, resolver: Arc<dyn StreamResolver>) -> Self {
        self.stream_resolver = Some(resolver);
        self
    }

    /// Sets the session bootstrap implementation (required).
    pub fn session(mut self, session: Arc<dyn SessionBootstrap>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn transcode(mut self, transcode: TranscodeConfig) -> Self {
        self.transcode = Some(transcode);
        self
    }

    /// Applies a loaded settings file. Explicit setters called afterwards win.
    pub fn settings(mut self, settings: PrepareSettings) -> Self {
        self.backend_name = Some(settings.backend_name);
        self.fetch = Some(settings.fetch);
        self.transcode = Some(settings.transcode);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(CoreConfig)` on success, or an error if:
    /// - The cache directory is missing
    /// - Required collaborators are missing (StreamResolver, SessionBootstrap)
    /// - No HTTP client was given and no platform default is available
    /// - Configuration values are invalid
    pub fn build(self) -> Result<CoreConfig> {
        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;
        let stream_resolver = self
            .stream_resolver
            .ok_or_else(stream_resolver_missing_error)?;
        let session = self.session.ok_or_else(session_missing_error)?;
        let fetch = self.fetch.unwrap_or_default();
        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(&fetch)?,
        };

        let config = CoreConfig {
            cache_dir,
            backend_name: self.backend_name.unwrap_or_else(default_backend_name),
            http_client,
            stream_resolver,
            session,
            fetch,
            transcode: self.transcode.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{HttpRequest, HttpStreamResponse};

    struct StubHttpClient;

    #[async_trait]
    impl HttpClient for StubHttpClient {
        async fn open_stream(&self, _request: HttpRequest) -> BridgeResult<HttpStreamResponse> {
            unimplemented!("not used by config tests")
        }
    }

    struct StubResolver;

    #[async_trait]
    impl StreamResolver for StubResolver {
        async fn resolve_stream_url(&self, song_id: &str) -> BridgeResult<String> {
            Ok(format!("https://stream.example.com/{}", song_id))
        }
    }

    struct StubSession;

    #[async_trait]
    impl SessionBootstrap for StubSession {
        async fn reinit_session(&self) -> BridgeResult<()> {
            Ok(())
        }
    }

    fn complete_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .cache_dir("/cache")
            .http_client(Arc::new(StubHttpClient))
            .stream_resolver(Arc::new(StubResolver))
            .session(Arc::new(StubSession))
    }

    #[test]
    fn test_default_fetch_config() {
        let config = FetchConfig::default();
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.max_redirects, 10);
        assert_eq!(config.max_reconnect_attempts, None);
        assert_eq!(config.channel_capacity, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fetch_config_validation() {
        assert!(FetchConfig::default()
            .with_channel_capacity(0)
            .validate()
            .is_err());

        let mut no_timeout = FetchConfig::default();
        no_timeout.connect_timeout_secs = 0;
        assert!(no_timeout.validate().is_err());
    }

    #[test]
    fn test_default_ffmpeg_arguments() {
        let args = TranscodeConfig::default().command_args();

        assert_eq!(
            args,
            vec![
                "-hide_banner", "-loglevel", "error", "-i", "pipe:0", "-vn", "-c:a", "libopus",
                "-b:a", "192k", "-f", "opus", "pipe:1",
            ]
        );
    }

    #[test]
    fn test_custom_command_replaces_arguments() {
        let config = TranscodeConfig::default().with_command("cat", vec![]);
        assert_eq!(config.program, "cat");
        assert!(config.command_args().is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_transcode_config_validation() {
        assert!(TranscodeConfig::default()
            .with_bitrate_kbps(0)
            .validate()
            .is_err());

        let mut no_program = TranscodeConfig::default();
        no_program.program = "  ".to_string();
        assert!(no_program.validate().is_err());
    }

    #[test]
    fn test_settings_from_partial_json() {
        let settings = PrepareSettings::from_json_str(
            r#"{ "backend_name": "gmusic", "transcode": { "bitrate_kbps": 160 } }"#,
        )
        .unwrap();

        assert_eq!(settings.backend_name, "gmusic");
        assert_eq!(settings.transcode.bitrate_kbps, 160);
        assert_eq!(settings.transcode.codec, "libopus");
        assert_eq!(settings.fetch, FetchConfig::default());
    }

    #[test]
    fn test_settings_from_empty_json() {
        let settings = PrepareSettings::from_json_str("{}").unwrap();
        assert_eq!(settings, PrepareSettings::default());
    }

    #[test]
    fn test_settings_rejects_malformed_json() {
        let err = PrepareSettings::from_json_str("{ backend_name").unwrap_err();
        assert!(matches!(err, Error::Settings { .. }));
    }

    #[test]
    fn test_settings_load_missing_file() {
        let err = PrepareSettings::load("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }

    #[test]
    fn test_builder_requires_cache_dir() {
        let result = CoreConfig::builder()
            .http_client(Arc::new(StubHttpClient))
            .stream_resolver(Arc::new(StubResolver))
            .session(Arc::new(StubSession))
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Cache directory is required"));
    }

    #[test]
    fn test_builder_requires_stream_resolver() {
        let result = CoreConfig::builder()
            .cache_dir("/cache")
            .http_client(Arc::new(StubHttpClient))
            .session(Arc::new(StubSession))
            .build();

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("StreamResolver"));
    }

    #[test]
    fn test_builder_requires_session() {
        let result = CoreConfig::builder()
            .cache_dir("/cache")
            .http_client(Arc::new(StubHttpClient))
            .stream_resolver(Arc::new(StubResolver))
            .build();

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("SessionBootstrap"));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_http_client_without_shims() {
        let result = CoreConfig::builder()
            .cache_dir("/cache")
            .stream_resolver(Arc::new(StubResolver))
            .session(Arc::new(StubSession))
            .build();

        assert!(matches!(
            result.unwrap_err(),
            Error::CapabilityMissing { ref capability, .. } if capability == "HttpClient"
        ));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_builder_provides_desktop_http_client() {
        let result = CoreConfig::builder()
            .cache_dir("/cache")
            .stream_resolver(Arc::new(StubResolver))
            .session(Arc::new(StubSession))
            .build();

        assert!(result.is_ok());
    }

    #[test]
    fn test_builder_with_all_required_fields() {
        let config = complete_builder().build().unwrap();

        assert_eq!(config.cache_dir, PathBuf::from("/cache"));
        assert_eq!(config.backend_name, DEFAULT_BACKEND_NAME);
        assert_eq!(config.backend_dir(), PathBuf::from("/cache").join(DEFAULT_BACKEND_NAME));
        assert_eq!(config.fetch, FetchConfig::default());
        assert_eq!(config.transcode, TranscodeConfig::default());
    }

    #[test]
    fn test_builder_applies_settings() {
        let settings = PrepareSettings {
            backend_name: "gmusic".to_string(),
            fetch: FetchConfig::default().with_max_redirects(3),
            transcode: TranscodeConfig::default().with_bitrate_kbps(128),
        };

        let config = complete_builder().settings(settings).build().unwrap();

        assert_eq!(config.backend_name, "gmusic");
        assert_eq!(config.fetch.max_redirects, 3);
        assert_eq!(config.transcode.bitrate_kbps, 128);
    }

    #[test]
    fn test_builder_rejects_nested_backend_name() {
        let result = complete_builder().backend_name("a/b").build();
        assert!(result.unwrap_err().to_string().contains("single path component"));

        let result = complete_builder().backend_name("..").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_hides_collaborators() {
        let config = complete_builder().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("HttpClient { ... }"));
        assert!(debug.contains("backend_name"));
    }
}
