//! End-to-end tests for song preparation.
//!
//! The HTTP client, stream resolver and session are mocked; the encoder is a
//! real process (`cat` passes bytes through, `sh` simulates a failing
//! encoder), so these tests need a Unix userland but not ffmpeg.

#![cfg(unix)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{HttpClient, HttpRequest, HttpStreamResponse, SessionBootstrap, StreamResolver};
use bytes::Bytes;
use core_prepare::{Completion, PrepareError, PrepareEvent, PreparationController, Song};
use core_runtime::config::{CoreConfig, FetchConfig, TranscodeConfig};
use futures::{stream, StreamExt};
use mockall::{mock, Sequence};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

mock! {
    HttpClient {}

    #[async_trait]
    impl HttpClient for HttpClient {
        async fn open_stream(&self, request: HttpRequest) -> BridgeResult<HttpStreamResponse>;
    }
}

mock! {
    Resolver {}

    #[async_trait]
    impl StreamResolver for Resolver {
        async fn resolve_stream_url(&self, song_id: &str) -> BridgeResult<String>;
    }
}

mock! {
    Session {}

    #[async_trait]
    impl SessionBootstrap for Session {
        async fn reinit_session(&self) -> BridgeResult<()>;
    }
}

const TIMEOUT: Duration = Duration::from_secs(10);

struct Fixture {
    root: PathBuf,
    controller: PreparationController,
}

fn temp_root() -> PathBuf {
    std::env::temp_dir().join(format!("tunecache-prepare-{}", Uuid::new_v4()))
}

impl Fixture {
    async fn new(
        http: MockHttpClient,
        resolver: MockResolver,
        session: MockSession,
        transcode: TranscodeConfig,
    ) -> Self {
        Self::at(temp_root(), http, resolver, session, transcode).await
    }

    async fn at(
        root: PathBuf,
        http: MockHttpClient,
        resolver: MockResolver,
        session: MockSession,
        transcode: TranscodeConfig,
    ) -> Self {
        let config = CoreConfig::builder()
            .cache_dir(&root)
            .backend_name("gmusic")
            .http_client(Arc::new(http))
            .stream_resolver(Arc::new(resolver))
            .session(Arc::new(session))
            .fetch(FetchConfig::default().with_reconnect_delay(Duration::ZERO))
            .transcode(transcode)
            .build()
            .unwrap();

        let controller = PreparationController::new(config);
        controller.initialize().await.unwrap();

        Self { root, controller }
    }

    fn staging_exists(&self, song: &Song) -> bool {
        self.controller.store().staging_path(song).exists()
    }

    fn final_exists(&self, song: &Song) -> bool {
        self.controller.store().final_path(song).exists()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.root).ok();
    }
}

fn passthrough_encoder() -> TranscodeConfig {
    TranscodeConfig::default().with_command("cat", vec![])
}

fn failing_encoder() -> TranscodeConfig {
    TranscodeConfig::default().with_command(
        "sh",
        vec![
            "-c".to_string(),
            "cat > /dev/null; echo 'pipe:0: Invalid data found when processing input' >&2; exit 1"
                .to_string(),
        ],
    )
}

fn song() -> Song {
    Song::new("Tqx7b", "gmusic").with_metadata("Aphex Twin", "Xtal", "Selected Ambient Works")
}

fn body_of(chunks: &[&'static [u8]]) -> HttpStreamResponse {
    let items: Vec<BridgeResult<Bytes>> = chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
    HttpStreamResponse::new(200, HashMap::new(), stream::iter(items).boxed())
}

fn status(code: u16) -> HttpStreamResponse {
    HttpStreamResponse::new(code, HashMap::new(), stream::empty().boxed())
}

/// A 200 response whose body is fed by the test.
fn controlled_body() -> (
    futures::channel::mpsc::UnboundedSender<Bytes>,
    HttpStreamResponse,
) {
    let (tx, rx) = futures::channel::mpsc::unbounded::<Bytes>();
    let response = HttpStreamResponse::new(200, HashMap::new(), rx.map(Ok).boxed());
    (tx, response)
}

fn resolver(times: usize) -> MockResolver {
    let mut resolver = MockResolver::new();
    resolver
        .expect_resolve_stream_url()
        .times(times)
        .returning(|id| Ok(format!("https://a.example.com/stream/{}?sig=s", id)));
    resolver
}

fn session(times: usize) -> MockSession {
    let mut session = MockSession::new();
    session.expect_reinit_session().times(times).returning(|| Ok(()));
    session
}

#[tokio::test]
async fn test_cached_song_completes_without_network() {
    let fixture = Fixture::new(
        MockHttpClient::new(),
        MockResolver::new(),
        MockSession::new(),
        passthrough_encoder(),
    )
    .await;
    let song = song();
    std::fs::write(fixture.controller.store().final_path(&song), b"cached").unwrap();

    let mut preparation = fixture.controller.prepare_song(&song).await;

    assert!(preparation.is_cached());
    assert!(preparation.cancel_handle().is_none());
    assert!(matches!(preparation.next_event().await, Some(PrepareEvent::Completed)));
    assert!(preparation.next_event().await.is_none());
}

#[tokio::test]
async fn test_cached_song_wait() {
    let fixture = Fixture::new(
        MockHttpClient::new(),
        MockResolver::new(),
        MockSession::new(),
        passthrough_encoder(),
    )
    .await;
    let song = song();
    std::fs::write(fixture.controller.store().final_path(&song), b"cached").unwrap();

    let outcome = fixture.controller.prepare_song(&song).await.wait().await.unwrap();

    assert_eq!(outcome, Completion::AlreadyCached);
}

#[tokio::test]
async fn test_prepare_follows_redirect_and_publishes() {
    let mut http = MockHttpClient::new();
    let mut seq = Sequence::new();
    http.expect_open_stream()
        .withf(|req| req.url.starts_with("https://a.example.com/"))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| {
            let mut headers = HashMap::new();
            headers.insert("location".to_string(), "https://b.example.com/audio".to_string());
            Ok(HttpStreamResponse::new(302, headers, stream::empty().boxed()))
        });
    http.expect_open_stream()
        .withf(|req| req.url == "https://b.example.com/audio")
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(body_of(&[b"hello ", b"opus"])));

    let fixture = Fixture::new(http, resolver(1), session(0), passthrough_encoder()).await;
    let song = song();

    let mut preparation = fixture.controller.prepare_song(&song).await;
    assert!(!preparation.is_cached());

    let mut streamed = Vec::new();
    let mut terminals = Vec::new();
    let collect = async {
        while let Some(event) = preparation.next_event().await {
            match event {
                PrepareEvent::Chunk(chunk) => {
                    assert!(terminals.is_empty(), "chunk after terminal event");
                    streamed.extend_from_slice(&chunk);
                }
                other => terminals.push(other),
            }
        }
    };
    tokio::time::timeout(TIMEOUT, collect).await.unwrap();

    assert_eq!(terminals.len(), 1);
    assert!(matches!(terminals[0], PrepareEvent::Completed));
    assert_eq!(streamed, b"hello opus");
    assert!(fixture.controller.is_prepared(&song).await);
    assert_eq!(
        std::fs::read(fixture.controller.store().final_path(&song)).unwrap(),
        b"hello opus"
    );
    assert!(!fixture.staging_exists(&song));
}

#[tokio::test]
async fn test_wait_reports_encoded_bytes() {
    let mut http = MockHttpClient::new();
    http.expect_open_stream()
        .times(1)
        .returning(|_| Ok(body_of(&[b"0123456789"])));

    let fixture = Fixture::new(http, resolver(1), session(0), passthrough_encoder()).await;

    let outcome = tokio::time::timeout(TIMEOUT, fixture.controller.prepare_song(&song()).await.wait())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome, Completion::Prepared { bytes: 10 });
}

#[tokio::test]
async fn test_not_found_fails_without_files() {
    let mut http = MockHttpClient::new();
    http.expect_open_stream().times(1).returning(|_| Ok(status(404)));

    let fixture = Fixture::new(http, resolver(1), session(0), passthrough_encoder()).await;
    let song = song();

    let result = tokio::time::timeout(TIMEOUT, fixture.controller.prepare_song(&song).await.wait())
        .await
        .unwrap();

    let err = result.unwrap_err();
    assert!(matches!(err, PrepareError::Protocol { status: 404, .. }));
    assert_eq!(err.to_string(), "unknown status code 404");
    assert!(!fixture.staging_exists(&song));
    assert!(!fixture.final_exists(&song));
}

#[tokio::test]
async fn test_reconnect_after_connection_error() {
    let mut http = MockHttpClient::new();
    let mut seq = Sequence::new();
    http.expect_open_stream()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(BridgeError::ConnectionFailed("connection reset".to_string())));
    http.expect_open_stream()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(body_of(&[b"after reconnect"])));

    let fixture = Fixture::new(http, resolver(2), session(1), passthrough_encoder()).await;
    let song = song();

    let outcome = tokio::time::timeout(TIMEOUT, fixture.controller.prepare_song(&song).await.wait())
        .await
        .unwrap()
        .unwrap();

    assert!(outcome.has_artifact());
    assert_eq!(
        std::fs::read(fixture.controller.store().final_path(&song)).unwrap(),
        b"after reconnect"
    );
}

#[tokio::test]
async fn test_cancel_mid_stream_cleans_up() {
    let (body_tx, response) = controlled_body();
    let mut http = MockHttpClient::new();
    http.expect_open_stream().times(1).return_once(move |_| Ok(response));

    let fixture = Fixture::new(http, resolver(1), session(0), passthrough_encoder()).await;
    let song = song();

    let mut preparation = fixture.controller.prepare_song(&song).await;
    let handle = preparation.cancel_handle().unwrap();

    body_tx.unbounded_send(Bytes::from_static(b"first chunk")).unwrap();
    let first = tokio::time::timeout(TIMEOUT, preparation.next_event()).await.unwrap();
    assert!(matches!(first, Some(PrepareEvent::Chunk(_))));
    assert!(fixture.staging_exists(&song));

    handle.cancel("user skipped");
    handle.cancel("second call is ignored");

    let result = tokio::time::timeout(TIMEOUT, preparation.wait()).await.unwrap();
    let err = result.unwrap_err();

    assert!(err.is_cancellation());
    assert_eq!(err.to_string(), "canceled preparing: Tqx7b: user skipped");
    assert!(!fixture.staging_exists(&song));
    assert!(!fixture.final_exists(&song));
    drop(body_tx);
}

#[tokio::test]
async fn test_is_prepared_only_after_publish() {
    let (body_tx, response) = controlled_body();
    let mut http = MockHttpClient::new();
    http.expect_open_stream().times(1).return_once(move |_| Ok(response));

    let fixture = Fixture::new(http, resolver(1), session(0), passthrough_encoder()).await;
    let song = song();

    let mut preparation = fixture.controller.prepare_song(&song).await;

    body_tx.unbounded_send(Bytes::from_static(b"partial")).unwrap();
    let first = tokio::time::timeout(TIMEOUT, preparation.next_event()).await.unwrap();
    assert!(matches!(first, Some(PrepareEvent::Chunk(_))));
    assert!(!fixture.controller.is_prepared(&song).await);

    drop(body_tx);
    let outcome = tokio::time::timeout(TIMEOUT, preparation.wait()).await.unwrap();

    assert!(outcome.is_ok());
    assert!(fixture.controller.is_prepared(&song).await);
}

#[tokio::test]
async fn test_encoder_failure_leaves_no_files() {
    let mut http = MockHttpClient::new();
    http.expect_open_stream()
        .times(1)
        .returning(|_| Ok(body_of(&[b"not audio"])));

    let fixture = Fixture::new(http, resolver(1), session(0), failing_encoder()).await;
    let song = song();

    let result = tokio::time::timeout(TIMEOUT, fixture.controller.prepare_song(&song).await.wait())
        .await
        .unwrap();

    match result {
        Err(PrepareError::Encoding(message)) => {
            assert!(message.contains("Invalid data found"), "{}", message)
        }
        other => panic!("expected encoding error, got {:?}", other),
    }
    assert!(!fixture.staging_exists(&song));
    assert!(!fixture.final_exists(&song));
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let mut http = MockHttpClient::new();
    http.expect_open_stream()
        .times(1)
        .returning(|_| Ok(body_of(&[b"done"])));

    let fixture = Fixture::new(http, resolver(1), session(0), passthrough_encoder()).await;
    let song = song();

    let preparation = fixture.controller.prepare_song(&song).await;
    let handle = preparation.cancel_handle().unwrap();
    let outcome = tokio::time::timeout(TIMEOUT, preparation.wait()).await.unwrap();
    assert!(outcome.is_ok());

    handle.cancel("too late");

    assert!(fixture.controller.is_prepared(&song).await);
    assert!(fixture.final_exists(&song));
}

#[tokio::test]
async fn test_resolution_failure_surfaces() {
    let mut resolver = MockResolver::new();
    resolver
        .expect_resolve_stream_url()
        .times(1)
        .returning(|_| Err(BridgeError::NotAvailable("track removed from catalog".to_string())));

    let fixture = Fixture::new(
        MockHttpClient::new(),
        resolver,
        MockSession::new(),
        passthrough_encoder(),
    )
    .await;
    let song = song();

    let result = tokio::time::timeout(TIMEOUT, fixture.controller.prepare_song(&song).await.wait())
        .await
        .unwrap();

    assert!(matches!(result, Err(PrepareError::Resolution(_))));
    assert!(!fixture.staging_exists(&song));
}

#[tokio::test]
async fn test_path_like_song_ids_are_rejected_before_any_work() {
    // No expectations: any resolve or HTTP call fails the test
    let fixture = Fixture::new(
        MockHttpClient::new(),
        MockResolver::new(),
        MockSession::new(),
        passthrough_encoder(),
    )
    .await;
    std::fs::write(fixture.root.join("escaped.opus"), b"not ours").unwrap();

    for id in ["a/b", "../escaped", "..", ""] {
        let song = Song::new(id, "gmusic");
        let mut preparation = fixture.controller.prepare_song(&song).await;

        assert!(!preparation.is_cached());
        assert!(preparation.cancel_handle().is_none());
        assert!(
            matches!(
                preparation.next_event().await,
                Some(PrepareEvent::Failed(PrepareError::InvalidSong(_)))
            ),
            "{:?}",
            id
        );
        assert!(preparation.next_event().await.is_none());
        assert!(!fixture.controller.is_prepared(&song).await);
    }

    let staged: Vec<_> = std::fs::read_dir(fixture.controller.store().staging_dir())
        .unwrap()
        .collect();
    assert!(staged.is_empty());
    assert_eq!(std::fs::read(fixture.root.join("escaped.opus")).unwrap(), b"not ours");
}

#[tokio::test]
async fn test_missing_staging_file_completes_without_artifact() {
    let mut http = MockHttpClient::new();
    http.expect_open_stream()
        .times(1)
        .returning(|_| Ok(body_of(&[b"encoded but lost"])));

    let root = temp_root();
    let staging = root.join("gmusic").join("incomplete").join("Tqx7b.opus");
    // Encoder that deletes its own output file before exiting
    let vanishing_encoder = TranscodeConfig::default().with_command(
        "sh",
        vec![
            "-c".to_string(),
            format!("cat; rm -f '{}'", staging.display()),
        ],
    );

    let fixture = Fixture::at(root, http, resolver(1), session(0), vanishing_encoder).await;
    let song = song();

    let mut preparation = fixture.controller.prepare_song(&song).await;
    let mut terminals = Vec::new();
    let mut bytes = 0;
    let collect = async {
        while let Some(event) = preparation.next_event().await {
            match event {
                PrepareEvent::Chunk(chunk) => bytes += chunk.len(),
                other => terminals.push(other),
            }
        }
    };
    tokio::time::timeout(TIMEOUT, collect).await.unwrap();

    assert_eq!(terminals.len(), 1);
    assert!(matches!(terminals[0], PrepareEvent::CompletedNoArtifact));
    assert_eq!(bytes, 16);
    assert!(!fixture.staging_exists(&song));
    assert!(!fixture.final_exists(&song));
    assert!(!fixture.controller.is_prepared(&song).await);
}

#[tokio::test]
async fn test_wait_reports_no_artifact() {
    let mut http = MockHttpClient::new();
    http.expect_open_stream()
        .times(1)
        .returning(|_| Ok(body_of(&[b"0123456789"])));

    let root = temp_root();
    let staging = root.join("gmusic").join("incomplete").join("Tqx7b.opus");
    let vanishing_encoder = TranscodeConfig::default().with_command(
        "sh",
        vec!["-c".to_string(), format!("cat; rm -f '{}'", staging.display())],
    );

    let fixture = Fixture::at(root, http, resolver(1), session(0), vanishing_encoder).await;

    let outcome = tokio::time::timeout(TIMEOUT, fixture.controller.prepare_song(&song()).await.wait())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome, Completion::NoArtifact { bytes: 10 });
    assert!(!outcome.has_artifact());
}
