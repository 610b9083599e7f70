//! Logging system demonstration
//!
//! Run with:
//! ```bash
//! cargo run -p core-runtime --example logging_demo
//! cargo run -p core-runtime --example logging_demo -- json
//! cargo run -p core-runtime --example logging_demo -- compact "core_runtime=trace"
//! ```

use bridge_traits::{ConsoleLogger, LogLevel};
use core_runtime::logging::{init_logging, redact_url, strip_path, LogFormat, LoggingConfig};
use std::env;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    let format = match args.get(1).map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        Some(_) => LogFormat::Pretty,
        None => LogFormat::default(),
    };

    let mut config = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Trace)
        .with_logger_sink(Arc::new(ConsoleLogger {
            min_level: LogLevel::Warn,
        }));

    if let Some(filter) = args.get(2) {
        config = config.with_filter(filter.clone());
    }

    if let Err(e) = init_logging(config) {
        eprintln!("{}", e);
        return;
    }

    info!(format = ?format, "Logging initialized");

    simulated_download("Tqx7b", "https://cdn.example.com/stream?sig=secret&expire=99").await;

    info!("Demo complete");
}

#[instrument(skip(url))]
async fn simulated_download(song_id: &str, url: &str) {
    debug!(url = %redact_url(url), "Opening stream");

    for received in [16_384u64, 32_768, 49_152] {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        debug!(received, "Chunk forwarded");
    }

    // Mirrored to the ConsoleLogger sink as well
    warn!("Connection reset, waiting before reconnect");

    info!(
        file = %strip_path("/home/user/.cache/tunecache/remote/Tqx7b.opus"),
        "Published"
    );
}
