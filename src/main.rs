//! APM intake server
//!
//! Accepts event batches from backend and browser agents over HTTP and
//! hands them to a publisher queue.
//!
//! # Architecture Overview
//!
//! ```text
//!     Agent request
//!     ─────────────▶ net::listener ──▶ http::server ──▶ http::trace ──▶ api
//!                    (conn limit)      (hyper conn,     (transaction    (auth, CORS,
//!                                      TLS, idle)       span)           body limit)
//!                                                                        │
//!                                                                        ▼
//!                                                                  publish queue
//!
//!     Cross-cutting: config, lifecycle (startup/shutdown/signals), observability
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use intake_server::config::{advisories, load_config, ServerConfig};
use intake_server::http::HttpServer;
use intake_server::lifecycle::signals::shutdown_signal;
use intake_server::observability::{logging, metrics, Tracer};
use intake_server::publish::{ChannelReporter, Reporter};

const CONSUMER_DRAIN: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "intake-server")]
#[command(about = "HTTP intake server for APM agent events", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of batches buffered before intake answers 503.
    #[arg(long, default_value_t = 1024)]
    queue_size: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!("{} v{} starting", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    for advisory in advisories(&config) {
        tracing::debug!(%advisory, "Configuration advisory");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let (reporter, mut batches) = ChannelReporter::new(cli.queue_size);
    let consumer = tokio::spawn(async move {
        while let Some(batch) = batches.recv().await {
            tracing::info!(
                kind = batch.kind.as_str(),
                bytes = batch.body.len(),
                content_type = batch.content_type.as_deref().unwrap_or("-"),
                "Batch received"
            );
        }
    });

    let reporter: Arc<dyn Reporter> = Arc::new(reporter);
    let server = Arc::new(HttpServer::new(config, Tracer::default(), reporter).await?);
    let listener = server.bind().await?;

    let stopper = Arc::clone(&server);
    let stopping = tokio::spawn(async move {
        shutdown_signal().await;
        stopper.stop().await;
    });

    server.start(listener).await?;
    let _ = stopping.await;

    // Dropping the server closes the last reporter so the consumer drains and exits.
    drop(server);
    if tokio::time::timeout(CONSUMER_DRAIN, consumer).await.is_err() {
        tracing::warn!("Gave up draining queued batches");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
