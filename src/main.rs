//! JSON Lines OTLP Forwarder Binary

use jsonl_otel_forwarder::{Config, Forwarder};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = Config::from_env();

    initialize_tracing(&config.log_level);

    info!("Starting JSON Lines OTLP Forwarder v{}", env!("CARGO_PKG_VERSION"));

    info!(
        endpoint = %config.endpoint_url,
        signals = %config.signals,
        gzip = config.gzip,
        batch = config.batch,
        "forwarder configuration"
    );

    let forwarder = match Forwarder::new(config) {
        Ok(forwarder) => forwarder,
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    let stdin = BufReader::new(tokio::io::stdin());
    if let Err(e) = forwarder.run(stdin, &cancel).await {
        error!("Forwarder failed: {}", e);
        std::process::exit(1);
    }
}

/// Initialize structured logging
fn initialize_tracing(default_level: &str) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
