//! Price Feed Engine Binary
//!
//! Starts the price feed engine, subscribes to the configured symbols and
//! serves the health and price read endpoint.
//!
//! # Usage
//!
//! ```bash
//! PRICE_FEED_SYMBOLS=btc,eth,pepe cargo run --bin price-feed-engine
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `PRICE_FEED_SYMBOLS`: Comma-separated tokens to track (default: none)
//! - `PRICE_FEED_STREAM_URL`: Ticker WebSocket URL (default: Binance public stream)
//! - `PRICE_FEED_QUOTE_API_URL`: Quote aggregator base URL (default: DexScreener)
//! - `PRICE_FEED_POLL_INTERVAL_SECS`: Poll interval for minor symbols (default: 30)
//! - `PRICE_FEED_DEBOUNCE_MS`: Delivery window per consumer (default: 500)
//! - `PRICE_FEED_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-feed-engine)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_feed_engine::infrastructure::telemetry;
use price_feed_engine::{
    BinanceStreamClient, DexScreenerClient, DexScreenerConfig, EngineConfig, HealthServer,
    HealthServerState, PriceFeedEngine, StreamClientConfig, TokenRequest, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Err only when a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Price Feed Engine");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = EngineConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Transports
    let streaming = Arc::new(BinanceStreamClient::new(
        StreamClientConfig::from_streaming_settings(&config.streaming),
    ));
    let quotes = Arc::new(
        DexScreenerClient::new(&DexScreenerConfig::from_polling_settings(&config.polling))
            .context("failed to build quote source client")?,
    );

    // Engine
    let engine = PriceFeedEngine::new(streaming, quotes, config.engine_options());
    engine.start().context("failed to start engine")?;

    let tokens: Vec<TokenRequest> = config.symbols.iter().map(TokenRequest::new).collect();
    let _subscription = engine.subscribe(&tokens, |update| {
        tracing::info!(
            symbol = %update.symbol,
            price = update.price,
            change_24h = ?update.change_24h,
            source = update.source.as_str(),
            "Price update"
        );
    })
    .context("failed to subscribe configured symbols")?;

    // Spawn periodic cache snapshot logger
    let snapshot_engine = engine.clone();
    let snapshot_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        log_snapshots(snapshot_engine, snapshot_shutdown).await;
    });

    // Initialize health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        engine.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Price feed engine ready");

    await_shutdown(shutdown_token).await;

    engine.stop();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, health_task)
        .await
        .is_err()
    {
        tracing::warn!("Health server did not stop in time");
    }

    tracing::info!("Price feed engine stopped");
    Ok(())
}

/// Log every cached price once per UI refresh interval.
async fn log_snapshots(engine: PriceFeedEngine, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(engine.ui_refresh_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = engine.snapshot();
                if snapshot.is_empty() {
                    continue;
                }
                for (symbol, entry) in snapshot {
                    tracing::debug!(
                        symbol = %symbol,
                        price = entry.price,
                        change_24h = ?entry.change_24h,
                        "Cached price"
                    );
                }
                tracing::debug!(
                    state = engine.connection_state().as_str(),
                    "Streaming connection"
                );
            }
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &EngineConfig) {
    tracing::info!(
        symbols = config.symbols.len(),
        health_port = config.server.health_port,
        debounce_ms = config.delivery.debounce.as_millis(),
        poll_interval_secs = config.polling.poll_interval.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = %config.streaming.url,
        quote_api_url = %config.polling.quote_api_url,
        "Upstream endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
