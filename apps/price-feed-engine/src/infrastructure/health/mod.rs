//! Health Check, Metrics and Price Read Endpoint
//!
//! HTTP endpoint for health checks, streaming connection status, Prometheus
//! metrics, and read access to the price cache.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (fails once streaming is exhausted)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /prices` - Every cached price
//! - `GET /prices/{symbol}` - Latest cached price for one symbol (404 when absent)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::PriceFeedEngine;
use crate::domain::connection::ConnectionState;
use crate::domain::price::CacheEntry;
use crate::domain::subscription::RegistryStats;
use crate::domain::symbol::Symbol;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Engine version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Whether the engine is started and not stopped.
    pub running: bool,
    /// Streaming connection state.
    pub streaming: ConnectionState,
    /// Tracked symbol counts.
    pub subscriptions: RegistryStats,
    /// Symbols with a cached price.
    pub cached_symbols: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Streaming is recovering; polling is unaffected.
    Degraded,
    /// Engine stopped or streaming gave up.
    Unhealthy,
}

/// One cached price.
#[derive(Debug, Clone, Serialize)]
pub struct PriceResponse {
    /// Symbol.
    pub symbol: String,
    /// Last price in USD.
    pub price: f64,
    /// 24h change in percent.
    pub change_24h: Option<f64>,
    /// Wall-clock time the price was received.
    pub received_at: DateTime<Utc>,
}

impl PriceResponse {
    fn new(symbol: &Symbol, entry: &CacheEntry) -> Self {
        Self {
            symbol: symbol.as_str().to_string(),
            price: entry.price,
            change_24h: entry.change_24h,
            received_at: entry.received_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    engine: PriceFeedEngine,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, engine: PriceFeedEngine) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            engine,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Build the router without binding a socket.
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .route("/prices", get(prices_handler))
            .route("/prices/{symbol}", get(price_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let is_ready = state.engine.is_running()
        && state.engine.connection_state() != ConnectionState::Exhausted;

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn prices_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let mut prices: Vec<PriceResponse> = state
        .engine
        .snapshot()
        .iter()
        .map(|(symbol, entry)| PriceResponse::new(symbol, entry))
        .collect();
    prices.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    Json(prices)
}

async fn price_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(symbol): Path<String>,
) -> axum::response::Response {
    let found = Symbol::new(&symbol)
        .and_then(|s| state.engine.latest(s.as_str()).map(|entry| (s, entry)));

    match found {
        Some((symbol, entry)) => Json(PriceResponse::new(&symbol, &entry)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("no price cached for {symbol:?}"),
            }),
        )
            .into_response(),
    }
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let running = state.engine.is_running();
    let streaming = state.engine.connection_state();
    let subscriptions = state.engine.stats();

    HealthResponse {
        status: determine_health_status(running, streaming, &subscriptions),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        running,
        streaming,
        subscriptions,
        cached_symbols: state.engine.snapshot().len(),
    }
}

fn determine_health_status(
    running: bool,
    streaming: ConnectionState,
    stats: &RegistryStats,
) -> HealthStatus {
    if !running {
        return HealthStatus::Unhealthy;
    }
    if stats.streaming_symbols == 0 {
        return HealthStatus::Healthy;
    }

    match streaming {
        ConnectionState::Connected => HealthStatus::Healthy,
        ConnectionState::Exhausted => HealthStatus::Unhealthy,
        ConnectionState::Disconnected
        | ConnectionState::Connecting
        | ConnectionState::Reconnecting { .. } => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(streaming_symbols: usize) -> RegistryStats {
        RegistryStats {
            streaming_symbols,
            polling_symbols: 1,
            consumer_count: 1,
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn stopped_engine_is_unhealthy() {
        assert_eq!(
            determine_health_status(false, ConnectionState::Connected, &stats(1)),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn no_streaming_demand_is_healthy() {
        assert_eq!(
            determine_health_status(true, ConnectionState::Disconnected, &stats(0)),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn status_follows_streaming_state() {
        assert_eq!(
            determine_health_status(true, ConnectionState::Connected, &stats(2)),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(true, ConnectionState::Reconnecting { attempt: 2 }, &stats(2)),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(true, ConnectionState::Exhausted, &stats(2)),
            HealthStatus::Unhealthy
        );
    }
}
