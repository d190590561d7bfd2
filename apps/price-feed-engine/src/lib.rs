#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Feed Engine - Live Price Distribution
//!
//! Keeps a live price for every symbol any consumer asks for. Major symbols
//! share one ticker WebSocket; everything else is polled from a quote
//! aggregator. Updates land in a cache synchronously and reach each
//! consumer callback at most once per debounce window.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types and policies
//!   - `symbol`: Symbol identity and major/minor classification
//!   - `price`: Normalized price updates and cache entries
//!   - `subscription`: Reference-counted subscription registry
//!   - `connection`: Streaming connection state machine and backoff
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interfaces for the streaming feed and the quote source
//!   - `services`: Cache, debouncer, poller and the engine itself
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: Ticker WebSocket client
//!   - `dexscreener`: HTTP quote source
//!   - `config`: Environment configuration
//!   - `health`: Health check and price read endpoint
//!
//! # Data Flow
//!
//! ```text
//! Binance WS ──────┐
//!                  │     ┌──────────┐     ┌─────────┐
//!                  ├────►│ Dispatch │──┬─►│  Cache  │◄── latest()
//! DexScreener ─────┘     └──────────┘  │  └─────────┘
//!  (poll timers)                       └─► Debouncer ──► Consumer 1
//!                                      └─► Debouncer ──► Consumer N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core price feed types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionState, ReconnectConfig};
pub use domain::price::{CacheEntry, PriceUpdate};
pub use domain::subscription::{ConsumerId, RegistryStats};
pub use domain::symbol::{Symbol, SymbolClass, TokenRequest, classify};

// Ports
pub use application::ports::{
    PairQuote, QuoteSource, QuoteSourceError, ResolvedPair, StreamingTransport, UpdateSender,
};

// Engine
pub use application::services::{
    EngineError, EngineOptions, PollerConfig, PriceFeedEngine, Subscription,
};

// Adapters
pub use infrastructure::binance::{BinanceStreamClient, StreamClientConfig};
pub use infrastructure::dexscreener::{DexScreenerClient, DexScreenerConfig};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, DeliverySettings, EngineConfig, PollingSettings, ServerSettings,
    StreamingSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
