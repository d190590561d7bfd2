//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Binance ticker WebSocket adapter (streaming transport).
pub mod binance;

/// DexScreener HTTP adapter (polling quote source).
pub mod dexscreener;

/// Configuration loading and validation.
pub mod config;

/// Health check and price read HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
