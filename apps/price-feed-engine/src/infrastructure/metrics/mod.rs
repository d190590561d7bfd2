//! Prometheus Metrics Module
//!
//! Exposes engine metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Updates**: Received, dropped and delivered price updates
//! - **Streaming**: Malformed frames and reconnect attempts
//! - **Polling**: Failed poll cycles by kind
//! - **Symbols**: Tracked symbols per transport
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::symbol::SymbolClass;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once and return its handle.
///
/// Later calls return the handle installed by the first.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_feed_updates_received_total",
        "Price updates received from transports"
    );
    describe_counter!(
        "price_feed_updates_dropped_total",
        "Price updates dropped before reaching the cache"
    );
    describe_counter!(
        "price_feed_deliveries_total",
        "Debounced callback invocations"
    );
    describe_counter!(
        "price_feed_callback_panics_total",
        "Consumer callbacks that panicked"
    );

    describe_counter!(
        "price_feed_malformed_frames_total",
        "Streaming frames that failed to parse"
    );
    describe_counter!(
        "price_feed_reconnects_total",
        "Scheduled streaming reconnection attempts"
    );

    describe_counter!(
        "price_feed_poll_failures_total",
        "Poll cycles that produced no update"
    );

    describe_gauge!(
        "price_feed_tracked_symbols",
        "Distinct tracked symbols per transport"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an update handed to the engine by a transport.
pub fn record_update_received(source: SymbolClass) {
    counter!(
        "price_feed_updates_received_total",
        "transport" => source.as_str()
    )
    .increment(1);
}

/// Record an update dropped before the cache (`stale`, `untracked`, `overflow`).
pub fn record_update_dropped(reason: &'static str) {
    counter!("price_feed_updates_dropped_total", "reason" => reason).increment(1);
}

/// Record a callback invocation.
pub fn record_delivery() {
    counter!("price_feed_deliveries_total").increment(1);
}

/// Record a callback panic caught by the delivery layer.
pub fn record_callback_panic() {
    counter!("price_feed_callback_panics_total").increment(1);
}

/// Record a streaming frame that could not be decoded.
pub fn record_malformed_frame() {
    counter!("price_feed_malformed_frames_total").increment(1);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("price_feed_reconnects_total").increment(1);
}

/// Record a poll cycle that emitted nothing.
pub fn record_poll_failure(kind: &'static str) {
    counter!("price_feed_poll_failures_total", "kind" => kind).increment(1);
}

/// Update the tracked-symbol gauge for one transport.
pub fn set_tracked_symbols(transport: SymbolClass, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    let value = count as f64;
    gauge!("price_feed_tracked_symbols", "transport" => transport.as_str()).set(value);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_update_received(SymbolClass::Major);
        record_update_dropped("stale");
        record_poll_failure("timeout");
        set_tracked_symbols(SymbolClass::Minor, 3);
    }

    #[test]
    fn transport_labels() {
        assert_eq!(SymbolClass::Major.as_str(), "streaming");
        assert_eq!(SymbolClass::Minor.as_str(), "polling");
    }
}
