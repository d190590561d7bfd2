//! Binance WebSocket Message Types
//!
//! Wire format types for the public market-data stream.
//!
//! # Message Types
//!
//! ## Outbound
//! - `ControlRequest`: `SUBSCRIBE` / `UNSUBSCRIBE` with a list of channels
//!
//! ## Inbound
//! - `TickerMessage`: 24h rolling ticker (`e = "24hrTicker"`)
//! - `ControlResponse`: acknowledgment of a control request
//! - `ErrorResponse`: rejection of a control request
//!
//! # References
//!
//! - [WebSocket Streams](https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams)

use serde::{Deserialize, Serialize};

use crate::domain::symbol::Symbol;

/// Event type of the individual symbol ticker stream.
pub const TICKER_EVENT: &str = "24hrTicker";

// =============================================================================
// Outbound
// =============================================================================

/// Control request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlMethod {
    /// Add channels to the connection.
    Subscribe,
    /// Remove channels from the connection.
    Unsubscribe,
}

/// Subscribe or unsubscribe request.
///
/// ```json
/// {"method":"SUBSCRIBE","params":["btcusdt@ticker"],"id":1}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    /// Request method.
    pub method: ControlMethod,
    /// Channel names.
    pub params: Vec<String>,
    /// Request id echoed in the response.
    pub id: u64,
}

impl ControlRequest {
    /// Build a request covering the ticker channels of `symbols`.
    #[must_use]
    pub fn for_symbols(method: ControlMethod, symbols: &[Symbol], quote: &str, id: u64) -> Self {
        Self {
            method,
            params: symbols.iter().map(|s| ticker_channel(s, quote)).collect(),
            id,
        }
    }
}

/// Ticker channel name for a symbol, e.g. `btcusdt@ticker`.
#[must_use]
pub fn ticker_channel(symbol: &Symbol, quote: &str) -> String {
    format!("{symbol}{quote}@ticker")
}

// =============================================================================
// Inbound
// =============================================================================

/// 24h rolling ticker event.
///
/// Prices arrive as decimal strings. Fields not used by the engine are
/// ignored during deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TickerMessage {
    /// Event type.
    #[serde(rename = "e")]
    pub event_type: String,
    /// Event time (ms since epoch).
    #[serde(rename = "E", default)]
    pub event_time: Option<u64>,
    /// Pair ticker, e.g. `BTCUSDT`.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Last price.
    #[serde(rename = "c", default)]
    pub last_price: Option<String>,
    /// 24h price change in percent.
    #[serde(rename = "P", default)]
    pub price_change_percent: Option<String>,
}

/// Acknowledgment of a control request (`{"result":null,"id":1}`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ControlResponse {
    /// `null` on success, or the requested listing.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Request id.
    pub id: Option<u64>,
}

/// Control request rejection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
    /// Request id.
    #[serde(default)]
    pub id: Option<u64>,
}

/// Error code and message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorDetail {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub msg: String,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_subscribe_request() {
        let symbols = [Symbol::new("btc").unwrap(), Symbol::new("eth").unwrap()];
        let request = ControlRequest::for_symbols(ControlMethod::Subscribe, &symbols, "usdt", 7);

        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"method":"SUBSCRIBE","params":["btcusdt@ticker","ethusdt@ticker"],"id":7}"#
        );
    }

    #[test]
    fn serialize_unsubscribe_request() {
        let symbols = [Symbol::new("sol").unwrap()];
        let request = ControlRequest::for_symbols(ControlMethod::Unsubscribe, &symbols, "usdt", 2);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["method"], "UNSUBSCRIBE");
        assert_eq!(value["params"][0], "solusdt@ticker");
    }

    #[test]
    fn deserialize_ticker() {
        let json = r#"{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","p":"950.00","c":"65000.12","P":"1.5","v":"1234.5"}"#;
        let ticker: TickerMessage = serde_json::from_str(json).unwrap();

        assert_eq!(ticker.event_type, TICKER_EVENT);
        assert_eq!(ticker.event_time, Some(1_700_000_000_000));
        assert_eq!(ticker.symbol, "BTCUSDT");
        assert_eq!(ticker.last_price.as_deref(), Some("65000.12"));
        assert_eq!(ticker.price_change_percent.as_deref(), Some("1.5"));
    }

    #[test]
    fn deserialize_ticker_missing_price() {
        let json = r#"{"e":"24hrTicker","s":"BTCUSDT","P":"1.5"}"#;
        let ticker: TickerMessage = serde_json::from_str(json).unwrap();
        assert!(ticker.last_price.is_none());
    }

    #[test]
    fn deserialize_control_response() {
        let response: ControlResponse = serde_json::from_str(r#"{"result":null,"id":3}"#).unwrap();
        assert_eq!(response.id, Some(3));
        assert!(response.result.is_none());
    }

    #[test]
    fn deserialize_error_response() {
        let json = r#"{"error":{"code":2,"msg":"Invalid request: unknown variant"},"id":4}"#;
        let response: ErrorResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.error.code, 2);
        assert_eq!(response.id, Some(4));
    }
}
