//! Ticker Stream Codec
//!
//! Decodes inbound text frames into [`StreamMessage`]s and validates ticker
//! payloads before they become [`PriceUpdate`]s.
//!
//! Raw `/ws` connections deliver bare objects. Combined `/stream`
//! connections wrap each payload as `{"stream": ..., "data": {...}}`, and
//! array streams deliver `[{...}, ...]`. All three shapes are accepted.

use serde_json::Value;

use super::messages::{
    ControlRequest, ControlResponse, ErrorResponse, TICKER_EVENT, TickerMessage,
};
use crate::domain::price::PriceUpdate;
use crate::domain::symbol::{Symbol, SymbolClass};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required ticker field is absent.
    #[error("ticker is missing field `{0}`")]
    MissingField(&'static str),

    /// A numeric field did not parse.
    #[error("ticker field `{field}` is not a number: {value:?}")]
    InvalidNumber {
        /// Wire field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// Price parsed but is not positive.
    #[error("ticker price must be positive, got {0}")]
    NonPositivePrice(f64),

    /// Ticker symbol is empty.
    #[error("ticker symbol is empty")]
    EmptySymbol,

    /// Payload matches no known message shape.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Validated ticker update.
    Ticker(PriceUpdate),
    /// Control request acknowledged.
    Ack {
        /// Request id.
        id: Option<u64>,
    },
    /// Control request rejected.
    Rejected {
        /// Error code.
        code: i64,
        /// Error message.
        msg: String,
    },
    /// Any other event type; ignored by the client.
    Other(String),
}

/// JSON codec for the ticker stream.
#[derive(Debug, Clone)]
pub struct TickerCodec {
    quote: String,
}

impl TickerCodec {
    /// Create a codec for channels quoted in `quote` (e.g. `usdt`).
    #[must_use]
    pub fn new(quote: impl Into<String>) -> Self {
        Self {
            quote: quote.into().to_lowercase(),
        }
    }

    /// Quote currency used for channel names.
    #[must_use]
    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, matches no known shape, or
    /// carries a ticker that fails validation. One bad element of an array
    /// frame fails the whole frame.
    pub fn decode(&self, text: &str) -> Result<Vec<StreamMessage>, CodecError> {
        let value: Value = serde_json::from_str(text.trim())?;

        match value {
            Value::Array(items) => items.into_iter().map(|v| self.decode_value(v)).collect(),
            Value::Object(_) => Ok(vec![self.decode_value(value)?]),
            other => Err(CodecError::InvalidFormat(format!(
                "expected JSON object or array, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Encode a control request.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, request: &ControlRequest) -> Result<String, CodecError> {
        Ok(serde_json::to_string(request)?)
    }

    fn decode_value(&self, mut value: Value) -> Result<StreamMessage, CodecError> {
        // Combined-stream envelope
        if value.get("stream").is_some()
            && let Some(data) = value.get_mut("data").map(Value::take)
        {
            value = data;
        }

        if let Some(event) = value.get("e").and_then(Value::as_str) {
            if event != TICKER_EVENT {
                return Ok(StreamMessage::Other(event.to_string()));
            }
            let ticker: TickerMessage = serde_json::from_value(value)?;
            return self.to_update(&ticker).map(StreamMessage::Ticker);
        }

        if value.get("error").is_some() {
            let response: ErrorResponse = serde_json::from_value(value)?;
            return Ok(StreamMessage::Rejected {
                code: response.error.code,
                msg: response.error.msg,
            });
        }

        if value.get("id").is_some() || value.get("result").is_some() {
            let response: ControlResponse = serde_json::from_value(value)?;
            return Ok(StreamMessage::Ack { id: response.id });
        }

        Err(CodecError::InvalidFormat(
            "object has no event type, id or error".to_string(),
        ))
    }

    /// Validate a ticker and normalize it into a price update.
    ///
    /// # Errors
    ///
    /// Returns an error unless both price and change parse and the price is
    /// positive.
    pub fn to_update(&self, ticker: &TickerMessage) -> Result<PriceUpdate, CodecError> {
        let symbol = self.symbol_of(&ticker.symbol)?;
        let price = parse_field("c", ticker.last_price.as_deref())?;
        let change = parse_field("P", ticker.price_change_percent.as_deref())?;

        PriceUpdate::new(symbol, price, Some(change), SymbolClass::Major)
            .ok_or(CodecError::NonPositivePrice(price))
    }

    /// Fold a pair ticker onto its base symbol, preferring the configured
    /// quote currency.
    fn symbol_of(&self, pair: &str) -> Result<Symbol, CodecError> {
        let lowered = pair.trim().to_lowercase();
        if let Some(base) = lowered.strip_suffix(self.quote.as_str())
            && !base.is_empty()
        {
            return Symbol::new(base).ok_or(CodecError::EmptySymbol);
        }
        Symbol::from_pair(&lowered).ok_or(CodecError::EmptySymbol)
    }
}

impl Default for TickerCodec {
    fn default() -> Self {
        Self::new("usdt")
    }
}

fn parse_field(field: &'static str, raw: Option<&str>) -> Result<f64, CodecError> {
    let raw = raw.ok_or(CodecError::MissingField(field))?;
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CodecError::InvalidNumber {
            field,
            value: raw.to_string(),
        })
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
