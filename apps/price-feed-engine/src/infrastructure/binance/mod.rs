//! Binance Ticker Stream Adapter
//!
//! Implements the shared streaming connection for major symbols:
//!
//! - **Messages**: control requests and ticker payloads (JSON)
//! - **Codec**: frame decoding and ticker validation
//! - **Heartbeat**: periodic pings on an open connection
//! - **Client**: the driver task behind [`StreamingTransport`](crate::application::ports::StreamingTransport)

pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod messages;

pub use client::{BinanceStreamClient, StreamClientConfig, StreamClientError};
pub use codec::{CodecError, StreamMessage, TickerCodec};
pub use heartbeat::{Heartbeat, HeartbeatConfig};
pub use messages::{
    ControlMethod, ControlRequest, ControlResponse, ErrorDetail, ErrorResponse, TICKER_EVENT,
    TickerMessage,
};
