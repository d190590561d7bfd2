//! Port Interfaces
//!
//! The contracts the engine drives. Infrastructure adapters implement
//! them against real networks; tests substitute fakes.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StreamingTransport`: the shared ticker connection for major symbols
//! - `QuoteSource`: the secondary quote aggregator polled for minor symbols

mod quote_source_port;
mod streaming_port;

pub use quote_source_port::{PairQuote, QuoteSource, QuoteSourceError, ResolvedPair};
pub use streaming_port::{StreamingTransport, UpdateSender};

#[cfg(test)]
pub use quote_source_port::MockQuoteSource;
