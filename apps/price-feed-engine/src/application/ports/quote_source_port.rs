//! Quote Source Port (Driven Port)
//!
//! Interface to the secondary quote aggregator used for symbols the
//! streaming feed does not carry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::symbol::Symbol;

/// Venue identity of a tradable pair, cached after the first search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPair {
    /// Symbol the pair was resolved for.
    pub symbol: Symbol,
    /// Venue (chain) identifier.
    pub venue_id: String,
    /// Pair (pool) address on that venue.
    pub pair_address: String,
}

/// One price observation from the quote source.
#[derive(Debug, Clone, PartialEq)]
pub struct PairQuote {
    /// Pair the quote came from.
    pub pair: ResolvedPair,
    /// Price in USD.
    pub price_usd: f64,
    /// 24h change in percent.
    pub change_24h: Option<f64>,
}

/// Quote source error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QuoteSourceError {
    /// Request could not be completed.
    #[error("quote source network error: {0}")]
    Network(String),

    /// Upstream answered with a non-success status.
    #[error("quote source returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Response body did not match the expected shape.
    #[error("invalid quote source response: {0}")]
    InvalidResponse(String),

    /// Request exceeded the per-request timeout.
    #[error("quote source request timed out")]
    Timeout,
}

impl QuoteSourceError {
    /// Label used in metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Status { .. } => "status",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Timeout => "timeout",
        }
    }
}

/// Port for the polling quote source.
///
/// `Ok(None)` means "not found" and is distinct from a failed request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Search by symbol and return the most liquid match.
    async fn search(&self, symbol: &Symbol) -> Result<Option<PairQuote>, QuoteSourceError>;

    /// Fetch a previously resolved pair directly.
    async fn pair(&self, pair: &ResolvedPair) -> Result<Option<PairQuote>, QuoteSourceError>;
}
