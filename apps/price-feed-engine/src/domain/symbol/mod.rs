//! Symbols and Transport Classification
//!
//! A [`Symbol`] is the case-insensitive identity key used everywhere in the
//! engine: a trimmed, lowercase base ticker such as `btc`. Upstream tickers
//! like `BTCUSDT` are folded onto the same key by stripping the quote
//! currency.
//!
//! Classification decides which transport serves a symbol:
//!
//! - **Major**: listed on the streaming ticker feed.
//! - **Minor**: everything else, served by periodic polling.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Quote currencies stripped from upstream pair tickers, longest first.
const QUOTE_SUFFIXES: &[&str] = &["fdusd", "usdt", "busd", "usdc", "tusd", "usd"];

/// Base tickers with a direct streaming feed.
const MAJOR_SYMBOLS: &[&str] = &[
    "btc", "eth", "bnb", "sol", "xrp", "ada", "doge", "trx", "ton", "dot", "matic", "pol",
    "avax", "link", "ltc", "bch", "atom", "uni", "xlm", "etc", "fil", "near", "apt", "arb",
    "op", "sui", "shib", "pepe", "inj", "aave",
];

// =============================================================================
// Symbol
// =============================================================================

/// Normalized instrument ticker.
///
/// Equality and hashing operate on the normalized form, so `BTC`, ` btc `
/// and `btc` are the same symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize a user-supplied ticker.
    ///
    /// Returns `None` when nothing is left after trimming.
    #[must_use]
    pub fn new(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    /// Normalize an upstream pair ticker (`BTCUSDT` → `btc`).
    ///
    /// The quote suffix is only stripped when a non-empty base remains, so a
    /// bare `USDT` ticker maps to `usdt`.
    #[must_use]
    pub fn from_pair(pair: &str) -> Option<Self> {
        let normalized = Self::new(pair)?;
        for suffix in QUOTE_SUFFIXES {
            if let Some(base) = normalized.0.strip_suffix(suffix)
                && !base.is_empty()
            {
                return Some(Self(base.to_string()));
            }
        }
        Some(normalized)
    }

    /// Borrow the normalized ticker.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Which kind of transport serves a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolClass {
    /// Served by the shared streaming connection.
    Major,
    /// Served by a per-symbol polling timer.
    Minor,
}

impl SymbolClass {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Major => "streaming",
            Self::Minor => "polling",
        }
    }
}

/// Classify a symbol against the streaming allow-list.
///
/// Unknown tickers are always [`SymbolClass::Minor`].
#[must_use]
pub fn classify(symbol: &Symbol) -> SymbolClass {
    if MAJOR_SYMBOLS.contains(&symbol.as_str()) {
        SymbolClass::Major
    } else {
        SymbolClass::Minor
    }
}

// =============================================================================
// Token Request
// =============================================================================

/// A consumer's request to track one token.
///
/// `chain` is carried for callers that know it but is not part of the
/// symbol identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    /// Raw ticker as supplied by the caller.
    pub symbol: String,
    /// Optional chain hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

impl TokenRequest {
    /// Request a token by ticker only.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            chain: None,
        }
    }

    /// Attach a chain hint.
    #[must_use]
    pub fn on_chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = Some(chain.into());
        self
    }
}
