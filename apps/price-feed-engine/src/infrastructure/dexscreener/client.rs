//! DexScreener Quote Source
//!
//! Implements [`QuoteSource`] over the public DexScreener REST API.
//!
//! - Search: `GET {base}/search?q={symbol}&limit=1`
//! - Pair:   `GET {base}/pairs/{chainId}/{pairAddress}`

use std::time::Duration;

use async_trait::async_trait;

use super::messages::{Pair, PairsResponse};
use crate::application::ports::{PairQuote, QuoteSource, QuoteSourceError, ResolvedPair};
use crate::domain::symbol::Symbol;
use crate::infrastructure::config::PollingSettings;

/// Configuration for the DexScreener client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexScreenerConfig {
    /// API base URL without a trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for DexScreenerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.dexscreener.com/latest/dex".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl DexScreenerConfig {
    /// Create configuration from `PollingSettings`.
    #[must_use]
    pub fn from_polling_settings(settings: &PollingSettings) -> Self {
        Self {
            base_url: settings.quote_api_url.trim_end_matches('/').to_string(),
            timeout: settings.request_timeout,
        }
    }
}

/// HTTP client for the DexScreener quote aggregator.
#[derive(Debug, Clone)]
pub struct DexScreenerClient {
    client: reqwest::Client,
    base_url: String,
}

impl DexScreenerClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &DexScreenerConfig) -> Result<Self, QuoteSourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("price-feed-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| QuoteSourceError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, request: reqwest::RequestBuilder) -> Result<Option<PairsResponse>, QuoteSourceError> {
        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(QuoteSourceError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<PairsResponse>()
            .await
            .map(Some)
            .map_err(|e| {
                if e.is_timeout() {
                    QuoteSourceError::Timeout
                } else {
                    QuoteSourceError::InvalidResponse(e.to_string())
                }
            })
    }
}

#[async_trait]
impl QuoteSource for DexScreenerClient {
    async fn search(&self, symbol: &Symbol) -> Result<Option<PairQuote>, QuoteSourceError> {
        let url = format!("{}/search", self.base_url);
        let request = self
            .client
            .get(url)
            .query(&[("q", symbol.as_str()), ("limit", "1")]);

        match self.fetch(request).await? {
            Some(response) => response
                .first()
                .map(|pair| to_quote(symbol, pair))
                .transpose(),
            None => Ok(None),
        }
    }

    async fn pair(&self, pair: &ResolvedPair) -> Result<Option<PairQuote>, QuoteSourceError> {
        let url = format!(
            "{}/pairs/{}/{}",
            self.base_url, pair.venue_id, pair.pair_address
        );

        match self.fetch(self.client.get(url)).await? {
            Some(response) => response
                .first()
                .map(|found| to_quote(&pair.symbol, found))
                .transpose(),
            None => Ok(None),
        }
    }
}

fn to_quote(symbol: &Symbol, pair: &Pair) -> Result<PairQuote, QuoteSourceError> {
    let raw = pair
        .price_usd
        .as_deref()
        .ok_or_else(|| QuoteSourceError::InvalidResponse("pair has no priceUsd".to_string()))?;

    let price_usd = raw
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| QuoteSourceError::InvalidResponse(format!("invalid priceUsd {raw:?}")))?;

    Ok(PairQuote {
        pair: ResolvedPair {
            symbol: symbol.clone(),
            venue_id: pair.chain_id.clone(),
            pair_address: pair.pair_address.clone(),
        },
        price_usd,
        change_24h: pair
            .price_change
            .and_then(|c| c.h24)
            .filter(|c| c.is_finite()),
    })
}

fn map_reqwest_error(e: reqwest::Error) -> QuoteSourceError {
    if e.is_timeout() {
        QuoteSourceError::Timeout
    } else {
        QuoteSourceError::Network(e.to_string())
    }
}
