//! DexScreener Response Types
//!
//! Both the search and the pair-detail endpoints answer with a `pairs`
//! array. Only the fields the poller reads are modelled.
//!
//! # References
//!
//! - [DexScreener API](https://docs.dexscreener.com/api/reference)

use serde::Deserialize;

/// Body of `/search` and `/pairs/{chainId}/{pairAddress}`.
///
/// `pairs` is `null` when nothing matched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PairsResponse {
    /// Matching pairs, most liquid first.
    #[serde(default)]
    pub pairs: Option<Vec<Pair>>,
}

impl PairsResponse {
    /// First pair, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Pair> {
        self.pairs.as_deref().and_then(<[Pair]>::first)
    }
}

/// One trading pair on one venue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pair {
    /// Chain identifier, e.g. `solana`.
    pub chain_id: String,
    /// Pool address on that chain.
    pub pair_address: String,
    /// USD price as a decimal string.
    #[serde(default)]
    pub price_usd: Option<String>,
    /// Rolling price changes in percent.
    #[serde(default)]
    pub price_change: Option<PriceChange>,
}

/// Rolling percentage changes keyed by window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct PriceChange {
    /// 24h change.
    #[serde(default)]
    pub h24: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_search_response() {
        let json = r#"{
            "schemaVersion": "1.0.0",
            "pairs": [{
                "chainId": "solana",
                "dexId": "raydium",
                "pairAddress": "8sLbNZoA1cfnvMJLPfp98ZLAnFSYCFApfJKMbiXNLwxj",
                "baseToken": {"address": "So11", "name": "Wrapped SOL", "symbol": "SOL"},
                "priceUsd": "0.00001234",
                "priceChange": {"m5": 0.1, "h1": -0.4, "h6": 2.0, "h24": -12.5},
                "liquidity": {"usd": 150000.0}
            }]
        }"#;

        let response: PairsResponse = serde_json::from_str(json).unwrap();
        let pair = response.first().unwrap();

        assert_eq!(pair.chain_id, "solana");
        assert_eq!(pair.price_usd.as_deref(), Some("0.00001234"));
        assert_eq!(pair.price_change.unwrap().h24, Some(-12.5));
    }

    #[test]
    fn null_pairs_is_empty() {
        let response: PairsResponse =
            serde_json::from_str(r#"{"schemaVersion":"1.0.0","pairs":null,"pair":null}"#).unwrap();
        assert!(response.first().is_none());

        let response: PairsResponse = serde_json::from_str(r#"{"pairs":[]}"#).unwrap();
        assert!(response.first().is_none());
    }

    #[test]
    fn missing_optional_fields() {
        let json = r#"{"pairs":[{"chainId":"base","pairAddress":"0xabc"}]}"#;
        let response: PairsResponse = serde_json::from_str(json).unwrap();
        let pair = response.first().unwrap();

        assert!(pair.price_usd.is_none());
        assert!(pair.price_change.is_none());
    }
}
