//! DexScreener Adapter
//!
//! HTTP quote source polled for minor symbols.

pub mod client;
pub mod messages;

pub use client::{DexScreenerClient, DexScreenerConfig};
pub use messages::{Pair, PairsResponse, PriceChange};
