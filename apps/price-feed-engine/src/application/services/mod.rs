//! Application Services
//!
//! - [`PriceCache`]: last-known price per symbol
//! - [`Debouncer`]: trailing-edge rate limiter for consumer callbacks
//! - [`PollingTransport`]: per-symbol poll timers over a `QuoteSource`
//! - [`PriceFeedEngine`]: subscription routing, dispatch and lifecycle

pub mod cache;
pub mod delivery;
pub mod engine;
pub mod poller;

pub use cache::PriceCache;
pub use delivery::Debouncer;
pub use engine::{EngineError, EngineOptions, PriceFeedEngine, Subscription};
pub use poller::{PollerConfig, PollingTransport};
