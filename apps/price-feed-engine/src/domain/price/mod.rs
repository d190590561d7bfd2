//! Price Updates
//!
//! The common shape both transports normalize into, and the per-symbol
//! cache record derived from it.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::domain::symbol::{Symbol, SymbolClass};

/// A normalized price observation.
///
/// `timestamp` is a monotonic receive time and is what ordering decisions
/// use. `received_at` is the wall-clock equivalent for display.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    /// Instrument the price belongs to.
    pub symbol: Symbol,
    /// Last price in USD, always positive.
    pub price: f64,
    /// 24h change in percent, when the source reports it.
    pub change_24h: Option<f64>,
    /// Monotonic receive time.
    pub timestamp: Instant,
    /// Wall-clock receive time.
    pub received_at: DateTime<Utc>,
    /// Transport that produced the update.
    pub source: SymbolClass,
}

impl PriceUpdate {
    /// Build an update stamped with the current time.
    ///
    /// Returns `None` unless `price` is finite and strictly positive. A
    /// non-finite change is treated as absent.
    #[must_use]
    pub fn new(
        symbol: Symbol,
        price: f64,
        change_24h: Option<f64>,
        source: SymbolClass,
    ) -> Option<Self> {
        if !price.is_finite() || price <= 0.0 {
            return None;
        }

        Some(Self {
            symbol,
            price,
            change_24h: change_24h.filter(|c| c.is_finite()),
            timestamp: Instant::now(),
            received_at: Utc::now(),
            source,
        })
    }
}

/// Last accepted value for a symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheEntry {
    /// Last price in USD.
    pub price: f64,
    /// 24h change in percent.
    pub change_24h: Option<f64>,
    /// Monotonic time of the update that produced this entry.
    pub updated_at: Instant,
    /// Wall-clock time of the update that produced this entry.
    pub received_at: DateTime<Utc>,
}

impl From<&PriceUpdate> for CacheEntry {
    fn from(update: &PriceUpdate) -> Self {
        Self {
            price: update.price,
            change_24h: update.change_24h,
            updated_at: update.timestamp,
            received_at: update.received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc() -> Symbol {
        Symbol::new("btc").unwrap()
    }

    #[test]
    fn rejects_non_positive_prices() {
        assert!(PriceUpdate::new(btc(), 0.0, None, SymbolClass::Major).is_none());
        assert!(PriceUpdate::new(btc(), -1.0, None, SymbolClass::Major).is_none());
        assert!(PriceUpdate::new(btc(), f64::NAN, None, SymbolClass::Major).is_none());
    }

    #[test]
    fn drops_non_finite_change() {
        let update = PriceUpdate::new(btc(), 1.0, Some(f64::INFINITY), SymbolClass::Minor).unwrap();
        assert!(update.change_24h.is_none());
    }

    #[test]
    fn cache_entry_copies_fields() {
        let update = PriceUpdate::new(btc(), 65_000.12, Some(1.5), SymbolClass::Major).unwrap();
        let entry = CacheEntry::from(&update);
        assert_eq!(entry.price, 65_000.12);
        assert_eq!(entry.change_24h, Some(1.5));
        assert_eq!(entry.updated_at, update.timestamp);
    }
}
