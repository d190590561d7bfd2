//! Price Cache
//!
//! Last-known price per symbol. The engine's dispatch path is the only
//! writer; any number of readers may poll it at their own cadence.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::price::{CacheEntry, PriceUpdate};
use crate::domain::symbol::Symbol;

/// Last-write-wins cache keyed by symbol.
///
/// An update is accepted unless it is older than the stored entry, so a
/// late update from a slower transport can never overwrite a fresher one.
#[derive(Debug, Default)]
pub struct PriceCache {
    entries: RwLock<HashMap<Symbol, CacheEntry>>,
}

impl PriceCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `update` unless a newer entry exists. Returns whether it was
    /// accepted.
    pub fn accept(&self, update: &PriceUpdate) -> bool {
        let mut entries = self.entries.write();
        match entries.get(&update.symbol) {
            Some(existing) if existing.updated_at > update.timestamp => false,
            _ => {
                entries.insert(update.symbol.clone(), CacheEntry::from(update));
                true
            }
        }
    }

    /// Latest entry for `symbol`; `None` until the first update arrives.
    #[must_use]
    pub fn latest(&self, symbol: &Symbol) -> Option<CacheEntry> {
        self.entries.read().get(symbol).copied()
    }

    /// Copy of every entry.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Symbol, CacheEntry)> {
        self.entries
            .read()
            .iter()
            .map(|(s, e)| (s.clone(), *e))
            .collect()
    }

    /// Number of cached symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Forget every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
