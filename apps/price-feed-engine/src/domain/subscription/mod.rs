//! Subscription Registry
//!
//! Tracks which consumers are interested in which symbols and which
//! transport currently serves each symbol.
//!
//! # Design
//!
//! The registry tracks:
//! - Which symbols each consumer is subscribed to
//! - The consumer set of every tracked symbol (the reference count)
//! - The transport kind serving each symbol
//!
//! A symbol is present iff its consumer set is non-empty, so many consumers
//! can share a symbol while only one upstream resource serves it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::domain::symbol::{Symbol, SymbolClass};

// =============================================================================
// Types
// =============================================================================

/// Opaque identity of a consumer callback.
pub type ConsumerId = u64;

/// Upstream changes produced by a registry mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols that gained their first consumer.
    pub added: Vec<(Symbol, SymbolClass)>,
    /// Symbols that lost their last consumer.
    pub removed: Vec<(Symbol, SymbolClass)>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Symbols of the given class that need an upstream subscribe.
    #[must_use]
    pub fn added_of(&self, class: SymbolClass) -> Vec<Symbol> {
        Self::filter(&self.added, class)
    }

    /// Symbols of the given class that need an upstream teardown.
    #[must_use]
    pub fn removed_of(&self, class: SymbolClass) -> Vec<Symbol> {
        Self::filter(&self.removed, class)
    }

    fn filter(entries: &[(Symbol, SymbolClass)], class: SymbolClass) -> Vec<Symbol> {
        entries
            .iter()
            .filter(|(_, c)| *c == class)
            .map(|(s, _)| s.clone())
            .collect()
    }
}

#[derive(Debug)]
struct SymbolEntry {
    consumers: HashSet<ConsumerId>,
    transport: SymbolClass,
}

#[derive(Debug, Default)]
struct RegistryState {
    consumer_symbols: HashMap<ConsumerId, HashSet<Symbol>>,
    symbols: HashMap<Symbol, SymbolEntry>,
}

impl RegistryState {
    fn add(
        &mut self,
        consumer: ConsumerId,
        symbols: &[(Symbol, SymbolClass)],
    ) -> Vec<(Symbol, SymbolClass)> {
        let consumer_set = self.consumer_symbols.entry(consumer).or_default();
        let mut new_upstream = Vec::new();

        for (symbol, class) in symbols {
            if !consumer_set.insert(symbol.clone()) {
                continue;
            }

            let entry = self
                .symbols
                .entry(symbol.clone())
                .or_insert_with(|| SymbolEntry {
                    consumers: HashSet::new(),
                    transport: *class,
                });
            entry.consumers.insert(consumer);

            if entry.consumers.len() == 1 {
                new_upstream.push((symbol.clone(), entry.transport));
            }
        }

        if consumer_set.is_empty() {
            self.consumer_symbols.remove(&consumer);
        }

        new_upstream
    }

    fn remove_consumer(&mut self, consumer: ConsumerId) -> Vec<(Symbol, SymbolClass)> {
        let Some(consumer_set) = self.consumer_symbols.remove(&consumer) else {
            return vec![];
        };

        let mut remove_upstream = Vec::new();

        for symbol in consumer_set {
            let Some(entry) = self.symbols.get_mut(&symbol) else {
                continue;
            };
            entry.consumers.remove(&consumer);

            if entry.consumers.is_empty() {
                let transport = entry.transport;
                self.symbols.remove(&symbol);
                remove_upstream.push((symbol, transport));
            }
        }

        remove_upstream
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe owner of subscription membership.
///
/// # Example
///
/// ```rust
/// use price_feed_engine::domain::subscription::SubscriptionRegistry;
/// use price_feed_engine::domain::symbol::{Symbol, SymbolClass};
///
/// let registry = SubscriptionRegistry::new();
/// let btc = Symbol::new("btc").unwrap();
///
/// let first = registry.next_consumer_id();
/// let changes = registry.add(first, &[(btc.clone(), SymbolClass::Major)]);
/// assert_eq!(changes.added_of(SymbolClass::Major), vec![btc.clone()]);
///
/// // A second consumer shares the upstream subscription
/// let second = registry.next_consumer_id();
/// assert!(registry.add(second, &[(btc.clone(), SymbolClass::Major)]).is_empty());
///
/// // Only the last consumer leaving tears it down
/// assert!(registry.remove_consumer(first).is_empty());
/// let changes = registry.remove_consumer(second);
/// assert_eq!(changes.removed_of(SymbolClass::Major), vec![btc]);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh consumer identity.
    pub fn next_consumer_id(&self) -> ConsumerId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register interest of `consumer` in `symbols`.
    ///
    /// A symbol already tracked keeps its existing transport kind.
    pub fn add(
        &self,
        consumer: ConsumerId,
        symbols: &[(Symbol, SymbolClass)],
    ) -> SubscriptionChanges {
        let added = self.state.write().add(consumer, symbols);
        SubscriptionChanges {
            added,
            removed: vec![],
        }
    }

    /// Drop every subscription held by `consumer`.
    ///
    /// Unknown consumers produce no changes, which makes repeated removal
    /// harmless.
    pub fn remove_consumer(&self, consumer: ConsumerId) -> SubscriptionChanges {
        let removed = self.state.write().remove_consumer(consumer);
        SubscriptionChanges {
            added: vec![],
            removed,
        }
    }

    /// Drop everything, returning each symbol that was tracked.
    pub fn clear(&self) -> SubscriptionChanges {
        let mut state = self.state.write();
        state.consumer_symbols.clear();
        let removed = state
            .symbols
            .drain()
            .map(|(symbol, entry)| (symbol, entry.transport))
            .collect();
        SubscriptionChanges {
            added: vec![],
            removed,
        }
    }

    /// Whether any consumer tracks `symbol`.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.state.read().symbols.contains_key(symbol)
    }

    /// Whether `consumer` still holds any subscription.
    #[must_use]
    pub fn is_active(&self, consumer: ConsumerId) -> bool {
        self.state.read().consumer_symbols.contains_key(&consumer)
    }

    /// Consumers interested in `symbol`.
    #[must_use]
    pub fn consumers_of(&self, symbol: &Symbol) -> Vec<ConsumerId> {
        self.state
            .read()
            .symbols
            .get(symbol)
            .map(|e| e.consumers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Symbols held by `consumer`.
    #[must_use]
    pub fn symbols_of(&self, consumer: ConsumerId) -> Vec<Symbol> {
        self.state
            .read()
            .consumer_symbols
            .get(&consumer)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Transport currently serving `symbol`.
    #[must_use]
    pub fn transport_of(&self, symbol: &Symbol) -> Option<SymbolClass> {
        self.state.read().symbols.get(symbol).map(|e| e.transport)
    }

    /// All tracked symbols served by `class`.
    #[must_use]
    pub fn symbols_by_transport(&self, class: SymbolClass) -> Vec<Symbol> {
        self.state
            .read()
            .symbols
            .iter()
            .filter(|(_, e)| e.transport == class)
            .map(|(s, _)| s.clone())
            .collect()
    }

    /// Number of distinct tracked symbols.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.state.read().symbols.len()
    }

    /// Get statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        let streaming = state
            .symbols
            .values()
            .filter(|e| e.transport == SymbolClass::Major)
            .count();
        RegistryStats {
            streaming_symbols: streaming,
            polling_symbols: state.symbols.len() - streaming,
            consumer_count: state.consumer_symbols.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    /// Symbols served by the streaming connection.
    pub streaming_symbols: usize,
    /// Symbols served by polling timers.
    pub polling_symbols: usize,
    /// Consumers holding at least one subscription.
    pub consumer_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn major(s: &str) -> (Symbol, SymbolClass) {
        (sym(s), SymbolClass::Major)
    }

    fn minor(s: &str) -> (Symbol, SymbolClass) {
        (sym(s), SymbolClass::Minor)
    }

    #[test]
    fn add_new_symbol() {
        let registry = SubscriptionRegistry::new();

        let changes = registry.add(1, &[major("btc")]);

        assert_eq!(changes.added, vec![major("btc")]);
        assert!(changes.removed.is_empty());
        assert!(registry.contains(&sym("btc")));
    }

    #[test]
    fn add_existing_symbol_shares_upstream() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, &[major("btc")]);
        let changes = registry.add(2, &[major("btc")]);

        assert!(changes.is_empty());
        assert_eq!(registry.consumers_of(&sym("btc")).len(), 2);
    }

    #[test]
    fn add_duplicate_consumer_is_noop() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, &[major("btc")]);
        let changes = registry.add(1, &[major("btc")]);

        assert!(changes.is_empty());
        assert_eq!(registry.consumers_of(&sym("btc")), vec![1]);
    }

    #[test]
    fn existing_symbol_keeps_its_transport() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, &[minor("pepe")]);
        registry.add(2, &[major("pepe")]);

        assert_eq!(registry.transport_of(&sym("pepe")), Some(SymbolClass::Minor));
    }

    #[test]
    fn remove_with_remaining_consumers() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, &[major("btc")]);
        registry.add(2, &[major("btc")]);

        let changes = registry.remove_consumer(1);

        assert!(changes.is_empty());
        assert!(registry.contains(&sym("btc")));
        assert_eq!(registry.consumers_of(&sym("btc")), vec![2]);
    }

    #[test]
    fn remove_last_consumer() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, &[major("btc"), minor("shitcoinxyz")]);
        let changes = registry.remove_consumer(1);

        assert_eq!(changes.removed_of(SymbolClass::Major), vec![sym("btc")]);
        assert_eq!(
            changes.removed_of(SymbolClass::Minor),
            vec![sym("shitcoinxyz")]
        );
        assert_eq!(registry.symbol_count(), 0);
        assert!(!registry.is_active(1));
    }

    #[test]
    fn remove_twice_is_noop() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, &[major("btc")]);
        registry.add(2, &[major("btc")]);

        registry.remove_consumer(1);
        let changes = registry.remove_consumer(1);

        assert!(changes.is_empty());
        assert_eq!(registry.consumers_of(&sym("btc")), vec![2]);
    }

    #[test]
    fn clear_returns_everything() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, &[major("btc"), minor("wif")]);
        registry.add(2, &[major("eth")]);

        let changes = registry.clear();

        assert_eq!(changes.removed.len(), 3);
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn symbols_of_and_by_transport() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, &[major("btc"), minor("wif")]);
        registry.add(2, &[major("eth")]);

        let mut mine = registry.symbols_of(1);
        mine.sort();
        assert_eq!(mine, vec![sym("btc"), sym("wif")]);

        let mut majors = registry.symbols_by_transport(SymbolClass::Major);
        majors.sort();
        assert_eq!(majors, vec![sym("btc"), sym("eth")]);
        assert_eq!(
            registry.symbols_by_transport(SymbolClass::Minor),
            vec![sym("wif")]
        );
    }

    #[test]
    fn stats_are_accurate() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, &[major("btc"), minor("wif")]);
        registry.add(2, &[major("btc")]);

        let stats = registry.stats();
        assert_eq!(stats.streaming_symbols, 1);
        assert_eq!(stats.polling_symbols, 1);
        assert_eq!(stats.consumer_count, 2);
    }

    #[test]
    fn consumer_ids_are_unique() {
        let registry = SubscriptionRegistry::new();
        let a = registry.next_consumer_id();
        let b = registry.next_consumer_id();
        assert_ne!(a, b);
    }

    #[test]
    fn thread_safety_concurrent_subscriptions() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        let mut handles = vec![];

        for i in 0..10 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                r.add(i, &[minor(&format!("sym{i}")), major("btc")]);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = registry.stats();
        assert_eq!(stats.consumer_count, 10);
        assert_eq!(stats.polling_symbols, 10);
        assert_eq!(stats.streaming_symbols, 1);
    }

    #[test]
    fn thread_safety_concurrent_removals() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        for i in 0..10u64 {
            registry.add(i, &[major("btc")]);
        }

        let mut handles = vec![];
        for i in 0..10u64 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || r.remove_consumer(i)));
        }

        let teardowns: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap().removed.len())
            .sum();

        // Exactly one removal observed the last consumer leaving
        assert_eq!(teardowns, 1);
        assert_eq!(registry.symbol_count(), 0);
    }
}
