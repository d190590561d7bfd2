//! Price Feed Engine
//!
//! Wires the registry, both transports, the cache and the per-consumer
//! debouncers together behind `subscribe` / `latest`.
//!
//! # Data Flow
//!
//! ```text
//! subscribe(tokens, cb) ──► classify ──► registry ──┬─► StreamingTransport (majors)
//!                                                   └─► PollingTransport   (minors)
//!
//! transports ──► mpsc ──► dispatch ──► PriceCache (sync)
//!                                  └─► Debouncer per consumer ──► cb
//! ```
//!
//! # Consistency
//!
//! Subscribe, unsubscribe and dispatch serialize on one lifecycle lock.
//! Once [`Subscription::unsubscribe`] returns, the registry no longer tracks
//! the released symbols, so any update for them still in flight is dropped
//! before it reaches the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::cache::PriceCache;
use super::delivery::Debouncer;
use super::poller::{PollerConfig, PollingTransport};
use crate::application::ports::{QuoteSource, StreamingTransport, UpdateSender};
use crate::domain::connection::ConnectionState;
use crate::domain::price::{CacheEntry, PriceUpdate};
use crate::domain::subscription::{
    ConsumerId, RegistryStats, SubscriptionChanges, SubscriptionRegistry,
};
use crate::domain::symbol::{Symbol, SymbolClass, TokenRequest, classify};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration & Errors
// =============================================================================

/// Tuning knobs for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Debounce window per consumer callback.
    pub debounce: Duration,
    /// Cadence suggested to consumers that poll the cache.
    pub ui_refresh_interval: Duration,
    /// Upper bound on distinct tracked symbols.
    pub max_tracked_symbols: usize,
    /// Capacity of the transport-to-engine update channel.
    pub update_buffer: usize,
    /// Poll timing for minor symbols.
    pub poller: PollerConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            ui_refresh_interval: Duration::from_secs(1),
            max_tracked_symbols: 100,
            update_buffer: 1024,
            poller: PollerConfig::default(),
        }
    }
}

/// Engine lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// `start` was called outside a Tokio runtime.
    #[error("engine must be started from within a Tokio runtime")]
    NoRuntime,

    /// `start` was called twice.
    #[error("engine already started")]
    AlreadyStarted,

    /// The engine has not been started yet.
    #[error("engine not started")]
    NotStarted,

    /// The engine was stopped and cannot be reused.
    #[error("engine stopped")]
    Stopped,
}

// =============================================================================
// Engine
// =============================================================================

enum Lifecycle {
    Idle,
    Running {
        handle: Handle,
        updates: UpdateSender,
        shutdown: CancellationToken,
    },
    Stopped,
}

struct EngineInner {
    options: EngineOptions,
    registry: SubscriptionRegistry,
    cache: PriceCache,
    streaming: Arc<dyn StreamingTransport>,
    poller: PollingTransport,
    consumers: Mutex<HashMap<ConsumerId, Debouncer<PriceUpdate>>>,
    lifecycle: Mutex<Lifecycle>,
}

/// Live price distribution engine.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct PriceFeedEngine {
    inner: Arc<EngineInner>,
}

impl PriceFeedEngine {
    /// Build an engine over the given transports. Nothing runs until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(
        streaming: Arc<dyn StreamingTransport>,
        quotes: Arc<dyn QuoteSource>,
        options: EngineOptions,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                options,
                registry: SubscriptionRegistry::new(),
                cache: PriceCache::new(),
                streaming,
                poller: PollingTransport::new(quotes, options.poller),
                consumers: Mutex::new(HashMap::new()),
                lifecycle: Mutex::new(Lifecycle::Idle),
            }),
        }
    }

    /// Attach the streaming transport and spawn the dispatch loop on the
    /// current runtime.
    pub fn start(&self) -> Result<(), EngineError> {
        let handle = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let mut lifecycle = self.inner.lifecycle.lock();

        match *lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Running { .. } => return Err(EngineError::AlreadyStarted),
            Lifecycle::Stopped => return Err(EngineError::Stopped),
        }

        let (tx, rx) = mpsc::channel(self.inner.options.update_buffer.max(1));
        let shutdown = CancellationToken::new();

        self.inner.streaming.attach(&handle, tx.clone());
        handle.spawn(dispatch_loop(
            Arc::downgrade(&self.inner),
            rx,
            shutdown.clone(),
        ));

        *lifecycle = Lifecycle::Running {
            handle,
            updates: tx,
            shutdown,
        };

        tracing::info!(
            debounce_ms = self.inner.options.debounce.as_millis(),
            max_tracked_symbols = self.inner.options.max_tracked_symbols,
            "Price feed engine started"
        );
        Ok(())
    }

    /// Subscribe `callback` to the given tokens.
    ///
    /// Each token is normalized and classified; majors ride the shared
    /// streaming connection and minors get a poll timer. Symbols beyond
    /// the tracked-symbol limit are skipped with a warning and are absent
    /// from [`Subscription::symbols`].
    ///
    /// The callback runs on its own task, at most once per debounce
    /// window, with the most recent update across all of its symbols.
    pub fn subscribe<F>(
        &self,
        tokens: &[TokenRequest],
        callback: F,
    ) -> Result<Subscription, EngineError>
    where
        F: Fn(PriceUpdate) + Send + Sync + 'static,
    {
        let inner = &self.inner;
        let lifecycle = inner.lifecycle.lock();
        let (handle, updates, shutdown) = match &*lifecycle {
            Lifecycle::Idle => return Err(EngineError::NotStarted),
            Lifecycle::Stopped => return Err(EngineError::Stopped),
            Lifecycle::Running {
                handle,
                updates,
                shutdown,
            } => (handle, updates, shutdown),
        };

        let wanted = inner.admit(tokens);
        let id = inner.registry.next_consumer_id();

        if !wanted.is_empty() {
            let debouncer = Debouncer::spawn(
                handle,
                inner.options.debounce,
                shutdown.child_token(),
                guarded_callback(Arc::downgrade(inner), id, callback),
            );
            inner.consumers.lock().insert(id, debouncer);

            let changes = inner.registry.add(id, &wanted);
            inner.apply_additions(&changes, handle, updates);
        }

        tracing::debug!(
            consumer = id,
            symbols = wanted.len(),
            "Consumer subscribed"
        );

        Ok(Subscription {
            id,
            symbols: wanted.into_iter().map(|(s, _)| s).collect(),
            engine: Arc::downgrade(inner),
            active: AtomicBool::new(true),
        })
    }

    /// Latest cached price for `symbol`, if any update has arrived.
    ///
    /// Accepts raw tickers; `"BTC"` and `"btc"` are the same key.
    #[must_use]
    pub fn latest(&self, symbol: &str) -> Option<CacheEntry> {
        Symbol::new(symbol).and_then(|s| self.inner.cache.latest(&s))
    }

    /// Every cached price.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Symbol, CacheEntry)> {
        self.inner.cache.snapshot()
    }

    /// Current streaming connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.streaming.watch_state().borrow()
    }

    /// Observe streaming connection state changes.
    #[must_use]
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.streaming.watch_state()
    }

    /// Manually retrigger the streaming connection, starting again from
    /// attempt zero.
    pub fn reconnect(&self) {
        tracing::info!(
            symbols = ?self.inner.registry.symbols_by_transport(SymbolClass::Major),
            "Manual streaming reconnect requested"
        );
        self.inner.streaming.reconnect();
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.inner.registry.stats()
    }

    /// Cadence at which cache-polling consumers should refresh.
    #[must_use]
    pub fn ui_refresh_interval(&self) -> Duration {
        self.inner.options.ui_refresh_interval
    }

    /// Whether the engine is started and not stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.inner.lifecycle.lock(), Lifecycle::Running { .. })
    }

    /// Handle the global logout signal: disconnect the stream, stop every
    /// poll timer, drop every subscription and clear the cache.
    ///
    /// The engine keeps running and accepts new subscriptions.
    pub fn reset(&self) {
        let closing = {
            let _lifecycle = self.inner.lifecycle.lock();
            self.inner.teardown()
        };
        close_all(closing);
        tracing::info!("Price feed engine reset");
    }

    /// Tear everything down and end the dispatch loop. The engine cannot be
    /// restarted afterwards.
    pub fn stop(&self) {
        let closing = {
            let mut lifecycle = self.inner.lifecycle.lock();
            let closing = self.inner.teardown();

            if let Lifecycle::Running { shutdown, .. } =
                std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
            {
                shutdown.cancel();
                tracing::info!("Price feed engine stopped");
            }
            closing
        };
        close_all(closing);
    }
}

impl std::fmt::Debug for PriceFeedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceFeedEngine")
            .field("options", &self.inner.options)
            .field("stats", &self.inner.registry.stats())
            .finish_non_exhaustive()
    }
}

impl EngineInner {
    /// Normalize, dedupe and classify tokens, enforcing the symbol limit.
    fn admit(&self, tokens: &[TokenRequest]) -> Vec<(Symbol, SymbolClass)> {
        let mut wanted: Vec<(Symbol, SymbolClass)> = Vec::with_capacity(tokens.len());
        let mut new_symbols = 0usize;
        let tracked = self.registry.symbol_count();

        for token in tokens {
            let Some(symbol) = Symbol::new(&token.symbol) else {
                tracing::warn!(token = %token.symbol, "Ignoring empty symbol");
                continue;
            };
            if wanted.iter().any(|(s, _)| *s == symbol) {
                continue;
            }

            if !self.registry.contains(&symbol) {
                if tracked + new_symbols >= self.options.max_tracked_symbols {
                    tracing::warn!(
                        symbol = %symbol,
                        limit = self.options.max_tracked_symbols,
                        "Tracked symbol limit reached; skipping"
                    );
                    continue;
                }
                new_symbols += 1;
            }

            let class = self.registry.transport_of(&symbol).unwrap_or_else(|| classify(&symbol));
            wanted.push((symbol, class));
        }

        wanted
    }

    fn apply_additions(&self, changes: &SubscriptionChanges, handle: &Handle, updates: &UpdateSender) {
        let majors = changes.added_of(SymbolClass::Major);
        if !majors.is_empty() {
            tracing::info!(symbols = ?majors, "Adding streaming symbols");
            self.streaming.subscribe(&majors);
        }

        let minors = changes.added_of(SymbolClass::Minor);
        if !minors.is_empty() {
            tracing::info!(symbols = ?minors, "Adding polled symbols");
            self.poller.start(handle, &minors, updates);
        }

        self.publish_gauges();
    }

    fn apply_removals(&self, changes: &SubscriptionChanges) {
        let majors = changes.removed_of(SymbolClass::Major);
        if !majors.is_empty() {
            tracing::info!(symbols = ?majors, "Removing streaming symbols");
            self.streaming.unsubscribe(&majors);
        }

        let minors = changes.removed_of(SymbolClass::Minor);
        if !minors.is_empty() {
            tracing::info!(symbols = ?minors, "Removing polled symbols");
            self.poller.stop(&minors);
        }

        if !changes.is_empty() && self.registry.symbol_count() == 0 {
            self.streaming.disconnect();
        }

        self.publish_gauges();
    }

    /// Drop one consumer. Caller must not hold the lifecycle lock.
    fn release(&self, id: ConsumerId) {
        // Closed before locking: close waits on a running callback, which
        // may itself call into the engine.
        let debouncer = self.consumers.lock().remove(&id);
        if let Some(debouncer) = debouncer {
            debouncer.close();
        }

        let lifecycle = self.lifecycle.lock();
        let held = self.registry.symbols_of(id);
        let changes = self.registry.remove_consumer(id);
        if matches!(*lifecycle, Lifecycle::Running { .. }) {
            self.apply_removals(&changes);
        }

        tracing::debug!(
            consumer = id,
            symbols = ?held,
            released = changes.removed.len(),
            "Consumer unsubscribed"
        );
    }

    /// Clear all state. Caller holds the lifecycle lock and closes the
    /// returned debouncers after releasing it.
    fn teardown(&self) -> Vec<Debouncer<PriceUpdate>> {
        let closing: Vec<_> = self.consumers.lock().drain().map(|(_, d)| d).collect();

        let changes = self.registry.clear();
        self.poller.stop_all();
        self.streaming.disconnect();
        self.cache.clear();

        tracing::debug!(released = changes.removed.len(), "Dropped all subscriptions");
        self.publish_gauges();
        closing
    }

    /// Route one transport update. Runs under the lifecycle lock.
    fn dispatch(&self, update: PriceUpdate) {
        let lifecycle = self.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Running { .. }) {
            return;
        }

        metrics::record_update_received(update.source);

        if !self.registry.contains(&update.symbol) {
            tracing::trace!(symbol = %update.symbol, "Dropping update for untracked symbol");
            metrics::record_update_dropped("untracked");
            return;
        }

        if !self.cache.accept(&update) {
            tracing::debug!(symbol = %update.symbol, "Dropping out-of-order update");
            metrics::record_update_dropped("stale");
            return;
        }

        let consumers = self.consumers.lock();
        for id in self.registry.consumers_of(&update.symbol) {
            if let Some(debouncer) = consumers.get(&id) {
                debouncer.push(update.clone());
            }
        }
    }

    fn publish_gauges(&self) {
        let stats = self.registry.stats();
        metrics::set_tracked_symbols(SymbolClass::Major, stats.streaming_symbols);
        metrics::set_tracked_symbols(SymbolClass::Minor, stats.polling_symbols);
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Lifecycle::Running { shutdown, .. } = &*self.lifecycle.get_mut() {
            shutdown.cancel();
        }
    }
}

fn close_all(debouncers: Vec<Debouncer<PriceUpdate>>) {
    for debouncer in debouncers {
        debouncer.close();
    }
}

/// Wrap a consumer callback with a liveness check against the registry.
///
/// The check and the call both run while the debouncer holds its delivery
/// gate, so a concurrent `close` waits for them.
fn guarded_callback<F>(
    engine: Weak<EngineInner>,
    id: ConsumerId,
    callback: F,
) -> impl Fn(PriceUpdate) + Send + 'static
where
    F: Fn(PriceUpdate) + Send + Sync + 'static,
{
    move |update| {
        let live = engine
            .upgrade()
            .is_some_and(|inner| inner.registry.is_active(id));
        if live {
            metrics::record_delivery();
            callback(update);
        }
    }
}

async fn dispatch_loop(
    engine: Weak<EngineInner>,
    mut updates: mpsc::Receiver<PriceUpdate>,
    shutdown: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            update = updates.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };

        let Some(inner) = engine.upgrade() else { break };
        inner.dispatch(update);
    }

    tracing::debug!("Dispatch loop finished");
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Handle returned by [`PriceFeedEngine::subscribe`].
///
/// Dropping the handle unsubscribes. [`unsubscribe`](Self::unsubscribe) may
/// be called any number of times; only the first call has an effect.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: ConsumerId,
    symbols: Vec<Symbol>,
    engine: Weak<EngineInner>,
    active: AtomicBool,
}

impl Subscription {
    /// Consumer identity.
    #[must_use]
    pub const fn id(&self) -> ConsumerId {
        self.id
    }

    /// Symbols admitted for this consumer.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Whether the consumer still holds its symbols.
    ///
    /// False after `unsubscribe`, after a logout reset, or when every token
    /// was rejected.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
            && self
                .engine
                .upgrade()
                .is_some_and(|inner| inner.registry.is_active(self.id))
    }

    /// Release every symbol held by this consumer.
    ///
    /// Transport teardown for symbols that lost their last consumer
    /// happens before this returns. If the callback is running on another
    /// thread, this waits for it to return; no delivery follows.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.engine.upgrade() {
            inner.release(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("symbols", &self.symbols)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
