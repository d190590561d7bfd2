//! Polling Transport
//!
//! One timer task per minor symbol, fetching from the [`QuoteSource`] on a
//! fixed interval. The first fetch resolves the symbol to a pair through
//! search; later fetches reuse that pair until the source reports it gone.
//!
//! Failures never leave the task: a failed or empty cycle emits nothing and
//! the next tick proceeds on schedule.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{QuoteSource, QuoteSourceError, ResolvedPair, UpdateSender};
use crate::domain::price::PriceUpdate;
use crate::domain::symbol::{Symbol, SymbolClass};
use crate::infrastructure::metrics;

/// Timing for the per-symbol poll loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Time between fetches for one symbol.
    pub interval: Duration,
    /// Upper bound on a single search or pair request.
    pub request_timeout: Duration,
}

/// Shortest poll period; `tokio::time::interval` rejects zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl PollerConfig {
    /// Clamp the interval to at least 1ms and replace a zero
    /// request timeout with the default one.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let request_timeout = if self.request_timeout.is_zero() {
            Self::default().request_timeout
        } else {
            self.request_timeout
        };
        Self {
            interval: self.interval.max(MIN_POLL_INTERVAL),
            request_timeout,
        }
    }
}

/// Owner of the per-symbol poll timers.
pub struct PollingTransport {
    source: Arc<dyn QuoteSource>,
    config: PollerConfig,
    timers: Mutex<HashMap<Symbol, CancellationToken>>,
}

impl PollingTransport {
    /// Create a transport with no active timers.
    ///
    /// A zero interval is clamped to 1ms and a zero request timeout falls
    /// back to the default.
    #[must_use]
    pub fn new(source: Arc<dyn QuoteSource>, config: PollerConfig) -> Self {
        let sanitized = config.sanitized();
        if sanitized != config {
            tracing::warn!(
                interval_ms = config.interval.as_millis(),
                request_timeout_ms = config.request_timeout.as_millis(),
                "Adjusted zero poll timing"
            );
        }
        Self {
            source,
            config: sanitized,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Start a timer for each symbol that does not already have one.
    ///
    /// The first fetch is issued immediately.
    pub fn start(&self, handle: &Handle, symbols: &[Symbol], updates: &UpdateSender) {
        let mut timers = self.timers.lock();

        for symbol in symbols {
            if timers.contains_key(symbol) {
                continue;
            }

            let cancel = CancellationToken::new();
            timers.insert(symbol.clone(), cancel.clone());

            tracing::debug!(
                symbol = %symbol,
                interval_secs = self.config.interval.as_secs(),
                "Starting poll timer"
            );

            handle.spawn(poll_loop(
                Arc::clone(&self.source),
                symbol.clone(),
                self.config,
                updates.clone(),
                cancel,
            ));
        }
    }

    /// Stop and forget the timers for `symbols`.
    ///
    /// An in-flight fetch for a stopped symbol is abandoned and never emits.
    pub fn stop(&self, symbols: &[Symbol]) {
        let mut timers = self.timers.lock();
        for symbol in symbols {
            if let Some(cancel) = timers.remove(symbol) {
                cancel.cancel();
                tracing::debug!(symbol = %symbol, "Stopped poll timer");
            }
        }
    }

    /// Stop every timer.
    pub fn stop_all(&self) {
        let drained: Vec<_> = self.timers.lock().drain().collect();
        for (_, cancel) in &drained {
            cancel.cancel();
        }
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Stopped all poll timers");
        }
    }

    /// Whether `symbol` has a running timer.
    #[must_use]
    pub fn is_polling(&self, symbol: &Symbol) -> bool {
        self.timers.lock().contains_key(symbol)
    }

    /// Number of running timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    /// Whether no timer is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.lock().is_empty()
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl std::fmt::Debug for PollingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingTransport")
            .field("config", &self.config)
            .field("timers", &self.timers.lock().len())
            .finish_non_exhaustive()
    }
}

async fn poll_loop(
    source: Arc<dyn QuoteSource>,
    symbol: Symbol,
    config: PollerConfig,
    updates: UpdateSender,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut resolved: Option<ResolvedPair> = None;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            fetched = fetch_once(source.as_ref(), &symbol, &mut resolved, config.request_timeout) => fetched,
        };

        let Some(update) = fetched else { continue };

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            sent = updates.send(update) => {
                if sent.is_err() {
                    tracing::debug!(symbol = %symbol, "Update channel closed; stopping poll timer");
                    return;
                }
            }
        }
    }
}

/// One poll cycle: search when unresolved, direct pair lookup otherwise.
async fn fetch_once(
    source: &dyn QuoteSource,
    symbol: &Symbol,
    resolved: &mut Option<ResolvedPair>,
    request_timeout: Duration,
) -> Option<PriceUpdate> {
    let request = async {
        match resolved.as_ref() {
            Some(pair) => source.pair(pair).await,
            None => source.search(symbol).await,
        }
    };

    let result = tokio::time::timeout(request_timeout, request)
        .await
        .unwrap_or(Err(QuoteSourceError::Timeout));

    match result {
        Ok(Some(quote)) => {
            if resolved.is_none() {
                tracing::debug!(
                    symbol = %symbol,
                    venue = %quote.pair.venue_id,
                    pair = %quote.pair.pair_address,
                    "Resolved pair"
                );
                *resolved = Some(quote.pair.clone());
            }

            let update = PriceUpdate::new(
                symbol.clone(),
                quote.price_usd,
                quote.change_24h,
                SymbolClass::Minor,
            );
            if update.is_none() {
                tracing::debug!(symbol = %symbol, price = quote.price_usd, "Ignoring non-positive quote");
            }
            update
        }
        Ok(None) => {
            if let Some(stale) = resolved.take() {
                tracing::info!(
                    symbol = %symbol,
                    venue = %stale.venue_id,
                    pair = %stale.pair_address,
                    "Pair not found; re-resolving next cycle"
                );
            } else {
                tracing::debug!(symbol = %symbol, "No pair found for symbol");
            }
            metrics::record_poll_failure("not_found");
            None
        }
        Err(e) => {
            tracing::warn!(symbol = %symbol, error = %e, "Poll cycle failed");
            metrics::record_poll_failure(e.kind());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    use super::*;
    use crate::application::ports::{MockQuoteSource, PairQuote};

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn pair_for(symbol: &Symbol) -> ResolvedPair {
        ResolvedPair {
            symbol: symbol.clone(),
            venue_id: "solana".to_string(),
            pair_address: format!("{symbol}-pool"),
        }
    }

    fn quote(pair: ResolvedPair, price: f64) -> PairQuote {
        PairQuote {
            pair,
            price_usd: price,
            change_24h: Some(-3.2),
        }
    }

    fn config() -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_once_then_uses_pair_lookup() {
        let mut source = MockQuoteSource::new();
        source
            .expect_search()
            .times(1)
            .returning(|s| Ok(Some(quote(pair_for(s), 1.0))));
        source
            .expect_pair()
            .returning(|p| Ok(Some(quote(p.clone(), 2.0))));

        let (tx, mut rx) = mpsc::channel(16);
        let poller = PollingTransport::new(Arc::new(source), config());
        let start = Instant::now();

        poller.start(&Handle::current(), &[sym("wif")], &tx);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.symbol, sym("wif"));
        assert_eq!(first.price, 1.0);
        assert_eq!(first.source, SymbolClass::Minor);
        assert!(start.elapsed() < Duration::from_secs(1));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.price, 2.0);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_pair_falls_back_to_search() {
        let searches = Arc::new(AtomicUsize::new(0));
        let pairs = Arc::new(AtomicUsize::new(0));

        let mut source = MockQuoteSource::new();
        let counter = Arc::clone(&searches);
        source.expect_search().returning(move |s| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(quote(pair_for(s), 1.0)))
        });
        let counter = Arc::clone(&pairs);
        source.expect_pair().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        });

        let (tx, mut rx) = mpsc::channel(16);
        let poller = PollingTransport::new(Arc::new(source), config());
        let start = Instant::now();
        poller.start(&Handle::current(), &[sym("bonk")], &tx);

        rx.recv().await.unwrap();
        // Cycle two hits the stale pair and emits nothing; cycle three searches again
        rx.recv().await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(searches.load(Ordering::SeqCst), 2);
        assert_eq!(pairs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_swallowed_and_timer_continues() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut source = MockQuoteSource::new();
        source.expect_search().returning(move |s| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(QuoteSourceError::Network("connection reset".to_string()))
            } else {
                Ok(Some(quote(pair_for(s), 0.5)))
            }
        });
        source
            .expect_pair()
            .returning(|p| Ok(Some(quote(p.clone(), 0.6))));

        let (tx, mut rx) = mpsc::channel(16);
        let poller = PollingTransport::new(Arc::new(source), config());
        let start = Instant::now();
        poller.start(&Handle::current(), &[sym("popcat")], &tx);

        let update = rx.recv().await.unwrap();
        assert_eq!(update.price, 0.5);
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(poller.is_polling(&sym("popcat")));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_search_emits_nothing() {
        let mut source = MockQuoteSource::new();
        source.expect_search().returning(|_| Ok(None));

        let (tx, mut rx) = mpsc::channel(16);
        let poller = PollingTransport::new(Arc::new(source), config());
        poller.start(&Handle::current(), &[sym("shitcoinxyz")], &tx);

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn non_positive_quote_is_ignored() {
        let mut source = MockQuoteSource::new();
        source
            .expect_search()
            .returning(|s| Ok(Some(quote(pair_for(s), 0.0))));
        source.expect_pair().returning(|_| Ok(None));

        let (tx, mut rx) = mpsc::channel(16);
        let poller = PollingTransport::new(Arc::new(source), config());
        poller.start(&Handle::current(), &[sym("zero")], &tx);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    struct SlowSource;

    #[async_trait]
    impl QuoteSource for SlowSource {
        async fn search(&self, symbol: &Symbol) -> Result<Option<PairQuote>, QuoteSourceError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(Some(quote(pair_for(symbol), 0.25)))
        }

        async fn pair(&self, pair: &ResolvedPair) -> Result<Option<PairQuote>, QuoteSourceError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(Some(quote(pair.clone(), 0.26)))
        }
    }

    #[test]
    fn zero_timing_is_sanitized() {
        let sanitized = PollerConfig {
            interval: Duration::ZERO,
            request_timeout: Duration::ZERO,
        }
        .sanitized();

        assert_eq!(sanitized.interval, Duration::from_millis(1));
        assert_eq!(sanitized.request_timeout, Duration::from_secs(10));
        assert_eq!(config().sanitized(), config());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_and_timeout_still_emit() {
        let (tx, mut rx) = mpsc::channel(16);
        let poller = PollingTransport::new(
            Arc::new(SlowSource),
            PollerConfig {
                interval: Duration::ZERO,
                request_timeout: Duration::ZERO,
            },
        );
        poller.start(&Handle::current(), &[sym("wif")], &tx);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.price, 0.25);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.price, 0.26);
        assert!(poller.is_polling(&sym("wif")));
    }

    struct StalledSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QuoteSource for StalledSource {
        async fn search(&self, _symbol: &Symbol) -> Result<Option<PairQuote>, QuoteSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }

        async fn pair(&self, _pair: &ResolvedPair) -> Result<Option<PairQuote>, QuoteSourceError> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_request_times_out_without_wedging_timer() {
        let source = Arc::new(StalledSource {
            calls: AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let poller = PollingTransport::new(Arc::clone(&source) as Arc<dyn QuoteSource>, config());
        poller.start(&Handle::current(), &[sym("slow")], &tx);

        tokio::time::sleep(Duration::from_secs(35)).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_updates() {
        let mut source = MockQuoteSource::new();
        source
            .expect_search()
            .returning(|s| Ok(Some(quote(pair_for(s), 1.0))));
        source
            .expect_pair()
            .returning(|p| Ok(Some(quote(p.clone(), 1.0))));

        let (tx, mut rx) = mpsc::channel(16);
        let poller = PollingTransport::new(Arc::new(source), config());
        poller.start(&Handle::current(), &[sym("wif")], &tx);
        rx.recv().await.unwrap();

        poller.stop(&[sym("wif")]);
        assert!(!poller.is_polling(&sym("wif")));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_abandons_in_flight_fetch() {
        let source = Arc::new(StalledSource {
            calls: AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let poller = PollingTransport::new(source, config());
        poller.start(&Handle::current(), &[sym("slow")], &tx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        poller.stop_all();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(poller.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_per_symbol() {
        let mut source = MockQuoteSource::new();
        source.expect_search().returning(|_| Ok(None));

        let (tx, _rx) = mpsc::channel(16);
        let poller = PollingTransport::new(Arc::new(source), config());
        poller.start(&Handle::current(), &[sym("wif"), sym("bonk")], &tx);
        poller.start(&Handle::current(), &[sym("wif")], &tx);

        assert_eq!(poller.len(), 2);
    }
}
