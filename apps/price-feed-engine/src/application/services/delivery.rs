//! Rate-Limited Delivery
//!
//! [`Debouncer`] decouples producer cadence from consumer cadence. Values
//! pushed within one window collapse into a single delivery of the most
//! recent value, handed to the sink once the window closes.
//!
//! Each debouncer runs its sink on its own task, so a slow or panicking
//! sink only affects itself.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::metrics;

/// Trailing-edge debouncer parameterized by window duration.
///
/// At most one value is pending at a time: a push overwrites whatever the
/// current window has not yet delivered.
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
///
/// use price_feed_engine::application::services::Debouncer;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// let debouncer = Debouncer::spawn(
///     &tokio::runtime::Handle::current(),
///     Duration::from_millis(500),
///     CancellationToken::new(),
///     move |v: u32| sink.lock().unwrap().push(v),
/// );
///
/// for v in 0..10 {
///     debouncer.push(v);
/// }
/// tokio::time::sleep(Duration::from_millis(600)).await;
///
/// assert_eq!(*seen.lock().unwrap(), vec![9]);
/// # }
/// ```
pub struct Debouncer<T> {
    shared: Arc<Shared<T>>,
    cancel: CancellationToken,
}

struct Shared<T> {
    pending: Mutex<Option<T>>,
    wake: Notify,
    /// Held for the duration of every sink call.
    running: ReentrantMutex<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawn the debouncing task on `handle`.
    ///
    /// A zero window delivers every value as soon as the task sees it.
    pub fn spawn<F>(handle: &Handle, window: Duration, cancel: CancellationToken, sink: F) -> Self
    where
        F: Fn(T) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            pending: Mutex::new(None),
            wake: Notify::new(),
            running: ReentrantMutex::new(()),
        });
        handle.spawn(run(Arc::clone(&shared), window, cancel.clone(), sink));
        Self { shared, cancel }
    }

    /// Replace the pending value. Returns `false` once the debouncer has
    /// shut down.
    pub fn push(&self, value: T) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        *self.shared.pending.lock() = Some(value);
        self.shared.wake.notify_one();
        true
    }
}

impl<T> Debouncer<T> {
    /// Stop delivering. The pending value is discarded.
    ///
    /// Blocks until a sink call already in progress returns, so no delivery
    /// is observed after `close` returns. Calling it from inside this
    /// debouncer's own sink does not block.
    pub fn close(&self) {
        self.cancel.cancel();
        self.shared.pending.lock().take();
        drop(self.shared.running.lock());
    }

    /// Whether the debouncer has been closed or its token cancelled.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T> std::fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("closed", &self.cancel.is_cancelled())
            .field("pending", &self.shared.pending.lock().is_some())
            .finish()
    }
}

impl<T> Shared<T> {
    fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

async fn run<T, F>(shared: Arc<Shared<T>>, window: Duration, cancel: CancellationToken, sink: F)
where
    F: Fn(T),
{
    loop {
        while !shared.has_pending() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = shared.wake.notified() => {}
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(window) => {}
        }

        let Some(latest) = shared.pending.lock().take() else {
            continue;
        };

        let delivered = {
            let _running = shared.running.lock();
            if cancel.is_cancelled() {
                return;
            }
            catch_unwind(AssertUnwindSafe(|| sink(latest))).is_ok()
        };
        if !delivered {
            metrics::record_callback_panic();
            tracing::error!("Delivery sink panicked; continuing with next window");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    fn collecting(window: Duration) -> (Debouncer<u32>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let debouncer = Debouncer::spawn(
            &Handle::current(),
            window,
            CancellationToken::new(),
            move |v| sink.lock().push(v),
        );
        (debouncer, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_last_value() {
        let (debouncer, seen) = collecting(Duration::from_millis(500));

        for v in 1..=10 {
            assert!(debouncer.push(v));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(*seen.lock(), vec![10]);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_delivered_before_window_closes() {
        let (debouncer, seen) = collecting(Duration::from_millis(500));

        debouncer.push(1);
        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(seen.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(*seen.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_windows_deliver_separately() {
        let (debouncer, seen) = collecting(Duration::from_millis(500));

        debouncer.push(1);
        tokio::time::sleep(Duration::from_millis(600)).await;
        debouncer.push(2);
        debouncer.push(3);
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(*seen.lock(), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_window_delivers_each_value() {
        let (debouncer, seen) = collecting(Duration::ZERO);

        debouncer.push(1);
        tokio::time::sleep(Duration::from_millis(1)).await;
        debouncer.push(2);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_discards_pending() {
        let (debouncer, seen) = collecting(Duration::from_millis(500));

        debouncer.push(1);
        debouncer.close();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(seen.lock().is_empty());
        assert!(debouncer.is_closed());
        assert!(!debouncer.push(2));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_sink_keeps_running() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let debouncer = Debouncer::spawn(
            &Handle::current(),
            Duration::from_millis(100),
            CancellationToken::new(),
            move |v: u32| {
                assert!(v != 1, "consumer rejected {v}");
                sink.lock().push(v);
            },
        );

        debouncer.push(1);
        tokio::time::sleep(Duration::from_millis(150)).await;
        debouncer.push(2);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(*seen.lock(), vec![2]);
    }

    async fn wait_for(flag: &AtomicBool) {
        while !flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Counts live instances.
    struct Tracked(Arc<AtomicUsize>);

    impl Tracked {
        fn new(live: &Arc<AtomicUsize>) -> Self {
            live.fetch_add(1, Ordering::SeqCst);
            Self(Arc::clone(live))
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stuck_sink_holds_at_most_one_pending_value() {
        let live = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);
        let debouncer = Debouncer::spawn(
            &Handle::current(),
            Duration::from_millis(5),
            CancellationToken::new(),
            move |held: Tracked| {
                flag.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                drop(held);
            },
        );

        debouncer.push(Tracked::new(&live));
        wait_for(&started).await;

        for _ in 0..50 {
            debouncer.push(Tracked::new(&live));
        }
        // One inside the sink, one waiting
        assert!(live.load(Ordering::SeqCst) <= 2);

        debouncer.close();
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_waits_for_running_sink() {
        let started = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let (s, c, f) = (Arc::clone(&started), Arc::clone(&calls), Arc::clone(&finished));
        let debouncer = Debouncer::spawn(
            &Handle::current(),
            Duration::from_millis(5),
            CancellationToken::new(),
            move |_: u32| {
                c.fetch_add(1, Ordering::SeqCst);
                s.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                f.fetch_add(1, Ordering::SeqCst);
            },
        );

        debouncer.push(1);
        wait_for(&started).await;
        debouncer.push(2);

        debouncer.close();
        assert_eq!(finished.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_from_inside_sink_does_not_block() {
        let slot: Arc<Mutex<Option<Debouncer<u32>>>> = Arc::new(Mutex::new(None));
        let seen = Arc::new(AtomicUsize::new(0));

        let (own, count) = (Arc::clone(&slot), Arc::clone(&seen));
        let debouncer = Debouncer::spawn(
            &Handle::current(),
            Duration::from_millis(10),
            CancellationToken::new(),
            move |_: u32| {
                count.fetch_add(1, Ordering::SeqCst);
                if let Some(me) = own.lock().as_ref() {
                    me.close();
                }
            },
        );
        debouncer.push(1);
        *slot.lock() = Some(debouncer);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        let guard = slot.lock();
        let debouncer = guard.as_ref().unwrap();
        assert!(debouncer.is_closed());
        assert!(!debouncer.push(2));
    }
}
