//! Streaming Transport Port (Driven Port)
//!
//! Interface to the single multiplexed streaming connection.

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::domain::connection::ConnectionState;
use crate::domain::price::PriceUpdate;
use crate::domain::symbol::Symbol;

/// Channel transports push normalized updates into.
pub type UpdateSender = mpsc::Sender<PriceUpdate>;

/// Port for the shared streaming connection.
///
/// Every method is non-blocking: implementations queue the request for
/// their connection task and return immediately, so callers can tear
/// down synchronously with an unsubscribe.
pub trait StreamingTransport: Send + Sync {
    /// Start the connection task on `handle`, delivering into `updates`.
    /// Called once by the engine when it starts.
    fn attach(&self, handle: &Handle, updates: UpdateSender);

    /// Add symbols to the connection, opening it if needed.
    fn subscribe(&self, symbols: &[Symbol]);

    /// Remove symbols; closing the connection when none remain.
    fn unsubscribe(&self, symbols: &[Symbol]);

    /// Drop every symbol and close the connection deliberately.
    fn disconnect(&self);

    /// Manual retrigger after exhaustion; resumes from attempt zero.
    fn reconnect(&self);

    /// Observe connection state changes.
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;
}
