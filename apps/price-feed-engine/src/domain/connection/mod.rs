//! Streaming Connection Lifecycle
//!
//! The lifecycle of the shared streaming connection as a pure state
//! machine. [`LinkMachine::handle`] maps an event plus "are any major
//! symbols still wanted" onto a new [`ConnectionState`] and the single
//! [`LinkAction`] the I/O layer should perform. Nothing here touches a
//! socket or a timer.
//!
//! ```text
//! Disconnected ──demand──► Connecting ──opened──► Connected
//!       ▲                      │                     │
//!       │ no demand            │ failed / abnormal close
//!       │                      ▼                     ▼
//!       └─────────────── Reconnecting ◄──────────────┘
//!                              │ attempts exhausted
//!                              ▼
//!                          Exhausted ──retry──► Connecting
//! ```

mod backoff;

pub use backoff::{ReconnectConfig, ReconnectPolicy};

use std::time::Duration;

use serde::Serialize;

/// Observable state of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection, none wanted or deliberately closed.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Open and carrying ticker data.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// Gave up after the maximum attempt count; subscriptions are kept.
    Exhausted,
}

impl ConnectionState {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Exhausted => "exhausted",
        }
    }
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The wanted major-symbol set changed.
    DemandChanged,
    /// The handshake completed.
    Opened,
    /// The connection closed or the handshake failed.
    Closed {
        /// Closed with the normal-closure code.
        normal: bool,
    },
    /// A scheduled backoff delay elapsed.
    BackoffElapsed,
    /// Manual retrigger; resumes from attempt zero.
    Retry,
    /// Forced teardown (logout or stop).
    Shutdown,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Nothing to do.
    None,
    /// Open a new connection.
    Connect,
    /// Send one batched subscribe for the full major-symbol set.
    SubscribeAll,
    /// Close the open connection with the normal-closure code.
    Close,
    /// Sleep for the delay, then feed [`LinkEvent::BackoffElapsed`].
    ScheduleReconnect(Duration),
}

/// Connection state plus the backoff policy that drives reconnection.
#[derive(Debug, Clone)]
pub struct LinkMachine {
    state: ConnectionState,
    policy: ReconnectPolicy,
}

impl LinkMachine {
    /// Start disconnected.
    #[must_use]
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Apply `event`. `has_symbols` tells whether any major symbol is still
    /// subscribed after the event.
    pub fn handle(&mut self, event: LinkEvent, has_symbols: bool) -> LinkAction {
        use ConnectionState as S;

        match (self.state, event) {
            (_, LinkEvent::Shutdown) => {
                let open = matches!(self.state, S::Connecting | S::Connected);
                self.state = S::Disconnected;
                self.policy.reset();
                if open { LinkAction::Close } else { LinkAction::None }
            }

            (S::Disconnected, LinkEvent::DemandChanged | LinkEvent::Retry) if has_symbols => {
                self.policy.reset();
                self.state = S::Connecting;
                LinkAction::Connect
            }

            (S::Connecting, LinkEvent::Opened) => {
                self.policy.reset();
                self.state = S::Connected;
                if has_symbols {
                    LinkAction::SubscribeAll
                } else {
                    self.state = S::Disconnected;
                    LinkAction::Close
                }
            }

            (S::Connecting | S::Connected, LinkEvent::DemandChanged) if !has_symbols => {
                self.state = S::Disconnected;
                LinkAction::Close
            }

            (S::Connecting | S::Connected, LinkEvent::Closed { normal }) => {
                if normal || !has_symbols {
                    self.state = S::Disconnected;
                    LinkAction::None
                } else {
                    self.schedule_reconnect()
                }
            }

            (S::Reconnecting { .. }, LinkEvent::BackoffElapsed) => {
                if has_symbols {
                    self.state = S::Connecting;
                    LinkAction::Connect
                } else {
                    self.state = S::Disconnected;
                    LinkAction::None
                }
            }

            (S::Reconnecting { .. } | S::Exhausted, LinkEvent::DemandChanged) if !has_symbols => {
                self.state = S::Disconnected;
                self.policy.reset();
                LinkAction::None
            }

            (S::Reconnecting { .. } | S::Exhausted, LinkEvent::Retry) if has_symbols => {
                self.policy.reset();
                self.state = S::Connecting;
                LinkAction::Connect
            }

            _ => LinkAction::None,
        }
    }

    fn schedule_reconnect(&mut self) -> LinkAction {
        match self.policy.next_delay() {
            Some(delay) => {
                self.state = ConnectionState::Reconnecting {
                    attempt: self.policy.attempt_count(),
                };
                LinkAction::ScheduleReconnect(delay)
            }
            None => {
                self.state = ConnectionState::Exhausted;
                LinkAction::None
            }
        }
    }
}
