//! Heartbeat
//!
//! Periodic ping frames that keep an idle ticker connection from being
//! reaped by intermediaries. Missing pongs are not tracked; a dead
//! connection surfaces as a read error or close frame instead.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Create configuration from `StreamingSettings`.
    #[must_use]
    pub const fn from_streaming_settings(
        settings: &crate::infrastructure::config::StreamingSettings,
    ) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
        }
    }
}

/// Ping schedule for one connection.
///
/// The first ping fires one full interval after [`reset`](Self::reset), never
/// immediately on open.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Interval,
    period: Duration,
    sent: u64,
}

impl Heartbeat {
    /// Create a heartbeat whose first tick is one interval away.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        let period = config.ping_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            period,
            sent: 0,
        }
    }

    /// Restart the schedule, typically when a connection opens.
    pub fn reset(&mut self) {
        self.interval.reset_at(Instant::now() + self.period);
    }

    /// Wait for the next tick and return the ping frame to send.
    ///
    /// Cancel safe.
    pub async fn tick(&mut self) -> Message {
        self.interval.tick().await;
        self.sent = self.sent.wrapping_add(1);
        Message::Ping(self.sent.to_be_bytes().to_vec().into())
    }

    /// Pings produced so far.
    #[must_use]
    pub const fn sent(&self) -> u64 {
        self.sent
    }
}
