//! Engine Configuration Settings
//!
//! Configuration types for the price feed engine, loaded from environment
//! variables. Unparseable values fall back to defaults; values that parse
//! but make no sense (zero intervals, zero capacity) are rejected.

use std::time::Duration;

use crate::application::services::{EngineOptions, PollerConfig};
use crate::domain::connection::ReconnectConfig;

/// Streaming connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingSettings {
    /// WebSocket endpoint of the ticker feed.
    pub url: String,
    /// Quote currency appended to channel names (`btc` + `usdt`).
    pub quote_symbol: String,
    /// Ping cadence while connected.
    pub heartbeat_interval: Duration,
    /// Delay before the first reconnection attempt.
    pub reconnect_delay_base: Duration,
    /// Upper bound on any single reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Attempts before the connection is reported exhausted.
    pub max_reconnect_attempts: u32,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            url: "wss://stream.binance.com:9443/ws".to_string(),
            quote_symbol: "usdt".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay_base: Duration::from_secs(5),
            reconnect_delay_max: Duration::from_secs(120),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 5,
        }
    }
}

impl StreamingSettings {
    /// Backoff policy configuration.
    #[must_use]
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            base_delay: self.reconnect_delay_base,
            max_delay: self.reconnect_delay_max,
            multiplier: self.reconnect_delay_multiplier,
            jitter_factor: 0.0,
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

/// Secondary quote source settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingSettings {
    /// Base URL of the quote aggregator API.
    pub quote_api_url: String,
    /// Time between fetches for one symbol.
    pub poll_interval: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            quote_api_url: "https://api.dexscreener.com/latest/dex".to_string(),
            poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Delivery and capacity settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Debounce window per consumer callback.
    pub debounce: Duration,
    /// Cadence suggested to cache-polling consumers.
    pub ui_refresh_interval: Duration,
    /// Upper bound on distinct tracked symbols.
    pub max_tracked_symbols: usize,
    /// Transport-to-engine channel capacity.
    pub update_buffer: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            ui_refresh_interval: Duration::from_millis(1000),
            max_tracked_symbols: 100,
            update_buffer: 1024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health and read API HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineConfig {
    /// Streaming connection settings.
    pub streaming: StreamingSettings,
    /// Polling settings.
    pub polling: PollingSettings,
    /// Delivery settings.
    pub delivery: DeliverySettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Symbols the binary subscribes to at startup.
    pub symbols: Vec<String>,
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range or a URL has the wrong
    /// scheme.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let streaming_defaults = StreamingSettings::default();
        let polling_defaults = PollingSettings::default();
        let delivery_defaults = DeliverySettings::default();

        let streaming = StreamingSettings {
            url: env.string("PRICE_FEED_STREAM_URL", &streaming_defaults.url),
            quote_symbol: env
                .string("PRICE_FEED_QUOTE_SYMBOL", &streaming_defaults.quote_symbol)
                .to_lowercase(),
            heartbeat_interval: env.secs(
                "PRICE_FEED_HEARTBEAT_INTERVAL_SECS",
                streaming_defaults.heartbeat_interval,
            ),
            reconnect_delay_base: env.secs(
                "PRICE_FEED_RECONNECT_DELAY_BASE_SECS",
                streaming_defaults.reconnect_delay_base,
            ),
            reconnect_delay_max: env.secs(
                "PRICE_FEED_RECONNECT_DELAY_MAX_SECS",
                streaming_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "PRICE_FEED_RECONNECT_DELAY_MULTIPLIER",
                streaming_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "PRICE_FEED_MAX_RECONNECT_ATTEMPTS",
                streaming_defaults.max_reconnect_attempts,
            ),
        };

        let polling = PollingSettings {
            quote_api_url: env.string("PRICE_FEED_QUOTE_API_URL", &polling_defaults.quote_api_url),
            poll_interval: env.secs("PRICE_FEED_POLL_INTERVAL_SECS", polling_defaults.poll_interval),
            request_timeout: env.secs(
                "PRICE_FEED_REQUEST_TIMEOUT_SECS",
                polling_defaults.request_timeout,
            ),
        };

        let delivery = DeliverySettings {
            debounce: env.millis("PRICE_FEED_DEBOUNCE_MS", delivery_defaults.debounce),
            ui_refresh_interval: env.millis(
                "PRICE_FEED_UI_REFRESH_MS",
                delivery_defaults.ui_refresh_interval,
            ),
            max_tracked_symbols: env.parse(
                "PRICE_FEED_MAX_TRACKED_SYMBOLS",
                delivery_defaults.max_tracked_symbols,
            ),
            update_buffer: env.parse("PRICE_FEED_UPDATE_BUFFER", delivery_defaults.update_buffer),
        };

        let server = ServerSettings {
            health_port: env.parse("PRICE_FEED_HEALTH_PORT", ServerSettings::default().health_port),
        };

        let symbols = lookup("PRICE_FEED_SYMBOLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            streaming,
            polling,
            delivery,
            server,
            symbols,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.streaming;
        if !(s.url.starts_with("ws://") || s.url.starts_with("wss://")) {
            return Err(ConfigError::invalid("PRICE_FEED_STREAM_URL", "expected a ws:// or wss:// URL"));
        }
        if s.quote_symbol.is_empty() {
            return Err(ConfigError::invalid("PRICE_FEED_QUOTE_SYMBOL", "must not be empty"));
        }
        require_nonzero("PRICE_FEED_HEARTBEAT_INTERVAL_SECS", s.heartbeat_interval)?;
        require_nonzero("PRICE_FEED_RECONNECT_DELAY_BASE_SECS", s.reconnect_delay_base)?;
        if s.reconnect_delay_max < s.reconnect_delay_base {
            return Err(ConfigError::invalid(
                "PRICE_FEED_RECONNECT_DELAY_MAX_SECS",
                "must not be below the base delay",
            ));
        }
        if !s.reconnect_delay_multiplier.is_finite() || s.reconnect_delay_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "PRICE_FEED_RECONNECT_DELAY_MULTIPLIER",
                "must be a finite number >= 1.0",
            ));
        }

        let p = &self.polling;
        if !(p.quote_api_url.starts_with("http://") || p.quote_api_url.starts_with("https://")) {
            return Err(ConfigError::invalid("PRICE_FEED_QUOTE_API_URL", "expected an http(s) URL"));
        }
        require_nonzero("PRICE_FEED_POLL_INTERVAL_SECS", p.poll_interval)?;
        require_nonzero("PRICE_FEED_REQUEST_TIMEOUT_SECS", p.request_timeout)?;

        let d = &self.delivery;
        require_nonzero("PRICE_FEED_UI_REFRESH_MS", d.ui_refresh_interval)?;
        if d.max_tracked_symbols == 0 {
            return Err(ConfigError::invalid("PRICE_FEED_MAX_TRACKED_SYMBOLS", "must be positive"));
        }
        if d.update_buffer == 0 {
            return Err(ConfigError::invalid("PRICE_FEED_UPDATE_BUFFER", "must be positive"));
        }

        Ok(())
    }

    /// Options for the engine service.
    #[must_use]
    pub const fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            debounce: self.delivery.debounce,
            ui_refresh_interval: self.delivery.ui_refresh_interval,
            max_tracked_symbols: self.delivery.max_tracked_symbols,
            update_buffer: self.delivery.update_buffer,
            poller: PollerConfig {
                interval: self.polling.poll_interval,
                request_timeout: self.polling.request_timeout,
            },
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable parsed but is out of range.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Environment variable name.
        key: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl ConfigError {
    const fn invalid(key: &'static str, reason: &'static str) -> Self {
        Self::InvalidValue { key, reason }
    }
}

fn require_nonzero(key: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        Err(ConfigError::invalid(key, "must be greater than zero"))
    } else {
        Ok(())
    }
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.raw(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.raw(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.raw(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
