//! Configuration Module
//!
//! Environment-driven configuration for the engine and its adapters.

mod settings;

pub use settings::{
    ConfigError, DeliverySettings, EngineConfig, PollingSettings, ServerSettings,
    StreamingSettings,
};
