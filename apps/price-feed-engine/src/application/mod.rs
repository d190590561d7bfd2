//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the engine and its services, and the port
//! interfaces that define how it reaches the outside world.

/// Port interfaces for external systems (streaming feed, quote source).
pub mod ports;

/// Application services: cache, delivery, polling and the engine.
pub mod services;
