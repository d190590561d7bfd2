//! Domain Layer - Core price feed types and policies.
//!
//! Pure types shared by every other layer: symbol identity and
//! classification, the normalized price update, subscription membership
//! and the streaming connection state machine. Nothing here performs I/O.

/// Symbol normalization and transport classification.
pub mod symbol;

/// Price updates and cache entries.
pub mod price;

/// Subscription tracking and reference counting.
pub mod subscription;

/// Streaming connection lifecycle and reconnect policy.
pub mod connection;
