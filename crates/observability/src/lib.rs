//! `depot-observability` — logging/tracing initialization.

pub mod tracing;

pub use tracing::init;
