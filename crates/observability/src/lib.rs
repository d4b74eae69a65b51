//! Observability (tracing/logging) for the bridge.

pub mod tracing;

pub use tracing::{LogFormat, init, init_with};
