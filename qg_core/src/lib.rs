//! ABOUTME: Core types, errors, timers, and tracing utilities
//! ABOUTME: Foundation crate used by all other querygauge components

pub mod error;
pub mod telemetry;
pub mod time;

pub use error::{Error, Result};
pub use time::MonotonicTimer;

