//! Core types for the Montage non-linear editing engine.
//!
//! Provides the nanosecond clock type shared by the timeline data model
//! and the per-track composition engine.

mod time;

pub use time::{ClockTime, TimeSpan};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
