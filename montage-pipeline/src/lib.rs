//! Playable wrapper for montage timelines: a small state machine that
//! commits pending edits and drives every track composition together.

pub mod error;
pub mod pipeline;

pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineState};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
