//! Layers: the vertical ordering of clips.

use serde::{Deserialize, Serialize};

/// A horizontal band of clips. The layer's index in the timeline is its
/// priority: index 0 is the most prominent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    /// When set, overlapping clips in this layer get a crossfade clip
    /// maintained automatically.
    pub auto_transition: bool,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auto_transition: false,
        }
    }
}
