//! Non-linear editing timeline: layers of clips flattened into per-track
//! compositions.
//!
//! The model side (clips, groups, layers) is edited freely; nothing reaches
//! the processing graphs until [`Timeline::commit`], which diffs the desired
//! object set per track and applies it as one batched composition update.

pub mod asset;
pub mod clip;
pub mod element;
pub mod error;
pub mod group;
pub mod layer;
pub mod project;
pub mod timeline;
pub mod track;

pub use asset::{Asset, AssetRegistry, MemoryNodeFactory, NodeFactory};
pub use clip::{Clip, ClipKind, ElementTiming, TrackElement};
pub use element::{ClipId, ElementRef, GroupId, TrackId, TrackKind, LAYER_HEIGHT};
pub use error::{Error, Result};
pub use group::Group;
pub use layer::Layer;
pub use project::Project;
pub use timeline::Timeline;
pub use track::Track;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
