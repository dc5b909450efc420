//! Identifiers and shared element vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Priority space reserved for each layer when flattening into a track
/// composition. Within a layer, transitions sit above sources.
pub const LAYER_HEIGHT: u32 = 1000;

/// Priority offset of transitions inside their layer's band.
pub const TRANSITION_OFFSET: u32 = 1;

/// Priority offset of the first source inside its layer's band.
pub const SOURCE_OFFSET: u32 = 2;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub(crate) u64);

        impl $name {
            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a clip within its timeline.
    ClipId,
    "clip"
);
id_type!(
    /// Identifier of a group within its timeline.
    GroupId,
    "group"
);
id_type!(
    /// Identifier of a track within its timeline.
    TrackId,
    "track"
);

/// Media kind a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// An editable timeline element: a clip or a group of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementRef {
    Clip(ClipId),
    Group(GroupId),
}

impl From<ClipId> for ElementRef {
    fn from(id: ClipId) -> Self {
        ElementRef::Clip(id)
    }
}

impl From<GroupId> for ElementRef {
    fn from(id: GroupId) -> Self {
        ElementRef::Group(id)
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementRef::Clip(id) => id.fmt(f),
            ElementRef::Group(id) => id.fmt(f),
        }
    }
}
