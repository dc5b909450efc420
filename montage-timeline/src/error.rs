use thiserror::Error;

use montage_core::ClockTime;

use crate::element::{ClipId, ElementRef, GroupId, TrackId};

/// Errors surfaced by the timeline model.
#[derive(Error, Debug)]
pub enum Error {
    #[error("layer {layer} does not exist, timeline has {count} layers")]
    LayerOutOfRange { layer: usize, count: usize },

    #[error("clip {0} is not part of this timeline")]
    ClipNotFound(ClipId),

    #[error("group {0} is not part of this timeline")]
    GroupNotFound(GroupId),

    #[error("track {0} is not part of this timeline")]
    TrackNotFound(TrackId),

    #[error("asset {0} is not registered")]
    AssetNotFound(String),

    #[error("trim position {position} is past the element end {end}")]
    TrimBeyondEnd { position: ClockTime, end: ClockTime },

    #[error("clip media ends at {available}, edit needs {requested}")]
    MediaOverrun {
        requested: ClockTime,
        available: ClockTime,
    },

    #[error("element of {clip} on {track} is locked to its clip, unlock it first")]
    ElementLocked { clip: ClipId, track: TrackId },

    #[error("edit would move {element} before the timeline origin")]
    MoveBeforeOrigin { element: ElementRef },

    #[error("group spanning {height} layers from layer {priority} does not fit in {layers} layers")]
    GroupOutOfLayers {
        priority: u32,
        height: u32,
        layers: usize,
    },

    #[error("{element} already belongs to a group")]
    AlreadyGrouped { element: ElementRef },

    #[error("cannot group an empty set of elements")]
    EmptyGroup,

    #[error("group {0} is nested, ungroup its parent first")]
    NestedGroup(GroupId),

    #[error("transition clips cannot be edited directly")]
    TransitionEdit,

    #[error(transparent)]
    Compose(#[from] montage_compose::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
