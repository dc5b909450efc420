//! Clips and their per-track elements.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use montage_compose::{NleObject, ObjectId};
use montage_core::ClockTime;

use crate::asset::Asset;
use crate::element::{ClipId, GroupId, TrackId, TrackKind};

/// What a clip puts on screen.
#[derive(Debug, Clone)]
pub enum ClipKind {
    /// Plays a slice of an asset.
    Source { asset: Arc<Asset> },
    /// Crossfade between the two clips it overlaps.
    Transition {
        /// Managed by the layer's auto-transition machinery rather than the
        /// user.
        auto: bool,
    },
}

/// Timing of a single track element, used when it is unlocked from its
/// clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementTiming {
    pub start: ClockTime,
    pub inpoint: ClockTime,
    pub duration: ClockTime,
}

/// Projection of a clip into one track. The processing node is created on
/// the first commit that ships the element; until then edits only touch the
/// clip's own fields.
#[derive(Debug)]
pub struct TrackElement {
    pub track: TrackId,
    pub kind: TrackKind,
    pub active: bool,
    /// While locked the element follows every clip edit. Unlocking freezes
    /// its timing into `own_timing`, which is then edited directly.
    pub(crate) locked: bool,
    pub(crate) own_timing: Option<ElementTiming>,
    pub(crate) nle: Option<Arc<NleObject>>,
}

impl TrackElement {
    pub(crate) fn new(track: TrackId, kind: TrackKind) -> Self {
        Self {
            track,
            kind,
            active: true,
            locked: true,
            own_timing: None,
            nle: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// The element's own timing when unlocked from its clip.
    pub fn timing_override(&self) -> Option<ElementTiming> {
        self.own_timing
    }

    /// Identity of the committed object, if one exists yet.
    pub fn object_id(&self) -> Option<ObjectId> {
        self.nle.as_ref().map(|o| o.id())
    }
}

/// A clip placed on a layer.
#[derive(Debug)]
pub struct Clip {
    pub(crate) id: ClipId,
    pub(crate) name: String,
    pub(crate) layer: usize,
    pub(crate) start: ClockTime,
    pub(crate) inpoint: ClockTime,
    pub(crate) duration: ClockTime,
    pub(crate) kind: ClipKind,
    pub(crate) group: Option<GroupId>,
    pub(crate) children: Vec<TrackElement>,
}

impl Clip {
    pub fn id(&self) -> ClipId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layer(&self) -> usize {
        self.layer
    }

    pub fn start(&self) -> ClockTime {
        self.start
    }

    pub fn inpoint(&self) -> ClockTime {
        self.inpoint
    }

    pub fn duration(&self) -> ClockTime {
        self.duration
    }

    pub fn end(&self) -> ClockTime {
        self.start.saturating_add(self.duration)
    }

    pub fn kind(&self) -> &ClipKind {
        &self.kind
    }

    pub fn is_transition(&self) -> bool {
        matches!(self.kind, ClipKind::Transition { .. })
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    pub fn children(&self) -> &[TrackElement] {
        &self.children
    }

    pub(crate) fn child_on_track(&self, track: TrackId) -> Option<&TrackElement> {
        self.children.iter().find(|e| e.track == track)
    }
}
