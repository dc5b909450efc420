//! Tracks: one output composition per media kind.

use std::collections::HashMap;
use std::sync::Arc;

use montage_compose::{BusSender, Composition, NleObject, ObjectId, ObjectTiming, Pad};

use crate::element::{TrackId, TrackKind};

/// An output track. Each track owns a composition that flattens the layered
/// clips of its kind into a single stream.
pub struct Track {
    pub(crate) id: TrackId,
    pub(crate) name: String,
    pub(crate) kind: TrackKind,
    pub(crate) composition: Arc<Composition>,
    /// Objects shipped by the last commit.
    pub(crate) committed: HashMap<ObjectId, Arc<NleObject>>,
}

impl Track {
    pub(crate) fn new(id: TrackId, kind: TrackKind, bus: BusSender) -> Self {
        let name = format!("{kind}-{}", id.value());
        let composition = Composition::new(name.clone(), bus);
        Self {
            id,
            name,
            kind,
            composition,
            committed: HashMap::new(),
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// The composition rendering this track.
    pub fn composition(&self) -> &Arc<Composition> {
        &self.composition
    }

    /// The track's output pad, stable across commits.
    pub fn output_pad(&self) -> Pad {
        self.composition.output_pad()
    }

    /// Number of objects currently committed into the composition.
    pub fn committed_count(&self) -> usize {
        self.committed.len()
    }

    /// Timing of every committed object, sorted by `(start, priority)`.
    /// Object ids are allocated per process, so two timelines holding the
    /// same content compare through this rather than through ids.
    pub fn committed_timings(&self) -> Vec<ObjectTiming> {
        let mut out: Vec<ObjectTiming> = self.committed.values().map(|o| o.timing()).collect();
        out.sort_by_key(|t| (t.start, t.priority));
        out
    }
}
