//! Saving and restoring timelines.
//!
//! A [`Project`] is a plain serializable snapshot of the editable model:
//! layers, tracks, source clips and groups. Auto transitions and committed
//! processing nodes are deliberately absent; both are re-derived on restore.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use montage_core::ClockTime;

use crate::asset::AssetRegistry;
use crate::clip::{ClipKind, ElementTiming};
use crate::element::{ClipId, ElementRef, GroupId, TrackKind};
use crate::error::Result;
use crate::layer::Layer;
use crate::timeline::Timeline;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ElementSnapshot {
    active: bool,
    locked: bool,
    timing: Option<ElementTiming>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClipSnapshot {
    asset: String,
    layer: usize,
    start: ClockTime,
    inpoint: ClockTime,
    duration: ClockTime,
    /// Aligned with the clip's track elements in track order.
    elements: Vec<ElementSnapshot>,
}

/// Group member, referencing other snapshot entries by position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum Member {
    Clip(usize),
    Group(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GroupSnapshot {
    members: Vec<Member>,
}

/// A serializable timeline snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    name: String,
    layers: Vec<Layer>,
    tracks: Vec<TrackKind>,
    clips: Vec<ClipSnapshot>,
    /// Stored children-first so nested groups can be rebuilt in order.
    groups: Vec<GroupSnapshot>,
}

impl Project {
    /// Snapshot a timeline. Auto transitions are skipped; they come back on
    /// their own once the restored layers re-derive them.
    pub fn capture(timeline: &Timeline) -> Self {
        let layers = (0..timeline.layer_count())
            .filter_map(|i| timeline.layer(i).ok().cloned())
            .collect();
        let tracks = timeline.tracks().iter().map(|t| t.kind()).collect();

        let mut clip_ids: Vec<ClipId> = timeline
            .clips()
            .filter(|c| !c.is_transition())
            .map(|c| c.id())
            .collect();
        clip_ids.sort();
        let clip_index: HashMap<ClipId, usize> = clip_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        let clips = clip_ids
            .iter()
            .filter_map(|id| timeline.clip(*id).ok())
            .map(|clip| {
                let asset = match clip.kind() {
                    ClipKind::Source { asset } => asset.id().to_owned(),
                    ClipKind::Transition { .. } => String::new(),
                };
                ClipSnapshot {
                    asset,
                    layer: clip.layer(),
                    start: clip.start(),
                    inpoint: clip.inpoint(),
                    duration: clip.duration(),
                    elements: clip
                        .children()
                        .iter()
                        .map(|e| ElementSnapshot {
                            active: e.active,
                            locked: e.is_locked(),
                            timing: e.timing_override(),
                        })
                        .collect(),
                }
            })
            .collect();

        // Children before parents, so restore can group bottom-up.
        let mut group_ids: Vec<GroupId> = timeline.groups().map(|g| g.id()).collect();
        group_ids.sort_by_key(|id| {
            let mut depth = 0usize;
            let mut current = ElementRef::Group(*id);
            while let Ok(Some(parent)) = parent_of(timeline, current) {
                depth += 1;
                current = ElementRef::Group(parent);
            }
            (std::cmp::Reverse(depth), *id)
        });
        let group_index: HashMap<GroupId, usize> = group_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        let groups = group_ids
            .iter()
            .filter_map(|id| timeline.group(*id).ok())
            .map(|group| GroupSnapshot {
                members: group
                    .children()
                    .iter()
                    .filter_map(|child| match child {
                        ElementRef::Clip(c) => clip_index.get(c).map(|i| Member::Clip(*i)),
                        ElementRef::Group(g) => group_index.get(g).map(|i| Member::Group(*i)),
                    })
                    .collect(),
            })
            .collect();

        Self {
            name: timeline.name().to_owned(),
            layers,
            tracks,
            clips,
            groups,
        }
    }

    /// Rebuild a timeline from the snapshot, resolving assets through
    /// `registry`. Fails when a referenced asset is not registered.
    pub fn restore(&self, registry: &AssetRegistry) -> Result<Timeline> {
        let mut timeline = Timeline::new(self.name.clone());
        for kind in &self.tracks {
            timeline.add_track(*kind);
        }
        for (i, layer) in self.layers.iter().enumerate() {
            timeline.append_layer(layer.name.clone());
            if layer.auto_transition {
                timeline.set_auto_transition(i, true)?;
            }
        }

        let mut restored_clips = Vec::with_capacity(self.clips.len());
        for snapshot in &self.clips {
            let asset = registry.get(&snapshot.asset)?;
            let id = timeline.add_clip(
                snapshot.layer,
                &asset,
                snapshot.start,
                snapshot.inpoint,
                snapshot.duration,
            )?;
            let elements: Vec<_> = timeline
                .clip(id)?
                .children()
                .iter()
                .map(|e| e.track)
                .collect();
            for (track, element) in elements.into_iter().zip(&snapshot.elements) {
                if !element.active {
                    timeline.set_active(id, track, false)?;
                }
                if !element.locked {
                    timeline.set_element_locked(id, track, false)?;
                    if let Some(timing) = element.timing {
                        timeline.set_element_timing(id, track, timing)?;
                    }
                }
            }
            restored_clips.push(id);
        }

        let mut restored_groups: Vec<GroupId> = Vec::with_capacity(self.groups.len());
        for snapshot in &self.groups {
            let members: Vec<ElementRef> = snapshot
                .members
                .iter()
                .map(|m| match m {
                    Member::Clip(i) => ElementRef::Clip(restored_clips[*i]),
                    Member::Group(i) => ElementRef::Group(restored_groups[*i]),
                })
                .collect();
            restored_groups.push(timeline.group_elements(&members)?);
        }

        info!(
            project = self.name.as_str(),
            clips = restored_clips.len(),
            groups = restored_groups.len(),
            "restored timeline"
        );
        Ok(timeline)
    }
}

fn parent_of(timeline: &Timeline, el: ElementRef) -> Result<Option<GroupId>> {
    match el {
        ElementRef::Clip(id) => Ok(timeline.clip(id)?.group()),
        ElementRef::Group(id) => Ok(timeline.group(id)?.parent()),
    }
}
