//! The timeline: layers, clips, groups and the commit protocol.
//!
//! Edits mutate the model immediately but reach the track compositions only
//! on [`Timeline::commit`], which diffs the desired object set per track
//! against what was last shipped and applies the whole batch as a single
//! graph rebuild.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, trace};

use montage_compose::{
    bus, BusMessage, BusReceiver, BusSender, NleKind, NleObject, ObjectId, ObjectTiming,
};
use montage_core::ClockTime;

use crate::asset::{Asset, MemoryNodeFactory, NodeFactory};
use crate::clip::{Clip, ClipKind, ElementTiming, TrackElement};
use crate::element::{
    ClipId, ElementRef, GroupId, TrackId, TrackKind, LAYER_HEIGHT, SOURCE_OFFSET,
    TRANSITION_OFFSET,
};
use crate::error::{Error, Result};
use crate::group::Group;
use crate::layer::Layer;
use crate::track::Track;

/// A complete editing timeline.
pub struct Timeline {
    name: String,
    layers: Vec<Layer>,
    tracks: Vec<Track>,
    clips: HashMap<ClipId, Clip>,
    groups: HashMap<GroupId, Group>,
    /// Auto transition per overlapping clip pair: `(earlier, later)` keyed by
    /// the clips it bridges.
    transitions: HashMap<(ClipId, ClipId), ClipId>,
    transition_factory: Arc<dyn NodeFactory>,
    next_clip: u64,
    next_group: u64,
    next_track: u64,
    bus_tx: BusSender,
    bus_rx: BusReceiver,
}

impl Timeline {
    pub fn new(name: impl Into<String>) -> Self {
        let (bus_tx, bus_rx) = bus();
        Self {
            name: name.into(),
            layers: Vec::new(),
            tracks: Vec::new(),
            clips: HashMap::new(),
            groups: HashMap::new(),
            transitions: HashMap::new(),
            transition_factory: Arc::new(MemoryNodeFactory),
            next_clip: 1,
            next_group: 1,
            next_track: 1,
            bus_tx,
            bus_rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receiver for composition and commit notifications. Clonable.
    pub fn bus(&self) -> BusReceiver {
        self.bus_rx.clone()
    }

    /// Factory used for crossfade nodes; sources come from their asset.
    pub fn set_transition_factory(&mut self, factory: Arc<dyn NodeFactory>) {
        self.transition_factory = factory;
    }

    // ------------------------------------------------------------------
    // layers and tracks

    /// Append a layer below the existing ones and return its priority.
    pub fn append_layer(&mut self, name: impl Into<String>) -> usize {
        self.layers.push(Layer::new(name));
        self.layers.len() - 1
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, layer: usize) -> Result<&Layer> {
        self.layers.get(layer).ok_or(Error::LayerOutOfRange {
            layer,
            count: self.layers.len(),
        })
    }

    pub fn set_auto_transition(&mut self, layer: usize, enabled: bool) -> Result<()> {
        let count = self.layers.len();
        let entry = self
            .layers
            .get_mut(layer)
            .ok_or(Error::LayerOutOfRange { layer, count })?;
        entry.auto_transition = enabled;
        self.refresh_auto_transitions();
        Ok(())
    }

    pub fn add_track(&mut self, kind: TrackKind) -> TrackId {
        let id = TrackId(self.next_track);
        self.next_track += 1;
        info!(timeline = self.name.as_str(), %id, %kind, "adding track");
        self.tracks.push(Track::new(id, kind, self.bus_tx.clone()));
        self.backfill_track(id, kind);
        id
    }

    /// Give existing clips an element on a freshly added track, so a late
    /// track behaves as if it had been there from the start. Ships on the
    /// next commit like any other pending edit.
    fn backfill_track(&mut self, track: TrackId, kind: TrackKind) {
        for clip in self.clips.values_mut() {
            let ClipKind::Source { asset } = &clip.kind else {
                continue;
            };
            if asset.supports(kind) && clip.child_on_track(track).is_none() {
                trace!(
                    timeline = self.name.as_str(),
                    clip = clip.name.as_str(),
                    %track,
                    "backfilling track element"
                );
                clip.children.push(TrackElement::new(track, kind));
            }
        }
        // Transitions follow once both bridged clips cover the track.
        let pairs: Vec<((ClipId, ClipId), ClipId)> =
            self.transitions.iter().map(|(p, t)| (*p, *t)).collect();
        for ((a, b), tid) in pairs {
            let covered = [a, b].iter().all(|cid| {
                self.clips
                    .get(cid)
                    .is_some_and(|c| c.child_on_track(track).is_some())
            });
            if !covered {
                continue;
            }
            if let Some(clip) = self.clips.get_mut(&tid) {
                if clip.child_on_track(track).is_none() {
                    clip.children.push(TrackElement::new(track, kind));
                }
            }
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Result<&Track> {
        self.tracks
            .iter()
            .find(|t| t.id == id)
            .ok_or(Error::TrackNotFound(id))
    }

    // ------------------------------------------------------------------
    // clips

    /// Place a slice of `asset` on `layer`. The clip gets one element per
    /// track whose kind the asset supports.
    pub fn add_clip(
        &mut self,
        layer: usize,
        asset: &Arc<Asset>,
        start: ClockTime,
        inpoint: ClockTime,
        duration: ClockTime,
    ) -> Result<ClipId> {
        if layer >= self.layers.len() {
            return Err(Error::LayerOutOfRange {
                layer,
                count: self.layers.len(),
            });
        }
        let id = ClipId(self.next_clip);
        self.next_clip += 1;
        let children = self
            .tracks
            .iter()
            .filter(|t| asset.supports(t.kind))
            .map(|t| TrackElement::new(t.id, t.kind))
            .collect();
        let name = format!("{}-{}", asset.id(), id.value());
        debug!(
            timeline = self.name.as_str(),
            clip = name.as_str(),
            layer, %start, %duration, "adding clip"
        );
        self.clips.insert(
            id,
            Clip {
                id,
                name,
                layer,
                start,
                inpoint,
                duration,
                kind: ClipKind::Source {
                    asset: asset.clone(),
                },
                group: None,
                children,
            },
        );
        self.refresh_auto_transitions();
        Ok(id)
    }

    pub fn remove_clip(&mut self, id: ClipId) -> Result<()> {
        let clip = self.clips.remove(&id).ok_or(Error::ClipNotFound(id))?;
        debug!(
            timeline = self.name.as_str(),
            clip = clip.name.as_str(),
            "removing clip"
        );
        if clip.is_transition() {
            self.transitions.retain(|_, t| *t != id);
        }
        if let Some(gid) = clip.group {
            if let Some(group) = self.groups.get_mut(&gid) {
                group.children.retain(|c| *c != ElementRef::Clip(id));
            }
            self.refresh_envelope(gid)?;
        }
        self.refresh_auto_transitions();
        Ok(())
    }

    pub fn clip(&self, id: ClipId) -> Result<&Clip> {
        self.clips.get(&id).ok_or(Error::ClipNotFound(id))
    }

    pub fn clips(&self) -> impl Iterator<Item = &Clip> {
        self.clips.values()
    }

    /// Auto transitions currently alive, one per overlapping pair.
    pub fn auto_transitions(&self) -> Vec<ClipId> {
        let mut out: Vec<ClipId> = self.transitions.values().copied().collect();
        out.sort();
        out
    }

    pub fn transition_between(&self, a: ClipId, b: ClipId) -> Option<ClipId> {
        self.transitions
            .get(&(a, b))
            .or_else(|| self.transitions.get(&(b, a)))
            .copied()
    }

    /// End of the last clip.
    pub fn duration(&self) -> ClockTime {
        self.clips
            .values()
            .map(Clip::end)
            .max()
            .unwrap_or(ClockTime::ZERO)
    }

    // ------------------------------------------------------------------
    // groups

    pub fn group(&self, id: GroupId) -> Result<&Group> {
        self.groups.get(&id).ok_or(Error::GroupNotFound(id))
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Group toplevel elements so they move and trim together.
    pub fn group_elements(&mut self, members: &[ElementRef]) -> Result<GroupId> {
        if members.is_empty() {
            return Err(Error::EmptyGroup);
        }
        for member in members {
            self.ensure_editable(*member)?;
            if self.parent_of(*member)?.is_some() {
                return Err(Error::AlreadyGrouped { element: *member });
            }
        }
        let id = GroupId(self.next_group);
        self.next_group += 1;
        debug!(timeline = self.name.as_str(), group = %id, ?members, "grouping elements");
        self.groups.insert(
            id,
            Group {
                id,
                start: ClockTime::ZERO,
                duration: ClockTime::ZERO,
                priority: 0,
                height: 0,
                children: members.to_vec(),
                parent: None,
            },
        );
        for member in members {
            self.set_parent(*member, Some(id))?;
        }
        self.refresh_envelope(id)?;
        Ok(id)
    }

    /// Dissolve a group, leaving its children as toplevel elements.
    pub fn ungroup(&mut self, id: GroupId) -> Result<Vec<ElementRef>> {
        let group = self.groups.get(&id).ok_or(Error::GroupNotFound(id))?;
        if group.parent.is_some() {
            return Err(Error::NestedGroup(id));
        }
        let children = group.children.clone();
        for child in &children {
            self.set_parent(*child, None)?;
        }
        self.groups.remove(&id);
        debug!(timeline = self.name.as_str(), group = %id, "ungrouped");
        Ok(children)
    }

    // ------------------------------------------------------------------
    // edits

    /// Move an element. An element inside a group drags the whole toplevel
    /// group with it.
    pub fn set_start(&mut self, el: ElementRef, start: ClockTime) -> Result<()> {
        self.ensure_editable(el)?;
        let old = self.elem_start(el)?;
        if start == old {
            return Ok(());
        }
        let top = self.toplevel(el)?;
        let top_old = self.elem_start(top)?;
        let top_new = shift_time(top_old, old, start)
            .ok_or(Error::MoveBeforeOrigin { element: el })?;
        self.set_start_inner(top, top_new)?;
        self.refresh_ancestors(top)?;
        self.refresh_auto_transitions();
        Ok(())
    }

    pub fn set_duration(&mut self, el: ElementRef, duration: ClockTime) -> Result<()> {
        self.ensure_editable(el)?;
        if let ElementRef::Clip(id) = el {
            let inpoint = self.clip(id)?.inpoint;
            self.check_media_bounds(id, inpoint, duration)?;
        }
        self.set_duration_inner(el, duration)?;
        self.refresh_ancestors(el)?;
        self.refresh_auto_transitions();
        Ok(())
    }

    pub fn set_inpoint(&mut self, id: ClipId, inpoint: ClockTime) -> Result<()> {
        self.ensure_editable(ElementRef::Clip(id))?;
        let duration = self.clip(id)?.duration;
        self.check_media_bounds(id, inpoint, duration)?;
        let clip = self.clips.get_mut(&id).ok_or(Error::ClipNotFound(id))?;
        clip.inpoint = inpoint;
        Ok(())
    }

    pub fn set_active(&mut self, id: ClipId, track: TrackId, active: bool) -> Result<()> {
        let clip = self.clips.get_mut(&id).ok_or(Error::ClipNotFound(id))?;
        for element in clip.children.iter_mut().filter(|e| e.track == track) {
            element.active = active;
        }
        Ok(())
    }

    /// Lock or unlock a clip's element on one track. Unlocking freezes the
    /// current timing into the element; clip edits no longer reach it.
    pub fn set_element_locked(&mut self, id: ClipId, track: TrackId, locked: bool) -> Result<()> {
        let clip = self.clips.get_mut(&id).ok_or(Error::ClipNotFound(id))?;
        let snapshot = ElementTiming {
            start: clip.start,
            inpoint: clip.inpoint,
            duration: clip.duration,
        };
        for element in clip.children.iter_mut().filter(|e| e.track == track) {
            if element.locked == locked {
                continue;
            }
            element.locked = locked;
            element.own_timing = if locked { None } else { Some(snapshot) };
        }
        Ok(())
    }

    /// Retime an unlocked element directly. Locked elements follow their
    /// clip and reject direct edits.
    pub fn set_element_timing(
        &mut self,
        id: ClipId,
        track: TrackId,
        timing: ElementTiming,
    ) -> Result<()> {
        self.check_media_bounds(id, timing.inpoint, timing.duration)?;
        let clip = self.clips.get_mut(&id).ok_or(Error::ClipNotFound(id))?;
        for element in clip.children.iter_mut().filter(|e| e.track == track) {
            if element.locked {
                return Err(Error::ElementLocked { clip: id, track });
            }
            element.own_timing = Some(timing);
        }
        Ok(())
    }

    /// Trim the element's start edge to `position`, keeping its end fixed.
    /// The in-point follows the edge so the media keeps lining up.
    pub fn trim_start(&mut self, el: ElementRef, position: ClockTime) -> Result<()> {
        self.ensure_editable(el)?;
        self.trim_inner(el, position)?;
        self.refresh_ancestors(el)?;
        self.refresh_auto_transitions();
        Ok(())
    }

    /// Trim the element's end edge to `position`, keeping its start fixed.
    pub fn trim_end(&mut self, el: ElementRef, position: ClockTime) -> Result<()> {
        self.ensure_editable(el)?;
        let start = self.elem_start(el)?;
        if position < start {
            return Err(Error::TrimBeyondEnd {
                position,
                end: start,
            });
        }
        let duration = position.saturating_sub(start);
        if let ElementRef::Clip(id) = el {
            let inpoint = self.clip(id)?.inpoint;
            self.check_media_bounds(id, inpoint, duration)?;
        }
        self.set_duration_inner(el, duration)?;
        self.refresh_ancestors(el)?;
        self.refresh_auto_transitions();
        Ok(())
    }

    /// Move an element and everything after it by the same offset.
    pub fn ripple(&mut self, el: ElementRef, start: ClockTime) -> Result<()> {
        self.ensure_editable(el)?;
        let top = self.toplevel(el)?;
        if matches!(top, ElementRef::Group(_)) {
            // Rippling a whole group is not supported; leave the timeline
            // untouched rather than guessing.
            return Ok(());
        }
        let old = self.elem_start(top)?;
        if start == old {
            return Ok(());
        }
        let targets: Vec<ElementRef> = self
            .toplevels()
            .into_iter()
            .filter(|t| self.elem_start(*t).map(|s| s >= old).unwrap_or(false))
            .collect();
        let mut moves = Vec::with_capacity(targets.len());
        for target in targets {
            let tstart = self.elem_start(target)?;
            let tnew = shift_time(tstart, old, start)
                .ok_or(Error::MoveBeforeOrigin { element: target })?;
            moves.push((target, tnew));
        }
        for (target, tnew) in moves {
            self.set_start_inner(target, tnew)?;
        }
        self.refresh_auto_transitions();
        Ok(())
    }

    /// Roll the cut at the clip's start: the clip and every clip ending
    /// exactly there get their shared edge moved to `position`.
    pub fn roll_start(&mut self, id: ClipId, position: ClockTime) -> Result<()> {
        self.ensure_editable(ElementRef::Clip(id))?;
        let edge = self.clip(id)?.start;
        let neighbours: Vec<ClipId> = self
            .clips
            .values()
            .filter(|c| !c.is_transition() && c.id != id && c.end() == edge)
            .map(|c| c.id)
            .collect();
        for neighbour in &neighbours {
            let nstart = self.clip(*neighbour)?.start;
            if position < nstart {
                return Err(Error::TrimBeyondEnd {
                    position,
                    end: nstart,
                });
            }
        }
        self.trim_inner(ElementRef::Clip(id), position)?;
        for neighbour in neighbours {
            self.set_duration_inner(
                ElementRef::Clip(neighbour),
                position.saturating_sub(self.clip(neighbour)?.start),
            )?;
            self.refresh_ancestors(ElementRef::Clip(neighbour))?;
        }
        self.refresh_ancestors(ElementRef::Clip(id))?;
        self.refresh_auto_transitions();
        Ok(())
    }

    /// Roll the cut at the clip's end: the clip and every clip starting
    /// exactly there get their shared edge moved to `position`.
    pub fn roll_end(&mut self, id: ClipId, position: ClockTime) -> Result<()> {
        self.ensure_editable(ElementRef::Clip(id))?;
        let edge = self.clip(id)?.end();
        let neighbours: Vec<ClipId> = self
            .clips
            .values()
            .filter(|c| !c.is_transition() && c.id != id && c.start == edge)
            .map(|c| c.id)
            .collect();
        self.trim_end(ElementRef::Clip(id), position)?;
        for neighbour in neighbours {
            self.trim_inner(ElementRef::Clip(neighbour), position)?;
            self.refresh_ancestors(ElementRef::Clip(neighbour))?;
        }
        self.refresh_auto_transitions();
        Ok(())
    }

    /// Move a clip to another layer, keeping its timing.
    pub fn move_clip_to_layer(&mut self, id: ClipId, layer: usize) -> Result<()> {
        self.ensure_editable(ElementRef::Clip(id))?;
        if layer >= self.layers.len() {
            return Err(Error::LayerOutOfRange {
                layer,
                count: self.layers.len(),
            });
        }
        let clip = self.clips.get_mut(&id).ok_or(Error::ClipNotFound(id))?;
        let group = clip.group;
        trace!(
            timeline = self.name.as_str(),
            clip = clip.name.as_str(),
            from = clip.layer,
            to = layer,
            "moving clip across layers"
        );
        clip.layer = layer;
        if let Some(gid) = group {
            self.refresh_envelope(gid)?;
        }
        self.refresh_auto_transitions();
        Ok(())
    }

    /// Move a group to another layer band: every child shifts by the same
    /// number of layers. Fails without touching anything when the group
    /// would poke out of the existing layers.
    pub fn set_group_layer(&mut self, id: GroupId, priority: u32) -> Result<()> {
        let (old_priority, height, children) = {
            let group = self.groups.get(&id).ok_or(Error::GroupNotFound(id))?;
            (group.priority, group.height, group.children.clone())
        };
        if priority as usize + height as usize > self.layers.len() {
            return Err(Error::GroupOutOfLayers {
                priority,
                height,
                layers: self.layers.len(),
            });
        }
        if priority == old_priority {
            return Ok(());
        }
        let diff = priority as i64 - old_priority as i64;
        self.shift_layers(&children, diff)?;
        self.refresh_envelope(id)?;
        self.refresh_auto_transitions();
        Ok(())
    }

    // ------------------------------------------------------------------
    // commit

    /// Push the accumulated edits into the track compositions. Per track the
    /// desired object set is diffed against the previous commit and applied
    /// with updates batched, so each composition rebuilds at most once.
    /// Returns whether anything had actually changed.
    pub fn commit(&mut self) -> Result<bool> {
        self.refresh_auto_transitions();
        let source_index = self.source_priority_index();
        let mut changed = false;

        for ti in 0..self.tracks.len() {
            let track_id = self.tracks[ti].id;
            let track_kind = self.tracks[ti].kind;
            let desired = self.desired_objects(track_id, track_kind, &source_index)?;

            let composition = self.tracks[ti].composition.clone();
            composition.set_update_mode(false)?;
            let applied = (|| -> Result<bool> {
                let mut track_changed = false;
                let stale: Vec<ObjectId> = self.tracks[ti]
                    .committed
                    .keys()
                    .filter(|id| !desired.contains_key(*id))
                    .copied()
                    .collect();
                for id in stale {
                    composition.remove_object(id)?;
                    track_changed = true;
                }
                for (id, (nle, timing)) in &desired {
                    if self.tracks[ti].committed.contains_key(id) {
                        if nle.timing() != *timing {
                            composition.set_object_timing(*id, *timing)?;
                            track_changed = true;
                        }
                    } else {
                        composition.add_object(nle.clone())?;
                        if nle.timing() != *timing {
                            composition.set_object_timing(*id, *timing)?;
                        }
                        track_changed = true;
                    }
                }
                Ok(track_changed)
            })();
            let reenabled = composition.set_update_mode(true);

            // Reconcile the ledger with what actually reached the
            // composition, so a failed pass does not wedge later commits.
            let mut ledger = std::mem::take(&mut self.tracks[ti].committed);
            for (id, (nle, _)) in &desired {
                ledger.entry(*id).or_insert_with(|| nle.clone());
            }
            ledger.retain(|id, _| composition.contains(*id));
            self.tracks[ti].committed = ledger;

            reenabled?;
            changed |= applied?;
        }

        info!(timeline = self.name.as_str(), changed, "committed timeline");
        let _ = self.bus_tx.send(BusMessage::CommitDone);
        Ok(changed)
    }

    /// Fire-and-forget commit; completion is observed through the
    /// `CommitDone` bus message. The rebuild itself is synchronous here, so
    /// this is [`Timeline::commit`] minus the return value.
    pub fn commit_async(&mut self) -> Result<()> {
        self.commit().map(|_| ())
    }

    /// Desired `(object, timing)` set for one track, creating processing
    /// nodes for elements shipped for the first time.
    fn desired_objects(
        &mut self,
        track_id: TrackId,
        track_kind: TrackKind,
        source_index: &HashMap<ClipId, u32>,
    ) -> Result<HashMap<ObjectId, (Arc<NleObject>, ObjectTiming)>> {
        let mut desired = HashMap::new();
        let clip_ids: Vec<ClipId> = self.clips.keys().copied().collect();
        for cid in clip_ids {
            let factory = self.transition_factory.clone();
            let clip = self.clips.get_mut(&cid).ok_or(Error::ClipNotFound(cid))?;
            let offset = match clip.kind {
                ClipKind::Transition { .. } => TRANSITION_OFFSET,
                ClipKind::Source { .. } => {
                    SOURCE_OFFSET + source_index.get(&cid).copied().unwrap_or(0)
                }
            };
            let priority = clip.layer as u32 * LAYER_HEIGHT + offset;
            let start = clip.start;
            let duration = clip.duration;
            let inpoint = clip.inpoint;
            for element in clip.children.iter_mut().filter(|e| e.track == track_id) {
                // An unlocked element keeps its frozen timing.
                let (start, inpoint, duration) = match element.own_timing {
                    Some(own) if !element.locked => (own.start, own.inpoint, own.duration),
                    _ => (start, inpoint, duration),
                };
                let timing = ObjectTiming {
                    start,
                    duration,
                    inpoint,
                    priority,
                    active: element.active,
                };
                if element.nle.is_none() {
                    let name = format!("{}-{}", clip.name, track_kind);
                    let (node, kind) = match &clip.kind {
                        ClipKind::Source { asset } => (
                            asset.factory().create_source(&name, track_kind),
                            NleKind::Source,
                        ),
                        ClipKind::Transition { .. } => (
                            factory.create_transition(&name, track_kind),
                            NleKind::Operation {
                                sinks: 2,
                                dynamic: false,
                            },
                        ),
                    };
                    element.nle = Some(NleObject::new(name, kind, node, timing));
                }
                if let Some(nle) = &element.nle {
                    desired.insert(nle.id(), (nle.clone(), timing));
                }
            }
        }
        Ok(desired)
    }

    /// Priority offsets for source clips: within a layer, earlier clips rank
    /// above later ones.
    fn source_priority_index(&self) -> HashMap<ClipId, u32> {
        let mut per_layer: HashMap<usize, Vec<(ClockTime, ClipId)>> = HashMap::new();
        for clip in self.clips.values().filter(|c| !c.is_transition()) {
            per_layer
                .entry(clip.layer)
                .or_default()
                .push((clip.start, clip.id));
        }
        let mut index = HashMap::new();
        for list in per_layer.values_mut() {
            list.sort();
            for (i, (_, id)) in list.iter().enumerate() {
                index.insert(*id, i as u32);
            }
        }
        index
    }

    // ------------------------------------------------------------------
    // auto transitions

    /// Re-derive the auto transitions of every auto-transition layer:
    /// exactly one crossfade per overlapping pair of adjacent clips, alive
    /// only while the later clip starts strictly inside the earlier one and
    /// outlives it.
    fn refresh_auto_transitions(&mut self) {
        let mut desired: HashMap<(ClipId, ClipId), (usize, ClockTime, ClockTime)> = HashMap::new();
        for (idx, layer) in self.layers.iter().enumerate() {
            if !layer.auto_transition {
                continue;
            }
            let mut clips: Vec<(ClockTime, ClipId, ClockTime)> = self
                .clips
                .values()
                .filter(|c| c.layer == idx && !c.is_transition())
                .map(|c| (c.start, c.id, c.end()))
                .collect();
            clips.sort();
            for pair in clips.windows(2) {
                let (a_start, a, a_end) = pair[0];
                let (b_start, b, b_end) = pair[1];
                if b_start > a_start && b_start < a_end && a_end < b_end {
                    desired.insert((a, b), (idx, b_start, a_end));
                }
            }
        }

        let stale: Vec<((ClipId, ClipId), ClipId)> = self
            .transitions
            .iter()
            .filter(|(pair, _)| !desired.contains_key(*pair))
            .map(|(pair, tid)| (*pair, *tid))
            .collect();
        for (pair, tid) in stale {
            debug!(timeline = self.name.as_str(), transition = %tid, "removing auto transition");
            self.transitions.remove(&pair);
            self.clips.remove(&tid);
        }

        for (pair, (layer, start, end)) in desired {
            let duration = end.saturating_sub(start);
            match self.transitions.get(&pair) {
                Some(tid) => {
                    if let Some(clip) = self.clips.get_mut(tid) {
                        clip.layer = layer;
                        clip.start = start;
                        clip.duration = duration;
                    }
                }
                None => {
                    let (Some(a), Some(b)) = (self.clips.get(&pair.0), self.clips.get(&pair.1))
                    else {
                        continue;
                    };
                    let children: Vec<TrackElement> = a
                        .children
                        .iter()
                        .filter(|ea| b.child_on_track(ea.track).is_some())
                        .map(|ea| TrackElement::new(ea.track, ea.kind))
                        .collect();
                    let id = ClipId(self.next_clip);
                    self.next_clip += 1;
                    debug!(
                        timeline = self.name.as_str(),
                        transition = %id,
                        between = ?pair,
                        %start, %duration, "creating auto transition"
                    );
                    self.clips.insert(
                        id,
                        Clip {
                            id,
                            name: format!("transition-{}-{}", pair.0.value(), pair.1.value()),
                            layer,
                            start,
                            inpoint: ClockTime::ZERO,
                            duration,
                            kind: ClipKind::Transition { auto: true },
                            group: None,
                            children,
                        },
                    );
                    self.transitions.insert(pair, id);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // element plumbing

    /// A source clip may not reach past the end of its media.
    fn check_media_bounds(
        &self,
        id: ClipId,
        inpoint: ClockTime,
        duration: ClockTime,
    ) -> Result<()> {
        let clip = self.clip(id)?;
        if let ClipKind::Source { asset } = &clip.kind {
            let available = asset.duration();
            if available.is_valid() {
                let requested = inpoint.saturating_add(duration);
                if requested > available {
                    return Err(Error::MediaOverrun {
                        requested,
                        available,
                    });
                }
            }
        }
        Ok(())
    }

    fn ensure_editable(&self, el: ElementRef) -> Result<()> {
        if let ElementRef::Clip(id) = el {
            let clip = self.clip(id)?;
            if let ClipKind::Transition { auto: true } = clip.kind {
                return Err(Error::TransitionEdit);
            }
        } else if let ElementRef::Group(id) = el {
            self.group(id)?;
        }
        Ok(())
    }

    fn elem_start(&self, el: ElementRef) -> Result<ClockTime> {
        match el {
            ElementRef::Clip(id) => Ok(self.clip(id)?.start),
            ElementRef::Group(id) => Ok(self.group(id)?.start),
        }
    }

    fn elem_duration(&self, el: ElementRef) -> Result<ClockTime> {
        match el {
            ElementRef::Clip(id) => Ok(self.clip(id)?.duration),
            ElementRef::Group(id) => Ok(self.group(id)?.duration),
        }
    }

    fn elem_end(&self, el: ElementRef) -> Result<ClockTime> {
        match el {
            ElementRef::Clip(id) => Ok(self.clip(id)?.end()),
            ElementRef::Group(id) => Ok(self.group(id)?.end()),
        }
    }

    /// Layer priority and layer span of an element.
    fn elem_band(&self, el: ElementRef) -> Result<(u32, u32)> {
        match el {
            ElementRef::Clip(id) => Ok((self.clip(id)?.layer as u32, 1)),
            ElementRef::Group(id) => {
                let group = self.group(id)?;
                Ok((group.priority, group.height))
            }
        }
    }

    fn parent_of(&self, el: ElementRef) -> Result<Option<GroupId>> {
        match el {
            ElementRef::Clip(id) => Ok(self.clip(id)?.group),
            ElementRef::Group(id) => Ok(self.group(id)?.parent),
        }
    }

    fn set_parent(&mut self, el: ElementRef, parent: Option<GroupId>) -> Result<()> {
        match el {
            ElementRef::Clip(id) => {
                self.clips
                    .get_mut(&id)
                    .ok_or(Error::ClipNotFound(id))?
                    .group = parent;
            }
            ElementRef::Group(id) => {
                self.groups
                    .get_mut(&id)
                    .ok_or(Error::GroupNotFound(id))?
                    .parent = parent;
            }
        }
        Ok(())
    }

    /// Outermost container of an element, the element itself when toplevel.
    pub fn toplevel(&self, el: ElementRef) -> Result<ElementRef> {
        let mut current = el;
        while let Some(parent) = self.parent_of(current)? {
            current = ElementRef::Group(parent);
        }
        Ok(current)
    }

    fn toplevels(&self) -> Vec<ElementRef> {
        let mut out: Vec<ElementRef> = self
            .clips
            .values()
            .filter(|c| c.group.is_none() && !c.is_transition())
            .map(|c| ElementRef::Clip(c.id))
            .collect();
        out.extend(
            self.groups
                .values()
                .filter(|g| g.parent.is_none())
                .map(|g| ElementRef::Group(g.id)),
        );
        out
    }

    /// Move an element to `start`. For groups every child still reaching
    /// into the group's span (old or new) shifts along; children entirely
    /// before both stay put.
    fn set_start_inner(&mut self, el: ElementRef, start: ClockTime) -> Result<()> {
        match el {
            ElementRef::Clip(id) => {
                self.clips
                    .get_mut(&id)
                    .ok_or(Error::ClipNotFound(id))?
                    .start = start;
                Ok(())
            }
            ElementRef::Group(id) => {
                let (old, children) = {
                    let group = self.group(id)?;
                    (group.start, group.children.clone())
                };
                let mut moves = Vec::new();
                for child in children {
                    let child_start = self.elem_start(child)?;
                    let child_end = self.elem_end(child)?;
                    if child_end > old || child_end > start {
                        let moved = shift_time(child_start, old, start)
                            .ok_or(Error::MoveBeforeOrigin { element: child })?;
                        moves.push((child, moved));
                    }
                }
                for (child, moved) in moves {
                    self.set_start_inner(child, moved)?;
                }
                self.groups
                    .get_mut(&id)
                    .ok_or(Error::GroupNotFound(id))?
                    .start = start;
                Ok(())
            }
        }
    }

    /// Resize an element. Shrinking a group truncates children poking past
    /// the new end; expanding stretches the children that formed the old
    /// end. The group's own duration is then re-derived from its children,
    /// so it can come out shorter than requested.
    fn set_duration_inner(&mut self, el: ElementRef, duration: ClockTime) -> Result<()> {
        match el {
            ElementRef::Clip(id) => {
                self.clips
                    .get_mut(&id)
                    .ok_or(Error::ClipNotFound(id))?
                    .duration = duration;
                Ok(())
            }
            ElementRef::Group(id) => {
                let (start, old_duration, children) = {
                    let group = self.group(id)?;
                    (group.start, group.duration, group.children.clone())
                };
                let expanding = duration > old_duration;
                let new_end = start.saturating_add(duration);
                let old_end = start.saturating_add(old_duration);
                for child in children.clone() {
                    let child_end = self.elem_end(child)?;
                    if (!expanding && child_end > new_end)
                        || (expanding && child_end >= old_end)
                    {
                        let child_start = self.elem_start(child)?;
                        self.set_duration_inner(child, new_end.saturating_sub(child_start))?;
                    }
                }
                let derived = self.last_child_end(&children)?.saturating_sub(start);
                self.groups
                    .get_mut(&id)
                    .ok_or(Error::GroupNotFound(id))?
                    .duration = derived;
                Ok(())
            }
        }
    }

    /// Trim an element's start edge. Expanding a group trims every child
    /// that reaches its current start; shrinking trims children spanning the
    /// new edge and collapses children left entirely behind it.
    fn trim_inner(&mut self, el: ElementRef, position: ClockTime) -> Result<()> {
        match el {
            ElementRef::Clip(id) => self.trim_clip(id, position),
            ElementRef::Group(id) => {
                let (gstart, children) = {
                    let group = self.group(id)?;
                    (group.start, group.children.clone())
                };
                let expanding = position < gstart;
                for child in children.clone() {
                    let child_start = self.elem_start(child)?;
                    if expanding {
                        if child_start > gstart {
                            continue;
                        }
                        self.trim_inner(child, position)?;
                    } else {
                        let child_end = self.elem_end(child)?;
                        if position > child_end {
                            self.trim_inner(child, child_end)?;
                        } else if child_start < position
                            && self.elem_duration(child)? > ClockTime::ZERO
                        {
                            self.trim_inner(child, position)?;
                        }
                    }
                }
                let derived = self.last_child_end(&children)?.saturating_sub(position);
                let group = self.groups.get_mut(&id).ok_or(Error::GroupNotFound(id))?;
                group.start = position;
                group.duration = derived;
                Ok(())
            }
        }
    }

    fn trim_clip(&mut self, id: ClipId, position: ClockTime) -> Result<()> {
        let clip = self.clips.get_mut(&id).ok_or(Error::ClipNotFound(id))?;
        let end = clip.end();
        if position > end {
            return Err(Error::TrimBeyondEnd { position, end });
        }
        // The in-point tracks the edge, clamped at the media origin.
        clip.inpoint = if position >= clip.start {
            clip.inpoint.saturating_add(position.saturating_sub(clip.start))
        } else {
            clip.inpoint.saturating_sub(clip.start.saturating_sub(position))
        };
        clip.duration = end.saturating_sub(position);
        clip.start = position;
        Ok(())
    }

    /// End of the last child with real extent; zero-length children do not
    /// count towards the envelope.
    fn last_child_end(&self, children: &[ElementRef]) -> Result<ClockTime> {
        let mut last = ClockTime::ZERO;
        for child in children {
            if self.elem_duration(*child)? > ClockTime::ZERO {
                last = last.max(self.elem_end(*child)?);
            }
        }
        Ok(last)
    }

    /// Re-derive a group's envelope from its children and propagate upward.
    fn refresh_envelope(&mut self, id: GroupId) -> Result<()> {
        let (children, parent) = {
            let group = self.group(id)?;
            (group.children.clone(), group.parent)
        };
        let mut min_start = ClockTime::NONE;
        let mut max_end = ClockTime::ZERO;
        let mut min_priority = u32::MAX;
        let mut max_band = 0u32;
        for child in &children {
            let (priority, height) = self.elem_band(*child)?;
            min_priority = min_priority.min(priority);
            max_band = max_band.max(priority + height);
            if self.elem_duration(*child)? > ClockTime::ZERO {
                min_start = min_start.min_valid(self.elem_start(*child)?);
                max_end = max_end.max(self.elem_end(*child)?);
            }
        }
        let group = self.groups.get_mut(&id).ok_or(Error::GroupNotFound(id))?;
        if min_start.is_valid() {
            group.start = min_start;
            group.duration = max_end.saturating_sub(min_start);
        } else {
            group.duration = ClockTime::ZERO;
        }
        if min_priority != u32::MAX {
            group.priority = min_priority;
            group.height = max_band - min_priority;
        }
        if let Some(parent) = parent {
            self.refresh_envelope(parent)?;
        }
        Ok(())
    }

    fn refresh_ancestors(&mut self, el: ElementRef) -> Result<()> {
        if let Some(parent) = self.parent_of(el)? {
            self.refresh_envelope(parent)?;
        }
        Ok(())
    }

    fn shift_layers(&mut self, children: &[ElementRef], diff: i64) -> Result<()> {
        for child in children {
            match child {
                ElementRef::Clip(id) => {
                    let clip = self.clips.get_mut(id).ok_or(Error::ClipNotFound(*id))?;
                    clip.layer = (clip.layer as i64 + diff) as usize;
                }
                ElementRef::Group(id) => {
                    let (grandchildren, priority) = {
                        let group = self.group(*id)?;
                        (group.children.clone(), group.priority)
                    };
                    self.shift_layers(&grandchildren, diff)?;
                    let group = self.groups.get_mut(id).ok_or(Error::GroupNotFound(*id))?;
                    group.priority = (priority as i64 + diff) as u32;
                }
            }
        }
        Ok(())
    }
}

/// Apply the offset `from -> to` to `value`; `None` when the shift would go
/// below zero.
fn shift_time(value: ClockTime, from: ClockTime, to: ClockTime) -> Option<ClockTime> {
    if to >= from {
        Some(value.saturating_add(to - from))
    } else {
        let back = from - to;
        if value < back {
            None
        } else {
            Some(value - back)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_time() {
        let t = ClockTime::from_seconds;
        assert_eq!(shift_time(t(5), t(2), t(4)), Some(t(7)));
        assert_eq!(shift_time(t(5), t(4), t(2)), Some(t(3)));
        assert_eq!(shift_time(t(1), t(4), t(2)), None);
    }
}
