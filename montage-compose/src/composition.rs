//! The composition: object bookkeeping plus live graph rebuilds.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use montage_core::{ClockTime, TimeSpan};

use crate::bus::{BusMessage, BusSender};
use crate::error::{Error, Result};
use crate::graph::{Event, GhostPad, Pad, SeekEvent};
use crate::object::{NleKind, NleObject, NodeState, ObjectId, ObjectTiming};
use crate::stack::{are_same_stacks, collect_stack, next_stack_change, Stack, StackNode};

/// Requested playback segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub rate: f64,
    pub start: ClockTime,
    pub stop: ClockTime,
    /// Last resolved playback position.
    pub position: ClockTime,
    /// Report segment-done instead of end of stream when the segment runs
    /// out.
    pub segment_seek: bool,
}

impl Default for Segment {
    fn default() -> Self {
        Self {
            rate: 1.0,
            start: ClockTime::ZERO,
            stop: ClockTime::NONE,
            position: ClockTime::ZERO,
            segment_seek: false,
        }
    }
}

struct Entry {
    object: Arc<NleObject>,
    /// The object's node has not produced its pads yet; a settle callback is
    /// registered.
    awaiting_pads: bool,
}

struct CompState {
    entries: HashMap<ObjectId, Entry>,
    /// Regular objects sorted by `(start, priority)`.
    by_start: Vec<Arc<NleObject>>,
    /// Regular objects sorted by `(stop, priority)`.
    by_stop: Vec<Arc<NleObject>>,
    /// Always-on background objects pinned to the composition bounds.
    expandables: Vec<Arc<NleObject>>,
    /// The stack currently wired into the graph.
    current: Option<StackNode>,
    /// `current` matches the graph; a deferred seek may still target it.
    stack_valid: bool,
    segment: Segment,
    /// Validity window of `current`: positions in
    /// `[segment_start, segment_stop)` play without a rebuild.
    segment_start: ClockTime,
    segment_stop: ClockTime,
    /// Seek to send once all awaited pads have settled.
    child_seek: Option<SeekEvent>,
    waiting_pads: usize,
    /// When false, edits only mark `update_required`; re-enabling performs
    /// one rebuild for the whole batch.
    can_update: bool,
    update_required: bool,
    bounds: TimeSpan,
    node_state: NodeState,
    /// Bumped by every object mutation. A rebuild that dropped the lock to
    /// drive nodes re-checks this before installing its stack.
    generation: u64,
}

impl CompState {
    fn resort(&mut self) {
        self.by_start.sort_by_key(|o| (o.start(), o.priority()));
        self.by_stop.sort_by_key(|o| (o.stop(), o.priority()));
    }

    fn in_active_segment(&self, object: &NleObject) -> bool {
        if !self.segment_start.is_valid() {
            return false;
        }
        let before_stop = !self.segment_stop.is_valid() || object.start() < self.segment_stop;
        before_stop && object.stop() > self.segment_start
    }

    fn in_current_stack(&self, id: ObjectId) -> bool {
        self.current.as_ref().is_some_and(|r| r.contains(id))
    }

    /// Whether the requested segment falls outside the current validity
    /// window, forcing a topology rebuild.
    fn seek_needs_rebuild(&self) -> bool {
        let target = if self.segment.rate >= 0.0 {
            self.segment.start
        } else {
            self.segment.stop
        };
        if !target.is_valid() || !self.segment_start.is_valid() {
            return true;
        }
        if target < self.segment_start {
            return true;
        }
        self.segment_stop.is_valid() && target >= self.segment_stop
    }

    fn position_for_update(&self) -> ClockTime {
        if self.segment.position.is_valid() {
            self.segment.position
        } else if self.segment_start.is_valid() {
            self.segment_start
        } else {
            ClockTime::ZERO
        }
    }

    /// Stack at `position`, skipping over gaps towards the playback
    /// direction. Returns the stack and the possibly-adjusted position.
    fn clean_stack(&self, position: ClockTime, reverse: bool) -> (Stack, ClockTime) {
        let probe = |pos: ClockTime| -> Option<ClockTime> {
            if !reverse {
                Some(pos)
            } else if pos > ClockTime::ZERO {
                // Reverse playback targets the exclusive stop edge; the
                // stack feeding it lies just below.
                Some(pos.saturating_sub(ClockTime::from_nanos(1)))
            } else {
                None
            }
        };

        let stack = match probe(position) {
            Some(p) => collect_stack(&self.by_start, &self.by_stop, &self.expandables, p),
            None => Stack {
                root: None,
                window_start: ClockTime::NONE,
                window_stop: ClockTime::NONE,
            },
        };
        if stack.root.is_some() || self.by_start.is_empty() {
            return (stack, position);
        }

        match next_stack_change(&self.by_start, &self.by_stop, position, reverse) {
            Some(next) => {
                let stack = match probe(next) {
                    Some(p) => {
                        collect_stack(&self.by_start, &self.by_stop, &self.expandables, p)
                    }
                    None => {
                        return (stack, position);
                    }
                };
                debug!(%position, %next, "skipped gap to next stack");
                (stack, next)
            }
            None => (stack, position),
        }
    }

    /// Seek event targeting the current validity window clamped to the
    /// requested segment.
    fn make_seek_event(&self, initial: bool, update_stop_only: bool) -> SeekEvent {
        let start = if update_stop_only || !self.segment.start.is_valid() {
            self.segment_start
        } else {
            self.segment.start.max_valid(self.segment_start)
        };
        let stop = if self.segment.stop.is_valid() {
            self.segment.stop.min_valid(self.segment_stop)
        } else {
            self.segment_stop
        };
        SeekEvent {
            rate: self.segment.rate,
            start,
            stop,
            flush: !initial,
            initial,
            segment: self.segment.segment_seek,
        }
    }
}

struct FlushState {
    /// A flushing seek is in progress; end-of-stream arriving now belongs to
    /// the torn-down topology and is dropped.
    flushing: bool,
}

/// A composition of timed objects behind a single output pad.
///
/// All mutation goes through `&Arc<Self>` methods since rebuilds register
/// callbacks that point back at the composition.
pub struct Composition {
    name: String,
    state: Mutex<CompState>,
    flushing: Mutex<FlushState>,
    ghost: GhostPad,
    bus: BusSender,
}

impl Composition {
    pub fn new(name: impl Into<String>, bus: BusSender) -> Arc<Self> {
        let name = name.into();
        let ghost = GhostPad::new(format!("{name}.src"));
        Arc::new(Self {
            name,
            state: Mutex::new(CompState {
                entries: HashMap::new(),
                by_start: Vec::new(),
                by_stop: Vec::new(),
                expandables: Vec::new(),
                current: None,
                stack_valid: false,
                segment: Segment::default(),
                segment_start: ClockTime::NONE,
                segment_stop: ClockTime::NONE,
                child_seek: None,
                waiting_pads: 0,
                can_update: true,
                update_required: false,
                bounds: TimeSpan::new(ClockTime::ZERO, ClockTime::ZERO),
                node_state: NodeState::Stopped,
                generation: 0,
            }),
            flushing: Mutex::new(FlushState { flushing: false }),
            ghost,
            bus,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The composition's stable source pad.
    pub fn output(&self) -> &GhostPad {
        &self.ghost
    }

    pub fn output_pad(&self) -> Pad {
        self.ghost.pad().clone()
    }

    pub fn state(&self) -> NodeState {
        self.state.lock().node_state
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.state.lock().entries.contains_key(&id)
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Start and stop of the outermost objects.
    pub fn bounds(&self) -> TimeSpan {
        self.state.lock().bounds
    }

    pub fn position(&self) -> ClockTime {
        self.state.lock().segment.position
    }

    /// Validity window of the current stack.
    pub fn segment_window(&self) -> (ClockTime, ClockTime) {
        let st = self.state.lock();
        (st.segment_start, st.segment_stop)
    }

    /// Objects of the current stack, most prominent first (pre-order).
    pub fn current_stack(&self) -> Vec<ObjectId> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|r| r.objects().iter().map(|o| o.id()).collect())
            .unwrap_or_default()
    }

    pub fn is_update_enabled(&self) -> bool {
        self.state.lock().can_update
    }

    /// Add `object` to the composition. Triggers a rebuild when the object
    /// lands in the active segment, unless batch updates are disabled.
    pub fn add_object(self: &Arc<Self>, object: Arc<NleObject>) -> Result<()> {
        let (needs_update, position) = {
            let mut st = self.state.lock();
            let id = object.id();
            if st.entries.contains_key(&id) {
                return Err(Error::DuplicateObject(id));
            }
            debug!(
                composition = self.name.as_str(),
                object = object.name(),
                %id,
                start = %object.start(),
                duration = %object.duration(),
                priority = object.priority(),
                "adding object"
            );
            st.entries.insert(
                id,
                Entry {
                    object: object.clone(),
                    awaiting_pads: false,
                },
            );
            if object.is_expandable() {
                let mut t = object.timing();
                t.start = ClockTime::ZERO;
                t.duration = st.bounds.stop;
                object.set_timing(t);
                st.expandables.push(object.clone());
            } else {
                st.by_start.push(object.clone());
                st.by_stop.push(object.clone());
                st.resort();
            }
            st.generation = st.generation.wrapping_add(1);
            let update = st.in_active_segment(&object)
                || st.current.is_none()
                || object.is_expandable();
            if !st.can_update {
                st.update_required |= update;
                (false, ClockTime::NONE)
            } else {
                (update, st.position_for_update())
            }
        };
        if needs_update {
            self.update_pipeline(position, true, true, true)
        } else {
            let mut st = self.state.lock();
            self.recompute_bounds(&mut st);
            Ok(())
        }
    }

    /// Remove an object, detaching any in-flight pad block and unlinking it
    /// from the graph.
    pub fn remove_object(self: &Arc<Self>, id: ObjectId) -> Result<Arc<NleObject>> {
        let (object, needs_update, position) = {
            let mut st = self.state.lock();
            let entry = st.entries.remove(&id).ok_or(Error::ObjectNotFound(id))?;
            let object = entry.object;
            debug!(
                composition = self.name.as_str(),
                object = object.name(),
                %id,
                "removing object"
            );
            if entry.awaiting_pads {
                st.waiting_pads = st.waiting_pads.saturating_sub(1);
            }
            if let Some(pad) = object.output_pad() {
                pad.unblock();
                pad.unlink();
            }
            if object.is_expandable() {
                st.expandables.retain(|o| o.id() != id);
            } else {
                st.by_start.retain(|o| o.id() != id);
                st.by_stop.retain(|o| o.id() != id);
            }
            st.generation = st.generation.wrapping_add(1);
            let update = st.in_current_stack(id) || st.in_active_segment(&object);
            if !st.can_update {
                st.update_required |= update;
                (object, false, ClockTime::NONE)
            } else {
                let pos = st.position_for_update();
                (object, update, pos)
            }
        };
        if needs_update {
            self.update_pipeline(position, true, true, true)?;
        } else {
            let mut st = self.state.lock();
            self.recompute_bounds(&mut st);
        }
        object.node().set_state(NodeState::Stopped);
        Ok(object)
    }

    /// Change an object's timing or active flag. Rebuilds when the move
    /// touches the active segment or the current stack.
    pub fn set_object_timing(self: &Arc<Self>, id: ObjectId, timing: ObjectTiming) -> Result<()> {
        let (needs_update, position) = {
            let mut st = self.state.lock();
            let object = st
                .entries
                .get(&id)
                .map(|e| e.object.clone())
                .ok_or(Error::ObjectNotFound(id))?;
            let was_active = st.in_active_segment(&object);
            trace!(
                composition = self.name.as_str(),
                object = object.name(),
                start = %timing.start,
                duration = %timing.duration,
                priority = timing.priority,
                active = timing.active,
                "retiming object"
            );
            object.set_timing(timing);
            st.resort();
            st.generation = st.generation.wrapping_add(1);
            let update = was_active
                || st.in_active_segment(&object)
                || st.in_current_stack(id)
                || st.current.is_none();
            if !st.can_update {
                st.update_required |= update;
                (false, ClockTime::NONE)
            } else {
                (update, st.position_for_update())
            }
        };
        if needs_update {
            self.update_pipeline(position, true, true, true)
        } else {
            let mut st = self.state.lock();
            self.recompute_bounds(&mut st);
            Ok(())
        }
    }

    /// Toggle batch-update mode. Disabling defers rebuilds; re-enabling
    /// performs a single rebuild covering every deferred edit.
    pub fn set_update_mode(self: &Arc<Self>, enabled: bool) -> Result<()> {
        let (run, position) = {
            let mut st = self.state.lock();
            if st.can_update == enabled {
                return Ok(());
            }
            st.can_update = enabled;
            debug!(
                composition = self.name.as_str(),
                enabled, "toggled batch update mode"
            );
            if enabled && st.update_required {
                st.update_required = false;
                (true, st.position_for_update())
            } else {
                (false, ClockTime::NONE)
            }
        };
        if run {
            self.update_pipeline(position, true, true, true)
        } else {
            Ok(())
        }
    }

    /// Seek the composition. A seek inside the current validity window is
    /// forwarded to the current stack; anything else rebuilds the topology.
    pub fn seek(
        self: &Arc<Self>,
        rate: f64,
        start: ClockTime,
        stop: ClockTime,
        flush: bool,
        segment_seek: bool,
    ) -> Result<()> {
        if rate == 0.0 || !rate.is_finite() {
            return Err(Error::InvalidRate(rate));
        }
        {
            let mut st = self.state.lock();
            debug!(
                composition = self.name.as_str(),
                rate, %start, %stop, flush, segment_seek, "seek requested"
            );
            st.segment.rate = rate;
            st.segment.start = start;
            st.segment.stop = stop;
            st.segment.segment_seek = segment_seek;
        }
        if flush {
            self.flushing.lock().flushing = true;
        }
        self.seek_handling(false, false)
    }

    /// Bring the composition to `target`. The first transition out of
    /// `Stopped` performs the initial stack build and seek.
    pub fn set_state(self: &Arc<Self>, target: NodeState) -> Result<()> {
        let previous = {
            let mut st = self.state.lock();
            let p = st.node_state;
            st.node_state = target;
            p
        };
        if previous == target {
            return Ok(());
        }
        info!(
            composition = self.name.as_str(),
            ?previous,
            ?target,
            "composition state change"
        );
        match target {
            NodeState::Paused if previous == NodeState::Stopped => {
                let position = {
                    let st = self.state.lock();
                    let p = if st.segment.rate >= 0.0 {
                        st.segment.start
                    } else {
                        st.segment.stop
                    };
                    if p.is_valid() {
                        p
                    } else {
                        ClockTime::ZERO
                    }
                };
                self.update_pipeline(position, true, true, true)
            }
            NodeState::Playing | NodeState::Paused => {
                let objects = {
                    let st = self.state.lock();
                    st.current
                        .as_ref()
                        .map(StackNode::objects)
                        .unwrap_or_default()
                };
                for object in objects {
                    object.node().set_state(target);
                }
                Ok(())
            }
            NodeState::Stopped => {
                self.reset();
                Ok(())
            }
        }
    }

    /// Handle end of stream from the current stack: advance the segment past
    /// the validity window and reseek. Forwards end of stream downstream only
    /// when no further stack exists.
    pub fn handle_stack_eos(self: &Arc<Self>) -> Result<()> {
        if self.flushing.lock().flushing {
            debug!(
                composition = self.name.as_str(),
                "dropping end of stream raced by a flushing seek"
            );
            return Ok(());
        }
        {
            let mut st = self.state.lock();
            if st.segment.rate >= 0.0 {
                st.segment.start = st.segment_stop;
            } else {
                st.segment.stop = st.segment_start;
            }
            trace!(
                composition = self.name.as_str(),
                start = %st.segment.start,
                stop = %st.segment.stop,
                "advancing segment past finished stack"
            );
        }
        self.seek_handling(true, true)?;

        let message = {
            let st = self.state.lock();
            if st.current.is_some() {
                None
            } else if st.segment.segment_seek {
                let position = if st.segment.rate >= 0.0 {
                    st.bounds.stop
                } else {
                    st.bounds.start
                };
                Some(BusMessage::SegmentDone {
                    source: self.name.clone(),
                    position,
                })
            } else {
                Some(BusMessage::Eos {
                    source: self.name.clone(),
                })
            }
        };
        if let Some(message) = message {
            match &message {
                BusMessage::SegmentDone { position, .. } => {
                    self.ghost.push_event(Event::SegmentDone(*position));
                }
                _ => {
                    self.ghost.push_event(Event::Eos);
                }
            }
            info!(composition = self.name.as_str(), ?message, "playback finished");
            let _ = self.bus.send(message);
        }
        Ok(())
    }

    /// Post an element error, dropping it when the object is not part of the
    /// active stack (stale errors from torn-down branches).
    pub fn post_object_error(&self, id: ObjectId, message: impl Into<String>) {
        let source = {
            let st = self.state.lock();
            let Some(entry) = st.entries.get(&id) else {
                return;
            };
            if !st.in_current_stack(id) {
                debug!(
                    composition = self.name.as_str(),
                    object = entry.object.name(),
                    "dropping error from object outside the active stack"
                );
                return;
            }
            entry.object.name().to_owned()
        };
        let _ = self.bus.send(BusMessage::Error {
            source,
            message: message.into(),
        });
    }

    // ------------------------------------------------------------------
    // internals

    fn recompute_bounds(&self, st: &mut CompState) {
        let start = st
            .by_start
            .first()
            .map(|o| o.start())
            .unwrap_or(ClockTime::ZERO);
        let stop = st
            .by_stop
            .last()
            .map(|o| o.stop())
            .unwrap_or(ClockTime::ZERO);
        if st.bounds.start != start || st.bounds.stop != stop {
            st.bounds = TimeSpan::new(start, stop);
            debug!(
                composition = self.name.as_str(),
                %start, %stop, "composition bounds changed"
            );
            for expandable in &st.expandables {
                let mut t = expandable.timing();
                t.start = ClockTime::ZERO;
                t.duration = stop;
                expandable.set_timing(t);
            }
            let _ = self.bus.send(BusMessage::DurationChanged {
                source: self.name.clone(),
                duration: stop,
            });
        }
    }

    fn seek_handling(self: &Arc<Self>, initial: bool, force_update: bool) -> Result<()> {
        let (needed, position) = {
            let st = self.state.lock();
            let needed = force_update || st.seek_needs_rebuild();
            let position = if st.segment.rate >= 0.0 {
                st.segment.start
            } else {
                st.segment.stop
            };
            (needed, position)
        };
        if needed {
            self.update_pipeline(position, initial, true, !force_update)
        } else {
            // Same stack; forward the seek straight to its top.
            let (top, seek) = {
                let mut st = self.state.lock();
                let target = if st.segment.rate >= 0.0 {
                    st.segment.start
                } else {
                    st.segment.stop
                };
                if target.is_valid() {
                    st.segment.position = target;
                }
                (
                    st.current.as_ref().map(|r| r.object.clone()),
                    st.make_seek_event(initial, false),
                )
            };
            self.send_stack_seek(top.as_ref(), seek)
        }
    }

    /// Rebuild the graph for `position`.
    ///
    /// `initial` marks the seek as topology bookkeeping rather than a user
    /// request, `change_state` lets the rebuild start and stop nodes, and
    /// `modify` means the change came from an edit, requiring a downstream
    /// flush even when the topology is unchanged above the edit point.
    fn update_pipeline(
        self: &Arc<Self>,
        position: ClockTime,
        initial: bool,
        change_state: bool,
        modify: bool,
    ) -> Result<()> {
        let mut st = self.state.lock();
        self.recompute_bounds(&mut st);
        if !st.can_update || st.node_state == NodeState::Stopped {
            st.update_required = true;
            return Ok(());
        }
        if !position.is_valid() {
            return Ok(());
        }
        st.update_required = false;
        let generation = st.generation;
        debug!(
            composition = self.name.as_str(),
            %position, initial, change_state, modify, "updating pipeline"
        );

        let reverse = st.segment.rate < 0.0;
        let (stack, resolved) = st.clean_stack(position, reverse);
        if resolved.is_valid() {
            st.segment.position = resolved;
        }

        let old = st.current.take();
        let same = are_same_stacks(old.as_ref(), stack.root.as_ref());
        trace!(
            composition = self.name.as_str(),
            same,
            old_size = old.as_ref().map(StackNode::len).unwrap_or(0),
            new_size = stack.root.as_ref().map(StackNode::len).unwrap_or(0),
            "compared stacks"
        );

        let mut deactivated = Vec::new();
        if !same {
            match old.as_ref() {
                Some(old_root) => deactivate_node(
                    old_root,
                    None,
                    stack.root.as_ref(),
                    modify,
                    &self.ghost,
                    &mut deactivated,
                ),
                None => {
                    if modify {
                        self.ghost.push_event(Event::FlushStart);
                        self.ghost.push_event(Event::FlushStop);
                    }
                }
            }
            // Drop stale pad waits belonging to the torn-down stack.
            for object in &deactivated {
                if let Some(entry) = st.entries.get_mut(&object.id()) {
                    if entry.awaiting_pads {
                        entry.awaiting_pads = false;
                        st.waiting_pads = st.waiting_pads.saturating_sub(1);
                    }
                }
            }
        }

        let (new_start, new_stop) = if !reverse {
            (resolved, stack.window_stop)
        } else {
            (stack.window_start, resolved)
        };
        let start_changed = st.segment_start != new_start;
        let stop_changed = st.segment_stop != new_stop;
        st.segment_start = new_start;
        st.segment_stop = new_stop;
        st.child_seek = None;
        st.stack_valid = false;

        if change_state && !deactivated.is_empty() {
            drop(st);
            for object in &deactivated {
                object.node().set_state(NodeState::Stopped);
            }
            st = self.state.lock();
            if st.generation != generation {
                debug!(
                    composition = self.name.as_str(),
                    "objects changed while stopping nodes; recomputing stack"
                );
                let position = st.position_for_update();
                drop(st);
                return self.update_pipeline(position, initial, change_state, modify);
            }
        }

        match stack.root {
            Some(root) => {
                if !same {
                    self.relink_node(&mut st, &root, None, true);
                    if change_state {
                        let target = st.node_state;
                        let objects = root.objects();
                        drop(st);
                        for object in &objects {
                            object.node().set_state(target);
                        }
                        st = self.state.lock();
                        if st.generation != generation {
                            debug!(
                                composition = self.name.as_str(),
                                "objects changed while starting nodes; recomputing stack"
                            );
                            let position = st.position_for_update();
                            drop(st);
                            return self.update_pipeline(position, initial, change_state, modify);
                        }
                    }
                }
                st.current = Some(root);
                st.stack_valid = true;

                let seek = if same && (start_changed || stop_changed) {
                    st.make_seek_event(
                        initial || st.node_state != NodeState::Playing,
                        !start_changed,
                    )
                } else {
                    st.make_seek_event(initial, false)
                };

                if st.waiting_pads == 0 {
                    let top = st.current.as_ref().map(|r| r.object.clone());
                    drop(st);
                    self.send_stack_seek(top.as_ref(), seek)
                } else {
                    debug!(
                        composition = self.name.as_str(),
                        waiting = st.waiting_pads,
                        "deferring stack seek until pads settle"
                    );
                    st.child_seek = Some(seek);
                    Ok(())
                }
            }
            None => {
                st.current = None;
                if st.by_start.is_empty() {
                    st.segment_start = ClockTime::ZERO;
                    st.segment_stop = ClockTime::NONE;
                }
                drop(st);
                self.ghost.set_target(None);
                Ok(())
            }
        }
    }

    fn relink_node(
        self: &Arc<Self>,
        st: &mut CompState,
        node: &StackNode,
        parent: Option<&Arc<NleObject>>,
        is_root: bool,
    ) {
        let object = &node.object;
        if let NleKind::Operation { dynamic: true, .. } = object.kind() {
            object.node().set_sink_count(node.children.len());
        }

        let mut srcpad = object.output_pad();
        if srcpad.is_none() {
            if self.begin_pad_wait(st, object) {
                srcpad = None;
            } else {
                // Settled between the check and the subscription.
                srcpad = object.output_pad();
            }
        }

        if let Some(srcpad) = srcpad {
            if !srcpad.is_blocked() {
                let name = object.name().to_owned();
                srcpad.block_async(move |_| {
                    trace!(object = name.as_str(), "pad blocked for relink");
                });
            }
            if let Some(par) = parent {
                if !srcpad.is_linked() {
                    match par.unlinked_sink() {
                        Some(sink) => {
                            if let Err(err) = Pad::link(&srcpad, &sink) {
                                warn!(
                                    composition = self.name.as_str(),
                                    %err,
                                    "failed to link stack entry"
                                );
                            }
                        }
                        None => warn!(
                            composition = self.name.as_str(),
                            operation = par.name(),
                            "no free sink pad for stack entry"
                        ),
                    }
                }
            }
            if !is_root {
                srcpad.unblock();
            }
        }

        for child in &node.children {
            self.relink_node(st, child, Some(&node.object), false);
        }
    }

    /// Register a settle callback for a node without pads. Returns `false`
    /// when the pads settled before the subscription landed.
    fn begin_pad_wait(self: &Arc<Self>, st: &mut CompState, object: &Arc<NleObject>) -> bool {
        let id = object.id();
        let Some(entry) = st.entries.get_mut(&id) else {
            return false;
        };
        if entry.awaiting_pads {
            return true;
        }
        let weak = Arc::downgrade(self);
        let registered = object.node().subscribe_pads_settled(Box::new(move || {
            if let Some(comp) = weak.upgrade() {
                comp.pads_settled(id);
            }
        }));
        if registered {
            entry.awaiting_pads = true;
            st.waiting_pads += 1;
            debug!(
                composition = self.name.as_str(),
                object = object.name(),
                waiting = st.waiting_pads,
                "waiting for pads to settle"
            );
        }
        registered
    }

    /// Settle callback: link the late pad into the current stack and, once no
    /// pads remain outstanding, fire the deferred stack seek.
    fn pads_settled(self: &Arc<Self>, id: ObjectId) {
        let mut st = self.state.lock();
        let Some(entry) = st.entries.get_mut(&id) else {
            return;
        };
        if !entry.awaiting_pads {
            return;
        }
        entry.awaiting_pads = false;
        let object = entry.object.clone();
        st.waiting_pads = st.waiting_pads.saturating_sub(1);
        debug!(
            composition = self.name.as_str(),
            object = object.name(),
            remaining = st.waiting_pads,
            "pads settled"
        );

        if let Some(root) = st.current.as_ref() {
            if let Some((_, parent, _)) = root.find_with_parent(id) {
                if let Some(srcpad) = object.output_pad() {
                    match parent {
                        Some(parent_node) => {
                            let par = parent_node.object.clone();
                            if !srcpad.is_linked() {
                                match par.unlinked_sink() {
                                    Some(sink) => {
                                        if let Err(err) = Pad::link(&srcpad, &sink) {
                                            warn!(
                                                composition = self.name.as_str(),
                                                %err,
                                                "failed to link settled pad"
                                            );
                                        }
                                    }
                                    None => warn!(
                                        composition = self.name.as_str(),
                                        operation = par.name(),
                                        "no free sink pad for settled pad"
                                    ),
                                }
                            }
                            srcpad.unblock();
                        }
                        // Stack top: stays blocked until the deferred seek.
                        None => {}
                    }
                }
            }
        }

        if st.waiting_pads == 0 && st.stack_valid {
            if let Some(seek) = st.child_seek.take() {
                let top = st.current.as_ref().map(|r| r.object.clone());
                drop(st);
                if let Err(err) = self.send_stack_seek(top.as_ref(), seek) {
                    warn!(composition = self.name.as_str(), %err, "deferred stack seek failed");
                    let _ = self.bus.send(BusMessage::Error {
                        source: self.name.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    /// Push the stack seek into the top element, retarget the output pad and
    /// release it.
    fn send_stack_seek(self: &Arc<Self>, top: Option<&Arc<NleObject>>, seek: SeekEvent) -> Result<()> {
        let Some(top) = top else {
            return Ok(());
        };
        let Some(pad) = top.output_pad() else {
            warn!(
                composition = self.name.as_str(),
                object = top.name(),
                "stack top has no source pad"
            );
            return Err(Error::NoOutputPad {
                object: top.name().to_owned(),
            });
        };
        debug!(
            composition = self.name.as_str(),
            object = top.name(),
            start = %seek.start,
            stop = %seek.stop,
            rate = seek.rate,
            initial = seek.initial,
            "sending stack seek"
        );
        if pad.send_event(Event::Seek(seek)) {
            self.ghost.set_target(Some(pad.clone()));
            pad.unblock();
            self.flushing.lock().flushing = false;
            Ok(())
        } else {
            Err(Error::SeekRejected {
                object: top.name().to_owned(),
            })
        }
    }

    fn reset(&self) {
        let objects = {
            let mut st = self.state.lock();
            st.current = None;
            st.stack_valid = false;
            st.child_seek = None;
            st.waiting_pads = 0;
            for entry in st.entries.values_mut() {
                entry.awaiting_pads = false;
            }
            st.segment = Segment::default();
            st.segment_start = ClockTime::NONE;
            st.segment_stop = ClockTime::NONE;
            st.update_required = false;
            st.entries
                .values()
                .map(|e| e.object.clone())
                .collect::<Vec<_>>()
        };
        self.ghost.set_target(None);
        self.flushing.lock().flushing = false;
        for object in objects {
            if let Some(pad) = object.output_pad() {
                pad.unblock();
                pad.unlink();
            }
            object.node().set_state(NodeState::Stopped);
        }
        debug!(composition = self.name.as_str(), "composition reset");
    }
}

/// Tear-down pass over the outgoing stack: block and flush every pad, unlink
/// entries that move or vanish, and collect objects absent from the new stack
/// for deactivation.
fn deactivate_node(
    node: &StackNode,
    parent: Option<&StackNode>,
    new_root: Option<&StackNode>,
    modify: bool,
    ghost: &GhostPad,
    deactivated: &mut Vec<Arc<NleObject>>,
) {
    let object = &node.object;
    let new_info = new_root.and_then(|r| r.find_with_parent(object.id()));

    if let Some(srcpad) = object.output_pad() {
        if !srcpad.is_blocked() {
            let name = object.name().to_owned();
            srcpad.block_async(move |_| {
                trace!(object = name.as_str(), "pad blocked for teardown");
            });
        }
        if modify || parent.is_some() {
            srcpad.push_event(Event::FlushStart);
            srcpad.push_event(Event::FlushStop);
        }
    }

    match parent {
        None => ghost.set_target(None),
        Some(old_parent) => {
            let moved = match &new_info {
                None => true,
                Some((_, new_parent, new_index)) => {
                    let same_parent = matches!(
                        new_parent,
                        Some(np) if Arc::ptr_eq(&np.object, &old_parent.object)
                    );
                    let old_index = old_parent
                        .children
                        .iter()
                        .position(|c| Arc::ptr_eq(&c.object, object))
                        .unwrap_or(0);
                    !(same_parent && *new_index == old_index)
                }
            };
            if moved {
                if let Some(srcpad) = object.output_pad() {
                    if srcpad.is_linked() {
                        srcpad.push_event(Event::FlushStart);
                        srcpad.push_event(Event::FlushStop);
                        srcpad.unlink();
                    }
                }
            }
        }
    }

    if object.is_operation() {
        for child in &node.children {
            deactivate_node(child, Some(node), new_root, modify, ghost, deactivated);
        }
    }

    if new_info.is_none() {
        deactivated.push(object.clone());
    }
}
