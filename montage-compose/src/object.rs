//! Timed objects managed by a composition.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use montage_core::{ClockTime, TimeSpan};

use crate::graph::Pad;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an object within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn new() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Target state for processing nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Stopped,
    Paused,
    Playing,
}

/// A node in the processing graph wrapped by an [`NleObject`].
///
/// Implementations may create their pads lazily (a demuxer does not know its
/// streams until it has parsed headers). The composition handles that through
/// [`ProcessingNode::subscribe_pads_settled`].
pub trait ProcessingNode: Send + Sync {
    fn name(&self) -> &str;

    /// The node's source pad, if already created.
    fn output_pad(&self) -> Option<Pad>;

    /// Sink pads of a mixing/effect node. Sources return none.
    fn sink_pads(&self) -> Vec<Pad> {
        Vec::new()
    }

    /// Ask a node with a dynamic input count to expose exactly `count` sinks.
    fn set_sink_count(&self, _count: usize) {}

    fn set_state(&self, state: NodeState);

    /// Register `callback` to run once the node's final pad set is known.
    ///
    /// Returns `false` without storing the callback if the pads are already
    /// settled; the caller then proceeds synchronously. Implementations must
    /// never invoke the callback from inside this call.
    fn subscribe_pads_settled(&self, callback: Box<dyn FnOnce() + Send>) -> bool;
}

/// Object role within a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NleKind {
    /// Produces media; a leaf of the stack tree.
    Source,
    /// Consumes the output of lower-priority stack entries.
    Operation {
        /// Number of inputs, ignored when `dynamic`.
        sinks: usize,
        /// Accepts as many inputs as the stack provides below it.
        dynamic: bool,
    },
}

/// Timing and placement properties of an object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectTiming {
    /// Position on the composition's timeline.
    pub start: ClockTime,
    pub duration: ClockTime,
    /// Offset into the underlying media at `start`.
    pub inpoint: ClockTime,
    /// Lower value is more prominent.
    pub priority: u32,
    pub active: bool,
}

impl ObjectTiming {
    pub fn new(start: ClockTime, duration: ClockTime, inpoint: ClockTime, priority: u32) -> Self {
        Self {
            start,
            duration,
            inpoint,
            priority,
            active: true,
        }
    }
}

struct Props {
    timing: ObjectTiming,
    expandable: bool,
}

/// A timed object inside a composition: a processing node plus start,
/// duration, in-point, priority and active flag. Shared behind [`Arc`];
/// stack trees and the composition's indexes all point at the same instance.
pub struct NleObject {
    id: ObjectId,
    name: String,
    kind: NleKind,
    node: Arc<dyn ProcessingNode>,
    props: Mutex<Props>,
}

impl NleObject {
    pub fn new(
        name: impl Into<String>,
        kind: NleKind,
        node: Arc<dyn ProcessingNode>,
        timing: ObjectTiming,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ObjectId::new(),
            name: name.into(),
            kind,
            node,
            props: Mutex::new(Props {
                timing,
                expandable: false,
            }),
        })
    }

    pub fn new_source(
        name: impl Into<String>,
        node: Arc<dyn ProcessingNode>,
        timing: ObjectTiming,
    ) -> Arc<Self> {
        Self::new(name, NleKind::Source, node, timing)
    }

    /// An expandable source always covers the whole composition; the
    /// composition pins its timing to its own bounds. Used for background
    /// fill under gaps.
    pub fn new_expandable(
        name: impl Into<String>,
        node: Arc<dyn ProcessingNode>,
        priority: u32,
    ) -> Arc<Self> {
        let obj = Self::new(
            name,
            NleKind::Source,
            node,
            ObjectTiming::new(ClockTime::ZERO, ClockTime::ZERO, ClockTime::ZERO, priority),
        );
        obj.props.lock().expandable = true;
        obj
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NleKind {
        self.kind
    }

    pub fn is_operation(&self) -> bool {
        matches!(self.kind, NleKind::Operation { .. })
    }

    pub fn is_expandable(&self) -> bool {
        self.props.lock().expandable
    }

    pub fn node(&self) -> &Arc<dyn ProcessingNode> {
        &self.node
    }

    pub fn timing(&self) -> ObjectTiming {
        self.props.lock().timing
    }

    pub(crate) fn set_timing(&self, timing: ObjectTiming) {
        self.props.lock().timing = timing;
    }

    pub fn start(&self) -> ClockTime {
        self.props.lock().timing.start
    }

    pub fn duration(&self) -> ClockTime {
        self.props.lock().timing.duration
    }

    pub fn stop(&self) -> ClockTime {
        let t = self.props.lock().timing;
        t.start.saturating_add(t.duration)
    }

    pub fn inpoint(&self) -> ClockTime {
        self.props.lock().timing.inpoint
    }

    pub fn priority(&self) -> u32 {
        self.props.lock().timing.priority
    }

    pub fn is_active(&self) -> bool {
        self.props.lock().timing.active
    }

    pub fn span(&self) -> TimeSpan {
        TimeSpan::new(self.start(), self.stop())
    }

    /// Covers `position` (half-open span) and is active.
    pub fn covers(&self, position: ClockTime) -> bool {
        let t = self.props.lock().timing;
        t.active
            && t.start <= position
            && position < t.start.saturating_add(t.duration)
    }

    pub fn output_pad(&self) -> Option<Pad> {
        self.node.output_pad()
    }

    /// First sink pad without a peer.
    pub fn unlinked_sink(&self) -> Option<Pad> {
        self.node.sink_pads().into_iter().find(|p| !p.is_linked())
    }

    /// Translate a composition-time seek into the object's media time.
    ///
    /// The object plays media starting at `inpoint` when the timeline reaches
    /// `start`, so a timeline instant maps to `inpoint + (t - start)`.
    pub fn to_media_time(&self, position: ClockTime) -> ClockTime {
        let t = self.props.lock().timing;
        if !position.is_valid() {
            return ClockTime::NONE;
        }
        t.inpoint.saturating_add(position.saturating_sub(t.start))
    }
}

impl fmt::Debug for NleObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.props.lock().timing;
        f.debug_struct("NleObject")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("start", &t.start)
            .field("duration", &t.duration)
            .field("priority", &t.priority)
            .field("active", &t.active)
            .finish()
    }
}
