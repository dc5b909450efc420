//! Minimal pad and event model for the processing graph.
//!
//! Nodes expose [`Pad`]s; the composition links them into the active stack,
//! blocks them while the topology is being rebuilt, and pushes serialized
//! [`Event`]s (flush, seek, end of stream) through them.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use montage_core::ClockTime;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadDirection {
    Src,
    Sink,
}

/// Seek parameters pushed into a stack's top element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekEvent {
    pub rate: f64,
    pub start: ClockTime,
    pub stop: ClockTime,
    /// Flushing seek: preceded by flush-start/flush-stop downstream.
    pub flush: bool,
    /// First seek after a topology change, not a user request.
    pub initial: bool,
    /// Segment seek: report segment-done instead of end of stream.
    pub segment: bool,
}

/// Serialized event travelling through pads.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    FlushStart,
    FlushStop,
    Seek(SeekEvent),
    Eos,
    SegmentDone(ClockTime),
}

type EventHandler = Arc<dyn Fn(&Event) -> bool + Send + Sync>;
type BlockCallback = Box<dyn FnOnce(&Pad) + Send>;

struct PadState {
    peer: Option<Pad>,
    blocked: bool,
    /// No data in flight. Block callbacks fire immediately while idle,
    /// otherwise they wait for [`Pad::set_idle`].
    idle: bool,
    pending_blocks: Vec<BlockCallback>,
    handler: Option<EventHandler>,
    events: Vec<Event>,
}

struct PadInner {
    name: String,
    direction: PadDirection,
    state: Mutex<PadState>,
}

/// A linkable endpoint on a processing node.
///
/// Cheap to clone; clones share state. Equality is identity.
#[derive(Clone)]
pub struct Pad {
    inner: Arc<PadInner>,
}

impl Pad {
    pub fn new(name: impl Into<String>, direction: PadDirection) -> Self {
        Self {
            inner: Arc::new(PadInner {
                name: name.into(),
                direction,
                state: Mutex::new(PadState {
                    peer: None,
                    blocked: false,
                    idle: true,
                    pending_blocks: Vec::new(),
                    handler: None,
                    events: Vec::new(),
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn direction(&self) -> PadDirection {
        self.inner.direction
    }

    pub fn same_pad(&self, other: &Pad) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Install the handler invoked for every event reaching this pad. The
    /// handler's return value becomes the result of [`Pad::send_event`].
    pub fn set_event_handler(
        &self,
        handler: impl Fn(&Event) -> bool + Send + Sync + 'static,
    ) {
        self.inner.state.lock().handler = Some(Arc::new(handler));
    }

    /// Link a source pad to a sink pad. Both must be unlinked.
    pub fn link(src: &Pad, sink: &Pad) -> Result<()> {
        if src.direction() != PadDirection::Src || sink.direction() != PadDirection::Sink {
            return Err(Error::LinkFailed {
                src: src.name().to_owned(),
                sink: sink.name().to_owned(),
            });
        }
        {
            let mut s = src.inner.state.lock();
            if s.peer.is_some() {
                return Err(Error::LinkFailed {
                    src: src.name().to_owned(),
                    sink: sink.name().to_owned(),
                });
            }
            let mut k = sink.inner.state.lock();
            if k.peer.is_some() {
                return Err(Error::LinkFailed {
                    src: src.name().to_owned(),
                    sink: sink.name().to_owned(),
                });
            }
            s.peer = Some(sink.clone());
            k.peer = Some(src.clone());
        }
        trace!(src = src.name(), sink = sink.name(), "linked pads");
        Ok(())
    }

    /// Break the link with the current peer, if any.
    pub fn unlink(&self) {
        let peer = self.inner.state.lock().peer.take();
        if let Some(peer) = peer {
            peer.inner.state.lock().peer = None;
            trace!(pad = self.name(), peer = peer.name(), "unlinked pads");
        }
    }

    pub fn peer(&self) -> Option<Pad> {
        self.inner.state.lock().peer.clone()
    }

    pub fn is_linked(&self) -> bool {
        self.inner.state.lock().peer.is_some()
    }

    /// Deliver an event to this pad. Returns the handler's verdict, `true`
    /// when no handler is installed.
    pub fn send_event(&self, event: Event) -> bool {
        let handler = {
            let mut st = self.inner.state.lock();
            st.events.push(event.clone());
            st.handler.clone()
        };
        match handler {
            Some(h) => h(&event),
            None => true,
        }
    }

    /// Push an event downstream through the peer. Returns `false` when
    /// unlinked or refused.
    pub fn push_event(&self, event: Event) -> bool {
        match self.peer() {
            Some(peer) => peer.send_event(event),
            None => false,
        }
    }

    /// Mark the pad blocked. `callback` runs once the pad is idle; if it is
    /// idle already the callback runs before this returns.
    pub fn block_async(&self, callback: impl FnOnce(&Pad) + Send + 'static) {
        let run_now = {
            let mut st = self.inner.state.lock();
            st.blocked = true;
            if st.idle {
                Some(callback)
            } else {
                st.pending_blocks.push(Box::new(callback));
                None
            }
        };
        if let Some(cb) = run_now {
            cb(self);
        }
    }

    pub fn unblock(&self) {
        let mut st = self.inner.state.lock();
        if st.blocked {
            st.blocked = false;
            debug!(pad = self.inner.name.as_str(), "unblocked pad");
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.inner.state.lock().blocked
    }

    /// Report whether data is in flight. Entering idle releases queued block
    /// callbacks.
    pub fn set_idle(&self, idle: bool) {
        let pending = {
            let mut st = self.inner.state.lock();
            st.idle = idle;
            if idle && st.blocked {
                std::mem::take(&mut st.pending_blocks)
            } else {
                Vec::new()
            }
        };
        for cb in pending {
            cb(self);
        }
    }

    /// Events delivered to this pad so far, oldest first.
    pub fn received_events(&self) -> Vec<Event> {
        self.inner.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.inner.state.lock().events.clear();
    }
}

impl fmt::Debug for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pad")
            .field("name", &self.inner.name)
            .field("direction", &self.inner.direction)
            .finish()
    }
}

/// The composition's stable output pad. Its target switches to whichever
/// element currently tops the stack; with no stack it is targetless and
/// produces nothing.
pub struct GhostPad {
    pad: Pad,
    target: Mutex<Option<Pad>>,
}

impl GhostPad {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            pad: Pad::new(name, PadDirection::Src),
            target: Mutex::new(None),
        }
    }

    /// The proxy pad linked into downstream graphs.
    pub fn pad(&self) -> &Pad {
        &self.pad
    }

    pub fn set_target(&self, target: Option<Pad>) {
        let mut t = self.target.lock();
        match (&*t, &target) {
            (Some(old), Some(new)) if old.same_pad(new) => return,
            _ => {}
        }
        debug!(
            ghost = self.pad.name(),
            target = target.as_ref().map(Pad::name),
            "retargeting ghost pad"
        );
        *t = target;
    }

    pub fn target(&self) -> Option<Pad> {
        self.target.lock().clone()
    }

    pub fn has_target(&self) -> bool {
        self.target.lock().is_some()
    }

    /// Push an event out through the proxy pad to downstream.
    pub fn push_event(&self, event: Event) -> bool {
        self.pad.push_event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_link_direction_checked() {
        let a = Pad::new("a", PadDirection::Sink);
        let b = Pad::new("b", PadDirection::Sink);
        assert!(Pad::link(&a, &b).is_err());
    }

    #[test]
    fn test_link_unlink() {
        let src = Pad::new("src", PadDirection::Src);
        let sink = Pad::new("sink", PadDirection::Sink);
        Pad::link(&src, &sink).unwrap();
        assert!(src.is_linked());
        assert!(sink.peer().unwrap().same_pad(&src));
        src.unlink();
        assert!(!src.is_linked());
        assert!(!sink.is_linked());
    }

    #[test]
    fn test_double_link_rejected() {
        let src = Pad::new("src", PadDirection::Src);
        let sink = Pad::new("sink", PadDirection::Sink);
        let other = Pad::new("other", PadDirection::Sink);
        Pad::link(&src, &sink).unwrap();
        assert!(Pad::link(&src, &other).is_err());
    }

    #[test]
    fn test_event_handler_verdict() {
        let pad = Pad::new("p", PadDirection::Sink);
        pad.set_event_handler(|ev| !matches!(ev, Event::Eos));
        assert!(pad.send_event(Event::FlushStart));
        assert!(!pad.send_event(Event::Eos));
        assert_eq!(pad.received_events().len(), 2);
    }

    #[test]
    fn test_block_fires_when_idle() {
        let pad = Pad::new("p", PadDirection::Src);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        pad.block_async(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(pad.is_blocked());
    }

    #[test]
    fn test_block_deferred_until_idle() {
        let pad = Pad::new("p", PadDirection::Src);
        pad.set_idle(false);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        pad.block_async(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        pad.set_idle(true);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ghost_pad_retarget() {
        let ghost = GhostPad::new("comp-src");
        assert!(!ghost.has_target());
        let inner = Pad::new("elem-src", PadDirection::Src);
        ghost.set_target(Some(inner.clone()));
        assert!(ghost.target().unwrap().same_pad(&inner));
        ghost.set_target(None);
        assert!(!ghost.has_target());
    }
}
