//! Mock processing nodes for tests and examples.
//!
//! [`MemorySource`] plays the role of a decoder: it records the seeks it
//! receives and can be built with lazy pads to exercise the deferred-seek
//! path. [`MixOperation`] models a mixer with a fixed or dynamic number of
//! inputs and forwards seeks upstream through its linked sinks.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::graph::{Event, Pad, PadDirection, SeekEvent};
use crate::object::{NodeState, ProcessingNode};

struct SourceState {
    pad: Option<Pad>,
    settled: bool,
    waiters: Vec<Box<dyn FnOnce() + Send>>,
    node_state: NodeState,
    seeks: Vec<SeekEvent>,
    reject_seeks: bool,
}

struct SourceInner {
    name: String,
    state: Mutex<SourceState>,
}

impl SourceInner {
    fn install_handler(self: &Arc<Self>, pad: &Pad) {
        let inner = Arc::clone(self);
        pad.set_event_handler(move |event| {
            if let Event::Seek(seek) = event {
                let mut st = inner.state.lock();
                if st.reject_seeks {
                    return false;
                }
                st.seeks.push(*seek);
            }
            true
        });
    }
}

/// In-memory media source with an optional lazy pad.
pub struct MemorySource {
    inner: Arc<SourceInner>,
}

impl MemorySource {
    /// Source whose pad exists from construction.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let inner = Arc::new(SourceInner {
            name: name.clone(),
            state: Mutex::new(SourceState {
                pad: None,
                settled: true,
                waiters: Vec::new(),
                node_state: NodeState::Stopped,
                seeks: Vec::new(),
                reject_seeks: false,
            }),
        });
        let pad = Pad::new(format!("{name}.src"), PadDirection::Src);
        inner.install_handler(&pad);
        inner.state.lock().pad = Some(pad);
        Self { inner }
    }

    /// Source without pads until [`MemorySource::settle`] is called,
    /// mimicking a demuxer that discovers its streams asynchronously.
    pub fn new_async(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(SourceInner {
                name,
                state: Mutex::new(SourceState {
                    pad: None,
                    settled: false,
                    waiters: Vec::new(),
                    node_state: NodeState::Stopped,
                    seeks: Vec::new(),
                    reject_seeks: false,
                }),
            }),
        }
    }

    /// Create the pad and notify settle subscribers. Idempotent.
    pub fn settle(&self) {
        let waiters = {
            let mut st = self.inner.state.lock();
            if st.settled {
                return;
            }
            st.settled = true;
            let pad = Pad::new(format!("{}.src", self.inner.name), PadDirection::Src);
            self.inner.install_handler(&pad);
            st.pad = Some(pad);
            std::mem::take(&mut st.waiters)
        };
        trace!(source = self.inner.name.as_str(), "pads settled");
        for waiter in waiters {
            waiter();
        }
    }

    /// Make the source refuse every subsequent seek.
    pub fn reject_seeks(&self) {
        self.inner.state.lock().reject_seeks = true;
    }

    pub fn received_seeks(&self) -> Vec<SeekEvent> {
        self.inner.state.lock().seeks.clone()
    }

    pub fn last_seek(&self) -> Option<SeekEvent> {
        self.inner.state.lock().seeks.last().copied()
    }

    pub fn current_state(&self) -> NodeState {
        self.inner.state.lock().node_state
    }
}

impl ProcessingNode for MemorySource {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn output_pad(&self) -> Option<Pad> {
        self.inner.state.lock().pad.clone()
    }

    fn set_state(&self, state: NodeState) {
        self.inner.state.lock().node_state = state;
    }

    fn subscribe_pads_settled(&self, callback: Box<dyn FnOnce() + Send>) -> bool {
        let mut st = self.inner.state.lock();
        if st.settled {
            false
        } else {
            st.waiters.push(callback);
            true
        }
    }
}

struct OpState {
    sinks: Vec<Pad>,
    node_state: NodeState,
    seeks: Vec<SeekEvent>,
}

struct OpInner {
    name: String,
    src: Pad,
    /// A fixed sink count ignores `set_sink_count`.
    fixed: Option<usize>,
    state: Mutex<OpState>,
}

/// Mixing operation with a fixed or dynamic sink count. Seeks arriving on
/// its source pad are recorded and forwarded upstream through every linked
/// sink.
pub struct MixOperation {
    inner: Arc<OpInner>,
}

impl MixOperation {
    /// Dynamic sink count, grown and shrunk by the composition.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    /// Exactly `sinks` inputs.
    pub fn with_sinks(name: impl Into<String>, sinks: usize) -> Self {
        Self::build(name.into(), Some(sinks))
    }

    fn build(name: String, fixed: Option<usize>) -> Self {
        let src = Pad::new(format!("{name}.src"), PadDirection::Src);
        let inner = Arc::new(OpInner {
            name,
            src,
            fixed,
            state: Mutex::new(OpState {
                sinks: Vec::new(),
                node_state: NodeState::Stopped,
                seeks: Vec::new(),
            }),
        });
        if let Some(n) = fixed {
            let mut st = inner.state.lock();
            for i in 0..n {
                st.sinks
                    .push(Pad::new(format!("{}.sink{i}", inner.name), PadDirection::Sink));
            }
        }
        let weak = Arc::downgrade(&inner);
        inner.src.set_event_handler(move |event| {
            if let (Event::Seek(seek), Some(inner)) = (event, weak.upgrade()) {
                let sinks = {
                    let mut st = inner.state.lock();
                    st.seeks.push(*seek);
                    st.sinks.clone()
                };
                for sink in sinks {
                    if let Some(peer) = sink.peer() {
                        peer.send_event(event.clone());
                    }
                }
            }
            true
        });
        Self { inner }
    }

    pub fn received_seeks(&self) -> Vec<SeekEvent> {
        self.inner.state.lock().seeks.clone()
    }

    pub fn sink_count(&self) -> usize {
        self.inner.state.lock().sinks.len()
    }

    pub fn current_state(&self) -> NodeState {
        self.inner.state.lock().node_state
    }
}

impl ProcessingNode for MixOperation {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn output_pad(&self) -> Option<Pad> {
        Some(self.inner.src.clone())
    }

    fn sink_pads(&self) -> Vec<Pad> {
        self.inner.state.lock().sinks.clone()
    }

    fn set_sink_count(&self, count: usize) {
        if self.inner.fixed.is_some() {
            return;
        }
        let mut st = self.inner.state.lock();
        while st.sinks.len() < count {
            let i = st.sinks.len();
            st.sinks
                .push(Pad::new(format!("{}.sink{i}", self.inner.name), PadDirection::Sink));
        }
        while st.sinks.len() > count {
            // Drop unlinked spares first.
            if let Some(pos) = st.sinks.iter().rposition(|p| !p.is_linked()) {
                st.sinks.remove(pos);
            } else if let Some(pad) = st.sinks.pop() {
                pad.unlink();
            }
        }
    }

    fn set_state(&self, state: NodeState) {
        self.inner.state.lock().node_state = state;
    }

    fn subscribe_pads_settled(&self, _callback: Box<dyn FnOnce() + Send>) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use montage_core::ClockTime;

    #[test]
    fn test_async_source_settles_once() {
        let src = MemorySource::new_async("demux");
        assert!(src.output_pad().is_none());
        let fired = Arc::new(Mutex::new(0u32));
        let f = fired.clone();
        assert!(src.subscribe_pads_settled(Box::new(move || {
            *f.lock() += 1;
        })));
        src.settle();
        src.settle();
        assert_eq!(*fired.lock(), 1);
        assert!(src.output_pad().is_some());
        assert!(!src.subscribe_pads_settled(Box::new(|| {})));
    }

    #[test]
    fn test_source_records_and_rejects_seeks() {
        let src = MemorySource::new("clip");
        let pad = src.output_pad().unwrap();
        let seek = SeekEvent {
            rate: 1.0,
            start: ClockTime::ZERO,
            stop: ClockTime::from_seconds(5),
            flush: true,
            initial: false,
            segment: false,
        };
        assert!(pad.send_event(Event::Seek(seek)));
        assert_eq!(src.received_seeks().len(), 1);
        src.reject_seeks();
        assert!(!pad.send_event(Event::Seek(seek)));
    }

    #[test]
    fn test_dynamic_mix_resizes_sinks() {
        let mix = MixOperation::new("mix");
        assert_eq!(mix.sink_count(), 0);
        mix.set_sink_count(3);
        assert_eq!(mix.sink_count(), 3);
        mix.set_sink_count(1);
        assert_eq!(mix.sink_count(), 1);
    }

    #[test]
    fn test_mix_forwards_seeks_upstream() {
        let mix = MixOperation::new("mix");
        mix.set_sink_count(1);
        let upstream = MemorySource::new("clip");
        let src = upstream.output_pad().unwrap();
        Pad::link(&src, &mix.sink_pads()[0]).unwrap();
        let seek = SeekEvent {
            rate: 1.0,
            start: ClockTime::ZERO,
            stop: ClockTime::from_seconds(2),
            flush: true,
            initial: false,
            segment: false,
        };
        assert!(mix.output_pad().unwrap().send_event(Event::Seek(seek)));
        assert_eq!(mix.received_seeks().len(), 1);
        assert_eq!(upstream.received_seeks().len(), 1);
    }
}
