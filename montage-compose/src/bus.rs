//! Application-facing message bus.
//!
//! Compositions and the pipeline post asynchronous notifications here rather
//! than returning them from calls, since several of them (end of stream,
//! element errors) originate from streaming context.

use crossbeam_channel::{unbounded, Receiver, Sender};

use montage_core::ClockTime;

/// Message posted on the bus by a composition or the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// The composition played out past its last object.
    Eos { source: String },
    /// A segment seek reached the end of its segment.
    SegmentDone { source: String, position: ClockTime },
    /// An element inside the active stack reported an error.
    Error { source: String, message: String },
    /// The composition's total duration changed after an edit.
    DurationChanged { source: String, duration: ClockTime },
    /// A timeline commit finished propagating into the compositions.
    CommitDone,
}

pub type BusSender = Sender<BusMessage>;
pub type BusReceiver = Receiver<BusMessage>;

/// Create an unbounded bus channel.
pub fn bus() -> (BusSender, BusReceiver) {
    unbounded()
}
