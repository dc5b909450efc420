//! Composition engine for a single output track.
//!
//! A [`Composition`] owns a set of [`NleObject`]s laid out on a shared
//! timeline and exposes a single source [`GhostPad`]. At any position it
//! computes the *stack*: the tree of objects covering that position, ordered
//! by priority, with operations consuming lower-priority entries as inputs.
//! When the stack changes (seek, edit, end of segment) the engine relinks the
//! underlying processing graph live, flushing and blocking pads so downstream
//! never observes a half-built topology.

pub mod bus;
pub mod composition;
pub mod error;
pub mod graph;
pub mod object;
pub mod stack;
pub mod testing;

pub use bus::{bus, BusMessage, BusReceiver, BusSender};
pub use composition::{Composition, Segment};
pub use error::{Error, Result};
pub use graph::{Event, GhostPad, Pad, PadDirection, SeekEvent};
pub use object::{
    NleKind, NleObject, NodeState, ObjectId, ObjectTiming, ProcessingNode,
};
pub use stack::{are_same_stacks, StackNode};

/// Library version, mirrored from the crate manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
