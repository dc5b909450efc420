//! Groups: sets of elements moved and trimmed as one.

use montage_core::ClockTime;

use crate::element::{ElementRef, GroupId};

/// A group of clips and subgroups. Its start, duration, priority and height
/// form an envelope derived from the children; edits on the group fan out to
/// them.
#[derive(Debug)]
pub struct Group {
    pub(crate) id: GroupId,
    pub(crate) start: ClockTime,
    pub(crate) duration: ClockTime,
    /// Most prominent layer any child occupies.
    pub(crate) priority: u32,
    /// Number of layers the children span.
    pub(crate) height: u32,
    pub(crate) children: Vec<ElementRef>,
    pub(crate) parent: Option<GroupId>,
}

impl Group {
    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn start(&self) -> ClockTime {
        self.start
    }

    pub fn duration(&self) -> ClockTime {
        self.duration
    }

    pub fn end(&self) -> ClockTime {
        self.start.saturating_add(self.duration)
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn children(&self) -> &[ElementRef] {
        &self.children
    }

    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }
}
