//! Stack computation.
//!
//! At any timeline position the composition needs to know which objects
//! contribute media and how they feed each other. The answer is the *stack*:
//! a tree whose root is the most prominent element at that position. Sources
//! are leaves; operations consume the elements ranked immediately below them
//! as inputs. Alongside the tree we compute the validity window, the span of
//! positions over which this exact stack holds, so playback knows when the
//! topology must be rebuilt.

use std::sync::Arc;

use tracing::trace;

use montage_core::ClockTime;

use crate::object::{NleKind, NleObject, ObjectId};

/// Node of a stack tree. `children` are the inputs of an operation, ordered
/// most prominent first; sources have none.
#[derive(Clone)]
pub struct StackNode {
    pub object: Arc<NleObject>,
    pub children: Vec<StackNode>,
}

impl StackNode {
    pub fn leaf(object: Arc<NleObject>) -> Self {
        Self {
            object,
            children: Vec::new(),
        }
    }

    /// Depth-first search for `id`.
    pub fn find(&self, id: ObjectId) -> Option<&StackNode> {
        if self.object.id() == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    /// Locate `id` together with its parent node and position among the
    /// parent's children. Root matches report no parent and index 0.
    pub fn find_with_parent(&self, id: ObjectId) -> Option<(&StackNode, Option<&StackNode>, usize)> {
        if self.object.id() == id {
            return Some((self, None, 0));
        }
        self.find_under(id)
    }

    fn find_under(&self, id: ObjectId) -> Option<(&StackNode, Option<&StackNode>, usize)> {
        for (idx, child) in self.children.iter().enumerate() {
            if child.object.id() == id {
                return Some((child, Some(self), idx));
            }
            if let Some(found) = child.find_under(id) {
                return Some(found);
            }
        }
        None
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.find(id).is_some()
    }

    /// All objects in the tree, pre-order.
    pub fn objects(&self) -> Vec<Arc<NleObject>> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<Arc<NleObject>>) {
        out.push(self.object.clone());
        for child in &self.children {
            child.collect(out);
        }
    }

    pub fn len(&self) -> usize {
        1 + self.children.iter().map(StackNode::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Two stacks are the same when they hold the identical objects (by
/// identity) in the identical shape. Only then can a topology rebuild be
/// skipped.
pub fn are_same_stacks(a: Option<&StackNode>, b: Option<&StackNode>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            Arc::ptr_eq(&a.object, &b.object)
                && a.children.len() == b.children.len()
                && a.children
                    .iter()
                    .zip(&b.children)
                    .all(|(x, y)| are_same_stacks(Some(x), Some(y)))
        }
        _ => false,
    }
}

/// Result of [`collect_stack`]: the tree plus its validity window.
pub struct Stack {
    pub root: Option<StackNode>,
    /// Positions in `[window_start, window_stop)` all yield this stack.
    pub window_start: ClockTime,
    pub window_stop: ClockTime,
}

/// Compute the stack at `position`.
///
/// `by_start` must be sorted by `(start, priority)` ascending and `by_stop`
/// by `(stop, priority)` ascending; both contain every regular object.
/// `expandables` always cover the whole composition and join every stack.
/// `reverse` flips which edge of the window the caller plays towards, which
/// matters only for gap handling (see [`next_stack_change`]).
pub fn collect_stack(
    by_start: &[Arc<NleObject>],
    by_stop: &[Arc<NleObject>],
    expandables: &[Arc<NleObject>],
    position: ClockTime,
) -> Stack {
    // Objects covering the position, most prominent first. Stable sort keeps
    // timeline order among equal priorities.
    let mut covering: Vec<Arc<NleObject>> = by_start
        .iter()
        .filter(|o| o.covers(position))
        .cloned()
        .collect();
    covering.extend(expandables.iter().cloned());
    covering.sort_by_key(|o| o.priority());

    let mut window_start = ClockTime::NONE;
    let mut window_stop = ClockTime::NONE;
    let mut highest_leaf_priority = 0u32;

    let mut iter = covering.into_iter().peekable();
    let root = build_tree(
        &mut iter,
        &mut window_start,
        &mut window_stop,
        &mut highest_leaf_priority,
    );

    if root.is_some() {
        // An object outside the stack but overlapping the window still forces
        // a rebuild when playback reaches its edge: tighten against the first
        // start after the position and the first stop before it.
        window_stop = first_out_of_stack_stop(by_start, position, window_stop);
        window_start = first_out_of_stack_start(by_stop, position, window_start);
        let (s, t) = refine_window_above_priority(
            by_start,
            by_stop,
            position,
            window_start,
            window_stop,
            highest_leaf_priority,
        );
        window_start = s;
        window_stop = t;
    }

    trace!(
        %position,
        start = %window_start,
        stop = %window_stop,
        size = root.as_ref().map(StackNode::len).unwrap_or(0),
        "collected stack"
    );

    Stack {
        root,
        window_start,
        window_stop,
    }
}

/// Fold the priority-ordered list into a tree: an operation consumes the
/// following entries as its inputs (all remaining ones when its sink count is
/// dynamic), tightening the validity window with every object it absorbs.
fn build_tree(
    iter: &mut std::iter::Peekable<std::vec::IntoIter<Arc<NleObject>>>,
    window_start: &mut ClockTime,
    window_stop: &mut ClockTime,
    highest_leaf_priority: &mut u32,
) -> Option<StackNode> {
    let object = iter.next()?;

    *window_start = window_start.max_valid(object.start());
    *window_stop = window_stop.min_valid(object.stop());

    match object.kind() {
        NleKind::Source => {
            *highest_leaf_priority = (*highest_leaf_priority).max(object.priority());
            Some(StackNode::leaf(object))
        }
        NleKind::Operation { sinks, dynamic } => {
            let mut node = StackNode::leaf(object);
            let mut remaining = sinks;
            while iter.peek().is_some() && (dynamic || remaining > 0) {
                if let Some(child) =
                    build_tree(iter, window_start, window_stop, highest_leaf_priority)
                {
                    node.children.push(child);
                }
                if !dynamic {
                    remaining -= 1;
                }
            }
            Some(node)
        }
    }
}

/// First start strictly after `position` among active objects; the stack
/// cannot outlive it.
fn first_out_of_stack_stop(
    by_start: &[Arc<NleObject>],
    position: ClockTime,
    window_stop: ClockTime,
) -> ClockTime {
    for object in by_start {
        if !object.is_active() {
            continue;
        }
        let start = object.start();
        if start > position {
            return window_stop.min_valid(start);
        }
    }
    window_stop
}

/// Last stop at or before `position`; the stack cannot predate it.
fn first_out_of_stack_start(
    by_stop: &[Arc<NleObject>],
    position: ClockTime,
    window_start: ClockTime,
) -> ClockTime {
    for object in by_stop.iter().rev() {
        if !object.is_active() {
            continue;
        }
        let stop = object.stop();
        if stop <= position {
            return window_start.max_valid(stop);
        }
    }
    window_start
}

/// Second tightening pass: an active object more prominent than every leaf of
/// the stack truncates the window at its edge even while it does not cover
/// the position, since it will take over the top of the stack there.
fn refine_window_above_priority(
    by_start: &[Arc<NleObject>],
    by_stop: &[Arc<NleObject>],
    position: ClockTime,
    window_start: ClockTime,
    window_stop: ClockTime,
    priority: u32,
) -> (ClockTime, ClockTime) {
    let mut nstart = window_start;
    let mut nstop = window_stop;

    for object in by_start {
        if !object.is_active() || object.priority() >= priority {
            continue;
        }
        let start = object.start();
        if start <= position {
            continue;
        }
        if nstop.is_valid() && start >= nstop {
            continue;
        }
        nstop = start;
        break;
    }

    for object in by_stop {
        if !object.is_active() || object.priority() >= priority {
            continue;
        }
        let stop = object.stop();
        if stop >= position {
            continue;
        }
        if nstart.is_valid() && stop <= nstart {
            continue;
        }
        nstart = stop;
        break;
    }

    (nstart, nstop)
}

/// When `position` falls in a gap (no stack), find the next position where a
/// stack exists, searching forward for forward playback and backward
/// otherwise.
pub fn next_stack_change(
    by_start: &[Arc<NleObject>],
    by_stop: &[Arc<NleObject>],
    position: ClockTime,
    reverse: bool,
) -> Option<ClockTime> {
    if !reverse {
        by_start
            .iter()
            .filter(|o| o.is_active() && o.start() > position)
            .map(|o| o.start())
            .next()
    } else {
        by_stop
            .iter()
            .rev()
            .filter(|o| o.is_active() && o.stop() <= position)
            .map(|o| o.stop())
            .next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{NleObject, ObjectTiming};
    use crate::testing::{MemorySource, MixOperation};

    fn source(name: &str, start: u64, duration: u64, priority: u32) -> Arc<NleObject> {
        NleObject::new_source(
            name,
            Arc::new(MemorySource::new(name)),
            ObjectTiming::new(
                ClockTime::from_seconds(start),
                ClockTime::from_seconds(duration),
                ClockTime::ZERO,
                priority,
            ),
        )
    }

    fn operation(name: &str, start: u64, duration: u64, priority: u32) -> Arc<NleObject> {
        NleObject::new(
            name,
            NleKind::Operation {
                sinks: 0,
                dynamic: true,
            },
            Arc::new(MixOperation::new(name)),
            ObjectTiming::new(
                ClockTime::from_seconds(start),
                ClockTime::from_seconds(duration),
                ClockTime::ZERO,
                priority,
            ),
        )
    }

    fn sorted(objects: &[Arc<NleObject>]) -> (Vec<Arc<NleObject>>, Vec<Arc<NleObject>>) {
        let mut by_start = objects.to_vec();
        by_start.sort_by_key(|o| (o.start(), o.priority()));
        let mut by_stop = objects.to_vec();
        by_stop.sort_by_key(|o| (o.stop(), o.priority()));
        (by_start, by_stop)
    }

    #[test]
    fn test_single_source_stack() {
        let a = source("a", 0, 10, 1);
        let (by_start, by_stop) = sorted(&[a.clone()]);
        let stack = collect_stack(&by_start, &by_stop, &[], ClockTime::from_seconds(5));
        let root = stack.root.unwrap();
        assert!(Arc::ptr_eq(&root.object, &a));
        assert!(root.children.is_empty());
        assert_eq!(stack.window_start, ClockTime::ZERO);
        assert_eq!(stack.window_stop, ClockTime::from_seconds(10));
    }

    #[test]
    fn test_priority_orders_stack() {
        let top = source("top", 0, 10, 1);
        let bottom = source("bottom", 0, 10, 2);
        let (by_start, by_stop) = sorted(&[bottom, top.clone()]);
        let stack = collect_stack(&by_start, &by_stop, &[], ClockTime::ZERO);
        // Without an operation only the most prominent source plays.
        let root = stack.root.unwrap();
        assert!(Arc::ptr_eq(&root.object, &top));
    }

    #[test]
    fn test_operation_consumes_sources() {
        let op = operation("mix", 0, 10, 1);
        let a = source("a", 0, 10, 2);
        let b = source("b", 0, 10, 3);
        let (by_start, by_stop) = sorted(&[a.clone(), b.clone(), op.clone()]);
        let stack = collect_stack(&by_start, &by_stop, &[], ClockTime::from_seconds(2));
        let root = stack.root.unwrap();
        assert!(Arc::ptr_eq(&root.object, &op));
        assert_eq!(root.children.len(), 2);
        assert!(Arc::ptr_eq(&root.children[0].object, &a));
        assert!(Arc::ptr_eq(&root.children[1].object, &b));
    }

    #[test]
    fn test_fixed_sink_operation_takes_only_its_inputs() {
        let blur = NleObject::new(
            "blur",
            NleKind::Operation {
                sinks: 1,
                dynamic: false,
            },
            Arc::new(MixOperation::with_sinks("blur", 1)),
            ObjectTiming::new(
                ClockTime::ZERO,
                ClockTime::from_seconds(10),
                ClockTime::ZERO,
                1,
            ),
        );
        let a = source("a", 0, 10, 2);
        let b = source("b", 0, 10, 3);
        let (by_start, by_stop) = sorted(&[a.clone(), b, blur.clone()]);
        let stack = collect_stack(&by_start, &by_stop, &[], ClockTime::ZERO);
        let root = stack.root.unwrap();
        assert!(Arc::ptr_eq(&root.object, &blur));
        assert_eq!(root.children.len(), 1);
        assert!(Arc::ptr_eq(&root.children[0].object, &a));
    }

    #[test]
    fn test_window_tightened_by_partial_overlap() {
        let a = source("a", 0, 10, 1);
        let b = source("b", 4, 10, 2);
        let (by_start, by_stop) = sorted(&[a, b]);
        let stack = collect_stack(&by_start, &by_stop, &[], ClockTime::from_seconds(1));
        // b does not enter the stack at t=1, yet its start bounds the window.
        assert_eq!(stack.window_stop, ClockTime::from_seconds(4));
    }

    #[test]
    fn test_window_tightened_by_upcoming_higher_priority() {
        let back = source("back", 0, 20, 5);
        let front = source("front", 8, 4, 1);
        let (by_start, by_stop) = sorted(&[back.clone(), front]);
        let stack = collect_stack(&by_start, &by_stop, &[], ClockTime::from_seconds(2));
        let root = stack.root.unwrap();
        assert!(Arc::ptr_eq(&root.object, &back));
        assert_eq!(stack.window_stop, ClockTime::from_seconds(8));

        // After the prominent clip ends the lower one resumes, bounded on
        // both sides by it.
        let stack = collect_stack(&by_start, &by_stop, &[], ClockTime::from_seconds(14));
        let root = stack.root.unwrap();
        assert!(Arc::ptr_eq(&root.object, &back));
        assert_eq!(stack.window_start, ClockTime::from_seconds(12));
        assert_eq!(stack.window_stop, ClockTime::from_seconds(20));
    }

    #[test]
    fn test_inactive_object_skipped() {
        let a = source("a", 0, 10, 1);
        let mut timing = a.timing();
        timing.active = false;
        a.set_timing(timing);
        let b = source("b", 0, 10, 2);
        let (by_start, by_stop) = sorted(&[a, b.clone()]);
        let stack = collect_stack(&by_start, &by_stop, &[], ClockTime::ZERO);
        let root = stack.root.unwrap();
        assert!(Arc::ptr_eq(&root.object, &b));
    }

    #[test]
    fn test_gap_yields_no_stack() {
        let a = source("a", 0, 5, 1);
        let b = source("b", 10, 5, 1);
        let (by_start, by_stop) = sorted(&[a, b]);
        let stack = collect_stack(&by_start, &by_stop, &[], ClockTime::from_seconds(7));
        assert!(stack.root.is_none());
        assert_eq!(
            next_stack_change(&by_start, &by_stop, ClockTime::from_seconds(7), false),
            Some(ClockTime::from_seconds(10))
        );
        assert_eq!(
            next_stack_change(&by_start, &by_stop, ClockTime::from_seconds(7), true),
            Some(ClockTime::from_seconds(5))
        );
    }

    #[test]
    fn test_expandable_joins_every_stack() {
        let a = source("a", 0, 5, 1);
        let bg = NleObject::new_expandable("bg", Arc::new(MemorySource::new("bg")), 100);
        bg.set_timing(ObjectTiming::new(
            ClockTime::ZERO,
            ClockTime::from_seconds(5),
            ClockTime::ZERO,
            100,
        ));
        let (by_start, by_stop) = sorted(&[a.clone()]);
        let stack = collect_stack(&by_start, &by_stop, &[bg.clone()], ClockTime::ZERO);
        let root = stack.root.unwrap();
        // More prominent regular source wins the top.
        assert!(Arc::ptr_eq(&root.object, &a));

        let op = operation("mix", 0, 5, 0);
        let (by_start, by_stop) = sorted(&[a.clone(), op.clone()]);
        let stack = collect_stack(&by_start, &by_stop, &[bg.clone()], ClockTime::ZERO);
        let root = stack.root.unwrap();
        assert!(Arc::ptr_eq(&root.object, &op));
        assert_eq!(root.children.len(), 2);
        assert!(Arc::ptr_eq(&root.children[1].object, &bg));
    }

    #[test]
    fn test_same_stacks_by_identity_and_shape() {
        let a = source("a", 0, 10, 1);
        let b = source("b", 0, 10, 2);
        let op = operation("mix", 0, 10, 0);
        let (by_start, by_stop) = sorted(&[a.clone(), b.clone(), op.clone()]);
        let s1 = collect_stack(&by_start, &by_stop, &[], ClockTime::ZERO);
        let s2 = collect_stack(&by_start, &by_stop, &[], ClockTime::from_seconds(3));
        assert!(are_same_stacks(s1.root.as_ref(), s2.root.as_ref()));

        let (by_start2, by_stop2) = sorted(&[a, op]);
        let s3 = collect_stack(&by_start2, &by_stop2, &[], ClockTime::ZERO);
        assert!(!are_same_stacks(s1.root.as_ref(), s3.root.as_ref()));
        assert!(!are_same_stacks(s1.root.as_ref(), None));
    }

    #[test]
    fn test_find_with_parent() {
        let op = operation("mix", 0, 10, 0);
        let a = source("a", 0, 10, 1);
        let b = source("b", 0, 10, 2);
        let (by_start, by_stop) = sorted(&[a, b.clone(), op.clone()]);
        let stack = collect_stack(&by_start, &by_stop, &[], ClockTime::ZERO);
        let root = stack.root.unwrap();
        let (node, parent, idx) = root.find_with_parent(b.id()).unwrap();
        assert!(Arc::ptr_eq(&node.object, &b));
        assert!(Arc::ptr_eq(&parent.unwrap().object, &op));
        assert_eq!(idx, 1);
        let (_, parent, _) = root.find_with_parent(op.id()).unwrap();
        assert!(parent.is_none());
    }
}
