//! # Node Set
//!
//! An insertion-ordered set of [`NodeRef`] handles with O(1) membership,
//! insertion at both ends, and relative repositioning.
//!
//! Backed by a slab of doubly-linked entries plus a `BTreeMap` index from
//! handle to slab slot. Freed slots are reused.

use crate::graph::NodeRef;
use std::collections::BTreeMap;
use std::iter::{FusedIterator, Rev};
use std::ops::ControlFlow;

const NIL: usize = usize::MAX;

#[derive(Debug, Clone)]
struct Entry {
    node: NodeRef,
    prev: usize,
    next: usize,
}

/// Ordered set of node handles.
#[derive(Debug, Clone)]
pub struct NodeSet {
    entries: Vec<Entry>,
    free: Vec<usize>,
    index: BTreeMap<NodeRef, usize>,
    head: usize,
    tail: usize,
}

impl Default for NodeSet {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            index: BTreeMap::new(),
            head: NIL,
            tail: NIL,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn contains(&self, node: NodeRef) -> bool {
        self.index.contains_key(&node)
    }

    #[must_use]
    pub fn front(&self) -> Option<NodeRef> {
        (self.head != NIL).then(|| self.entries[self.head].node)
    }

    #[must_use]
    pub fn back(&self) -> Option<NodeRef> {
        (self.tail != NIL).then(|| self.entries[self.tail].node)
    }

    /// Zero-based position of a member, scanning from the front.
    #[must_use]
    pub fn position(&self, node: NodeRef) -> Option<usize> {
        if !self.contains(node) {
            return None;
        }
        self.iter().position(|n| n == node)
    }

    // =========================================================================
    // INSERTION & REMOVAL
    // =========================================================================

    /// Insert at the front. No-op (returns false) if already a member.
    pub fn push_front(&mut self, node: NodeRef) -> bool {
        if self.contains(node) {
            return false;
        }
        let slot = self.alloc(node);
        self.link_before(slot, self.head);
        true
    }

    /// Insert at the back. No-op (returns false) if already a member.
    pub fn push_back(&mut self, node: NodeRef) -> bool {
        if self.contains(node) {
            return false;
        }
        let slot = self.alloc(node);
        self.link_before(slot, NIL);
        true
    }

    pub fn pop_front(&mut self) -> Option<NodeRef> {
        let slot = self.head;
        (slot != NIL).then(|| self.release(slot))
    }

    pub fn pop_back(&mut self) -> Option<NodeRef> {
        let slot = self.tail;
        (slot != NIL).then(|| self.release(slot))
    }

    /// Remove a member. Returns false if it was not present.
    pub fn remove(&mut self, node: NodeRef) -> bool {
        match self.index.get(&node).copied() {
            Some(slot) => {
                self.release(slot);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // REPOSITIONING
    // =========================================================================

    /// Ensure `node` comes before `mark`.
    ///
    /// Moves `node` to just before `mark` only if it is currently after it.
    /// Returns whether anything moved.
    ///
    /// Panics if either handle is not a member.
    pub fn move_before(&mut self, node: NodeRef, mark: NodeRef) -> bool {
        let (slot, mark_slot) = self.member_slots(node, mark);
        if slot == mark_slot || self.precedes(slot, mark_slot) {
            return false;
        }
        self.unlink(slot);
        self.link_before(slot, mark_slot);
        true
    }

    /// Ensure `node` comes after `mark`.
    ///
    /// Moves `node` to just after `mark` only if it is currently before it.
    /// Returns whether anything moved.
    ///
    /// Panics if either handle is not a member.
    pub fn move_after(&mut self, node: NodeRef, mark: NodeRef) -> bool {
        let (slot, mark_slot) = self.member_slots(node, mark);
        if slot == mark_slot || self.precedes(mark_slot, slot) {
            return false;
        }
        self.unlink(slot);
        let after = self.entries[mark_slot].next;
        self.link_before(slot, after);
        true
    }

    fn member_slots(&self, node: NodeRef, mark: NodeRef) -> (usize, usize) {
        let slot = self.index.get(&node).copied();
        let mark_slot = self.index.get(&mark).copied();
        assert!(
            slot.is_some() && mark_slot.is_some(),
            "move of {node:?} relative to {mark:?}: both must be members"
        );
        (slot.unwrap_or(NIL), mark_slot.unwrap_or(NIL))
    }

    /// Whether slot `a` comes before slot `b`. Walks forward from `a`.
    fn precedes(&self, a: usize, b: usize) -> bool {
        let mut cursor = self.entries[a].next;
        while cursor != NIL {
            if cursor == b {
                return true;
            }
            cursor = self.entries[cursor].next;
        }
        false
    }

    // =========================================================================
    // ITERATION
    // =========================================================================

    /// Iterate front to back. Reverse with `.rev()`.
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            set: self,
            front: self.head,
            back: self.tail,
            remaining: self.len(),
        }
    }

    /// Iterate back to front.
    #[must_use]
    pub fn iter_rev(&self) -> Rev<Iter<'_>> {
        self.iter().rev()
    }

    /// Visit members front to back until `f` breaks.
    pub fn try_for_each<B>(&self, f: impl FnMut(NodeRef) -> ControlFlow<B>) -> ControlFlow<B> {
        self.iter().try_for_each(f)
    }

    /// Visit members back to front until `f` breaks.
    pub fn try_for_each_rev<B>(&self, f: impl FnMut(NodeRef) -> ControlFlow<B>) -> ControlFlow<B> {
        self.iter_rev().try_for_each(f)
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<NodeRef> {
        self.iter().collect()
    }

    // =========================================================================
    // SLAB
    // =========================================================================

    fn alloc(&mut self, node: NodeRef) -> usize {
        let entry = Entry {
            node,
            prev: NIL,
            next: NIL,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.entries[slot] = entry;
                slot
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };
        self.index.insert(node, slot);
        slot
    }

    fn release(&mut self, slot: usize) -> NodeRef {
        self.unlink(slot);
        let node = self.entries[slot].node;
        self.index.remove(&node);
        self.free.push(slot);
        node
    }

    /// Splice `slot` in before `before` (`NIL` means at the back).
    fn link_before(&mut self, slot: usize, before: usize) {
        let prev = if before == NIL {
            self.tail
        } else {
            self.entries[before].prev
        };
        self.entries[slot].prev = prev;
        self.entries[slot].next = before;
        if prev == NIL {
            self.head = slot;
        } else {
            self.entries[prev].next = slot;
        }
        if before == NIL {
            self.tail = slot;
        } else {
            self.entries[before].prev = slot;
        }
    }

    fn unlink(&mut self, slot: usize) {
        let Entry { prev, next, .. } = self.entries[slot];
        if prev == NIL {
            self.head = next;
        } else {
            self.entries[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.entries[next].prev = prev;
        }
        self.entries[slot].prev = NIL;
        self.entries[slot].next = NIL;
    }
}

impl FromIterator<NodeRef> for NodeSet {
    fn from_iter<I: IntoIterator<Item = NodeRef>>(iter: I) -> Self {
        let mut set = NodeSet::new();
        for node in iter {
            set.push_back(node);
        }
        set
    }
}

impl<'a> IntoIterator for &'a NodeSet {
    type Item = NodeRef;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Borrowing iterator over a [`NodeSet`].
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    set: &'a NodeSet,
    front: usize,
    back: usize,
    remaining: usize,
}

impl Iterator for Iter<'_> {
    type Item = NodeRef;

    fn next(&mut self) -> Option<NodeRef> {
        if self.remaining == 0 {
            return None;
        }
        let entry = &self.set.entries[self.front];
        self.front = entry.next;
        self.remaining -= 1;
        Some(entry.node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<NodeRef> {
        if self.remaining == 0 {
            return None;
        }
        let entry = &self.set.entries[self.back];
        self.back = entry.prev;
        self.remaining -= 1;
        Some(entry.node)
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl FusedIterator for Iter<'_> {}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(ids: &[usize]) -> Vec<NodeRef> {
        ids.iter().copied().map(NodeRef).collect()
    }

    fn set_of(ids: &[usize]) -> NodeSet {
        refs(ids).into_iter().collect()
    }

    #[test]
    fn push_both_ends_and_dedup() {
        let mut set = NodeSet::new();
        assert!(set.push_back(NodeRef(1)));
        assert!(set.push_front(NodeRef(0)));
        assert!(set.push_back(NodeRef(2)));
        assert!(!set.push_front(NodeRef(2)));
        assert!(!set.push_back(NodeRef(0)));
        assert_eq!(set.to_vec(), refs(&[0, 1, 2]));
        assert_eq!(set.len(), 3);
        assert_eq!(set.front(), Some(NodeRef(0)));
        assert_eq!(set.back(), Some(NodeRef(2)));
    }

    #[test]
    fn pop_both_ends() {
        let mut set = set_of(&[1, 2, 3]);
        assert_eq!(set.pop_front(), Some(NodeRef(1)));
        assert_eq!(set.pop_back(), Some(NodeRef(3)));
        assert!(!set.contains(NodeRef(1)));
        assert_eq!(set.pop_back(), Some(NodeRef(2)));
        assert_eq!(set.pop_front(), None);
        assert!(set.is_empty());
        assert_eq!(set.front(), None);

        // Slots are reused after popping.
        set.push_back(NodeRef(5));
        set.push_front(NodeRef(4));
        assert_eq!(set.to_vec(), refs(&[4, 5]));
    }

    #[test]
    fn move_before_only_when_after() {
        let mut set = set_of(&[0, 1, 2, 3]);
        assert!(!set.move_before(NodeRef(1), NodeRef(3)));
        assert_eq!(set.to_vec(), refs(&[0, 1, 2, 3]));

        assert!(set.move_before(NodeRef(3), NodeRef(1)));
        assert_eq!(set.to_vec(), refs(&[0, 3, 1, 2]));

        assert!(set.move_before(NodeRef(2), NodeRef(0)));
        assert_eq!(set.to_vec(), refs(&[2, 0, 3, 1]));
        assert_eq!(set.front(), Some(NodeRef(2)));
        assert_eq!(set.back(), Some(NodeRef(1)));

        assert!(!set.move_before(NodeRef(0), NodeRef(0)));
    }

    #[test]
    fn move_after_only_when_before() {
        let mut set = set_of(&[0, 1, 2, 3]);
        assert!(!set.move_after(NodeRef(3), NodeRef(0)));
        assert!(set.move_after(NodeRef(0), NodeRef(3)));
        assert_eq!(set.to_vec(), refs(&[1, 2, 3, 0]));
        assert_eq!(set.back(), Some(NodeRef(0)));
        assert!(set.move_after(NodeRef(1), NodeRef(2)));
        assert_eq!(set.to_vec(), refs(&[2, 1, 3, 0]));
    }

    #[test]
    #[should_panic(expected = "both must be members")]
    fn move_with_non_member_panics() {
        let mut set = set_of(&[0, 1]);
        set.move_before(NodeRef(9), NodeRef(0));
    }

    #[test]
    fn iteration_both_directions_with_early_stop() {
        let set = set_of(&[4, 5, 6, 7]);
        assert_eq!(set.iter_rev().collect::<Vec<_>>(), refs(&[7, 6, 5, 4]));

        let mut seen = Vec::new();
        let flow = set.try_for_each(|n| {
            seen.push(n);
            if n == NodeRef(5) {
                ControlFlow::Break(n)
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(flow, ControlFlow::Break(NodeRef(5)));
        assert_eq!(seen, refs(&[4, 5]));

        let mut last_two = Vec::new();
        let flow: ControlFlow<()> = set.try_for_each_rev(|n| {
            last_two.push(n);
            if last_two.len() == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert!(flow.is_break());
        assert_eq!(last_two, refs(&[7, 6]));

        let mut it = set.iter();
        assert_eq!(it.next(), Some(NodeRef(4)));
        assert_eq!(it.next_back(), Some(NodeRef(7)));
        assert_eq!(it.len(), 2);
        assert_eq!(it.collect::<Vec<_>>(), refs(&[5, 6]));
    }

    #[test]
    fn remove_and_position() {
        let mut set = set_of(&[0, 1, 2]);
        assert_eq!(set.position(NodeRef(2)), Some(2));
        assert!(set.remove(NodeRef(1)));
        assert!(!set.remove(NodeRef(1)));
        assert_eq!(set.position(NodeRef(2)), Some(1));
        assert_eq!(set.position(NodeRef(1)), None);
    }
}
