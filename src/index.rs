//! Handles into a tree buffer and the iterators built on them.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FusedIterator;
use std::rc::{Rc, Weak};

use crate::store::SlotId;
use crate::tree::RawTree;

/// Identity of one buffer. Handles hold it weakly, so a handle can tell
/// whether the buffer it was issued against is the one it is being used with.
/// `lineage` is shared with every structural copy of that buffer.
#[derive(Debug)]
pub(crate) struct BufferToken {
    lineage: u64,
}

impl BufferToken {
    pub(crate) fn new(lineage: u64) -> Self {
        Self { lineage }
    }

    #[inline]
    pub(crate) fn lineage(&self) -> u64 {
        self.lineage
    }
}

/// A cursor at one slot of a tree buffer.
///
/// An `Index` is either the end sentinel, a live element, or garbage (its
/// element was erased after the handle was taken). The owning tree checks
/// which on every use, so a stale handle is reported rather than silently
/// reading whatever now occupies the slot.
///
/// Handles compare equal by slot id alone, which is only meaningful between
/// handles attached to the same buffer.
#[derive(Clone)]
pub struct Index {
    buffer: Weak<BufferToken>,
    lineage: u64,
    slot: SlotId,
    generation: u64,
}

impl Index {
    pub(crate) fn new(token: &Rc<BufferToken>, slot: SlotId, generation: u64) -> Self {
        Self {
            buffer: Rc::downgrade(token),
            lineage: token.lineage(),
            slot,
            generation,
        }
    }

    #[inline]
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Generation of the slot when the handle was taken.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Lineage of the tree that issued the handle. Copies of a tree share it;
    /// unrelated trees never do.
    #[inline]
    pub fn lineage(&self) -> u64 {
        self.lineage
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        self.slot.is_end()
    }

    /// Whether the buffer this handle was issued against still exists.
    pub fn is_attached(&self) -> bool {
        self.buffer.strong_count() > 0
    }

    #[inline]
    pub(crate) fn belongs_to(&self, token: &Rc<BufferToken>) -> bool {
        std::ptr::eq(self.buffer.as_ptr(), Rc::as_ptr(token))
    }
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot
    }
}

impl Eq for Index {}

impl Hash for Index {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// In-order walk over the slot ids of `[front, back)`.
pub struct Slots<'a, T> {
    tree: &'a RawTree<T>,
    front: SlotId,
    back: SlotId,
    remaining: usize,
}

impl<'a, T> Slots<'a, T> {
    /// `remaining` must be the distance from `front` to `back`.
    pub(crate) fn new(tree: &'a RawTree<T>, front: SlotId, back: SlotId, remaining: usize) -> Self {
        Self {
            tree,
            front,
            back,
            remaining,
        }
    }
}

impl<T> Clone for Slots<'_, T> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree,
            front: self.front,
            back: self.back,
            remaining: self.remaining,
        }
    }
}

impl<T> Iterator for Slots<'_, T> {
    type Item = SlotId;

    fn next(&mut self) -> Option<SlotId> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.front;
        self.front = self.tree.next_slot(id);
        self.remaining -= 1;
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> DoubleEndedIterator for Slots<'_, T> {
    fn next_back(&mut self) -> Option<SlotId> {
        if self.remaining == 0 {
            return None;
        }
        self.back = self.tree.prev_slot(self.back);
        self.remaining -= 1;
        Some(self.back)
    }
}

impl<T> ExactSizeIterator for Slots<'_, T> {}

impl<T> FusedIterator for Slots<'_, T> {}

/// In-order iterator over elements.
pub struct Iter<'a, T> {
    slots: Slots<'a, T>,
}

impl<'a, T> Iter<'a, T> {
    pub(crate) fn new(slots: Slots<'a, T>) -> Self {
        Self { slots }
    }

    fn value(&self, id: SlotId) -> Option<&'a T> {
        self.slots.tree.get(id)
    }
}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let id = self.slots.next()?;
        self.value(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.slots.size_hint()
    }
}

impl<'a, T> DoubleEndedIterator for Iter<'a, T> {
    fn next_back(&mut self) -> Option<&'a T> {
        let id = self.slots.next_back()?;
        self.value(id)
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<T> FusedIterator for Iter<'_, T> {}

/// In-order iterator over handles.
pub struct Indices<'a, T> {
    slots: Slots<'a, T>,
    token: &'a Rc<BufferToken>,
}

impl<'a, T> Indices<'a, T> {
    pub(crate) fn new(slots: Slots<'a, T>, token: &'a Rc<BufferToken>) -> Self {
        Self { slots, token }
    }

    fn handle(&self, id: SlotId) -> Index {
        Index::new(self.token, id, self.slots.tree.slot_generation(id))
    }
}

impl<T> Iterator for Indices<'_, T> {
    type Item = Index;

    fn next(&mut self) -> Option<Index> {
        let id = self.slots.next()?;
        Some(self.handle(id))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.slots.size_hint()
    }
}

impl<T> DoubleEndedIterator for Indices<'_, T> {
    fn next_back(&mut self) -> Option<Index> {
        let id = self.slots.next_back()?;
        Some(self.handle(id))
    }
}

impl<T> ExactSizeIterator for Indices<'_, T> {}
