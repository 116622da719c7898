//! Node storage.
//!
//! Slots live in append-only buckets (the fresh pool) and are handed out by a
//! bump cursor. Erased slots go onto a free list (the recycle pool) threaded
//! through their own `right` link, and are always reused before the cursor
//! advances. Slot `0` is the end sentinel.
//!
//! Buckets never reallocate once opened, so growing the store never moves
//! existing nodes. A structural copy always produces exactly one bucket, which
//! makes slot resolution a direct index until the store grows again.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::GrowthPolicy;
use crate::error::{InvariantViolation, TreeError};

/// Slot ids are `u32`; `u32::MAX` is reserved for [`SlotId::NIL`].
const MAX_SLOTS: usize = u32::MAX as usize;

static NEXT_LINEAGE: AtomicU64 = AtomicU64::new(1);

/// A store and every structural copy descended from it share one lineage.
///
/// Each constructed node takes the next stamp from the lineage, so a
/// `(slot, generation)` pair names one insertion across all copies, including
/// copies that have since diverged.
pub(crate) struct Lineage {
    id: u64,
    next_stamp: Cell<u64>,
}

impl Lineage {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            id: NEXT_LINEAGE.fetch_add(1, Ordering::Relaxed),
            next_stamp: Cell::new(1),
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn stamp(&self) -> u64 {
        let stamp = self.next_stamp.get();
        self.next_stamp.set(stamp + 1);
        stamp
    }
}

/// Stable address of a node for as long as the node is live.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u32);

impl SlotId {
    /// The sentinel: one past the last element, and the parent of the root.
    pub const END: SlotId = SlotId(0);
    /// An absent child link.
    pub const NIL: SlotId = SlotId(u32::MAX);

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_end(self) -> bool {
        self.0 == Self::END.0
    }

    #[inline]
    pub const fn is_nil(self) -> bool {
        self.0 == Self::NIL.0
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_end() {
            f.write_str("end")
        } else if self.is_nil() {
            f.write_str("nil")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

pub(crate) struct Node<T> {
    pub(crate) left: SlotId,
    pub(crate) right: SlotId,
    pub(crate) parent: SlotId,
    pub(crate) black: bool,
    /// Lineage stamp taken when the slot was last constructed; `0` for the
    /// sentinel. Handles carry the stamp they saw. Stamps are 64-bit and never
    /// reused within a lineage, so a stale handle cannot match a later
    /// occupant of its slot.
    pub(crate) generation: u64,
    /// `None` for the sentinel and for garbage slots.
    pub(crate) value: Option<T>,
}

impl<T> Node<T> {
    fn sentinel() -> Self {
        Self {
            left: SlotId::NIL,
            right: SlotId::NIL,
            parent: SlotId::NIL,
            black: true,
            generation: 0,
            value: None,
        }
    }

    fn detached(value: T, generation: u64) -> Self {
        Self {
            left: SlotId::NIL,
            right: SlotId::NIL,
            parent: SlotId::NIL,
            black: false,
            generation,
            value: Some(value),
        }
    }
}

#[cold]
fn capacity_overflow() -> ! {
    panic!(
        "{}",
        TreeError::CapacityOverflow {
            max: MAX_SLOTS - 1
        }
    )
}

pub(crate) struct NodeStore<T> {
    buckets: Vec<Vec<Node<T>>>,
    /// First slot id held by each bucket.
    bucket_starts: Vec<u32>,
    /// Fresh-pool cursor: slots handed out so far, sentinel included.
    initialized: usize,
    /// Slots reserved across all buckets, sentinel included.
    slots: usize,
    /// Head of the recycle list.
    free_head: SlotId,
    free_len: usize,
    growth: GrowthPolicy,
    lineage: Rc<Lineage>,
}

impl<T> NodeStore<T> {
    pub(crate) fn with_capacity(capacity: usize, growth: GrowthPolicy) -> Self {
        let slots = match capacity.checked_add(1) {
            Some(slots) if slots <= MAX_SLOTS => slots,
            _ => capacity_overflow(),
        };
        let mut bucket = Vec::with_capacity(slots);
        bucket.push(Node::sentinel());
        Self {
            buckets: vec![bucket],
            bucket_starts: vec![0],
            initialized: 1,
            slots,
            free_head: SlotId::NIL,
            free_len: 0,
            growth,
            lineage: Lineage::new(),
        }
    }

    /// Element slots reserved, excluding the sentinel.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots - 1
    }

    /// Element slots the fresh pool has handed out, garbage included.
    #[inline]
    pub(crate) fn fresh_len(&self) -> usize {
        self.initialized - 1
    }

    /// Slots obtainable without growing: recycled plus untouched fresh ones.
    #[inline]
    pub(crate) fn available(&self) -> usize {
        self.free_len + (self.slots - self.initialized)
    }

    #[inline]
    pub(crate) fn recycled_len(&self) -> usize {
        self.free_len
    }

    #[inline]
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub(crate) fn growth(&self) -> GrowthPolicy {
        self.growth
    }

    #[inline]
    pub(crate) fn lineage(&self) -> u64 {
        self.lineage.id()
    }

    pub(crate) fn memory_usage(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.capacity() * std::mem::size_of::<Node<T>>())
            .sum::<usize>()
            + self.buckets.capacity() * std::mem::size_of::<Vec<Node<T>>>()
            + self.bucket_starts.capacity() * std::mem::size_of::<u32>()
    }

    /// Maps a slot id to (bucket, offset). A single bucket is indexed
    /// directly; fragmented stores binary-search the bucket starts.
    #[inline]
    fn locate(&self, id: SlotId) -> (usize, usize) {
        let i = id.index();
        if self.buckets.len() == 1 {
            return (0, i);
        }
        let bucket = self
            .bucket_starts
            .partition_point(|&start| start as usize <= i)
            - 1;
        (bucket, i - self.bucket_starts[bucket] as usize)
    }

    #[inline]
    pub(crate) fn node(&self, id: SlotId) -> &Node<T> {
        let (bucket, offset) = self.locate(id);
        &self.buckets[bucket][offset]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, id: SlotId) -> &mut Node<T> {
        let (bucket, offset) = self.locate(id);
        &mut self.buckets[bucket][offset]
    }

    /// The node at `id` if the fresh pool has ever handed it out.
    #[inline]
    pub(crate) fn try_node(&self, id: SlotId) -> Option<&Node<T>> {
        (id.index() < self.initialized).then(|| self.node(id))
    }

    #[inline]
    pub(crate) fn is_live(&self, id: SlotId) -> bool {
        !id.is_end() && self.try_node(id).is_some_and(|n| n.value.is_some())
    }

    /// Allocates a red, unlinked node holding `value`.
    pub(crate) fn construct(&mut self, value: T) -> SlotId {
        if !self.free_head.is_nil() {
            let id = self.free_head;
            let stamp = self.lineage.stamp();
            let node = self.node_mut(id);
            let next = node.right;
            *node = Node::detached(value, stamp);
            self.free_head = next;
            self.free_len -= 1;
            log::trace!("reusing recycled slot {id}");
            return id;
        }

        if self.initialized == self.slots {
            self.grow(self.capacity() + 1);
        }
        let stamp = self.lineage.stamp();
        self.push_fresh(Node::detached(value, stamp))
    }

    /// Drops the payload, marks the slot as garbage and recycles it.
    pub(crate) fn destroy(&mut self, id: SlotId) -> T {
        if id.is_end() {
            panic!("{}", TreeError::EndSentinel);
        }
        let free_head = self.free_head;
        let node = self.node_mut(id);
        let Some(value) = node.value.take() else {
            panic!("{}", TreeError::Garbage(id));
        };
        node.left = SlotId::NIL;
        node.parent = SlotId::NIL;
        node.black = false;
        node.right = free_head;
        self.free_head = id;
        self.free_len += 1;
        value
    }

    /// Ensures `additional` more nodes can be constructed without growing.
    pub(crate) fn reserve(&mut self, additional: usize) {
        let available = self.available();
        if available < additional {
            self.grow(self.capacity() + (additional - available));
        }
    }

    /// Opens a new bucket so that total capacity reaches at least `required`.
    fn grow(&mut self, required: usize) {
        let current = self.capacity();
        let target = self.growth.next_capacity(current, required).min(MAX_SLOTS - 1);
        if target < required {
            capacity_overflow();
        }
        let extra = target - current;
        self.bucket_starts.push(self.slots as u32);
        self.buckets.push(Vec::with_capacity(extra));
        self.slots += extra;
        log::trace!(
            "opened bucket {} with {extra} slots (capacity {current} -> {target})",
            self.buckets.len() - 1
        );
    }

    fn push_fresh(&mut self, node: Node<T>) -> SlotId {
        debug_assert!(self.initialized < self.slots);
        let id = SlotId(self.initialized as u32);
        let (bucket, offset) = self.locate(id);
        debug_assert_eq!(self.buckets[bucket].len(), offset);
        self.buckets[bucket].push(node);
        self.initialized += 1;
        id
    }

    /// Every slot the fresh pool has handed out, in ascending id order,
    /// garbage and sentinel included.
    pub(crate) fn slots(&self) -> impl Iterator<Item = (SlotId, &Node<T>)> + '_ {
        self.buckets
            .iter()
            .flatten()
            .enumerate()
            .map(|(i, node)| (SlotId(i as u32), node))
    }

    /// Structural copy into a single bucket of at least `capacity` element
    /// slots. Garbage slots are carried over so every slot id, generation and
    /// recycle-list link means the same thing in the copy.
    pub(crate) fn copy_with_capacity(&self, capacity: usize) -> Self
    where
        T: Clone,
    {
        let mut copy = Self::with_capacity(capacity.max(self.fresh_len()), self.growth);
        copy.node_mut(SlotId::END).left = self.node(SlotId::END).left;

        for (id, node) in self.slots().skip(1) {
            let new_id = copy.push_fresh(Node {
                left: node.left,
                right: node.right,
                parent: node.parent,
                black: node.black,
                generation: node.generation,
                value: node.value.clone(),
            });
            // Fresh slots are handed out in ascending order, so each old slot
            // lands on the same id and every link carries over unchanged.
            debug_assert_eq!(new_id, id);
        }

        copy.free_head = self.free_head;
        copy.free_len = self.free_len;
        copy.lineage = Rc::clone(&self.lineage);
        copy
    }

    pub(crate) fn validate_free_list(&self) -> Result<(), InvariantViolation> {
        let mut seen = 0usize;
        let mut id = self.free_head;
        while !id.is_nil() {
            if seen == self.free_len || id.is_end() {
                return Err(InvariantViolation::FreeList(id));
            }
            match self.try_node(id) {
                Some(node) if node.value.is_none() => id = node.right,
                _ => return Err(InvariantViolation::FreeList(id)),
            }
            seen += 1;
        }
        if seen != self.free_len {
            return Err(InvariantViolation::FreeList(id));
        }
        Ok(())
    }
}
