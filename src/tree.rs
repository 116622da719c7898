//! Red-black tree algorithms over slot ids.
//!
//! The end sentinel (slot `0`) is the parent of the root and its `left` link
//! is the root pointer, so no live node ever has an absent parent and
//! rotations never special-case the root. Absent children are
//! [`SlotId::NIL`] and count as black.
//!
//! Searches take a probe closure that reports how an existing element orders
//! against the target, the same convention as [`slice::binary_search_by`].

use std::cmp::Ordering;
use std::fmt;

use crate::config::GrowthPolicy;
use crate::error::{InvariantViolation, TreeError};
use crate::index::{Iter, Slots};
use crate::store::{NodeStore, SlotId};

/// Which child link of a parent an insertion rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Outcome of a unique-mode insertion search.
///
/// `Vacant { parent: SlotId::END, side: Side::Left }` designates the root
/// pointer of an empty tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Found(SlotId),
    Vacant { parent: SlotId, side: Side },
}

/// The tree header and its node store.
pub struct RawTree<T> {
    store: NodeStore<T>,
    /// Leftmost live node, or the sentinel when empty.
    begin: SlotId,
    len: usize,
}

impl<T> RawTree<T> {
    pub fn new() -> Self {
        Self::with_capacity(0, GrowthPolicy::default())
    }

    pub fn with_capacity(capacity: usize, growth: GrowthPolicy) -> Self {
        Self {
            store: NodeStore::with_capacity(capacity, growth),
            begin: SlotId::END,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Element slots reserved across all buckets.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Element slots ever handed out by the fresh pool, garbage included.
    #[inline]
    pub fn fresh_len(&self) -> usize {
        self.store.fresh_len()
    }

    #[inline]
    pub fn recycled_len(&self) -> usize {
        self.store.recycled_len()
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.store.bucket_count()
    }

    #[inline]
    pub fn growth(&self) -> GrowthPolicy {
        self.store.growth()
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.store.memory_usage()
    }

    /// Ensures `additional` inserts can proceed without growing the store.
    pub fn reserve(&mut self, additional: usize) {
        self.store.reserve(additional);
    }

    #[inline]
    pub fn begin(&self) -> SlotId {
        self.begin
    }

    #[inline]
    pub fn end(&self) -> SlotId {
        SlotId::END
    }

    /// The root node, or [`SlotId::NIL`] when empty.
    #[inline]
    pub fn root(&self) -> SlotId {
        self.left(SlotId::END)
    }

    #[inline]
    pub fn is_live(&self, id: SlotId) -> bool {
        self.store.is_live(id)
    }

    /// Generation of a slot the store has handed out.
    #[inline]
    pub fn generation(&self, id: SlotId) -> Option<u64> {
        self.store.try_node(id).map(|n| n.generation)
    }

    #[inline]
    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.store.try_node(id).and_then(|n| n.value.as_ref())
    }

    pub fn try_get(&self, id: SlotId) -> Result<&T, TreeError> {
        self.check_live(id)?;
        Ok(self.item(id))
    }

    /// Overwrites the payload in place. The caller keeps the order intact.
    pub fn replace(&mut self, id: SlotId, value: T) -> Result<T, TreeError> {
        self.check_live(id)?;
        match self.store.node_mut(id).value.as_mut() {
            Some(slot) => Ok(std::mem::replace(slot, value)),
            None => Err(TreeError::Garbage(id)),
        }
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter::new(self.slots())
    }

    /// Slot ids of every element, in order.
    pub fn slots(&self) -> Slots<'_, T> {
        Slots::new(self, self.begin, SlotId::END, self.len)
    }

    #[inline]
    pub(crate) fn slot_generation(&self, id: SlotId) -> u64 {
        self.store.node(id).generation
    }

    /// Identity shared with every structural copy of this tree.
    #[inline]
    pub(crate) fn lineage(&self) -> u64 {
        self.store.lineage()
    }

    // -------------------------------------------------------------------------
    // Links
    // -------------------------------------------------------------------------

    #[inline]
    fn left(&self, id: SlotId) -> SlotId {
        self.store.node(id).left
    }

    #[inline]
    fn right(&self, id: SlotId) -> SlotId {
        self.store.node(id).right
    }

    #[inline]
    fn parent(&self, id: SlotId) -> SlotId {
        self.store.node(id).parent
    }

    #[inline]
    fn child(&self, id: SlotId, side: Side) -> SlotId {
        match side {
            Side::Left => self.left(id),
            Side::Right => self.right(id),
        }
    }

    #[inline]
    fn set_left(&mut self, id: SlotId, to: SlotId) {
        self.store.node_mut(id).left = to;
    }

    #[inline]
    fn set_right(&mut self, id: SlotId, to: SlotId) {
        self.store.node_mut(id).right = to;
    }

    #[inline]
    fn set_parent(&mut self, id: SlotId, to: SlotId) {
        self.store.node_mut(id).parent = to;
    }

    #[inline]
    fn set_child(&mut self, id: SlotId, side: Side, to: SlotId) {
        match side {
            Side::Left => self.set_left(id, to),
            Side::Right => self.set_right(id, to),
        }
    }

    /// Rewrites whichever link of `parent` pointed at `old`.
    #[inline]
    fn replace_child(&mut self, parent: SlotId, old: SlotId, new: SlotId) {
        if self.left(parent) == old {
            self.set_left(parent, new);
        } else {
            self.set_right(parent, new);
        }
    }

    #[inline]
    fn is_red(&self, id: SlotId) -> bool {
        !id.is_nil() && !self.store.node(id).black
    }

    #[inline]
    fn is_black(&self, id: SlotId) -> bool {
        !self.is_red(id)
    }

    #[inline]
    fn set_black(&mut self, id: SlotId, black: bool) {
        self.store.node_mut(id).black = black;
    }

    #[inline]
    fn item(&self, id: SlotId) -> &T {
        match &self.store.node(id).value {
            Some(value) => value,
            None => panic!("{}", TreeError::Garbage(id)),
        }
    }

    fn check_live(&self, id: SlotId) -> Result<(), TreeError> {
        if id.is_end() {
            Err(TreeError::EndSentinel)
        } else if !self.store.is_live(id) {
            Err(TreeError::Garbage(id))
        } else {
            Ok(())
        }
    }

    fn leftmost(&self, mut id: SlotId) -> SlotId {
        loop {
            let left = self.left(id);
            if left.is_nil() {
                return id;
            }
            id = left;
        }
    }

    fn rightmost(&self, mut id: SlotId) -> SlotId {
        loop {
            let right = self.right(id);
            if right.is_nil() {
                return id;
            }
            id = right;
        }
    }

    fn rotate_left(&mut self, x: SlotId) {
        let y = self.right(x);
        let y_left = self.left(y);
        self.set_right(x, y_left);
        if !y_left.is_nil() {
            self.set_parent(y_left, x);
        }
        let parent = self.parent(x);
        self.set_parent(y, parent);
        self.replace_child(parent, x, y);
        self.set_left(y, x);
        self.set_parent(x, y);
    }

    fn rotate_right(&mut self, x: SlotId) {
        let y = self.left(x);
        let y_right = self.right(y);
        self.set_left(x, y_right);
        if !y_right.is_nil() {
            self.set_parent(y_right, x);
        }
        let parent = self.parent(x);
        self.set_parent(y, parent);
        self.replace_child(parent, x, y);
        self.set_right(y, x);
        self.set_parent(x, y);
    }

    // -------------------------------------------------------------------------
    // Traversal
    // -------------------------------------------------------------------------

    /// In-order successor of a live node; the sentinel after the maximum.
    pub(crate) fn next_slot(&self, id: SlotId) -> SlotId {
        let right = self.right(id);
        if !right.is_nil() {
            return self.leftmost(right);
        }
        let mut id = id;
        loop {
            let parent = self.parent(id);
            // The root hangs off the sentinel's left link, so this stops there.
            if self.right(parent) != id {
                return parent;
            }
            id = parent;
        }
    }

    /// In-order predecessor of a live node other than `begin`, or of the
    /// sentinel in a non-empty tree.
    pub(crate) fn prev_slot(&self, id: SlotId) -> SlotId {
        if id.is_end() {
            return self.rightmost(self.root());
        }
        let left = self.left(id);
        if !left.is_nil() {
            return self.rightmost(left);
        }
        let mut id = id;
        loop {
            let parent = self.parent(id);
            if self.left(parent) != id {
                return parent;
            }
            id = parent;
        }
    }

    pub fn try_successor(&self, id: SlotId) -> Result<SlotId, TreeError> {
        if id.is_end() {
            return Err(TreeError::PastEnd);
        }
        self.check_live(id)?;
        Ok(self.next_slot(id))
    }

    pub fn try_predecessor(&self, id: SlotId) -> Result<SlotId, TreeError> {
        if id == self.begin {
            return Err(TreeError::BeforeBegin);
        }
        if !id.is_end() {
            self.check_live(id)?;
        }
        Ok(self.prev_slot(id))
    }

    /// # Panics
    ///
    /// Panics when `id` is the sentinel or garbage.
    pub fn successor(&self, id: SlotId) -> SlotId {
        self.try_successor(id).unwrap_or_else(|e| panic!("{e}"))
    }

    /// # Panics
    ///
    /// Panics when `id` is `begin` or garbage.
    pub fn predecessor(&self, id: SlotId) -> SlotId {
        self.try_predecessor(id).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Steps `steps` positions forward (or backward when negative), one
    /// link chase at a time.
    pub fn try_offset(&self, mut id: SlotId, steps: isize) -> Result<SlotId, TreeError> {
        if steps >= 0 {
            for _ in 0..steps {
                id = self.try_successor(id)?;
            }
        } else {
            for _ in 0..steps.unsigned_abs() {
                id = self.try_predecessor(id)?;
            }
        }
        Ok(id)
    }

    /// Number of `successor` steps from `from` to `to`.
    pub fn try_distance(&self, mut from: SlotId, to: SlotId) -> Result<usize, TreeError> {
        let mut n = 0;
        while from != to {
            from = self.try_successor(from)?;
            n += 1;
        }
        Ok(n)
    }

    // -------------------------------------------------------------------------
    // Search
    // -------------------------------------------------------------------------

    /// Descends to the node equal to the target, or to the vacant link where
    /// it would be inserted.
    pub fn find_equal_by<F>(&self, mut f: F) -> Probe
    where
        F: FnMut(&T) -> Ordering,
    {
        let mut parent = SlotId::END;
        let mut side = Side::Left;
        let mut node = self.root();
        while !node.is_nil() {
            match f(self.item(node)) {
                Ordering::Greater => {
                    parent = node;
                    side = Side::Left;
                    node = self.left(node);
                }
                Ordering::Less => {
                    parent = node;
                    side = Side::Right;
                    node = self.right(node);
                }
                Ordering::Equal => return Probe::Found(node),
            }
        }
        Probe::Vacant { parent, side }
    }

    /// Descends past every element equal to the target, returning the vacant
    /// link after the last of them.
    pub fn find_leaf_high_by<F>(&self, mut f: F) -> (SlotId, Side)
    where
        F: FnMut(&T) -> Ordering,
    {
        let mut parent = SlotId::END;
        let mut side = Side::Left;
        let mut node = self.root();
        while !node.is_nil() {
            parent = node;
            if f(self.item(node)) == Ordering::Greater {
                side = Side::Left;
                node = self.left(node);
            } else {
                side = Side::Right;
                node = self.right(node);
            }
        }
        (parent, side)
    }

    fn lower_bound_from<F>(&self, mut node: SlotId, mut result: SlotId, f: &mut F) -> SlotId
    where
        F: FnMut(&T) -> Ordering,
    {
        while !node.is_nil() {
            if f(self.item(node)) != Ordering::Less {
                result = node;
                node = self.left(node);
            } else {
                node = self.right(node);
            }
        }
        result
    }

    fn upper_bound_from<F>(&self, mut node: SlotId, mut result: SlotId, f: &mut F) -> SlotId
    where
        F: FnMut(&T) -> Ordering,
    {
        while !node.is_nil() {
            if f(self.item(node)) == Ordering::Greater {
                result = node;
                node = self.left(node);
            } else {
                node = self.right(node);
            }
        }
        result
    }

    /// Leftmost element not less than the target, or the sentinel.
    pub fn lower_bound_by<F>(&self, mut f: F) -> SlotId
    where
        F: FnMut(&T) -> Ordering,
    {
        self.lower_bound_from(self.root(), SlotId::END, &mut f)
    }

    /// Leftmost element greater than the target, or the sentinel.
    pub fn upper_bound_by<F>(&self, mut f: F) -> SlotId
    where
        F: FnMut(&T) -> Ordering,
    {
        self.upper_bound_from(self.root(), SlotId::END, &mut f)
    }

    /// `(lower_bound, upper_bound)` in a single descent.
    pub fn equal_range_by<F>(&self, mut f: F) -> (SlotId, SlotId)
    where
        F: FnMut(&T) -> Ordering,
    {
        let mut result = SlotId::END;
        let mut node = self.root();
        while !node.is_nil() {
            match f(self.item(node)) {
                Ordering::Greater => {
                    result = node;
                    node = self.left(node);
                }
                Ordering::Less => node = self.right(node),
                Ordering::Equal => {
                    let lower = self.lower_bound_from(self.left(node), node, &mut f);
                    let upper = self.upper_bound_from(self.right(node), result, &mut f);
                    return (lower, upper);
                }
            }
        }
        (result, result)
    }

    /// First element equal to the target, or the sentinel.
    pub fn find_by<F>(&self, mut f: F) -> SlotId
    where
        F: FnMut(&T) -> Ordering,
    {
        let lower = self.lower_bound_from(self.root(), SlotId::END, &mut f);
        if !lower.is_end() && f(self.item(lower)) == Ordering::Equal {
            lower
        } else {
            SlotId::END
        }
    }

    pub fn count_by<F>(&self, f: F) -> usize
    where
        F: FnMut(&T) -> Ordering,
    {
        let (mut id, upper) = self.equal_range_by(f);
        let mut n = 0;
        while id != upper {
            id = self.next_slot(id);
            n += 1;
        }
        n
    }

    // -------------------------------------------------------------------------
    // Insertion
    // -------------------------------------------------------------------------

    /// Allocates a node for `value` and links it at the vacant `side` of
    /// `parent`, as found by [`find_equal_by`](Self::find_equal_by) or
    /// [`find_leaf_high_by`](Self::find_leaf_high_by).
    pub fn insert_node_at(&mut self, parent: SlotId, side: Side, value: T) -> SlotId {
        assert!(
            parent.is_end() || self.store.is_live(parent),
            "{}",
            TreeError::Garbage(parent)
        );
        assert!(
            self.child(parent, side).is_nil() && !(parent.is_end() && side == Side::Right),
            "insertion link {side:?} of {parent} is not vacant"
        );

        let id = self.store.construct(value);
        self.set_parent(id, parent);
        self.set_child(parent, side, id);
        if side == Side::Left && parent == self.begin {
            self.begin = id;
        }
        self.len += 1;
        self.rebalance_after_insert(id);
        id
    }

    fn rebalance_after_insert(&mut self, mut x: SlotId) {
        while x != self.root() && self.is_red(self.parent(x)) {
            let parent = self.parent(x);
            // A red parent is never the root, so the grandparent is a node.
            let grandparent = self.parent(parent);
            if parent == self.left(grandparent) {
                let uncle = self.right(grandparent);
                if self.is_red(uncle) {
                    self.set_black(parent, true);
                    self.set_black(uncle, true);
                    self.set_black(grandparent, false);
                    x = grandparent;
                } else {
                    if x == self.right(parent) {
                        x = parent;
                        self.rotate_left(x);
                    }
                    let parent = self.parent(x);
                    let grandparent = self.parent(parent);
                    self.set_black(parent, true);
                    self.set_black(grandparent, false);
                    self.rotate_right(grandparent);
                }
            } else {
                let uncle = self.left(grandparent);
                if self.is_red(uncle) {
                    self.set_black(parent, true);
                    self.set_black(uncle, true);
                    self.set_black(grandparent, false);
                    x = grandparent;
                } else {
                    if x == self.left(parent) {
                        x = parent;
                        self.rotate_right(x);
                    }
                    let parent = self.parent(x);
                    let grandparent = self.parent(parent);
                    self.set_black(parent, true);
                    self.set_black(grandparent, false);
                    self.rotate_left(grandparent);
                }
            }
        }
        let root = self.root();
        self.set_black(root, true);
    }

    /// Inserts unless an equal element exists, in which case `value` is
    /// dropped and the existing slot is returned with `false`.
    pub fn insert_unique_by<F>(&mut self, value: T, mut cmp: F) -> (SlotId, bool)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        match self.find_equal_by(|item| cmp(item, &value)) {
            Probe::Found(id) => (id, false),
            Probe::Vacant { parent, side } => (self.insert_node_at(parent, side, value), true),
        }
    }

    /// Inserts after every element equal to `value`.
    pub fn insert_multi_by<F>(&mut self, value: T, mut cmp: F) -> SlotId
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let (parent, side) = self.find_leaf_high_by(|item| cmp(item, &value));
        self.insert_node_at(parent, side, value)
    }

    /// Appends `value` as the new maximum. The caller guarantees it orders
    /// after (or, in multi mode, equal to) every element present.
    pub fn push_back(&mut self, value: T) -> SlotId {
        let root = self.root();
        if root.is_nil() {
            self.insert_node_at(SlotId::END, Side::Left, value)
        } else {
            let last = self.rightmost(root);
            self.insert_node_at(last, Side::Right, value)
        }
    }

    // -------------------------------------------------------------------------
    // Deletion
    // -------------------------------------------------------------------------

    /// Unlinks and destroys `id`, returning its payload and its successor.
    pub fn try_remove(&mut self, id: SlotId) -> Result<(T, SlotId), TreeError> {
        self.check_live(id)?;
        let next = self.next_slot(id);
        if self.begin == id {
            self.begin = next;
        }
        self.unlink(id);
        self.len -= 1;
        Ok((self.store.destroy(id), next))
    }

    pub fn try_erase(&mut self, id: SlotId) -> Result<SlotId, TreeError> {
        self.try_remove(id).map(|(_, next)| next)
    }

    /// # Panics
    ///
    /// Panics when `id` is the sentinel or garbage.
    pub fn erase(&mut self, id: SlotId) -> SlotId {
        self.try_erase(id).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Erases `[first, last)`, returning `last`. Nothing is erased unless
    /// both ends are live (or the sentinel) and `last` is reachable from
    /// `first`.
    pub fn try_erase_range(&mut self, first: SlotId, last: SlotId) -> Result<SlotId, TreeError> {
        for id in [first, last] {
            if !id.is_end() {
                self.check_live(id)?;
            }
        }
        self.try_distance(first, last)?;
        if first == self.begin && last.is_end() {
            self.clear();
            return Ok(SlotId::END);
        }
        let mut id = first;
        while id != last {
            id = self.try_erase(id)?;
        }
        Ok(id)
    }

    pub fn erase_range(&mut self, first: SlotId, last: SlotId) -> SlotId {
        self.try_erase_range(first, last)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Destroys every element. Slots go to the recycle list.
    pub fn clear(&mut self) {
        let live: Vec<SlotId> = self
            .store
            .slots()
            .filter(|(id, node)| !id.is_end() && node.value.is_some())
            .map(|(id, _)| id)
            .collect();
        for id in live {
            self.store.destroy(id);
        }
        self.set_left(SlotId::END, SlotId::NIL);
        self.begin = SlotId::END;
        self.len = 0;
    }

    /// Removes `z` from the tree structure without touching its slot.
    fn unlink(&mut self, z: SlotId) {
        let z_left = self.left(z);
        let z_right = self.right(z);

        // `y` is the node whose position disappears: `z` itself when it has
        // at most one child, otherwise its in-order successor.
        let y = if z_left.is_nil() || z_right.is_nil() {
            z
        } else {
            self.leftmost(z_right)
        };
        let x = if self.left(y).is_nil() {
            self.right(y)
        } else {
            self.left(y)
        };

        let x_parent;
        let removed_black;
        if y != z {
            self.set_parent(z_left, y);
            self.set_left(y, z_left);
            if y != z_right {
                x_parent = self.parent(y);
                if !x.is_nil() {
                    self.set_parent(x, x_parent);
                }
                // `y` was the leftmost node of z's right subtree.
                self.set_left(x_parent, x);
                self.set_right(y, z_right);
                self.set_parent(z_right, y);
            } else {
                x_parent = y;
            }
            let z_parent = self.parent(z);
            self.replace_child(z_parent, z, y);
            self.set_parent(y, z_parent);

            removed_black = self.is_black(y);
            let z_black = self.is_black(z);
            self.set_black(y, z_black);
        } else {
            x_parent = self.parent(z);
            if !x.is_nil() {
                self.set_parent(x, x_parent);
            }
            self.replace_child(x_parent, z, x);
            removed_black = self.is_black(z);
        }

        if removed_black {
            self.rebalance_after_erase(x, x_parent);
        }
    }

    /// Restores black height after a black node left the path through
    /// `parent` on the side of `x` (which may be absent).
    fn rebalance_after_erase(&mut self, mut x: SlotId, mut parent: SlotId) {
        while x != self.root() && self.is_black(x) {
            if x == self.left(parent) {
                let mut sibling = self.right(parent);
                if self.is_red(sibling) {
                    self.set_black(sibling, true);
                    self.set_black(parent, false);
                    self.rotate_left(parent);
                    sibling = self.right(parent);
                }
                if self.is_black(self.left(sibling)) && self.is_black(self.right(sibling)) {
                    self.set_black(sibling, false);
                    x = parent;
                    parent = self.parent(x);
                } else {
                    if self.is_black(self.right(sibling)) {
                        let near = self.left(sibling);
                        self.set_black(near, true);
                        self.set_black(sibling, false);
                        self.rotate_right(sibling);
                        sibling = self.right(parent);
                    }
                    let parent_black = self.is_black(parent);
                    self.set_black(sibling, parent_black);
                    self.set_black(parent, true);
                    let far = self.right(sibling);
                    self.set_black(far, true);
                    self.rotate_left(parent);
                    x = self.root();
                    break;
                }
            } else {
                let mut sibling = self.left(parent);
                if self.is_red(sibling) {
                    self.set_black(sibling, true);
                    self.set_black(parent, false);
                    self.rotate_right(parent);
                    sibling = self.left(parent);
                }
                if self.is_black(self.left(sibling)) && self.is_black(self.right(sibling)) {
                    self.set_black(sibling, false);
                    x = parent;
                    parent = self.parent(x);
                } else {
                    if self.is_black(self.left(sibling)) {
                        let near = self.right(sibling);
                        self.set_black(near, true);
                        self.set_black(sibling, false);
                        self.rotate_left(sibling);
                        sibling = self.left(parent);
                    }
                    let parent_black = self.is_black(parent);
                    self.set_black(sibling, parent_black);
                    self.set_black(parent, true);
                    let far = self.left(sibling);
                    self.set_black(far, true);
                    self.rotate_right(parent);
                    x = self.root();
                    break;
                }
            }
        }
        if !x.is_nil() {
            self.set_black(x, true);
        }
    }

    // -------------------------------------------------------------------------
    // Copy and validation
    // -------------------------------------------------------------------------

    /// Single-bucket structural copy with at least `capacity` element slots.
    /// Slot ids, generations and the recycle list are preserved.
    pub fn copy_with_capacity(&self, capacity: usize) -> Self
    where
        T: Clone,
    {
        Self {
            store: self.store.copy_with_capacity(capacity),
            begin: self.begin,
            len: self.len,
        }
    }

    /// O(n) check of every structural invariant: sentinel shape, parent
    /// links, colour rule, black height, order, the cached `begin`, the
    /// element count and the recycle list.
    ///
    /// With `multi` set, equal neighbours are accepted.
    pub fn validate_by<F>(&self, mut cmp: F, multi: bool) -> Result<(), InvariantViolation>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let end = self.store.node(SlotId::END);
        if !end.black || !end.parent.is_nil() || !end.right.is_nil() || end.value.is_some() {
            return Err(InvariantViolation::Sentinel);
        }

        let root = self.root();
        if !root.is_nil() {
            if self.parent(root) != SlotId::END {
                return Err(InvariantViolation::ParentLink {
                    parent: SlotId::END,
                    child: root,
                });
            }
            if self.is_red(root) {
                return Err(InvariantViolation::RedRoot(root));
            }
            self.black_height(root)?;
        }

        let leftmost = if root.is_nil() {
            SlotId::END
        } else {
            self.leftmost(root)
        };
        if self.begin != leftmost {
            return Err(InvariantViolation::Begin {
                cached: self.begin,
                actual: leftmost,
            });
        }

        let mut count = 0usize;
        let mut prev: Option<SlotId> = None;
        let mut id = self.begin;
        while !id.is_end() {
            if let Some(p) = prev {
                let ord = cmp(self.item(p), self.item(id));
                let ordered = if multi {
                    ord != Ordering::Greater
                } else {
                    ord == Ordering::Less
                };
                if !ordered {
                    return Err(InvariantViolation::Order { prev: p, next: id });
                }
            }
            count += 1;
            if count > self.store.fresh_len() {
                break;
            }
            prev = Some(id);
            id = self.next_slot(id);
        }
        if count != self.len {
            return Err(InvariantViolation::Count {
                cached: self.len,
                actual: count,
            });
        }

        self.store.validate_free_list()
    }

    pub fn tree_invariant_holds_by<F>(&self, cmp: F, multi: bool) -> bool
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        match self.validate_by(cmp, multi) {
            Ok(()) => true,
            Err(violation) => {
                log::debug!("tree invariant violated: {violation}");
                false
            }
        }
    }

    /// Black height of the subtree at `node`, counting absent leaves.
    fn black_height(&self, node: SlotId) -> Result<usize, InvariantViolation> {
        if node.is_nil() {
            return Ok(1);
        }
        if !self.store.is_live(node) {
            return Err(InvariantViolation::GarbageInTree(node));
        }
        let left = self.left(node);
        let right = self.right(node);
        for child in [left, right] {
            if child.is_nil() {
                continue;
            }
            if self.parent(child) != node {
                return Err(InvariantViolation::ParentLink {
                    parent: node,
                    child,
                });
            }
            if self.is_red(node) && self.is_red(child) {
                return Err(InvariantViolation::RedRed(node));
            }
        }
        let lh = self.black_height(left)?;
        let rh = self.black_height(right)?;
        if lh != rh {
            return Err(InvariantViolation::BlackHeight {
                node,
                left: lh,
                right: rh,
            });
        }
        Ok(lh + usize::from(self.is_black(node)))
    }
}

impl<T> Default for RawTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for RawTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
