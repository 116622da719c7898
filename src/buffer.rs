//! Copy-on-write container values.
//!
//! A [`CowTree`] owns an `Rc` to its buffer (tree header plus node store).
//! Cloning the tree shares the buffer; the first write through a value that
//! does not own its buffer exclusively copies it. The copy keeps every slot id
//! and generation, so handles taken before the copy can be revalidated
//! against the new buffer by slot id.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::compare::{Comparator, Natural};
use crate::config::TreeConfig;
use crate::error::{InvariantViolation, TreeError};
use crate::index::{BufferToken, Index, Indices, Iter, Slots};
use crate::store::SlotId;
use crate::tree::{Probe, RawTree};

pub(crate) struct TreeBuffer<T> {
    raw: RawTree<T>,
    token: Rc<BufferToken>,
}

impl<T> TreeBuffer<T> {
    fn new(raw: RawTree<T>) -> Self {
        let token = Rc::new(BufferToken::new(raw.lineage()));
        Self { raw, token }
    }

    fn index(&self, slot: SlotId) -> Index {
        let generation = if slot.is_end() {
            0
        } else {
            self.raw.slot_generation(slot)
        };
        Index::new(&self.token, slot, generation)
    }

    fn has_outstanding_handles(&self) -> bool {
        Rc::weak_count(&self.token) > 0
    }
}

impl<T: Clone> Clone for TreeBuffer<T> {
    fn clone(&self) -> Self {
        Self::new(self.raw.copy_with_capacity(self.raw.capacity()))
    }
}

/// An ordered container value backed by a shared, copy-on-write red-black
/// tree buffer.
///
/// Elements are ordered by `C`. Both unique insertion (equal elements are
/// rejected) and multi insertion (equal elements are kept in insertion
/// order) are available on the same tree; wrapper types pick one.
pub struct CowTree<T, C = Natural> {
    buffer: Rc<TreeBuffer<T>>,
    comparator: C,
    config: TreeConfig,
}

impl<T, C: Comparator<T> + Default> CowTree<T, C> {
    pub fn new() -> Self {
        Self::with_config(TreeConfig::default())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_config(TreeConfig::default().with_initial_capacity(capacity))
    }

    pub fn with_config(config: TreeConfig) -> Self {
        Self::with_comparator(C::default(), config)
    }

    /// Builds a tree from strictly increasing input.
    ///
    /// # Panics
    ///
    /// Panics if an element does not order after its predecessor.
    pub fn from_sorted_unique<I: IntoIterator<Item = T>>(items: I) -> Self {
        Self::try_from_sorted_unique(items).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn try_from_sorted_unique<I: IntoIterator<Item = T>>(items: I) -> Result<Self, TreeError> {
        Self::try_from_sorted_unique_with(items, C::default(), TreeConfig::default())
    }
}

impl<T, C: Comparator<T>> CowTree<T, C> {
    pub fn with_comparator(comparator: C, config: TreeConfig) -> Self {
        let raw = RawTree::with_capacity(config.initial_capacity, config.growth);
        Self {
            buffer: Rc::new(TreeBuffer::new(raw)),
            comparator,
            config,
        }
    }

    /// Builds a tree from strictly increasing input by appending each element
    /// as the new maximum.
    pub fn try_from_sorted_unique_with<I: IntoIterator<Item = T>>(
        items: I,
        comparator: C,
        config: TreeConfig,
    ) -> Result<Self, TreeError> {
        let items = items.into_iter();
        let capacity = config.initial_capacity.max(items.size_hint().0);
        let mut raw = RawTree::with_capacity(capacity, config.growth);
        let mut last = SlotId::END;
        for (position, value) in items.enumerate() {
            if let Some(prev) = raw.get(last) {
                if comparator.compare(prev, &value) != Ordering::Less {
                    return Err(TreeError::NotStrictlySorted { position });
                }
            }
            last = raw.push_back(value);
        }
        Ok(Self {
            buffer: Rc::new(TreeBuffer::new(raw)),
            comparator,
            config,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.raw.is_empty()
    }

    /// Elements the buffer can hold before it must grow.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.raw.capacity()
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buffer.raw.bucket_count()
    }

    pub fn memory_usage(&self) -> usize {
        self.buffer.raw.memory_usage()
    }

    #[inline]
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    #[inline]
    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    /// Slot-level view of the current buffer.
    #[inline]
    pub fn raw(&self) -> &RawTree<T> {
        &self.buffer.raw
    }

    /// Whether a write can proceed in place.
    pub fn is_unique(&self) -> bool {
        Rc::strong_count(&self.buffer) == 1
            && !(self.config.strict_handles && self.buffer.has_outstanding_handles())
    }

    pub fn shares_buffer_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.buffer, &other.buffer)
    }

    // -------------------------------------------------------------------------
    // Handles
    // -------------------------------------------------------------------------

    pub fn begin(&self) -> Index {
        self.buffer.index(self.buffer.raw.begin())
    }

    pub fn end(&self) -> Index {
        self.buffer.index(SlotId::END)
    }

    /// Checks that `index` was issued by this buffer and still names either
    /// the sentinel or the element it was taken at.
    fn resolve(&self, index: &Index) -> Result<SlotId, TreeError> {
        let slot = index.slot();
        if !index.belongs_to(&self.buffer.token) {
            return Err(TreeError::Detached(slot));
        }
        if slot.is_end() {
            return Ok(slot);
        }
        let raw = &self.buffer.raw;
        if raw.is_live(slot) && raw.generation(slot) == Some(index.generation()) {
            Ok(slot)
        } else {
            Err(TreeError::Garbage(slot))
        }
    }

    /// Re-issues a handle taken against an earlier buffer of this tree's
    /// lineage (for example one taken before a copy) against the current
    /// buffer. Succeeds when the same slot still holds the same insertion.
    /// Handles from unrelated trees are reported as detached.
    pub fn revalidate(&self, index: &Index) -> Result<Index, TreeError> {
        let slot = index.slot();
        if index.lineage() != self.buffer.token.lineage() {
            return Err(TreeError::Detached(slot));
        }
        if slot.is_end() {
            return Ok(self.end());
        }
        let raw = &self.buffer.raw;
        if raw.is_live(slot) && raw.generation(slot) == Some(index.generation()) {
            Ok(self.buffer.index(slot))
        } else {
            Err(TreeError::Garbage(slot))
        }
    }

    pub fn try_get(&self, index: &Index) -> Result<&T, TreeError> {
        let slot = self.resolve(index)?;
        self.buffer.raw.try_get(slot)
    }

    pub fn get(&self, index: &Index) -> Option<&T> {
        self.try_get(index).ok()
    }

    pub fn try_next(&self, index: &Index) -> Result<Index, TreeError> {
        let slot = self.resolve(index)?;
        let next = self.buffer.raw.try_successor(slot)?;
        Ok(self.buffer.index(next))
    }

    pub fn try_prev(&self, index: &Index) -> Result<Index, TreeError> {
        let slot = self.resolve(index)?;
        let prev = self.buffer.raw.try_predecessor(slot)?;
        Ok(self.buffer.index(prev))
    }

    /// # Panics
    ///
    /// Panics when `index` is the end, garbage, or from another buffer.
    pub fn next(&self, index: &Index) -> Index {
        self.try_next(index).unwrap_or_else(|e| panic!("{e}"))
    }

    /// # Panics
    ///
    /// Panics when `index` is `begin`, garbage, or from another buffer.
    pub fn prev(&self, index: &Index) -> Index {
        self.try_prev(index).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Moves `steps` positions by repeated [`next`](Self::next) or
    /// [`prev`](Self::prev); O(|steps|).
    pub fn try_offset(&self, index: &Index, steps: isize) -> Result<Index, TreeError> {
        let slot = self.resolve(index)?;
        let target = self.buffer.raw.try_offset(slot, steps)?;
        Ok(self.buffer.index(target))
    }

    pub fn offset(&self, index: &Index, steps: isize) -> Index {
        self.try_offset(index, steps)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Forward steps from `from` to `to`; O(distance).
    pub fn try_distance(&self, from: &Index, to: &Index) -> Result<usize, TreeError> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        self.buffer.raw.try_distance(from, to)
    }

    pub fn distance(&self, from: &Index, to: &Index) -> usize {
        self.try_distance(from, to)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    pub fn find(&self, value: &T) -> Index {
        self.find_by(|item| self.comparator.compare(item, value))
    }

    /// Lookup with a probe reporting how each element orders against the
    /// target; lets map-style callers search by key alone.
    pub fn find_by<F: FnMut(&T) -> Ordering>(&self, f: F) -> Index {
        self.buffer.index(self.buffer.raw.find_by(f))
    }

    pub fn lower_bound(&self, value: &T) -> Index {
        self.lower_bound_by(|item| self.comparator.compare(item, value))
    }

    pub fn lower_bound_by<F: FnMut(&T) -> Ordering>(&self, f: F) -> Index {
        self.buffer.index(self.buffer.raw.lower_bound_by(f))
    }

    pub fn upper_bound(&self, value: &T) -> Index {
        self.upper_bound_by(|item| self.comparator.compare(item, value))
    }

    pub fn upper_bound_by<F: FnMut(&T) -> Ordering>(&self, f: F) -> Index {
        self.buffer.index(self.buffer.raw.upper_bound_by(f))
    }

    pub fn equal_range(&self, value: &T) -> (Index, Index) {
        self.equal_range_by(|item| self.comparator.compare(item, value))
    }

    pub fn equal_range_by<F: FnMut(&T) -> Ordering>(&self, f: F) -> (Index, Index) {
        let (lower, upper) = self.buffer.raw.equal_range_by(f);
        (self.buffer.index(lower), self.buffer.index(upper))
    }

    pub fn count(&self, value: &T) -> usize {
        self.count_by(|item| self.comparator.compare(item, value))
    }

    pub fn count_by<F: FnMut(&T) -> Ordering>(&self, f: F) -> usize {
        self.buffer.raw.count_by(f)
    }

    pub fn contains(&self, value: &T) -> bool {
        !self.find(value).is_end()
    }

    pub fn first(&self) -> Option<&T> {
        self.buffer.raw.get(self.buffer.raw.begin())
    }

    pub fn last(&self) -> Option<&T> {
        self.iter().next_back()
    }

    // -------------------------------------------------------------------------
    // Iteration
    // -------------------------------------------------------------------------

    pub fn iter(&self) -> Iter<'_, T> {
        self.buffer.raw.iter()
    }

    /// Handles to every element, in order.
    pub fn indices(&self) -> Indices<'_, T> {
        Indices::new(self.buffer.raw.slots(), &self.buffer.token)
    }

    /// Elements in `[from, to)`. Sizing the range walks it once.
    pub fn try_range(&self, from: &Index, to: &Index) -> Result<Iter<'_, T>, TreeError> {
        let front = self.resolve(from)?;
        let back = self.resolve(to)?;
        let remaining = self.buffer.raw.try_distance(front, back)?;
        Ok(Iter::new(Slots::new(&self.buffer.raw, front, back, remaining)))
    }

    pub fn range(&self, from: &Index, to: &Index) -> Iter<'_, T> {
        self.try_range(from, to).unwrap_or_else(|e| panic!("{e}"))
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    /// O(n) structural check; equal neighbours are accepted.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        self.buffer
            .raw
            .validate_by(|a, b| self.comparator.compare(a, b), true)
    }

    /// As [`validate`](Self::validate), additionally requiring strictly
    /// increasing elements.
    pub fn validate_strict(&self) -> Result<(), InvariantViolation> {
        self.buffer
            .raw
            .validate_by(|a, b| self.comparator.compare(a, b), false)
    }

    /// Structural check for trees that may hold equal elements.
    pub fn tree_invariant_holds(&self) -> bool {
        self.buffer
            .raw
            .tree_invariant_holds_by(|a, b| self.comparator.compare(a, b), true)
    }

    /// As [`tree_invariant_holds`](Self::tree_invariant_holds), additionally
    /// requiring strictly increasing elements; use for unique-mode trees.
    pub fn tree_invariant_holds_strict(&self) -> bool {
        self.buffer
            .raw
            .tree_invariant_holds_by(|a, b| self.comparator.compare(a, b), false)
    }
}

impl<T: Clone, C: Comparator<T>> CowTree<T, C> {
    /// Makes the buffer exclusively ours with room for `additional` inserts.
    ///
    /// A shared (or, in strict mode, handle-pinned) buffer is copied into a
    /// single bucket sized for the result; an exclusive buffer grows in place.
    fn make_unique(&mut self, additional: usize) -> &mut RawTree<T> {
        if !self.is_unique() {
            let raw = &self.buffer.raw;
            let capacity = (raw.fresh_len() + additional).max(self.config.initial_capacity);
            log::debug!(
                "copying tree buffer ({}): {} elements, {} slots -> capacity {capacity}",
                if Rc::strong_count(&self.buffer) > 1 {
                    "shared"
                } else {
                    "pinned by handles"
                },
                raw.len(),
                raw.fresh_len(),
            );
            let copy = TreeBuffer::new(raw.copy_with_capacity(capacity));
            self.buffer = Rc::new(copy);
        }
        let raw = &mut Rc::make_mut(&mut self.buffer).raw;
        raw.reserve(additional);
        raw
    }

    /// Ensures the next write happens in place.
    pub fn ensure_unique(&mut self) {
        self.make_unique(0);
    }

    /// Ensures the tree is exclusively owned and can hold `capacity`
    /// elements without growing.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        let additional = capacity.saturating_sub(self.len());
        self.make_unique(additional);
    }

    /// Inserts `value` unless an equal element exists. Returns the handle of
    /// the element in the tree and whether `value` was inserted.
    pub fn insert_unique(&mut self, value: T) -> (Index, bool) {
        let probe = self
            .buffer
            .raw
            .find_equal_by(|item| self.comparator.compare(item, &value));
        if let Probe::Found(slot) = probe {
            return (self.buffer.index(slot), false);
        }

        self.make_unique(1);
        let buffer = Rc::make_mut(&mut self.buffer);
        let comparator = &self.comparator;
        let (slot, inserted) = buffer
            .raw
            .insert_unique_by(value, |a, b| comparator.compare(a, b));
        (buffer.index(slot), inserted)
    }

    /// Inserts `value` after every element equal to it.
    pub fn insert_multi(&mut self, value: T) -> Index {
        self.make_unique(1);
        let buffer = Rc::make_mut(&mut self.buffer);
        let comparator = &self.comparator;
        let slot = buffer
            .raw
            .insert_multi_by(value, |a, b| comparator.compare(a, b));
        buffer.index(slot)
    }

    /// Erases the element at `index`, returning a handle to its successor.
    pub fn try_erase(&mut self, index: &Index) -> Result<Index, TreeError> {
        let slot = self.resolve(index)?;
        if slot.is_end() {
            return Err(TreeError::EndSentinel);
        }
        // Slot ids survive the copy, so the resolved slot stays valid.
        let next = self.make_unique(0).try_erase(slot)?;
        Ok(self.buffer.index(next))
    }

    /// # Panics
    ///
    /// Panics when `index` is the end, garbage, or from another buffer.
    pub fn erase(&mut self, index: &Index) -> Index {
        self.try_erase(index).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Erases `[first, last)`, returning a handle to `last`. Nothing is
    /// erased unless `last` is reachable from `first`.
    pub fn try_erase_range(&mut self, first: &Index, last: &Index) -> Result<Index, TreeError> {
        let first = self.resolve(first)?;
        let last = self.resolve(last)?;
        // Checked before copying, so a rejected range never forces a copy.
        self.buffer.raw.try_distance(first, last)?;
        let at = self.make_unique(0).try_erase_range(first, last)?;
        Ok(self.buffer.index(at))
    }

    pub fn erase_range(&mut self, first: &Index, last: &Index) -> Index {
        self.try_erase_range(first, last)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Removes the first element equal to `value`.
    pub fn remove(&mut self, value: &T) -> Option<T> {
        let slot = self
            .buffer
            .raw
            .find_by(|item| self.comparator.compare(item, value));
        if slot.is_end() {
            return None;
        }
        self.make_unique(0).try_remove(slot).ok().map(|(v, _)| v)
    }

    /// Removes every element equal to `value`, returning how many there were.
    pub fn remove_all(&mut self, value: &T) -> usize {
        let (lower, upper) = self
            .buffer
            .raw
            .equal_range_by(|item| self.comparator.compare(item, value));
        if lower == upper {
            return 0;
        }
        let raw = self.make_unique(0);
        let n = raw.try_distance(lower, upper).unwrap_or(0);
        raw.erase_range(lower, upper);
        n
    }

    /// Overwrites the element at `index` with one that orders equal to it,
    /// such as a map entry with a new value. Returns the old element.
    pub fn try_replace(&mut self, index: &Index, value: T) -> Result<T, TreeError> {
        let slot = self.resolve(index)?;
        let current = self.buffer.raw.try_get(slot)?;
        if self.comparator.compare(current, &value) != Ordering::Equal {
            return Err(TreeError::OrderChanged(slot));
        }
        self.make_unique(0).replace(slot, value)
    }

    pub fn replace(&mut self, index: &Index, value: T) -> T {
        self.try_replace(index, value)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Removes every element. A shared buffer is left to its other owners.
    pub fn clear(&mut self) {
        if self.is_unique() {
            self.make_unique(0).clear();
        } else {
            let raw = RawTree::with_capacity(self.config.initial_capacity, self.config.growth);
            self.buffer = Rc::new(TreeBuffer::new(raw));
        }
    }
}

impl<T, C: Comparator<T> + Default> Default for CowTree<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shares the buffer; the first write through either value copies it.
impl<T, C: Clone> Clone for CowTree<T, C> {
    fn clone(&self) -> Self {
        Self {
            buffer: Rc::clone(&self.buffer),
            comparator: self.comparator.clone(),
            config: self.config,
        }
    }
}

impl<T: fmt::Debug, C> fmt::Debug for CowTree<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.buffer.raw.iter()).finish()
    }
}

impl<T, C: Comparator<T>> std::ops::Index<&Index> for CowTree<T, C> {
    type Output = T;

    fn index(&self, index: &Index) -> &T {
        self.try_get(index).unwrap_or_else(|e| panic!("{e}"))
    }
}

impl<'a, T, C: Comparator<T>> IntoIterator for &'a CowTree<T, C> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

impl<T: Clone, C: Comparator<T>> Extend<T> for CowTree<T, C> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, items: I) {
        let items = items.into_iter();
        self.ensure_capacity(self.len() + items.size_hint().0);
        for value in items {
            self.insert_unique(value);
        }
    }
}

impl<T: Clone, C: Comparator<T> + Default> FromIterator<T> for CowTree<T, C> {
    fn from_iter<I: IntoIterator<Item = T>>(items: I) -> Self {
        let mut tree = Self::new();
        tree.extend(items);
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::ByKey;
    use crate::config::GrowthPolicy;

    fn init() {
        let _ = env_logger::try_init();
    }

    fn items<T: Clone, C: Comparator<T>>(t: &CowTree<T, C>) -> Vec<T> {
        t.iter().cloned().collect()
    }

    #[test]
    fn test_scenario_unique() {
        init();
        let mut t: CowTree<i32> = CowTree::new();
        for v in [1, 4, 2, 8, 5, 7] {
            t.insert_unique(v);
            assert!(t.tree_invariant_holds_strict());
        }
        assert_eq!(items(&t), vec![1, 2, 4, 5, 7, 8]);
        let four = t.find(&4);
        t.erase(&four);
        assert!(t.tree_invariant_holds_strict());
        assert_eq!(items(&t), vec![1, 2, 5, 7, 8]);
    }

    #[test]
    fn test_scenario_multi() {
        init();
        let mut t: CowTree<&str> = CowTree::new();
        t.insert_multi("a");
        t.insert_multi("a");
        t.insert_multi("b");
        assert_eq!(t.count(&"a"), 2);
        let a = t.find(&"a");
        t.erase(&a);
        assert_eq!(t.count(&"a"), 1);
        assert_eq!(items(&t), vec!["a", "b"]);
        t.validate().unwrap();
    }

    #[test]
    fn test_insert_unique_reports_existing() {
        let mut t: CowTree<i32> = CowTree::new();
        let (first, inserted) = t.insert_unique(9);
        assert!(inserted);
        let (second, inserted) = t.insert_unique(9);
        assert!(!inserted);
        assert_eq!(first, second);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_clone_shares_until_write() {
        init();
        let mut a: CowTree<i32> = (0..10).collect();
        let mut b = a.clone();
        assert!(a.shares_buffer_with(&b));
        assert!(!a.is_unique());

        b.insert_unique(100);
        b.remove(&3);
        assert!(!a.shares_buffer_with(&b));
        assert_eq!(items(&a), (0..10).collect::<Vec<_>>());
        assert_eq!(b.len(), 10);
        assert!(b.contains(&100));
        assert!(!b.contains(&3));

        a.insert_unique(-1);
        assert!(a.is_unique());
        assert!(!b.contains(&-1));
        a.validate_strict().unwrap();
        b.validate_strict().unwrap();
    }

    #[test]
    fn test_copy_is_single_bucket() {
        let config = TreeConfig::default().with_growth(GrowthPolicy {
            linear_limit: 4,
            linear_step: 1,
        });
        let mut a: CowTree<i32> = CowTree::with_config(config);
        for v in 0..40 {
            a.insert_unique(v);
        }
        assert!(a.bucket_count() > 1);

        let mut b = a.clone();
        b.ensure_unique();
        assert_eq!(b.bucket_count(), 1);
        assert!(a.bucket_count() > 1);
        assert_eq!(items(&a), items(&b));
    }

    #[test]
    fn test_handle_revalidates_after_copy() {
        init();
        let mut a: CowTree<i32> = (0..32).collect();
        let seven = a.find(&7);
        let alias = a.clone();

        a.insert_unique(99);
        assert_eq!(a.get(&seven), None);
        assert_eq!(a.try_get(&seven), Err(TreeError::Detached(seven.slot())));

        let revalidated = a.revalidate(&seven).unwrap();
        assert_eq!(revalidated.slot(), seven.slot());
        assert_eq!(a[&revalidated], 7);
        assert_eq!(alias[&seven], 7);
    }

    #[test]
    fn test_revalidate_rejects_erased() {
        let mut a: CowTree<i32> = (0..8).collect();
        let three = a.find(&3);
        let alias = a.clone();
        a.remove(&3);
        a.insert_unique(30);
        assert_eq!(alias[&three], 3);
        assert_eq!(a.revalidate(&three), Err(TreeError::Garbage(three.slot())));
    }

    #[test]
    fn test_revalidate_rejects_unrelated_tree() {
        let a: CowTree<i32> = (0..8).collect();
        let b: CowTree<i32> = (100..108).collect();
        let three = a.find(&3);
        assert_eq!(b.revalidate(&three), Err(TreeError::Detached(three.slot())));
        assert_eq!(b.revalidate(&a.end()), Err(TreeError::Detached(SlotId::END)));
        assert_eq!(b.get(&three), None);
        assert_ne!(a.begin().lineage(), b.begin().lineage());
    }

    #[test]
    fn test_revalidate_rejects_diverged_sibling() {
        let mut a: CowTree<i32> = (0..8).collect();
        let mut b = a.clone();
        let slot = a.find(&3).slot();

        a.remove(&3);
        a.insert_unique(30);
        b.remove(&3);
        b.insert_unique(-30);
        let thirty = a.find(&30);
        let minus = b.find(&-30);
        assert_eq!(thirty.slot(), slot);
        assert_eq!(minus.slot(), slot);
        assert_eq!(thirty.lineage(), minus.lineage());

        assert_eq!(b.revalidate(&thirty), Err(TreeError::Garbage(slot)));
        assert_eq!(a.revalidate(&minus), Err(TreeError::Garbage(slot)));
        assert_eq!(b[&b.revalidate(&minus).unwrap()], -30);
    }

    #[test]
    fn test_strict_check_rejects_equal_neighbours() {
        let mut t: CowTree<i32> = CowTree::new();
        t.insert_multi(1);
        assert!(t.tree_invariant_holds_strict());
        t.insert_multi(1);
        assert!(t.tree_invariant_holds());
        assert!(!t.tree_invariant_holds_strict());
    }

    #[test]
    fn test_erase_range_rejected_without_copy() {
        let mut t: CowTree<i32> = (0..10).collect();
        let alias = t.clone();
        let six = t.find(&6);
        let two = t.find(&2);
        assert_eq!(t.try_erase_range(&six, &two), Err(TreeError::PastEnd));
        assert!(t.shares_buffer_with(&alias));
        assert_eq!(t.len(), 10);
    }

    #[test]
    fn test_handle_survives_in_place_writes() {
        let mut t: CowTree<i32> = (0..16).collect();
        let five = t.find(&5);
        for v in 16..200 {
            t.insert_unique(v);
        }
        t.remove(&4);
        assert_eq!(t[&five], 5);
        assert_eq!(t.get(&t.next(&five)), Some(&6));
        assert_eq!(t.get(&t.prev(&five)), Some(&3));
    }

    #[test]
    fn test_stale_handle_detected() {
        let mut t: CowTree<i32> = (0..4).collect();
        let two = t.find(&2);
        t.erase(&two);
        t.insert_unique(10);
        assert_eq!(t.try_get(&two), Err(TreeError::Garbage(two.slot())));
        assert_eq!(t.try_next(&two), Err(TreeError::Garbage(two.slot())));
        assert_eq!(t.try_erase(&two), Err(TreeError::Garbage(two.slot())));
    }

    #[test]
    #[should_panic(expected = "has been erased")]
    fn test_deref_garbage_panics() {
        let mut t: CowTree<i32> = (0..4).collect();
        let two = t.find(&2);
        t.erase(&two);
        let _ = t[&two];
    }

    #[test]
    #[should_panic(expected = "past the end")]
    fn test_next_of_end_panics() {
        let t: CowTree<i32> = (0..4).collect();
        t.next(&t.end());
    }

    #[test]
    fn test_strict_handles_force_copy() {
        init();
        let config = TreeConfig::default().with_strict_handles(true);
        let mut t: CowTree<i32> = CowTree::with_config(config);
        for v in 0..8 {
            t.insert_unique(v);
        }
        assert!(t.is_unique());

        let three = t.find(&3);
        assert!(!t.is_unique());
        let next = t.erase(&three);
        assert_eq!(t[&next], 4);
        assert!(!three.is_attached());

        let four = t.find(&4);
        t.insert_unique(100);
        assert_eq!(t.get(&four), None);
        let four = t.revalidate(&four).unwrap();
        assert_eq!(t[&four], 4);
    }

    #[test]
    fn test_allocator_reuse_through_container() {
        let mut t: CowTree<i32> = CowTree::with_capacity(8);
        for v in 0..8 {
            t.insert_unique(v);
        }
        let k1 = t.find(&3);
        let slot = k1.slot();
        t.erase(&k1);
        let (k2, _) = t.insert_unique(42);
        assert_eq!(k2.slot(), slot);
        assert_eq!(t.capacity(), 8);
        assert_eq!(t.bucket_count(), 1);
    }

    #[test]
    fn test_ensure_capacity() {
        let mut t: CowTree<i32> = CowTree::new();
        t.ensure_capacity(100);
        assert!(t.capacity() >= 100);
        let buckets = t.bucket_count();
        for v in 0..100 {
            t.insert_unique(v);
        }
        assert_eq!(t.bucket_count(), buckets);

        let mut alias = t.clone();
        alias.ensure_capacity(500);
        assert!(alias.capacity() >= 500);
        assert_eq!(alias.bucket_count(), 1);
        assert!(t.capacity() < 500);
    }

    #[test]
    fn test_bounds_and_ranges() {
        let t: CowTree<i32> = [10, 20, 30, 40].into_iter().collect();
        assert_eq!(t.get(&t.lower_bound(&25)), Some(&30));
        assert_eq!(t.get(&t.upper_bound(&30)), Some(&40));
        assert!(t.upper_bound(&40).is_end());
        let (lo, hi) = t.equal_range(&20);
        assert_eq!(t.distance(&lo, &hi), 1);

        let from = t.find(&20);
        let to = t.end();
        let got: Vec<_> = t.range(&from, &to).copied().collect();
        assert_eq!(got, vec![20, 30, 40]);
        assert_eq!(t.range(&from, &to).rev().next(), Some(&40));
    }

    #[test]
    fn test_offset_is_checked() {
        let t: CowTree<i32> = (0..5).collect();
        let b = t.begin();
        assert_eq!(t[&t.offset(&b, 4)], 4);
        assert!(t.offset(&b, 5).is_end());
        assert_eq!(t.try_offset(&b, 6), Err(TreeError::PastEnd));
        assert_eq!(t.try_offset(&b, -1), Err(TreeError::BeforeBegin));
        assert_eq!(t[&t.offset(&t.end(), -2)], 3);
    }

    #[test]
    fn test_erase_range() {
        let mut t: CowTree<i32> = (0..10).collect();
        let from = t.find(&2);
        let to = t.find(&6);
        let at = t.erase_range(&from, &to);
        assert_eq!(t[&at], 6);
        assert_eq!(items(&t), vec![0, 1, 6, 7, 8, 9]);

        let from = t.find(&8);
        let to = t.find(&1);
        assert_eq!(t.try_erase_range(&from, &to), Err(TreeError::PastEnd));
        assert_eq!(t.len(), 6);
    }

    #[test]
    fn test_remove_all() {
        let mut t: CowTree<i32> = CowTree::new();
        for v in [1, 2, 2, 2, 3] {
            t.insert_multi(v);
        }
        assert_eq!(t.remove_all(&2), 3);
        assert_eq!(t.remove_all(&2), 0);
        assert_eq!(items(&t), vec![1, 3]);
    }

    #[test]
    fn test_map_style_replace() {
        let mut m: CowTree<(&str, i32), ByKey> = CowTree::new();
        m.insert_unique(("a", 1));
        m.insert_unique(("b", 2));
        let (b, inserted) = m.insert_unique(("b", 20));
        assert!(!inserted);
        assert_eq!(m.replace(&b, ("b", 20)), ("b", 2));
        assert_eq!(m.get(&m.find_by(|e| e.0.cmp(&"b"))), Some(&("b", 20)));
        assert_eq!(
            m.try_replace(&b, ("c", 3)),
            Err(TreeError::OrderChanged(b.slot()))
        );
    }

    #[test]
    fn test_from_sorted_unique() {
        let t: CowTree<i32> = CowTree::from_sorted_unique(0..50);
        assert_eq!(t.len(), 50);
        assert_eq!(t.bucket_count(), 1);
        t.validate_strict().unwrap();

        let err = CowTree::<i32>::try_from_sorted_unique([1, 2, 2, 3]).unwrap_err();
        assert_eq!(err, TreeError::NotStrictlySorted { position: 2 });
    }

    #[test]
    fn test_clear_shared() {
        let mut a: CowTree<i32> = (0..10).collect();
        let b = a.clone();
        a.clear();
        assert!(a.is_empty());
        assert_eq!(b.len(), 10);

        let mut c = b.clone();
        drop(b);
        c.clear();
        assert!(c.is_empty());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_indices_and_debug() {
        let t: CowTree<i32> = [3, 1, 2].into_iter().collect();
        let handles: Vec<Index> = t.indices().collect();
        let values: Vec<i32> = handles.iter().map(|i| t[i]).collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(format!("{t:?}"), "{1, 2, 3}");
        assert_eq!(t.first(), Some(&1));
        assert_eq!(t.last(), Some(&3));
    }
}
