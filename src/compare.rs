use std::cmp::Ordering;

/// Total order over tree payloads.
pub trait Comparator<T: ?Sized> {
    fn compare(&self, a: &T, b: &T) -> Ordering;
}

/// Orders payloads by their [`Ord`] implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Natural;

impl<T: Ord + ?Sized> Comparator<T> for Natural {
    #[inline]
    fn compare(&self, a: &T, b: &T) -> Ordering {
        a.cmp(b)
    }
}

/// Orders `(key, value)` payloads by key alone, for map-style containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByKey<C = Natural>(pub C);

impl<K, V, C: Comparator<K>> Comparator<(K, V)> for ByKey<C> {
    #[inline]
    fn compare(&self, a: &(K, V), b: &(K, V)) -> Ordering {
        self.0.compare(&a.0, &b.0)
    }
}

/// Adapts a closure into a [`Comparator`].
#[derive(Clone, Copy)]
pub struct FnComparator<F>(pub F);

impl<T: ?Sized, F: Fn(&T, &T) -> Ordering> Comparator<T> for FnComparator<F> {
    #[inline]
    fn compare(&self, a: &T, b: &T) -> Ordering {
        (self.0)(a, b)
    }
}

impl<F> std::fmt::Debug for FnComparator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnComparator")
    }
}
