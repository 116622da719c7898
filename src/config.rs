//! Tunables for node allocation and copy-on-write behaviour.

/// How the fresh pool sizes a new bucket once the current ones are full.
///
/// Small trees grow linearly so trivial containers do not reserve memory they
/// will never touch; past `linear_limit` slots each new bucket doubles the
/// total capacity, keeping growth amortized O(1) per insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthPolicy {
    /// Capacity below which buckets grow by `linear_step` slots.
    pub linear_limit: usize,
    /// Slots added per bucket while the tree is small.
    pub linear_step: usize,
}

impl GrowthPolicy {
    pub const DEFAULT_LINEAR_LIMIT: usize = 64;
    pub const DEFAULT_LINEAR_STEP: usize = 8;

    /// Total element capacity after growing from `current` so that at least
    /// `required` slots exist.
    pub fn next_capacity(&self, current: usize, required: usize) -> usize {
        let grown = if current < self.linear_limit {
            current + self.linear_step.max(1)
        } else {
            current.saturating_mul(2)
        };
        grown.max(required)
    }
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            linear_limit: Self::DEFAULT_LINEAR_LIMIT,
            linear_step: Self::DEFAULT_LINEAR_STEP,
        }
    }
}

/// Configuration for a [`CowTree`](crate::CowTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeConfig {
    /// Element slots reserved up front, in a single bucket.
    pub initial_capacity: usize,
    /// Bucket sizing for in-place growth.
    pub growth: GrowthPolicy,
    /// When set, outstanding [`Index`](crate::Index) handles pin the buffer:
    /// any write while a handle is alive copies the buffer first, and the
    /// handles must be revalidated against the new one.
    pub strict_handles: bool,
}

impl TreeConfig {
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn with_growth(mut self, growth: GrowthPolicy) -> Self {
        self.growth = growth;
        self
    }

    pub fn with_strict_handles(mut self, strict: bool) -> Self {
        self.strict_handles = strict;
        self
    }
}
