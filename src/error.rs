use thiserror::Error;

use crate::store::SlotId;

/// Caller errors reported by the checked (`try_*`) API.
///
/// The unchecked API panics with the same message: these are logic errors at
/// the call site, never conditions the tree can recover from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("slot {0} has been erased")]
    Garbage(SlotId),

    #[error("handle to slot {0} is not attached to this buffer")]
    Detached(SlotId),

    #[error("the end sentinel holds no element")]
    EndSentinel,

    #[error("cannot advance past the end sentinel")]
    PastEnd,

    #[error("cannot step before the first element")]
    BeforeBegin,

    #[error("replacement for slot {0} does not order equal to the element it replaces")]
    OrderChanged(SlotId),

    #[error("sorted input is not strictly increasing at position {position}")]
    NotStrictlySorted { position: usize },

    #[error("node store cannot address more than {max} slots")]
    CapacityOverflow { max: usize },
}

/// A broken structural invariant found by the debug validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("end sentinel must be black with no parent or right link")]
    Sentinel,

    #[error("root {0} must be black")]
    RedRoot(SlotId),

    #[error("slot {child} does not point back to its parent {parent}")]
    ParentLink { parent: SlotId, child: SlotId },

    #[error("red node {0} has a red child")]
    RedRed(SlotId),

    #[error("black height differs below {node}: {left} on the left, {right} on the right")]
    BlackHeight {
        node: SlotId,
        left: usize,
        right: usize,
    },

    #[error("slot {0} is reachable from the root but holds no element")]
    GarbageInTree(SlotId),

    #[error("elements at {prev} and {next} are out of order")]
    Order { prev: SlotId, next: SlotId },

    #[error("cached begin {cached} differs from leftmost node {actual}")]
    Begin { cached: SlotId, actual: SlotId },

    #[error("tree holds {actual} elements but the header counts {cached}")]
    Count { cached: usize, actual: usize },

    #[error("recycle list is corrupt at slot {0}")]
    FreeList(SlotId),
}
