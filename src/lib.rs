//! # cow-rbtree
//!
//! A copy-on-write red-black tree engine for ordered set and map containers.
//!
//! Nodes live in a bucketed arena and are addressed by 32-bit slot ids
//! instead of pointers. Container values share one buffer until a write
//! happens through a value that does not own it exclusively; the write copies
//! the buffer into a single bucket, keeping every slot id, so handles taken
//! before the copy can be re-issued against it.
//!
//! ## Example
//!
//! ```rust
//! use cow_rbtree::CowTree;
//!
//! let mut a: CowTree<u32> = [5, 1, 3].into_iter().collect();
//! let b = a.clone();
//!
//! let three = a.find(&3);
//! a.erase(&three);
//!
//! assert_eq!(a.iter().copied().collect::<Vec<_>>(), vec![1, 5]);
//! assert_eq!(b.iter().copied().collect::<Vec<_>>(), vec![1, 3, 5]);
//! ```
//!
//! ## Layers
//!
//! - [`RawTree`]: red-black algorithms over slot ids with probe closures.
//! - [`CowTree`]: the shared buffer, comparator, and checked handle API.
//! - [`Index`]: a handle that knows which buffer issued it and can detect
//!   that its element was erased.

#![deny(unsafe_op_in_unsafe_fn)]

mod buffer;
mod compare;
mod config;
mod error;
mod index;
mod store;
mod tree;

pub use buffer::CowTree;
pub use compare::{ByKey, Comparator, FnComparator, Natural};
pub use config::{GrowthPolicy, TreeConfig};
pub use error::{InvariantViolation, TreeError};
pub use index::{Index, Indices, Iter, Slots};
pub use store::SlotId;
pub use tree::{Probe, RawTree, Side};

#[cfg(test)]
mod proptests;
