//! # B+Tree Index
//!
//! A disk-resident B+tree mapping fixed-width keys to RIDs through the
//! buffer pool. Unique keys, point insert/delete/lookup, and forward
//! range iteration over the linked leaf chain.
//!
//! ## Node Types
//!
//! - **Leaf pages** hold the entries: parallel key and RID arrays plus a
//!   forward sibling pointer. Splitting copies the new leaf's first key
//!   upward as the separator; leaves keep every key they store.
//!
//! - **Internal pages** hold routing state only: `size` child pointers
//!   and `size - 1` separators, key slot 0 unused. Splitting moves the
//!   middle separator upward; internal keys are never duplicated.
//!
//! ## Page Layout
//!
//! Every node page opens with a 6-byte header (`kind`, `size`,
//! `max_size`); leaves extend it with `next_leaf`. The arrays that
//! follow are sized by the fan-out fixed at `open` time, so slot
//! offsets are pure arithmetic and edits are `copy_within` shifts. The
//! tree's only global state is a dedicated header page holding the root
//! id.
//!
//! ## Concurrency
//!
//! Readers couple latches down the tree and hold at most two pages.
//! Mutators hold the header and full ancestor stack for the duration of
//! the operation, so structural changes are atomic with respect to any
//! reader. See `tree` for the full protocol.

mod internal;
mod iterator;
mod leaf;
mod page;
mod printer;
mod tree;

pub use internal::{InternalNode, InternalNodeMut};
pub use iterator::IndexIterator;
pub use leaf::{LeafNode, LeafNodeMut, SearchResult};
pub use page::{node_kind, LeafHeader, NodeHeader, NodeKind, TreeHeaderPage};
pub use tree::BPlusTree;
