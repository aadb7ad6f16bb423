//! # B+Tree Engines
//!
//! The tree maps fixed-width keys to RIDs. All entries live in leaf
//! pages; internal pages carry routing separators only; leaves are
//! linked left to right for range scans. One header page holds the root
//! id and nothing else, so swapping the root is a single-page edit.
//!
//! ## Latch Protocol
//!
//! Lookups couple read latches: the parent guard is released as soon as
//! the child guard is held, so a reader pins at most two pages. Mutators
//! are pessimistic: they write-latch the header and every node on the
//! descent and keep the whole stack until the leaf edit and any cascade
//! complete. Readers therefore observe either the full pre- or full
//! post-state of a split or merge, never an intermediate shape.
//!
//! ## Insert
//!
//! ```text
//! 1. Write-latch header, read root id (empty tree: create a root leaf)
//! 2. Descend, pushing each internal guard and the slot taken
//! 3. Duplicate in the leaf: release everything, report false
//! 4. Room in the leaf: shift-insert, done
//! 5. Full leaf: split around the middle (leaning away from the side
//!    the incoming entry joins), thread the leaf chain, copy the new
//!    leaf's first key upward as the separator
//! 6. Propagate (separator, right page) upward; a full internal splits
//!    around its median with the promoted key MOVED up and its child
//!    becoming the right sibling's child[0]
//! 7. Past the old root: allocate a new two-child root, update header
//! ```
//!
//! ## Remove
//!
//! ```text
//! 1. Write-latch descent recording child slots; absent key is a no-op
//! 2. Shift-delete in the leaf; if its minimum changed, rewrite the one
//!    ancestor separator equal to the deleted key
//! 3. Leaf still at least half full: done
//! 4. Under-full: pick the larger sibling (ties prefer left)
//!    - Sibling can spare an entry: borrow it, patch parent separators
//!    - Otherwise merge into the left sibling (or pull the right one
//!      in), delete the parent separator by slot, free the emptied page
//! 5. Walk up while the parent is under-full, borrowing or merging the
//!    same way
//! 6. An internal root left with one child collapses into it; an empty
//!    root leaf resets the header to the invalid page id
//! ```
//!
//! ## Structural Invariants
//!
//! Between public operations: leaves at equal depth, non-root nodes at
//! least half full, keys strictly increasing within nodes and across
//! the leaf chain, every separator equal to the first key of the leaf
//! subtree it routes to. `verify_integrity` walks the tree and checks
//! all of them; the test suites call it after every mutation batch.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;
use tracing::debug;

use super::internal::{InternalNode, InternalNodeMut};
use super::iterator::IndexIterator;
use super::leaf::{LeafNode, LeafNodeMut, SearchResult};
use super::page::{node_kind, NodeKind, TreeHeaderPage};
use crate::storage::{BufferPool, WritePageGuard};
use crate::types::{IndexKey, KeyComparator, PageId, Rid, INVALID_PAGE_ID};

/// Guards held during one mutating descent: the header page plus every
/// ancestor on the path, each paired with the child slot that was
/// followed. Dropping the context releases the stack top-down.
struct Context {
    header: Option<WritePageGuard>,
    root_page_id: PageId,
    ancestors: SmallVec<[(WritePageGuard, usize); 8]>,
}

impl Context {
    fn new() -> Self {
        Self {
            header: None,
            root_page_id: INVALID_PAGE_ID,
            ancestors: SmallVec::new(),
        }
    }

    fn push(&mut self, guard: WritePageGuard, slot: usize) {
        self.ancestors.push((guard, slot));
    }

    fn pop(&mut self) -> Option<(WritePageGuard, usize)> {
        self.ancestors.pop()
    }
}

pub struct BPlusTree<K: IndexKey, C: KeyComparator<K>> {
    name: String,
    bpm: Arc<BufferPool>,
    comparator: C,
    leaf_max_size: u16,
    internal_max_size: u16,
    header_page_id: PageId,
    _key: PhantomData<K>,
}

impl<K: IndexKey, C: KeyComparator<K>> BPlusTree<K, C> {
    /// Opens the tree rooted at `header_page_id`, formatting the header
    /// page if it was newly allocated.
    pub fn open(
        name: impl Into<String>,
        header_page_id: PageId,
        bpm: Arc<BufferPool>,
        comparator: C,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Result<Self> {
        ensure!(leaf_max_size >= 2, "leaf fan-out must be at least 2");
        ensure!(internal_max_size >= 3, "internal fan-out must be at least 3");
        ensure!(
            leaf_max_size as usize <= LeafNode::<K>::capacity(),
            "leaf fan-out {} exceeds page capacity {}",
            leaf_max_size,
            LeafNode::<K>::capacity()
        );
        ensure!(
            internal_max_size as usize <= InternalNode::<K>::capacity(),
            "internal fan-out {} exceeds page capacity {}",
            internal_max_size,
            InternalNode::<K>::capacity()
        );

        {
            let mut guard = bpm.fetch_page_write(header_page_id)?;
            let header = guard.as_view_mut::<TreeHeaderPage>()?;
            if !header.is_initialized() {
                header.initialize();
            }
        }

        Ok(Self {
            name: name.into(),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            header_page_id,
            _key: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn bpm(&self) -> &Arc<BufferPool> {
        &self.bpm
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.root_page_id()? == INVALID_PAGE_ID)
    }

    pub fn root_page_id(&self) -> Result<PageId> {
        let guard = self.bpm.fetch_page_read(self.header_page_id)?;
        Ok(guard.as_view::<TreeHeaderPage>()?.root_page_id())
    }

    /// Point lookup under read-latch coupling.
    pub fn get(&self, key: &K) -> Result<Option<Rid>> {
        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_id = header_guard.as_view::<TreeHeaderPage>()?.root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.bpm.fetch_page_read(root_id)?;
        drop(header_guard);
        loop {
            match node_kind(guard.data())? {
                NodeKind::Leaf => {
                    let leaf = LeafNode::<K>::from_page(guard.data())?;
                    return match leaf.find_key(key, &self.comparator)? {
                        SearchResult::Found(slot) => Ok(Some(leaf.rid_at(slot)?)),
                        SearchResult::NotFound(_) => Ok(None),
                    };
                }
                NodeKind::Internal => {
                    let child_id = {
                        let node = InternalNode::<K>::from_page(guard.data())?;
                        node.child_at(node.find_child_slot(key, &self.comparator)?)?
                    };
                    let child = self.bpm.fetch_page_read(child_id)?;
                    guard = child; // parent released only after the child is held
                }
            }
        }
    }

    /// Inserts a unique entry. Returns `false` and leaves the tree
    /// untouched when the key is already present.
    pub fn insert(&self, key: &K, rid: Rid) -> Result<bool> {
        let mut ctx = Context::new();
        let mut header_guard = self.bpm.fetch_page_write(self.header_page_id)?;
        let root_id = header_guard.as_view::<TreeHeaderPage>()?.root_page_id();

        if root_id == INVALID_PAGE_ID {
            let mut root_guard = self.bpm.new_page()?;
            let root_id = root_guard.page_id();
            let mut leaf = LeafNodeMut::<K>::init(root_guard.data_mut(), self.leaf_max_size)?;
            leaf.append(key, rid)?;
            header_guard
                .as_view_mut::<TreeHeaderPage>()?
                .set_root_page_id(root_id);
            return Ok(true);
        }

        ctx.root_page_id = root_id;
        ctx.header = Some(header_guard);

        let mut guard = self.bpm.fetch_page_write(root_id)?;
        loop {
            if node_kind(guard.data())? == NodeKind::Leaf {
                break;
            }
            let (child_id, slot) = {
                let node = InternalNode::<K>::from_page(guard.data())?;
                let slot = node.find_child_slot(key, &self.comparator)?;
                (node.child_at(slot)?, slot)
            };
            let child = self.bpm.fetch_page_write(child_id)?;
            ctx.push(guard, slot);
            guard = child;
        }
        let mut leaf_guard = guard;

        let (insert_pos, size, max) = {
            let leaf = LeafNode::<K>::from_page(leaf_guard.data())?;
            match leaf.find_key(key, &self.comparator)? {
                SearchResult::Found(_) => return Ok(false),
                SearchResult::NotFound(pos) => (pos, leaf.size(), leaf.max_size()),
            }
        };

        if size < max {
            let mut leaf = LeafNodeMut::<K>::from_page(leaf_guard.data_mut())?;
            leaf.insert_at(insert_pos, key, rid)?;
            return Ok(true);
        }

        // Leaf split: the upper half moves and the separator is copied
        // from the right leaf's first key. The split point leans toward
        // whichever side the incoming entry does NOT join, so both
        // halves end at least half full for odd fan-outs too.
        let m = size;
        let hi = (m + 1) / 2;
        let mid = if insert_pos >= hi { hi } else { m / 2 };
        let mut new_guard = self.bpm.new_page()?;
        let new_leaf_id = new_guard.page_id();
        let sep_key;
        {
            let mut old = LeafNodeMut::<K>::from_page(leaf_guard.data_mut())?;
            let mut new = LeafNodeMut::<K>::init(new_guard.data_mut(), self.leaf_max_size)?;
            for i in mid..m {
                new.append(&old.key_at(i)?, old.rid_at(i)?)?;
            }
            old.set_size(mid);
            new.set_next_leaf(old.next_leaf());
            old.set_next_leaf(new_leaf_id);

            if insert_pos >= mid {
                new.insert_at(insert_pos - mid, key, rid)?;
            } else {
                old.insert_at(insert_pos, key, rid)?;
            }
            sep_key = new.key_at(0)?;
        }
        drop(new_guard);
        drop(leaf_guard);

        self.propagate_split(&mut ctx, sep_key, new_leaf_id)?;
        Ok(true)
    }

    /// Inserts `(sep_key, right_id)` into the ancestor stack, splitting
    /// full internals, and grows a new root when the cascade passes the
    /// old one.
    fn propagate_split(&self, ctx: &mut Context, sep_key: K, right_id: PageId) -> Result<()> {
        let mut sep_key = sep_key;
        let mut right_id = right_id;

        loop {
            let Some((mut node_guard, _slot)) = ctx.pop() else {
                // The old root itself split.
                let mut root_guard = self.bpm.new_page()?;
                let new_root_id = root_guard.page_id();
                {
                    let mut root =
                        InternalNodeMut::<K>::init(root_guard.data_mut(), self.internal_max_size)?;
                    root.set_size(2);
                    root.set_child_at(0, ctx.root_page_id)?;
                    root.set_key_at(1, &sep_key)?;
                    root.set_child_at(1, right_id)?;
                }
                self.set_root(ctx, new_root_id)?;
                debug!(index = %self.name, new_root = new_root_id, "root split");
                return Ok(());
            };

            let (size, max) = {
                let node = InternalNode::<K>::from_page(node_guard.data())?;
                (node.size(), node.max_size())
            };

            if size < max {
                let mut node = InternalNodeMut::<K>::from_page(node_guard.data_mut())?;
                node.insert_pair(&sep_key, right_id, &self.comparator)?;
                return Ok(());
            }

            // Internal split: the median of the m + 1 children (the
            // incoming pair included) moves up, never copied. The split
            // point leans toward whichever side the incoming pair does
            // NOT join, so both halves end at least half full; when the
            // incoming key itself is the median it is promoted directly.
            let m = size;
            let hi = (m + 1) / 2;
            let lo = m / 2;
            let mut new_guard = self.bpm.new_page()?;
            let new_internal_id = new_guard.page_id();
            let promoted;
            {
                use std::cmp::Ordering::Less;

                let mut left = InternalNodeMut::<K>::from_page(node_guard.data_mut())?;
                let mut right =
                    InternalNodeMut::<K>::init(new_guard.data_mut(), self.internal_max_size)?;
                let key_hi = left.key_at(hi)?;
                if self.comparator.compare(&sep_key, &key_hi) != Less {
                    promoted = key_hi;
                    right.set_size(1);
                    right.set_child_at(0, left.child_at(hi)?)?;
                    for i in (hi + 1)..m {
                        right.append_pair(&left.key_at(i)?, left.child_at(i)?)?;
                    }
                    left.set_size(hi);
                    right.insert_pair(&sep_key, right_id, &self.comparator)?;
                } else {
                    let key_lo = left.key_at(lo)?;
                    if self.comparator.compare(&sep_key, &key_lo) == Less {
                        promoted = key_lo;
                        right.set_size(1);
                        right.set_child_at(0, left.child_at(lo)?)?;
                        for i in (lo + 1)..m {
                            right.append_pair(&left.key_at(i)?, left.child_at(i)?)?;
                        }
                        left.set_size(lo);
                        left.insert_pair(&sep_key, right_id, &self.comparator)?;
                    } else {
                        promoted = sep_key;
                        right.set_size(1);
                        right.set_child_at(0, right_id)?;
                        for i in (lo + 1)..m {
                            right.append_pair(&left.key_at(i)?, left.child_at(i)?)?;
                        }
                        left.set_size(lo + 1);
                    }
                }
            }
            sep_key = promoted;
            right_id = new_internal_id;
        }
    }

    /// Deletes `key` if present; absent keys are tolerated silently.
    pub fn remove(&self, key: &K) -> Result<()> {
        let mut ctx = Context::new();
        let header_guard = self.bpm.fetch_page_write(self.header_page_id)?;
        let root_id = header_guard.as_view::<TreeHeaderPage>()?.root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }
        ctx.root_page_id = root_id;
        ctx.header = Some(header_guard);

        let mut guard = self.bpm.fetch_page_write(root_id)?;
        loop {
            if node_kind(guard.data())? == NodeKind::Leaf {
                break;
            }
            let (child_id, slot) = {
                let node = InternalNode::<K>::from_page(guard.data())?;
                let slot = node.find_child_slot(key, &self.comparator)?;
                (node.child_at(slot)?, slot)
            };
            let child = self.bpm.fetch_page_write(child_id)?;
            ctx.push(guard, slot);
            guard = child;
        }
        let mut leaf_guard = guard;

        let (leaf_size, leaf_min, new_min) = {
            let mut leaf = LeafNodeMut::<K>::from_page(leaf_guard.data_mut())?;
            let pos = match leaf.as_ref().find_key(key, &self.comparator)? {
                SearchResult::Found(pos) => pos,
                SearchResult::NotFound(_) => return Ok(()),
            };
            leaf.remove_at(pos)?;
            let new_min = if pos == 0 && leaf.size() > 0 {
                Some(leaf.key_at(0)?)
            } else {
                None
            };
            (leaf.size(), leaf.min_size(), new_min)
        };
        if let Some(min) = &new_min {
            self.rewrite_matching_separators(&mut ctx, key, min)?;
        }

        if leaf_size >= leaf_min {
            return Ok(());
        }

        if ctx.ancestors.is_empty() {
            // The root is a leaf; it may run empty but never rebalances.
            if leaf_size == 0 {
                self.set_root(&mut ctx, INVALID_PAGE_ID)?;
                debug!(index = %self.name, "tree emptied");
                let freed = leaf_guard.page_id();
                drop(leaf_guard);
                self.bpm.delete_page(freed)?;
            }
            return Ok(());
        }

        let (mut parent_guard, p) = ctx.pop().unwrap(); // INVARIANT: ancestors checked non-empty above

        let (left_id, right_id) = {
            let parent = InternalNode::<K>::from_page(parent_guard.data())?;
            (
                if p > 0 {
                    Some(parent.child_at(p - 1)?)
                } else {
                    None
                },
                if p + 1 < parent.size() {
                    Some(parent.child_at(p + 1)?)
                } else {
                    None
                },
            )
        };
        let mut left_guard = match left_id {
            Some(id) => Some(self.bpm.fetch_page_write(id)?),
            None => None,
        };
        let mut right_guard = match right_id {
            Some(id) => Some(self.bpm.fetch_page_write(id)?),
            None => None,
        };
        let left_size = match &left_guard {
            Some(g) => LeafNode::<K>::from_page(g.data())?.size(),
            None => 0,
        };
        let right_size = match &right_guard {
            Some(g) => LeafNode::<K>::from_page(g.data())?.size(),
            None => 0,
        };
        let use_left = match (&left_guard, &right_guard) {
            (Some(_), Some(_)) => left_size >= right_size,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => bail!("under-full leaf without siblings"),
        };
        let donor_size = if use_left { left_size } else { right_size };

        if donor_size - 1 >= leaf_min {
            // Borrow one entry from the richer sibling.
            if use_left {
                let left = left_guard.as_mut().unwrap(); // INVARIANT: chosen donor exists
                {
                    let mut donor = LeafNodeMut::<K>::from_page(left.data_mut())?;
                    let mut node = LeafNodeMut::<K>::from_page(leaf_guard.data_mut())?;
                    let last = donor.size() - 1;
                    let donated_key = donor.key_at(last)?;
                    let donated_rid = donor.rid_at(last)?;
                    node.insert_at(0, &donated_key, donated_rid)?;
                    donor.remove_at(last)?;
                }
                let node_first = LeafNode::<K>::from_page(leaf_guard.data())?.key_at(0)?;
                let mut parent = InternalNodeMut::<K>::from_page(parent_guard.data_mut())?;
                parent.set_key_at(p, &node_first)?;
            } else {
                let right = right_guard.as_mut().unwrap(); // INVARIANT: chosen donor exists
                {
                    let mut donor = LeafNodeMut::<K>::from_page(right.data_mut())?;
                    let mut node = LeafNodeMut::<K>::from_page(leaf_guard.data_mut())?;
                    let donated_key = donor.key_at(0)?;
                    let donated_rid = donor.rid_at(0)?;
                    node.append(&donated_key, donated_rid)?;
                    donor.remove_at(0)?;
                }
                let right_first = LeafNode::<K>::from_page(right.data())?.key_at(0)?;
                let node_first = LeafNode::<K>::from_page(leaf_guard.data())?.key_at(0)?;
                let mut parent = InternalNodeMut::<K>::from_page(parent_guard.data_mut())?;
                parent.set_key_at(p + 1, &right_first)?;
                if p > 0 {
                    parent.set_key_at(p, &node_first)?;
                }
            }
            let node_first = LeafNode::<K>::from_page(leaf_guard.data())?.key_at(0)?;
            self.rewrite_matching_separators(&mut ctx, key, &node_first)?;
            return Ok(());
        }

        // Merge; prefer folding this leaf into its left sibling.
        if p > 0 {
            let left = left_guard.as_mut().unwrap(); // INVARIANT: p > 0
            {
                let mut to = LeafNodeMut::<K>::from_page(left.data_mut())?;
                let from = LeafNode::<K>::from_page(leaf_guard.data())?;
                for i in 0..from.size() {
                    to.append(&from.key_at(i)?, from.rid_at(i)?)?;
                }
                to.set_next_leaf(from.next_leaf());
            }
            {
                let mut parent = InternalNodeMut::<K>::from_page(parent_guard.data_mut())?;
                parent.remove_at(p)?;
            }
            let freed = leaf_guard.page_id();
            drop(leaf_guard);
            drop(left_guard);
            drop(right_guard);
            self.bpm.delete_page(freed)?;
        } else {
            let mut right = right_guard.take().unwrap(); // INVARIANT: leftmost leaf has a right sibling
            {
                let mut to = LeafNodeMut::<K>::from_page(leaf_guard.data_mut())?;
                let from = LeafNode::<K>::from_page(right.data())?;
                for i in 0..from.size() {
                    to.append(&from.key_at(i)?, from.rid_at(i)?)?;
                }
                to.set_next_leaf(from.next_leaf());
            }
            {
                let mut parent = InternalNodeMut::<K>::from_page(parent_guard.data_mut())?;
                parent.remove_at(p + 1)?;
            }
            let freed = right.page_id();
            drop(right);
            self.bpm.delete_page(freed)?;
            let node_first = LeafNode::<K>::from_page(leaf_guard.data())?.key_at(0)?;
            self.rewrite_matching_separators(&mut ctx, key, &node_first)?;
            drop(leaf_guard);
            drop(left_guard);
        }

        self.rebalance_internals(&mut ctx, parent_guard)
    }

    /// Walks upward after a leaf merge, borrowing or merging internal
    /// nodes while the current one is under-full, and collapses the
    /// root when it is left with a single child.
    fn rebalance_internals(&self, ctx: &mut Context, guard: WritePageGuard) -> Result<()> {
        let mut node_guard = guard;

        loop {
            let (size, min_size) = {
                let node = InternalNode::<K>::from_page(node_guard.data())?;
                (node.size(), node.min_size())
            };

            if ctx.ancestors.is_empty() {
                if size == 1 {
                    let new_root = InternalNode::<K>::from_page(node_guard.data())?.child_at(0)?;
                    self.set_root(ctx, new_root)?;
                    debug!(index = %self.name, new_root, "root collapsed");
                    let freed = node_guard.page_id();
                    drop(node_guard);
                    self.bpm.delete_page(freed)?;
                }
                return Ok(());
            }
            if size >= min_size {
                return Ok(());
            }

            let (mut parent_guard, q) = ctx.pop().unwrap(); // INVARIANT: ancestors checked non-empty above

            let (left_id, right_id) = {
                let parent = InternalNode::<K>::from_page(parent_guard.data())?;
                (
                    if q > 0 {
                        Some(parent.child_at(q - 1)?)
                    } else {
                        None
                    },
                    if q + 1 < parent.size() {
                        Some(parent.child_at(q + 1)?)
                    } else {
                        None
                    },
                )
            };
            let mut left_guard = match left_id {
                Some(id) => Some(self.bpm.fetch_page_write(id)?),
                None => None,
            };
            let mut right_guard = match right_id {
                Some(id) => Some(self.bpm.fetch_page_write(id)?),
                None => None,
            };
            let left_size = match &left_guard {
                Some(g) => InternalNode::<K>::from_page(g.data())?.size(),
                None => 0,
            };
            let right_size = match &right_guard {
                Some(g) => InternalNode::<K>::from_page(g.data())?.size(),
                None => 0,
            };
            let use_left = match (&left_guard, &right_guard) {
                (Some(_), Some(_)) => left_size >= right_size,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => bail!("under-full internal node without siblings"),
            };
            let donor_size = if use_left { left_size } else { right_size };

            if donor_size - 1 >= min_size {
                // Borrow one child through the parent separator.
                if use_left {
                    let left = left_guard.as_mut().unwrap(); // INVARIANT: chosen donor exists
                    let (moved_key, moved_child) = {
                        let mut donor = InternalNodeMut::<K>::from_page(left.data_mut())?;
                        let last = donor.size() - 1;
                        let moved = (donor.key_at(last)?, donor.child_at(last)?);
                        donor.set_size(last);
                        moved
                    };
                    {
                        let pulled = InternalNode::<K>::from_page(parent_guard.data())?.key_at(q)?;
                        let mut node = InternalNodeMut::<K>::from_page(node_guard.data_mut())?;
                        node.insert_front(&pulled, moved_child)?;
                    }
                    let mut parent = InternalNodeMut::<K>::from_page(parent_guard.data_mut())?;
                    parent.set_key_at(q, &moved_key)?;
                } else {
                    let right = right_guard.as_mut().unwrap(); // INVARIANT: chosen donor exists
                    {
                        let pulled =
                            InternalNode::<K>::from_page(parent_guard.data())?.key_at(q + 1)?;
                        let first_child = InternalNode::<K>::from_page(right.data())?.child_at(0)?;
                        let mut node = InternalNodeMut::<K>::from_page(node_guard.data_mut())?;
                        node.append_pair(&pulled, first_child)?;
                    }
                    {
                        let next_sep = InternalNode::<K>::from_page(right.data())?.key_at(1)?;
                        let mut parent = InternalNodeMut::<K>::from_page(parent_guard.data_mut())?;
                        parent.set_key_at(q + 1, &next_sep)?;
                    }
                    let mut donor = InternalNodeMut::<K>::from_page(right.data_mut())?;
                    donor.remove_front()?;
                }
                return Ok(());
            }

            // Merge, pulling the parent separator down as the middle key.
            if q > 0 {
                let left = left_guard.as_mut().unwrap(); // INVARIANT: q > 0
                let sep = InternalNode::<K>::from_page(parent_guard.data())?.key_at(q)?;
                {
                    let mut to = InternalNodeMut::<K>::from_page(left.data_mut())?;
                    let from = InternalNode::<K>::from_page(node_guard.data())?;
                    to.append_pair(&sep, from.child_at(0)?)?;
                    for i in 1..from.size() {
                        to.append_pair(&from.key_at(i)?, from.child_at(i)?)?;
                    }
                }
                {
                    let mut parent = InternalNodeMut::<K>::from_page(parent_guard.data_mut())?;
                    parent.remove_at(q)?;
                }
                let freed = node_guard.page_id();
                drop(node_guard);
                drop(left_guard);
                drop(right_guard);
                self.bpm.delete_page(freed)?;
            } else {
                let mut right = right_guard.take().unwrap(); // INVARIANT: leftmost child has a right sibling
                let sep = InternalNode::<K>::from_page(parent_guard.data())?.key_at(1)?;
                {
                    let mut to = InternalNodeMut::<K>::from_page(node_guard.data_mut())?;
                    let from = InternalNode::<K>::from_page(right.data())?;
                    to.append_pair(&sep, from.child_at(0)?)?;
                    for i in 1..from.size() {
                        to.append_pair(&from.key_at(i)?, from.child_at(i)?)?;
                    }
                }
                {
                    let mut parent = InternalNodeMut::<K>::from_page(parent_guard.data_mut())?;
                    parent.remove_at(1)?;
                }
                let freed = right.page_id();
                drop(right);
                drop(node_guard);
                drop(left_guard);
                self.bpm.delete_page(freed)?;
            }

            node_guard = parent_guard;
        }
    }

    /// Rewrites the ancestor separator equal to `deleted` with the
    /// subtree's new minimum. At most one stack entry can match.
    fn rewrite_matching_separators(
        &self,
        ctx: &mut Context,
        deleted: &K,
        replacement: &K,
    ) -> Result<()> {
        for (guard, slot) in ctx.ancestors.iter_mut() {
            if *slot == 0 {
                continue;
            }
            let mut node = InternalNodeMut::<K>::from_page(guard.data_mut())?;
            if self.comparator.compare(&node.key_at(*slot)?, deleted) == std::cmp::Ordering::Equal {
                node.set_key_at(*slot, replacement)?;
            }
        }
        Ok(())
    }

    fn set_root(&self, ctx: &mut Context, page_id: PageId) -> Result<()> {
        let header = ctx.header.as_mut().unwrap(); // INVARIANT: mutators latch the header first
        header
            .as_view_mut::<TreeHeaderPage>()?
            .set_root_page_id(page_id);
        ctx.root_page_id = page_id;
        Ok(())
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator<K>> {
        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_id = header_guard.as_view::<TreeHeaderPage>()?.root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(self.end());
        }

        let mut guard = self.bpm.fetch_page_read(root_id)?;
        drop(header_guard);
        loop {
            match node_kind(guard.data())? {
                NodeKind::Leaf => {
                    return Ok(IndexIterator::new(self.bpm.clone(), guard.page_id(), 0))
                }
                NodeKind::Internal => {
                    let child_id = InternalNode::<K>::from_page(guard.data())?.child_at(0)?;
                    let child = self.bpm.fetch_page_read(child_id)?;
                    guard = child;
                }
            }
        }
    }

    /// Iterator positioned at `key`, or [`end`](Self::end) when the key
    /// is not in the tree.
    pub fn begin_at(&self, key: &K) -> Result<IndexIterator<K>> {
        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_id = header_guard.as_view::<TreeHeaderPage>()?.root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(self.end());
        }

        let mut guard = self.bpm.fetch_page_read(root_id)?;
        drop(header_guard);
        loop {
            match node_kind(guard.data())? {
                NodeKind::Leaf => {
                    let leaf = LeafNode::<K>::from_page(guard.data())?;
                    return match leaf.find_key(key, &self.comparator)? {
                        SearchResult::Found(slot) => {
                            Ok(IndexIterator::new(self.bpm.clone(), guard.page_id(), slot))
                        }
                        SearchResult::NotFound(_) => Ok(self.end()),
                    };
                }
                NodeKind::Internal => {
                    let child_id = {
                        let node = InternalNode::<K>::from_page(guard.data())?;
                        node.child_at(node.find_child_slot(key, &self.comparator)?)?
                    };
                    let child = self.bpm.fetch_page_read(child_id)?;
                    guard = child;
                }
            }
        }
    }

    pub fn end(&self) -> IndexIterator<K> {
        IndexIterator::new(self.bpm.clone(), INVALID_PAGE_ID, 0)
    }

    /// Test utility: inserts whitespace-separated integers from a file,
    /// keyed through `set_from_integer` with `Rid::from_integer` values.
    pub fn insert_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        for token in contents.split_whitespace() {
            let value: i64 = token.parse()?;
            let mut key = K::default();
            key.set_from_integer(value);
            self.insert(&key, Rid::from_integer(value))?;
        }
        Ok(())
    }

    /// Test utility: removes whitespace-separated integer keys from a
    /// file.
    pub fn remove_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        for token in contents.split_whitespace() {
            let value: i64 = token.parse()?;
            let mut key = K::default();
            key.set_from_integer(value);
            self.remove(&key)?;
        }
        Ok(())
    }

    /// Exhaustively validates the structural invariants. Intended for
    /// tests and debugging; fails with a description of the first
    /// violation found.
    pub fn verify_integrity(&self) -> Result<()> {
        let root_id = self.root_page_id()?;
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut leaf_depth = None;
        let mut leaves = Vec::new();
        self.check_subtree(root_id, 0, None, None, true, &mut leaf_depth, &mut leaves)?;

        // The chain must visit exactly the leaves the tree reaches, in
        // order, and terminate.
        let mut chain = Vec::new();
        let mut page_id = leaves[0];
        while page_id != INVALID_PAGE_ID {
            chain.push(page_id);
            ensure!(chain.len() <= leaves.len(), "leaf chain cycle or stray leaf");
            let guard = self.bpm.fetch_page_read(page_id)?;
            page_id = LeafNode::<K>::from_page(guard.data())?.next_leaf();
        }
        ensure!(chain == leaves, "leaf chain does not match tree order");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_subtree(
        &self,
        page_id: PageId,
        depth: usize,
        lower: Option<K>,
        upper: Option<K>,
        is_root: bool,
        leaf_depth: &mut Option<usize>,
        leaves: &mut Vec<PageId>,
    ) -> Result<K> {
        use std::cmp::Ordering::*;

        let guard = self.bpm.fetch_page_read(page_id)?;
        match node_kind(guard.data())? {
            NodeKind::Leaf => {
                let leaf = LeafNode::<K>::from_page(guard.data())?;
                let size = leaf.size();
                ensure!(size >= 1, "empty leaf {} is reachable", page_id);
                ensure!(
                    size <= leaf.max_size(),
                    "leaf {} overflows: size {}",
                    page_id,
                    size
                );
                if !is_root {
                    ensure!(
                        size >= leaf.min_size(),
                        "leaf {} under-full: size {}",
                        page_id,
                        size
                    );
                }
                for i in 0..size {
                    let k = leaf.key_at(i)?;
                    if i > 0 {
                        ensure!(
                            self.comparator.compare(&leaf.key_at(i - 1)?, &k) == Less,
                            "leaf {} keys out of order at slot {}",
                            page_id,
                            i
                        );
                    }
                    if let Some(lo) = &lower {
                        ensure!(
                            self.comparator.compare(lo, &k) != Greater,
                            "leaf {} key below its separator bound",
                            page_id
                        );
                    }
                    if let Some(hi) = &upper {
                        ensure!(
                            self.comparator.compare(&k, hi) == Less,
                            "leaf {} key above its separator bound",
                            page_id
                        );
                    }
                }
                match leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(d) => ensure!(*d == depth, "leaf {} at uneven depth", page_id),
                }
                leaves.push(page_id);
                leaf.key_at(0)
            }
            NodeKind::Internal => {
                let node = InternalNode::<K>::from_page(guard.data())?;
                let size = node.size();
                if is_root {
                    ensure!(size >= 2, "internal root {} with a single child", page_id);
                } else {
                    ensure!(
                        size >= node.min_size(),
                        "internal {} under-full: size {}",
                        page_id,
                        size
                    );
                }
                ensure!(
                    size <= node.max_size(),
                    "internal {} overflows: size {}",
                    page_id,
                    size
                );
                for i in 1..size {
                    let k = node.key_at(i)?;
                    if i > 1 {
                        ensure!(
                            self.comparator.compare(&node.key_at(i - 1)?, &k) == Less,
                            "internal {} separators out of order at slot {}",
                            page_id,
                            i
                        );
                    }
                    if let Some(lo) = &lower {
                        ensure!(
                            self.comparator.compare(lo, &k) != Greater,
                            "internal {} separator below its bound",
                            page_id
                        );
                    }
                    if let Some(hi) = &upper {
                        ensure!(
                            self.comparator.compare(&k, hi) == Less,
                            "internal {} separator above its bound",
                            page_id
                        );
                    }
                }

                let mut subtree_min = None;
                for i in 0..size {
                    let lo = if i == 0 { lower } else { Some(node.key_at(i)?) };
                    let hi = if i + 1 < size {
                        Some(node.key_at(i + 1)?)
                    } else {
                        upper
                    };
                    let child_min = self.check_subtree(
                        node.child_at(i)?,
                        depth + 1,
                        lo,
                        hi,
                        false,
                        leaf_depth,
                        leaves,
                    )?;
                    if i >= 1 {
                        ensure!(
                            self.comparator.compare(&child_min, &node.key_at(i)?) == Equal,
                            "internal {} separator {} does not equal its subtree minimum",
                            page_id,
                            i
                        );
                    }
                    if i == 0 {
                        subtree_min = Some(child_min);
                    }
                }
                Ok(subtree_min.unwrap()) // INVARIANT: size >= 1 was checked
            }
        }
    }
}
