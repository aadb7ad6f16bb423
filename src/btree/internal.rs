//! # Internal Page Views
//!
//! Internal pages route descents: `size` child pointers and `size - 1`
//! separator keys in two parallel arrays. Key slot 0 is a sentinel and
//! never read; `child[i]` subtends keys in `[K[i], K[i+1])`, with `K[0]`
//! standing for negative infinity and `K[size]` for positive infinity.
//!
//! ## Page Layout
//!
//! ```text
//! +------------------------------+
//! | NodeHeader (6 bytes)         |  kind, size, max_size
//! +------------------------------+
//! | K[0] .. K[max_size-1]        |  K[0] unused
//! +------------------------------+
//! | child[0] .. child[max_size-1]|  page ids
//! +------------------------------+
//! ```
//!
//! `size` counts child pointers, so a full node has `max_size` children
//! and `max_size - 1` live keys. The occupancy floor is half the child
//! pointers, rounded up.

use std::marker::PhantomData;
use std::mem::size_of;

use eyre::{ensure, Result};
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{FromBytes, IntoBytes};

use super::page::{NodeHeader, NodeKind, NODE_HEADER_SIZE};
use crate::config::PAGE_SIZE;
use crate::types::{IndexKey, KeyComparator, PageId};

const CHILD_SIZE: usize = size_of::<U32<LittleEndian>>();

pub struct InternalNode<'a, K> {
    data: &'a [u8],
    _key: PhantomData<K>,
}

pub struct InternalNodeMut<'a, K> {
    data: &'a mut [u8],
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalNode<'a, K> {
    /// Child pointers this page geometry can hold.
    pub fn capacity() -> usize {
        (PAGE_SIZE - NODE_HEADER_SIZE) / (size_of::<K>() + CHILD_SIZE)
    }

    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        let header = header(data)?;
        ensure!(
            header.kind()? == NodeKind::Internal,
            "expected an internal page"
        );
        Ok(Self {
            data,
            _key: PhantomData,
        })
    }

    pub fn size(&self) -> usize {
        header(self.data).unwrap().size() // INVARIANT: validated in from_page
    }

    pub fn max_size(&self) -> usize {
        header(self.data).unwrap().max_size() // INVARIANT: validated in from_page
    }

    pub fn min_size(&self) -> usize {
        header(self.data).unwrap().min_size() // INVARIANT: validated in from_page
    }

    pub fn key_at(&self, index: usize) -> Result<K> {
        ensure!(
            index >= 1 && index < self.size(),
            "internal key index {} out of bounds (size={})",
            index,
            self.size()
        );
        let off = key_offset::<K>(index);
        Ok(K::read_from_bytes(&self.data[off..off + size_of::<K>()])
            .unwrap()) // INVARIANT: slice length equals the key width
    }

    pub fn child_at(&self, index: usize) -> Result<PageId> {
        ensure!(
            index < self.size(),
            "internal child index {} out of bounds (size={})",
            index,
            self.size()
        );
        let off = child_offset::<K>(self.max_size(), index);
        let child = U32::<LittleEndian>::read_from_bytes(&self.data[off..off + CHILD_SIZE])
            .unwrap(); // INVARIANT: slice length equals the pointer width
        Ok(child.get())
    }

    /// Descent rule: follow `child[i-1]` for the smallest `i >= 1` with
    /// `key < K[i]`, or the last child when no such key exists.
    pub fn find_child_slot<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> Result<usize> {
        for i in 1..self.size() {
            if cmp.compare(key, &self.key_at(i)?) == std::cmp::Ordering::Less {
                return Ok(i - 1);
            }
        }
        Ok(self.size() - 1)
    }
}

impl<'a, K: IndexKey> InternalNodeMut<'a, K> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        let header = header(data)?;
        ensure!(
            header.kind()? == NodeKind::Internal,
            "expected an internal page"
        );
        Ok(Self {
            data,
            _key: PhantomData,
        })
    }

    /// Formats an empty internal node in place.
    pub fn init(data: &'a mut [u8], max_size: u16) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        ensure!(
            max_size as usize <= InternalNode::<K>::capacity(),
            "internal max_size {} exceeds page capacity {}",
            max_size,
            InternalNode::<K>::capacity()
        );

        let header = header_mut(data)?;
        header.set_kind(NodeKind::Internal);
        header.set_size(0);
        header.set_max_size(max_size);

        Ok(Self {
            data,
            _key: PhantomData,
        })
    }

    pub fn as_ref(&self) -> InternalNode<'_, K> {
        InternalNode {
            data: self.data,
            _key: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        self.as_ref().size()
    }

    pub fn max_size(&self) -> usize {
        self.as_ref().max_size()
    }

    pub fn min_size(&self) -> usize {
        self.as_ref().min_size()
    }

    pub fn key_at(&self, index: usize) -> Result<K> {
        self.as_ref().key_at(index)
    }

    pub fn child_at(&self, index: usize) -> Result<PageId> {
        self.as_ref().child_at(index)
    }

    pub fn set_size(&mut self, size: usize) {
        debug_assert!(size <= self.max_size());
        header_mut(self.data).unwrap().set_size(size); // INVARIANT: validated in from_page/init
    }

    /// Writes a key slot directly. Bounds against the fan-out, not the
    /// live size, so split and init paths can stage slots.
    pub fn set_key_at(&mut self, index: usize, key: &K) -> Result<()> {
        ensure!(
            index >= 1 && index < self.max_size(),
            "internal key slot {} out of range (max_size={})",
            index,
            self.max_size()
        );
        let off = key_offset::<K>(index);
        self.data[off..off + size_of::<K>()].copy_from_slice(key.as_bytes());
        Ok(())
    }

    /// Writes a child slot directly, bounded by the fan-out.
    pub fn set_child_at(&mut self, index: usize, child: PageId) -> Result<()> {
        ensure!(
            index < self.max_size(),
            "internal child slot {} out of range (max_size={})",
            index,
            self.max_size()
        );
        let max = self.max_size();
        let off = child_offset::<K>(max, index);
        self.data[off..off + CHILD_SIZE].copy_from_slice(U32::<LittleEndian>::new(child).as_bytes());
        Ok(())
    }

    /// Shift-inserts a separator and its right child at the slot that
    /// keeps keys ordered.
    pub fn insert_pair<C: KeyComparator<K>>(
        &mut self,
        key: &K,
        right_child: PageId,
        cmp: &C,
    ) -> Result<()> {
        let size = self.size();
        ensure!(
            size < self.max_size(),
            "insert into a full internal node (size={})",
            size
        );
        ensure!(size >= 1, "insert into an uninitialized internal node");

        let mut slot = size;
        for i in 1..size {
            if cmp.compare(key, &self.key_at(i)?) == std::cmp::Ordering::Less {
                slot = i;
                break;
            }
        }

        let max = self.max_size();
        let ks = size_of::<K>();
        self.data.copy_within(
            key_offset::<K>(slot)..key_offset::<K>(size),
            key_offset::<K>(slot) + ks,
        );
        self.data.copy_within(
            child_offset::<K>(max, slot)..child_offset::<K>(max, size),
            child_offset::<K>(max, slot) + CHILD_SIZE,
        );
        self.set_size(size + 1);
        self.set_key_at(slot, key)?;
        self.set_child_at(slot, right_child)?;
        Ok(())
    }

    /// Appends a separator and child past the last slot. The caller
    /// keeps the ordering invariant.
    pub fn append_pair(&mut self, key: &K, child: PageId) -> Result<()> {
        let size = self.size();
        ensure!(
            size < self.max_size(),
            "append into a full internal node (size={})",
            size
        );
        self.set_size(size + 1);
        self.set_key_at(size, key)?;
        self.set_child_at(size, child)?;
        Ok(())
    }

    /// Shift-deletes separator `K[index]` and `child[index]` together.
    pub fn remove_at(&mut self, index: usize) -> Result<()> {
        let size = self.size();
        ensure!(
            index >= 1 && index < size,
            "internal remove index {} out of bounds (size={})",
            index,
            size
        );

        let max = self.max_size();
        let ks = size_of::<K>();
        self.data.copy_within(
            key_offset::<K>(index + 1)..key_offset::<K>(size),
            key_offset::<K>(index + 1) - ks,
        );
        self.data.copy_within(
            child_offset::<K>(max, index + 1)..child_offset::<K>(max, size),
            child_offset::<K>(max, index + 1) - CHILD_SIZE,
        );
        self.set_size(size - 1);
        Ok(())
    }

    /// Prepends a child donated by the left sibling: every slot shifts
    /// right, the donated child becomes `child[0]` and `key` (the
    /// separator pulled down from the parent) becomes `K[1]`.
    pub fn insert_front(&mut self, key: &K, child: PageId) -> Result<()> {
        let size = self.size();
        ensure!(
            size < self.max_size(),
            "insert into a full internal node (size={})",
            size
        );

        let max = self.max_size();
        let ks = size_of::<K>();
        self.data.copy_within(
            key_offset::<K>(1)..key_offset::<K>(size),
            key_offset::<K>(1) + ks,
        );
        self.data.copy_within(
            child_offset::<K>(max, 0)..child_offset::<K>(max, size),
            child_offset::<K>(max, 0) + CHILD_SIZE,
        );
        self.set_size(size + 1);
        self.set_key_at(1, key)?;
        self.set_child_at(0, child)?;
        Ok(())
    }

    /// Drops `child[0]` and `K[1]` after they were donated to the left
    /// neighbor; the remaining slots shift into place.
    pub fn remove_front(&mut self) -> Result<()> {
        let size = self.size();
        ensure!(size >= 2, "remove_front on a node with {} children", size);

        let max = self.max_size();
        let ks = size_of::<K>();
        self.data.copy_within(
            key_offset::<K>(2)..key_offset::<K>(size),
            key_offset::<K>(2) - ks,
        );
        self.data.copy_within(
            child_offset::<K>(max, 1)..child_offset::<K>(max, size),
            child_offset::<K>(max, 1) - CHILD_SIZE,
        );
        self.set_size(size - 1);
        Ok(())
    }
}

fn header(data: &[u8]) -> Result<&NodeHeader> {
    let (header, _rest) = NodeHeader::ref_from_prefix(data)
        .map_err(|_| eyre::eyre!("page too small for a node header"))?;
    Ok(header)
}

fn header_mut(data: &mut [u8]) -> Result<&mut NodeHeader> {
    let (header, _rest) = NodeHeader::mut_from_prefix(data)
        .map_err(|_| eyre::eyre!("page too small for a node header"))?;
    Ok(header)
}

fn key_offset<K>(index: usize) -> usize {
    NODE_HEADER_SIZE + index * size_of::<K>()
}

fn child_offset<K>(max_size: usize, index: usize) -> usize {
    NODE_HEADER_SIZE + max_size * size_of::<K>() + index * CHILD_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GenericComparator, GenericKey};

    type Key = GenericKey<8>;

    fn key(v: i64) -> Key {
        let mut k = Key::default();
        k.set_from_integer(v);
        k
    }

    fn make_page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    /// Children [10, 20, 30] separated by keys [_, 200, 300].
    fn three_children(page: &mut [u8]) {
        let mut node = InternalNodeMut::<Key>::init(page, 4).unwrap();
        node.set_size(1);
        node.set_child_at(0, 10).unwrap();
        node.append_pair(&key(200), 20).unwrap();
        node.append_pair(&key(300), 30).unwrap();
    }

    #[test]
    fn find_child_slot_routes_by_separator() {
        let mut page = make_page();
        three_children(&mut page);
        let node = InternalNode::<Key>::from_page(&page).unwrap();
        let cmp = GenericComparator::<8>;

        assert_eq!(node.find_child_slot(&key(100), &cmp).unwrap(), 0);
        assert_eq!(node.find_child_slot(&key(200), &cmp).unwrap(), 1);
        assert_eq!(node.find_child_slot(&key(250), &cmp).unwrap(), 1);
        assert_eq!(node.find_child_slot(&key(999), &cmp).unwrap(), 2);
    }

    #[test]
    fn insert_pair_keeps_separators_ordered() {
        let mut page = make_page();
        three_children(&mut page);
        let mut node = InternalNodeMut::<Key>::from_page(&mut page).unwrap();
        let cmp = GenericComparator::<8>;

        node.insert_pair(&key(250), 25, &cmp).unwrap();

        assert_eq!(node.size(), 4);
        assert_eq!(node.key_at(1).unwrap().as_i64(), 200);
        assert_eq!(node.key_at(2).unwrap().as_i64(), 250);
        assert_eq!(node.key_at(3).unwrap().as_i64(), 300);
        assert_eq!(node.child_at(2).unwrap(), 25);
        assert_eq!(node.child_at(3).unwrap(), 30);
    }

    #[test]
    fn remove_at_drops_separator_and_child_together() {
        let mut page = make_page();
        three_children(&mut page);
        let mut node = InternalNodeMut::<Key>::from_page(&mut page).unwrap();

        node.remove_at(1).unwrap();

        assert_eq!(node.size(), 2);
        assert_eq!(node.child_at(0).unwrap(), 10);
        assert_eq!(node.child_at(1).unwrap(), 30);
        assert_eq!(node.key_at(1).unwrap().as_i64(), 300);
    }

    #[test]
    fn key_slot_zero_is_unreadable() {
        let mut page = make_page();
        three_children(&mut page);
        let node = InternalNode::<Key>::from_page(&page).unwrap();

        assert!(node.key_at(0).is_err());
    }

    #[test]
    fn insert_front_shifts_everything_right() {
        let mut page = make_page();
        three_children(&mut page);
        let mut node = InternalNodeMut::<Key>::from_page(&mut page).unwrap();

        node.insert_front(&key(100), 5).unwrap();

        assert_eq!(node.size(), 4);
        assert_eq!(node.child_at(0).unwrap(), 5);
        assert_eq!(node.child_at(1).unwrap(), 10);
        assert_eq!(node.key_at(1).unwrap().as_i64(), 100);
        assert_eq!(node.key_at(2).unwrap().as_i64(), 200);
    }

    #[test]
    fn remove_front_drops_first_child_and_key() {
        let mut page = make_page();
        three_children(&mut page);
        let mut node = InternalNodeMut::<Key>::from_page(&mut page).unwrap();

        node.remove_front().unwrap();

        assert_eq!(node.size(), 2);
        assert_eq!(node.child_at(0).unwrap(), 20);
        assert_eq!(node.child_at(1).unwrap(), 30);
        assert_eq!(node.key_at(1).unwrap().as_i64(), 300);
    }
}
