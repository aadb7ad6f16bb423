//! # Leaf Page Views
//!
//! Leaf pages hold the index entries themselves: keys and RIDs in two
//! parallel arrays, strictly ordered, linked to the next leaf for range
//! scans.
//!
//! ## Page Layout
//!
//! ```text
//! +--------------------------+
//! | LeafHeader (10 bytes)    |  kind, size, max_size, next_leaf
//! +--------------------------+
//! | K[0] .. K[max_size-1]    |  fixed-width keys
//! +--------------------------+
//! | Rid[0] .. Rid[max_size-1]|  8-byte record ids
//! +--------------------------+
//! ```
//!
//! Both arrays are sized by `max_size`, fixed at init time, so slot `i`
//! is always at the same offset and shifting an insertion point is two
//! `copy_within` calls. `LeafNode` borrows the page immutably,
//! `LeafNodeMut` mutably; neither owns bytes, the guard holding the page
//! latch does.
//!
//! ## Thread Safety
//!
//! Views are not thread-safe; the buffer-pool latch on the underlying
//! page serializes access.

use std::marker::PhantomData;
use std::mem::size_of;

use eyre::{ensure, Result};
use zerocopy::{FromBytes, IntoBytes};

use super::page::{LeafHeader, NodeKind, LEAF_HEADER_SIZE};
use crate::config::PAGE_SIZE;
use crate::types::{IndexKey, KeyComparator, PageId, Rid, INVALID_PAGE_ID};

const RID_SIZE: usize = size_of::<Rid>();

/// Outcome of a key search within one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    Found(usize),
    NotFound(usize),
}

pub struct LeafNode<'a, K> {
    data: &'a [u8],
    _key: PhantomData<K>,
}

pub struct LeafNodeMut<'a, K> {
    data: &'a mut [u8],
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey> LeafNode<'a, K> {
    /// Entries of `K` this page geometry can hold.
    pub fn capacity() -> usize {
        (PAGE_SIZE - LEAF_HEADER_SIZE) / (size_of::<K>() + RID_SIZE)
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
            header.node.kind()? == NodeKind::Leaf,
            "expected a leaf page"
        );
        Ok(Self {
            data,
            _key: PhantomData,
        })
    }

    pub fn size(&self) -> usize {
        header(self.data).unwrap().node.size() // INVARIANT: validated in from_page
    }

    pub fn max_size(&self) -> usize {
        header(self.data).unwrap().node.max_size() // INVARIANT: validated in from_page
    }

    pub fn min_size(&self) -> usize {
        header(self.data).unwrap().node.min_size() // INVARIANT: validated in from_page
    }

    pub fn next_leaf(&self) -> PageId {
        header(self.data).unwrap().next_leaf() // INVARIANT: validated in from_page
    }

    pub fn key_at(&self, index: usize) -> Result<K> {
        ensure!(
            index < self.size(),
            "leaf key index {} out of bounds (size={})",
            index,
            self.size()
        );
        let off = key_offset::<K>(index);
        Ok(K::read_from_bytes(&self.data[off..off + size_of::<K>()])
            .unwrap()) // INVARIANT: slice length equals the key width
    }

    pub fn rid_at(&self, index: usize) -> Result<Rid> {
        ensure!(
            index < self.size(),
            "leaf rid index {} out of bounds (size={})",
            index,
            self.size()
        );
        let off = rid_offset::<K>(self.max_size(), index);
        Ok(Rid::read_from_bytes(&self.data[off..off + RID_SIZE]).unwrap()) // INVARIANT: slice length equals the rid width
    }

    /// Linear comparator scan. `Found(i)` locates the key; `NotFound(i)`
    /// is the slot a new entry would occupy.
    pub fn find_key<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> Result<SearchResult> {
        for i in 0..self.size() {
            match cmp.compare(key, &self.key_at(i)?) {
                std::cmp::Ordering::Equal => return Ok(SearchResult::Found(i)),
                std::cmp::Ordering::Less => return Ok(SearchResult::NotFound(i)),
                std::cmp::Ordering::Greater => {}
            }
        }
        Ok(SearchResult::NotFound(self.size()))
    }
}

impl<'a, K: IndexKey> LeafNodeMut<'a, K> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        let header = header(data)?;
        ensure!(
            header.node.kind()? == NodeKind::Leaf,
            "expected a leaf page"
        );
        Ok(Self {
            data,
            _key: PhantomData,
        })
    }

    /// Formats an empty leaf in place.
    pub fn init(data: &'a mut [u8], max_size: u16) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        ensure!(
            max_size as usize <= LeafNode::<K>::capacity(),
            "leaf max_size {} exceeds page capacity {}",
            max_size,
            LeafNode::<K>::capacity()
        );

        let header = header_mut(data)?;
        header.node.set_kind(NodeKind::Leaf);
        header.node.set_size(0);
        header.node.set_max_size(max_size);
        header.set_next_leaf(INVALID_PAGE_ID);

        Ok(Self {
            data,
            _key: PhantomData,
        })
    }

    pub fn as_ref(&self) -> LeafNode<'_, K> {
        LeafNode {
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

    pub fn next_leaf(&self) -> PageId {
        self.as_ref().next_leaf()
    }

    pub fn key_at(&self, index: usize) -> Result<K> {
        self.as_ref().key_at(index)
    }

    pub fn rid_at(&self, index: usize) -> Result<Rid> {
        self.as_ref().rid_at(index)
    }

    pub fn set_next_leaf(&mut self, page_id: PageId) {
        header_mut(self.data).unwrap().set_next_leaf(page_id); // INVARIANT: validated in from_page/init
    }

    pub fn set_size(&mut self, size: usize) {
        debug_assert!(size <= self.max_size());
        header_mut(self.data).unwrap().node.set_size(size); // INVARIANT: validated in from_page/init
    }

    /// Shift-inserts `(key, rid)` at `index`, keeping slots packed.
    pub fn insert_at(&mut self, index: usize, key: &K, rid: Rid) -> Result<()> {
        let size = self.size();
        ensure!(
            size < self.max_size(),
            "insert into a full leaf (size={})",
            size
        );
        ensure!(
            index <= size,
            "leaf insert index {} out of bounds (size={})",
            index,
            size
        );

        let max = self.max_size();
        let ks = size_of::<K>();
        self.data.copy_within(
            key_offset::<K>(index)..key_offset::<K>(size),
            key_offset::<K>(index) + ks,
        );
        self.data.copy_within(
            rid_offset::<K>(max, index)..rid_offset::<K>(max, size),
            rid_offset::<K>(max, index) + RID_SIZE,
        );
        self.write_entry(index, key, rid);
        self.set_size(size + 1);
        Ok(())
    }

    /// Shift-deletes the entry at `index`.
    pub fn remove_at(&mut self, index: usize) -> Result<()> {
        let size = self.size();
        ensure!(
            index < size,
            "leaf remove index {} out of bounds (size={})",
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
            rid_offset::<K>(max, index + 1)..rid_offset::<K>(max, size),
            rid_offset::<K>(max, index + 1) - RID_SIZE,
        );
        self.set_size(size - 1);
        Ok(())
    }

    /// Appends past the last entry without shifting. The caller keeps
    /// the ordering invariant.
    pub fn append(&mut self, key: &K, rid: Rid) -> Result<()> {
        let size = self.size();
        ensure!(
            size < self.max_size(),
            "append into a full leaf (size={})",
            size
        );
        self.write_entry(size, key, rid);
        self.set_size(size + 1);
        Ok(())
    }

    fn write_entry(&mut self, index: usize, key: &K, rid: Rid) {
        let max = self.max_size();
        let ks = size_of::<K>();
        let ko = key_offset::<K>(index);
        let ro = rid_offset::<K>(max, index);
        self.data[ko..ko + ks].copy_from_slice(key.as_bytes());
        self.data[ro..ro + RID_SIZE].copy_from_slice(rid.as_bytes());
    }
}

fn header(data: &[u8]) -> Result<&LeafHeader> {
    let (header, _rest) = LeafHeader::ref_from_prefix(data)
        .map_err(|_| eyre::eyre!("page too small for a leaf header"))?;
    Ok(header)
}

fn header_mut(data: &mut [u8]) -> Result<&mut LeafHeader> {
    let (header, _rest) = LeafHeader::mut_from_prefix(data)
        .map_err(|_| eyre::eyre!("page too small for a leaf header"))?;
    Ok(header)
}

fn key_offset<K>(index: usize) -> usize {
    LEAF_HEADER_SIZE + index * size_of::<K>()
}

fn rid_offset<K>(max_size: usize, index: usize) -> usize {
    LEAF_HEADER_SIZE + max_size * size_of::<K>() + index * RID_SIZE
}
