//! Forward cursor over the leaf chain.
//!
//! The iterator carries only `(pool, leaf page id, slot)`; it takes a
//! fresh read latch for each step and holds nothing between steps, so a
//! long scan never blocks writers. The flip side: a scan that straddles
//! concurrent mutations has no consistency guarantee and callers that
//! need one must serialize at a coarser level.

use std::marker::PhantomData;
use std::sync::Arc;

use eyre::Result;

use super::leaf::LeafNode;
use crate::storage::BufferPool;
use crate::types::{IndexKey, PageId, Rid, INVALID_PAGE_ID};

pub struct IndexIterator<K: IndexKey> {
    bpm: Arc<BufferPool>,
    page_id: PageId,
    slot: usize,
    _key: PhantomData<K>,
}

impl<K: IndexKey> IndexIterator<K> {
    pub(crate) fn new(bpm: Arc<BufferPool>, page_id: PageId, slot: usize) -> Self {
        Self {
            bpm,
            page_id,
            slot,
            _key: PhantomData,
        }
    }

    pub fn is_end(&self) -> bool {
        self.page_id == INVALID_PAGE_ID
    }

    /// Returns the entry under the cursor and advances, hopping to the
    /// next leaf at the end of each page. `None` once exhausted.
    pub fn next_entry(&mut self) -> Result<Option<(K, Rid)>> {
        loop {
            if self.page_id == INVALID_PAGE_ID {
                return Ok(None);
            }

            let guard = self.bpm.fetch_page_read(self.page_id)?;
            let leaf = LeafNode::<K>::from_page(guard.data())?;

            if self.slot >= leaf.size() {
                // Shrunk underneath us or positioned past the last slot.
                self.page_id = leaf.next_leaf();
                self.slot = 0;
                continue;
            }

            let entry = (leaf.key_at(self.slot)?, leaf.rid_at(self.slot)?);
            self.slot += 1;
            if self.slot >= leaf.size() {
                self.page_id = leaf.next_leaf();
                self.slot = 0;
            }
            return Ok(Some(entry));
        }
    }
}
