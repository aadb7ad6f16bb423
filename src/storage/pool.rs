//! # Buffer Pool with SIEVE Eviction
//!
//! A fixed pool of page frames between the index and the disk manager.
//! Fetching a page pins its frame and returns a latched guard; eviction
//! reuses only unpinned frames and writes dirty ones back first.
//!
//! ## Why SIEVE Instead of LRU?
//!
//! Strict recency ordering lets one sequential scan flush the entire
//! pool. SIEVE keeps a per-frame `visited` flag and a hand pointer:
//!
//! - On access: set `visited`.
//! - On eviction: advance the hand; a visited frame loses its flag and
//!   survives (second chance), an unvisited unpinned frame is reclaimed.
//!
//! Frequently touched pages keep earning their second chance while scan
//! pages fall out quickly.
//!
//! ## Pin/Latch Protocol
//!
//! ```text
//! fetch ──► pin (under pool lock) ──► latch (outside pool lock)
//! drop  ──► unlatch ──► unpin
//! ```
//!
//! Pins are taken while holding the pool lock, so a frame observed with
//! `pin_count == 0` during eviction has no latch holders and no waiters;
//! its latch is acquired without blocking. The pool lock is never held
//! while waiting on a latch someone else holds.
//!
//! ## Thread Safety
//!
//! `BufferPool` is `Send + Sync`. The page table, free lists, and hand
//! live under one `parking_lot::Mutex`; per-frame state is atomic. Page
//! loads and eviction write-backs happen under the pool lock, which
//! serializes misses; hits only take the lock long enough to pin.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use tracing::debug;

use super::disk::DiskManager;
use super::guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
use crate::config::PAGE_SIZE;
use crate::types::{PageId, INVALID_PAGE_ID};

pub(crate) type PageBuf = Box<[u8; PAGE_SIZE]>;
pub(crate) type FrameRef = Arc<Frame>;

#[derive(Debug)]
pub(crate) struct Frame {
    data: Arc<RwLock<PageBuf>>,
    page_id: AtomicU32,
    pin_count: AtomicU32,
    dirty: AtomicBool,
    visited: AtomicBool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
            page_id: AtomicU32::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            visited: AtomicBool::new(false),
        }
    }

    pub(crate) fn read_latch(frame: &FrameRef) -> ArcRwLockReadGuard<RawRwLock, PageBuf> {
        frame.data.read_arc()
    }

    pub(crate) fn write_latch(frame: &FrameRef) -> ArcRwLockWriteGuard<RawRwLock, PageBuf> {
        frame.data.write_arc()
    }

    fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin of an unpinned frame");
    }

    fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

struct PoolState {
    page_table: HashMap<PageId, usize>,
    free_frames: Vec<usize>,
    hand: usize,
}

pub struct BufferPool {
    frames: Vec<FrameRef>,
    state: Mutex<PoolState>,
    disk: DiskManager,
}

impl BufferPool {
    pub fn new(capacity: usize, disk: DiskManager) -> Result<Self> {
        ensure!(capacity > 0, "buffer pool needs at least one frame");

        let frames: Vec<_> = (0..capacity).map(|_| Arc::new(Frame::new())).collect();
        let free_frames = (0..capacity).rev().collect();

        Ok(Self {
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(capacity),
                free_frames,
                hand: 0,
            }),
            disk,
        })
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Allocates a fresh page and returns it write-latched and zeroed.
    pub fn new_page(&self) -> Result<WritePageGuard> {
        let page_id = self.disk.allocate_page()?;

        let mut state = self.state.lock();
        let idx = self.take_frame(&mut state)?;
        let frame = &self.frames[idx];
        {
            let mut data = frame.data.write();
            data.fill(0);
        }
        frame.page_id.store(page_id, Ordering::Release);
        frame.dirty.store(true, Ordering::Release);
        frame.visited.store(true, Ordering::Release);
        frame.pin();
        state.page_table.insert(page_id, idx);
        drop(state);

        // The id is unpublished, so the latch is uncontended here.
        Ok(WritePageGuard::new(page_id, frame.clone()))
    }

    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.acquire_frame(page_id)?;
        Ok(ReadPageGuard::new(page_id, frame))
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.acquire_frame(page_id)?;
        Ok(WritePageGuard::new(page_id, frame))
    }

    /// Pin-only acquisition for exploratory debug paths.
    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<BasicPageGuard> {
        let frame = self.acquire_frame(page_id)?;
        Ok(BasicPageGuard::new(page_id, frame))
    }

    /// Drops an unpinned page from the pool and returns its id to the
    /// allocator's free list. A page some straggler still pins (an
    /// in-flight scan, typically) is left alone; its id simply is not
    /// recycled.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(&idx) = state.page_table.get(&page_id) {
            let frame = &self.frames[idx];
            if frame.is_pinned() {
                debug!(page_id, "skipping delete of a pinned page");
                return Ok(());
            }
            state.page_table.remove(&page_id);
            frame.page_id.store(INVALID_PAGE_ID, Ordering::Release);
            frame.dirty.store(false, Ordering::Release);
            frame.visited.store(false, Ordering::Release);
            state.free_frames.push(idx);
        }
        drop(state);

        self.disk.deallocate_page(page_id);
        Ok(())
    }

    /// Writes every dirty resident page back to disk.
    pub fn flush_all(&self) -> Result<()> {
        for frame in &self.frames {
            let page_id = frame.page_id.load(Ordering::Acquire);
            if page_id == INVALID_PAGE_ID {
                continue;
            }
            if frame.dirty.swap(false, Ordering::AcqRel) {
                let data = frame.data.read();
                self.disk.write_page(page_id, &data[..])?;
            }
        }
        self.disk.sync()
    }

    /// Pins the frame holding `page_id`, loading it from disk on a miss.
    fn acquire_frame(&self, page_id: PageId) -> Result<FrameRef> {
        ensure!(page_id != INVALID_PAGE_ID, "fetch of invalid page id");

        let mut state = self.state.lock();
        if let Some(&idx) = state.page_table.get(&page_id) {
            let frame = &self.frames[idx];
            frame.pin();
            frame.visited.store(true, Ordering::Release);
            return Ok(frame.clone());
        }

        let idx = self.take_frame(&mut state)?;
        let frame = &self.frames[idx];
        {
            // Frame came from the free list or eviction: no latch holders.
            let mut data = frame.data.write();
            self.disk.read_page(page_id, &mut data[..])?;
        }
        frame.page_id.store(page_id, Ordering::Release);
        frame.dirty.store(false, Ordering::Release);
        frame.visited.store(true, Ordering::Release);
        frame.pin();
        state.page_table.insert(page_id, idx);

        Ok(frame.clone())
    }

    /// Returns a reusable frame index, evicting with SIEVE if the free
    /// list is empty. Dirty victims are written back first.
    fn take_frame(&self, state: &mut PoolState) -> Result<usize> {
        if let Some(idx) = state.free_frames.pop() {
            return Ok(idx);
        }

        let n = self.frames.len();
        let mut scanned = 0;
        while scanned < 2 * n {
            let idx = state.hand;
            state.hand = (state.hand + 1) % n;
            scanned += 1;

            let frame = &self.frames[idx];
            if frame.is_pinned() {
                continue;
            }
            if frame.visited.swap(false, Ordering::AcqRel) {
                continue;
            }

            let victim = frame.page_id.load(Ordering::Acquire);
            if frame.dirty.swap(false, Ordering::AcqRel) {
                let data = frame.data.read();
                self.disk.write_page(victim, &data[..])?;
            }
            state.page_table.remove(&victim);
            frame.page_id.store(INVALID_PAGE_ID, Ordering::Release);
            debug!(page_id = victim, "evicted page");
            return Ok(idx);
        }

        bail!(
            "buffer pool exhausted: all {} frames pinned",
            self.frames.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_pool(capacity: usize) -> (tempfile::TempDir, BufferPool) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("pool.adb")).unwrap();
        (dir, BufferPool::new(capacity, disk).unwrap())
    }

    #[test]
    fn new_page_is_zeroed_and_writable() {
        let (_dir, pool) = test_pool(4);

        let mut guard = pool.new_page().unwrap();
        assert!(guard.data().iter().all(|&b| b == 0));

        guard.data_mut()[0] = 0x42;
        let page_id = guard.page_id();
        drop(guard);

        let guard = pool.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.data()[0], 0x42);
    }

    #[test]
    fn pages_survive_eviction_pressure() {
        let (_dir, pool) = test_pool(4);

        let mut ids = Vec::new();
        for i in 0..16u8 {
            let mut guard = pool.new_page().unwrap();
            guard.data_mut()[0] = i;
            ids.push(guard.page_id());
        }

        for (i, &page_id) in ids.iter().enumerate() {
            let guard = pool.fetch_page_read(page_id).unwrap();
            assert_eq!(guard.data()[0], i as u8, "page {page_id} lost its bytes");
        }
    }

    #[test]
    fn exhausted_pool_reports_error() {
        let (_dir, pool) = test_pool(2);

        let _a = pool.new_page().unwrap();
        let _b = pool.new_page().unwrap();
        let err = pool.new_page().unwrap_err();

        assert!(err.to_string().contains("exhausted"));
    }

    #[test]
    fn delete_page_recycles_frame_and_id() {
        let (_dir, pool) = test_pool(2);

        let page_id = {
            let guard = pool.new_page().unwrap();
            guard.page_id()
        };
        pool.delete_page(page_id).unwrap();

        let guard = pool.new_page().unwrap();
        assert_eq!(guard.page_id(), page_id);
    }

    #[test]
    fn delete_of_pinned_page_is_skipped() {
        let (_dir, pool) = test_pool(2);

        let guard = pool.new_page().unwrap();
        let page_id = guard.page_id();

        // Still pinned: the delete is a no-op and the id is not reused.
        pool.delete_page(page_id).unwrap();
        let other = pool.new_page().unwrap();
        assert_ne!(other.page_id(), page_id);
        drop(other);

        drop(guard);
        pool.delete_page(page_id).unwrap();
        assert_eq!(pool.new_page().unwrap().page_id(), page_id);
    }

    #[test]
    fn concurrent_read_guards_share_a_page() {
        let (_dir, pool) = test_pool(4);

        let page_id = {
            let mut guard = pool.new_page().unwrap();
            guard.data_mut()[7] = 9;
            guard.page_id()
        };

        let a = pool.fetch_page_read(page_id).unwrap();
        let b = pool.fetch_page_read(page_id).unwrap();
        assert_eq!(a.data()[7], 9);
        assert_eq!(b.data()[7], 9);
    }

    #[test]
    fn flush_all_persists_dirty_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.adb");
        let page_id;
        {
            let disk = DiskManager::open(&path).unwrap();
            let pool = BufferPool::new(4, disk).unwrap();
            let mut guard = pool.new_page().unwrap();
            guard.data_mut()[100] = 0x5A;
            page_id = guard.page_id();
            drop(guard);
            pool.flush_all().unwrap();
        }

        let disk = DiskManager::open(&path).unwrap();
        let pool = BufferPool::new(4, disk).unwrap();
        let guard = pool.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.data()[100], 0x5A);
    }
}
