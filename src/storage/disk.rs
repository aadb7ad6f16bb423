//! Paged file I/O and page-id allocation.
//!
//! One index lives in one file of [`PAGE_SIZE`] pages. Reads and writes
//! seek under a mutex; a page beyond the current end of file reads as
//! zeroes, which is the state of a freshly allocated page that has never
//! been flushed. Deallocated page ids go onto an in-memory free list and
//! are handed out again before the file is grown.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use eyre::{ensure, Result};
use parking_lot::Mutex;

use crate::config::PAGE_SIZE;
use crate::types::{PageId, INVALID_PAGE_ID};

pub struct DiskManager {
    file: Mutex<File>,
    next_page_id: AtomicU32,
    free_pages: Mutex<Vec<PageId>>,
}

impl DiskManager {
    /// Opens the index file, creating it if missing. Existing pages are
    /// counted from the file length so allocation resumes past them.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())?;

        let len = file.metadata()?.len();
        ensure!(
            len % PAGE_SIZE as u64 == 0,
            "index file length {} is not a multiple of the page size {}",
            len,
            PAGE_SIZE
        );

        Ok(Self {
            file: Mutex::new(file),
            next_page_id: AtomicU32::new((len / PAGE_SIZE as u64) as u32),
            free_pages: Mutex::new(Vec::new()),
        })
    }

    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() == PAGE_SIZE,
            "read buffer size {} != page size {}",
            buf.len(),
            PAGE_SIZE
        );
        ensure!(page_id != INVALID_PAGE_ID, "read of invalid page id");

        let mut file = self.file.lock();
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let len = file.metadata()?.len();

        if offset + PAGE_SIZE as u64 > len {
            // Allocated but never flushed: the page is all zeroes.
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        ensure!(
            buf.len() == PAGE_SIZE,
            "write buffer size {} != page size {}",
            buf.len(),
            PAGE_SIZE
        );
        ensure!(page_id != INVALID_PAGE_ID, "write of invalid page id");

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        file.write_all(buf)?;
        Ok(())
    }

    /// Hands out a page id, preferring ids returned by
    /// [`deallocate_page`](Self::deallocate_page).
    pub fn allocate_page(&self) -> Result<PageId> {
        if let Some(page_id) = self.free_pages.lock().pop() {
            return Ok(page_id);
        }
        let page_id = self.next_page_id.fetch_add(1, Ordering::AcqRel);
        ensure!(page_id != INVALID_PAGE_ID, "page id space exhausted");
        Ok(page_id)
    }

    pub fn deallocate_page(&self, page_id: PageId) {
        debug_assert_ne!(page_id, INVALID_PAGE_ID);
        self.free_pages.lock().push(page_id);
    }

    pub fn num_allocated_pages(&self) -> u32 {
        self.next_page_id.load(Ordering::Acquire)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn disk_manager_round_trips_a_page() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("t.adb")).unwrap();

        let page_id = disk.allocate_page().unwrap();
        let mut page = vec![0u8; PAGE_SIZE];
        page[0] = 0xAB;
        page[PAGE_SIZE - 1] = 0xCD;
        disk.write_page(page_id, &page).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut out).unwrap();
        assert_eq!(out, page);
    }

    #[test]
    fn disk_manager_reads_unwritten_page_as_zeroes() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("t.adb")).unwrap();

        let page_id = disk.allocate_page().unwrap();
        let mut out = vec![0xFFu8; PAGE_SIZE];
        disk.read_page(page_id, &mut out).unwrap();

        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn disk_manager_recycles_deallocated_ids() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("t.adb")).unwrap();

        let a = disk.allocate_page().unwrap();
        let _b = disk.allocate_page().unwrap();
        disk.deallocate_page(a);

        assert_eq!(disk.allocate_page().unwrap(), a);
    }

    #[test]
    fn disk_manager_resumes_allocation_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.adb");

        {
            let disk = DiskManager::open(&path).unwrap();
            let page_id = disk.allocate_page().unwrap();
            disk.write_page(page_id, &vec![1u8; PAGE_SIZE]).unwrap();
        }

        let disk = DiskManager::open(&path).unwrap();
        assert_eq!(disk.num_allocated_pages(), 1);
        assert_eq!(disk.allocate_page().unwrap(), 1);
    }
}
