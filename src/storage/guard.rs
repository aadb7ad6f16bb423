//! RAII page guards.
//!
//! A guard couples the two resources a page access needs: the frame pin
//! (keeps the page resident) and the frame latch (serializes access).
//! Guards are move-only; transferring one into a traversal context
//! transfers release responsibility. On drop the latch is released first
//! and the pin second, on every exit path.
//!
//! Three flavors mirror the three acquisition modes:
//!
//! - [`ReadPageGuard`]: shared latch, immutable bytes.
//! - [`WritePageGuard`]: exclusive latch, mutable bytes. Any mutable
//!   access marks the frame dirty, so dropping the guard publishes the
//!   mutation to the pool.
//! - [`BasicPageGuard`]: pin only. Each `data()` call takes a transient
//!   shared latch for the lifetime of the returned view. Used by the
//!   exploratory debug paths, never by the index engines.
//!
//! Typed access goes through `as_view::<T>()` / `as_view_mut::<T>()`,
//! which reinterpret the page prefix as an `Unaligned` zerocopy struct.

use std::ops::Deref;

use eyre::{eyre, Result};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::pool::{Frame, FrameRef, PageBuf};
use crate::types::PageId;

type OwnedReadGuard = ArcRwLockReadGuard<RawRwLock, PageBuf>;
type OwnedWriteGuard = ArcRwLockWriteGuard<RawRwLock, PageBuf>;

pub struct ReadPageGuard {
    page_id: PageId,
    frame: FrameRef,
    latch: Option<OwnedReadGuard>,
}

impl ReadPageGuard {
    pub(crate) fn new(page_id: PageId, frame: FrameRef) -> Self {
        let latch = Frame::read_latch(&frame);
        Self {
            page_id,
            frame,
            latch: Some(latch),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        let latch = self.latch.as_ref().unwrap(); // INVARIANT: latch held until drop
        &latch[..]
    }

    pub fn as_view<T>(&self) -> Result<&T>
    where
        T: FromBytes + KnownLayout + Immutable + Unaligned,
    {
        view_prefix(self.data(), self.page_id)
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        drop(self.latch.take());
        self.frame.unpin();
    }
}

#[derive(Debug)]
pub struct WritePageGuard {
    page_id: PageId,
    frame: FrameRef,
    latch: Option<OwnedWriteGuard>,
}

impl WritePageGuard {
    pub(crate) fn new(page_id: PageId, frame: FrameRef) -> Self {
        let latch = Frame::write_latch(&frame);
        Self {
            page_id,
            frame,
            latch: Some(latch),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        let latch = self.latch.as_ref().unwrap(); // INVARIANT: latch held until drop
        &latch[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.frame.mark_dirty();
        let latch = self.latch.as_mut().unwrap(); // INVARIANT: latch held until drop
        &mut latch[..]
    }

    pub fn as_view<T>(&self) -> Result<&T>
    where
        T: FromBytes + KnownLayout + Immutable + Unaligned,
    {
        view_prefix(self.data(), self.page_id)
    }

    pub fn as_view_mut<T>(&mut self) -> Result<&mut T>
    where
        T: FromBytes + IntoBytes + KnownLayout + Unaligned,
    {
        let page_id = self.page_id;
        let data = self.data_mut();
        let (view, _rest) = T::mut_from_prefix(data)
            .map_err(|_| eyre!("page {} too small for typed view", page_id))?;
        Ok(view)
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        drop(self.latch.take());
        self.frame.unpin();
    }
}

pub struct BasicPageGuard {
    page_id: PageId,
    frame: FrameRef,
}

impl BasicPageGuard {
    pub(crate) fn new(page_id: PageId, frame: FrameRef) -> Self {
        Self { page_id, frame }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Borrows the page bytes under a transient shared latch.
    pub fn data(&self) -> PageView {
        PageView {
            latch: Frame::read_latch(&self.frame),
        }
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        self.frame.unpin();
    }
}

/// Shared-latched view of a page, produced by [`BasicPageGuard::data`].
pub struct PageView {
    latch: OwnedReadGuard,
}

impl Deref for PageView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.latch[..]
    }
}

fn view_prefix<T>(data: &[u8], page_id: PageId) -> Result<&T>
where
    T: FromBytes + KnownLayout + Immutable + Unaligned,
{
    let (view, _rest) =
        T::ref_from_prefix(data).map_err(|_| eyre!("page {} too small for typed view", page_id))?;
    Ok(view)
}
