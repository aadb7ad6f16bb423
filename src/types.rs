//! # Core Index Types
//!
//! Page identifiers, record identifiers, and the key abstraction the
//! B+tree is generic over.
//!
//! Keys are fixed-width byte buffers compared through an injected
//! comparator, so the tree never interprets key bytes itself. Everything
//! that lands on a page derives the zerocopy traits and uses
//! little-endian wrapper types, which keeps on-disk layout independent of
//! host endianness and lets page views reinterpret bytes without copying.

use std::cmp::Ordering;
use std::fmt;

use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Identifier of a page inside the index file.
pub type PageId = u32;

/// Sentinel denoting the absence of a page.
pub const INVALID_PAGE_ID: PageId = u32::MAX;

/// Record identifier: the heap location an index entry points at.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, PartialEq, Eq)]
pub struct Rid {
    page_id: U32<LittleEndian>,
    slot: U32<LittleEndian>,
}

impl Rid {
    pub fn new(page_id: u32, slot: u32) -> Self {
        Self {
            page_id: U32::new(page_id),
            slot: U32::new(slot),
        }
    }

    /// Packs an i64 into a RID the way the file-driven test utilities
    /// expect: high 32 bits become the page id, low 32 bits the slot.
    pub fn from_integer(value: i64) -> Self {
        Self::new((value >> 32) as u32, value as u32)
    }

    pub fn page_id(&self) -> u32 {
        self.page_id.get()
    }

    pub fn slot(&self) -> u32 {
        self.slot.get()
    }
}

impl fmt::Debug for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rid({}, {})", self.page_id(), self.slot())
    }
}

/// A fixed-width index key.
///
/// The width is `size_of::<Self>()`; the tree stores keys by value in
/// node pages and orders them exclusively through a [`KeyComparator`].
/// `set_from_integer` exists for the file-driven test utilities, which
/// build keys from whitespace-separated integers.
pub trait IndexKey:
    FromBytes
    + IntoBytes
    + Immutable
    + KnownLayout
    + Unaligned
    + Copy
    + Default
    + fmt::Debug
    + Send
    + Sync
    + 'static
{
    fn set_from_integer(&mut self, value: i64);
}

/// Total order over keys of type `K`.
pub trait KeyComparator<K>: Clone + Send + Sync + 'static {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering;
}

/// An `N`-byte key buffer holding an i64 payload in its first bytes.
///
/// Widths of at least 8 bytes preserve the full integer ordering;
/// narrower keys truncate the payload and order as unsigned.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, PartialEq, Eq)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    pub fn as_i64(&self) -> i64 {
        let mut buf = [0u8; 8];
        let n = N.min(8);
        buf[..n].copy_from_slice(&self.data[..n]);
        i64::from_le_bytes(buf)
    }
}

impl<const N: usize> Default for GenericKey<N> {
    fn default() -> Self {
        Self { data: [0; N] }
    }
}

impl<const N: usize> fmt::Debug for GenericKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

impl<const N: usize> IndexKey for GenericKey<N> {
    fn set_from_integer(&mut self, value: i64) {
        let bytes = value.to_le_bytes();
        let n = N.min(8);
        self.data[..n].copy_from_slice(&bytes[..n]);
    }
}

/// Orders [`GenericKey`]s by their decoded integer payload.
#[derive(Clone, Default)]
pub struct GenericComparator<const N: usize>;

impl<const N: usize> KeyComparator<GenericKey<N>> for GenericComparator<N> {
    fn compare(&self, lhs: &GenericKey<N>, rhs: &GenericKey<N>) -> Ordering {
        lhs.as_i64().cmp(&rhs.as_i64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn rid_is_8_bytes() {
        assert_eq!(size_of::<Rid>(), 8);
    }

    #[test]
    fn rid_from_integer_splits_halves() {
        let rid = Rid::from_integer((7i64 << 32) | 3);

        assert_eq!(rid.page_id(), 7);
        assert_eq!(rid.slot(), 3);
    }

    #[test]
    fn generic_key_round_trips_integers() {
        let mut key = GenericKey::<8>::default();
        key.set_from_integer(-42);

        assert_eq!(key.as_i64(), -42);
    }

    #[test]
    fn generic_comparator_orders_by_payload() {
        let cmp = GenericComparator::<8>;
        let mut a = GenericKey::<8>::default();
        let mut b = GenericKey::<8>::default();
        a.set_from_integer(-5);
        b.set_from_integer(10);

        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
        assert_eq!(cmp.compare(&b, &a), Ordering::Greater);
        assert_eq!(cmp.compare(&a, &a), Ordering::Equal);
    }

    #[test]
    fn generic_key_width_matches_parameter() {
        assert_eq!(size_of::<GenericKey<8>>(), 8);
        assert_eq!(size_of::<GenericKey<16>>(), 16);
    }
}
