//! Tree page headers.
//!
//! Every tree node page opens with the same 6-byte header; leaf pages
//! extend it with the forward sibling pointer. The tree header page is a
//! separate single-purpose page holding the root id, the only piece of
//! mutable global state the tree has.
//!
//! ## Node Header Layout (6 bytes)
//!
//! ```text
//! Offset  Size  Field     Description
//! ------  ----  --------  -------------------------------------
//! 0       1     kind      1 = internal, 2 = leaf
//! 1       1     reserved
//! 2       2     size      live entries (children for internal)
//! 4       2     max_size  fan-out configured at open time
//! ```
//!
//! Leaf pages append `next_leaf` (4 bytes) at offset 6. All fields use
//! little-endian wrapper types and the structs are `Unaligned`, so views
//! reinterpret page bytes at any offset without copying.

use eyre::{bail, Result};
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::TREE_HEADER_MAGIC;
use crate::types::{PageId, INVALID_PAGE_ID};

pub const NODE_HEADER_SIZE: usize = 6;
pub const LEAF_HEADER_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Internal,
    Leaf,
}

impl NodeKind {
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(NodeKind::Internal),
            2 => Ok(NodeKind::Leaf),
            other => bail!("invalid tree node kind byte: {:#04x}", other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            NodeKind::Internal => 1,
            NodeKind::Leaf => 2,
        }
    }
}

/// Shared prefix of every tree node page.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct NodeHeader {
    kind: u8,
    reserved: u8,
    size: U16<LittleEndian>,
    max_size: U16<LittleEndian>,
}

impl NodeHeader {
    pub fn kind(&self) -> Result<NodeKind> {
        NodeKind::from_byte(self.kind)
    }

    pub fn set_kind(&mut self, kind: NodeKind) {
        self.kind = kind.as_byte();
    }

    pub fn size(&self) -> usize {
        self.size.get() as usize
    }

    pub fn set_size(&mut self, size: usize) {
        self.size = U16::new(size as u16);
    }

    pub fn max_size(&self) -> usize {
        self.max_size.get() as usize
    }

    pub fn set_max_size(&mut self, max_size: u16) {
        self.max_size = U16::new(max_size);
    }

    /// Occupancy floor for non-root nodes: half the fan-out, rounded up.
    pub fn min_size(&self) -> usize {
        (self.max_size() + 1) / 2
    }
}

/// Leaf page header: the shared node prefix plus the forward sibling.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct LeafHeader {
    pub node: NodeHeader,
    next_leaf: U32<LittleEndian>,
}

impl LeafHeader {
    pub fn next_leaf(&self) -> PageId {
        self.next_leaf.get()
    }

    pub fn set_next_leaf(&mut self, page_id: PageId) {
        self.next_leaf = U32::new(page_id);
    }
}

/// The tree header page: `{ root_page_id }` behind a format marker.
///
/// The marker distinguishes a formatted header from a freshly allocated
/// (all-zero) page, so opening a tree initializes the header exactly
/// once and re-opening an existing tree leaves the root untouched.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct TreeHeaderPage {
    magic: U32<LittleEndian>,
    root_page_id: U32<LittleEndian>,
}

impl TreeHeaderPage {
    pub fn is_initialized(&self) -> bool {
        self.magic.get() == TREE_HEADER_MAGIC
    }

    pub fn initialize(&mut self) {
        self.magic = U32::new(TREE_HEADER_MAGIC);
        self.root_page_id = U32::new(INVALID_PAGE_ID);
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id.get()
    }

    pub fn set_root_page_id(&mut self, page_id: PageId) {
        self.root_page_id = U32::new(page_id);
    }
}

/// Reads the node kind out of a page image.
pub fn node_kind(data: &[u8]) -> Result<NodeKind> {
    let (header, _rest) = NodeHeader::ref_from_prefix(data)
        .map_err(|_| eyre::eyre!("page too small for a node header"))?;
    header.kind()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn header_sizes_match_layout_constants() {
        assert_eq!(size_of::<NodeHeader>(), NODE_HEADER_SIZE);
        assert_eq!(size_of::<LeafHeader>(), LEAF_HEADER_SIZE);
        assert_eq!(size_of::<TreeHeaderPage>(), 8);
    }

    #[test]
    fn node_kind_round_trips() {
        assert_eq!(
            NodeKind::from_byte(NodeKind::Leaf.as_byte()).unwrap(),
            NodeKind::Leaf
        );
        assert_eq!(
            NodeKind::from_byte(NodeKind::Internal.as_byte()).unwrap(),
            NodeKind::Internal
        );
        assert!(NodeKind::from_byte(0).is_err());
        assert!(NodeKind::from_byte(7).is_err());
    }

    #[test]
    fn min_size_rounds_up() {
        let mut buf = [0u8; NODE_HEADER_SIZE];
        let header = NodeHeader::mut_from_bytes(&mut buf).unwrap();

        header.set_max_size(4);
        assert_eq!(header.min_size(), 2);
        header.set_max_size(5);
        assert_eq!(header.min_size(), 3);
    }

    #[test]
    fn tree_header_initializes_once() {
        let mut buf = [0u8; 8];
        let header = TreeHeaderPage::mut_from_bytes(&mut buf).unwrap();

        assert!(!header.is_initialized());
        header.initialize();
        assert!(header.is_initialized());
        assert_eq!(header.root_page_id(), INVALID_PAGE_ID);

        header.set_root_page_id(12);
        assert_eq!(header.root_page_id(), 12);
    }
}
