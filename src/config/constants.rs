//! Storage and index constants.
//!
//! | Constant | Used by | Constraint |
//! |----------|---------|------------|
//! | `PAGE_SIZE` | disk manager, buffer pool, node layouts | power of two |
//! | `DEFAULT_POOL_CAPACITY` | buffer pool | at least the deepest latch chain a mutator pins |
//! | `TREE_HEADER_MAGIC` | tree header page | distinguishes a formatted header from a fresh page |

/// Size of every on-disk page and every buffer-pool frame, in bytes.
pub const PAGE_SIZE: usize = 16384;

/// Default number of frames in a buffer pool.
///
/// A mutating descent pins the header page plus one page per tree level
/// plus up to two siblings, so the pool must comfortably exceed the tree
/// height. 64 frames (1 MiB) covers any realistic height.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// Marker stored in a formatted tree header page.
pub const TREE_HEADER_MAGIC: u32 = 0x4152_4254; // "ARBT"

const _: () = assert!(PAGE_SIZE.is_power_of_two());
const _: () = assert!(DEFAULT_POOL_CAPACITY >= 16);
