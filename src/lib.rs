//! # ArborDB Index Core
//!
//! ArborDB is the index subsystem of a relational storage engine: a
//! disk-resident, concurrent B+tree mapping fixed-width keys to record
//! identifiers (RIDs), persisted as fixed-size pages through a buffer-pool
//! page cache. A small in-memory concurrent trie rounds out the crate as a
//! second latched data structure for string-keyed metadata.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │      BPlusTree / IndexIterator       │  insert, remove, get, scan
//! ├──────────────────────────────────────┤
//! │   Node views (leaf / internal page)  │  zerocopy layouts over pages
//! ├──────────────────────────────────────┤
//! │  BufferPool (frames, SIEVE, guards)  │  pin + latch per page
//! ├──────────────────────────────────────┤
//! │       DiskManager (paged file)       │  read/write/allocate pages
//! └──────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use arbordb::btree::BPlusTree;
//! use arbordb::storage::{BufferPool, DiskManager};
//! use arbordb::types::{GenericComparator, GenericKey, Rid};
//!
//! let disk = DiskManager::open("index.adb")?;
//! let bpm = Arc::new(BufferPool::new(64, disk)?);
//! let header = bpm.new_page()?.page_id();
//!
//! let tree: BPlusTree<GenericKey<8>, GenericComparator<8>> =
//!     BPlusTree::open("orders_pk", header, bpm, GenericComparator::default(), 64, 64)?;
//!
//! let mut key = GenericKey::default();
//! key.set_from_integer(42);
//! tree.insert(&key, Rid::new(7, 3))?;
//! assert_eq!(tree.get(&key)?, Some(Rid::new(7, 3)));
//! ```
//!
//! ## Concurrency Model
//!
//! Operations run to completion on the calling thread and block only on
//! page latches inside the buffer pool. Readers couple latches (parent
//! released once the child is held); mutators hold write latches from the
//! header page down to the leaf until the edit is complete, so readers
//! observe either the full pre- or post-state of any split or merge
//! cascade. The tree itself carries no mutex.
//!
//! ## Module Overview
//!
//! - [`storage`]: disk manager, buffer pool, page guards
//! - [`btree`]: node layouts, the tree engines, iterator, debug printers
//! - [`trie`]: concurrent string-keyed trie
//! - [`types`]: page ids, RIDs, keys and comparators
//! - [`config`]: centralized constants

pub mod btree;
pub mod config;
pub mod storage;
pub mod trie;
pub mod types;
