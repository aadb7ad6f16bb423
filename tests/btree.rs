//! # B+Tree Integration Tests
//!
//! End-to-end coverage of the index over a real disk-backed buffer
//! pool:
//!
//! 1. Round-trip laws
//!    - insert/get/remove idempotence
//!    - duplicate rejection leaves the tree untouched
//! 2. Permutation workloads
//!    - shuffled insert, reverse-order drain back to empty
//!    - structural invariants checked between batches
//! 3. Concurrency
//!    - disjoint-range writers, readers racing writers
//! 4. Persistence
//!    - flush, reopen over a fresh pool, same contents
//! 5. File-driven utilities
//!    - insert_from_file / remove_from_file
//! 6. Debug printers

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::tempdir;

use arbordb::btree::BPlusTree;
use arbordb::storage::{BufferPool, DiskManager};
use arbordb::types::{GenericComparator, GenericKey, IndexKey, Rid, INVALID_PAGE_ID};

type Key = GenericKey<8>;
type Tree = BPlusTree<Key, GenericComparator<8>>;

fn key(v: i64) -> Key {
    let mut k = Key::default();
    k.set_from_integer(v);
    k
}

fn rid(v: i64) -> Rid {
    Rid::from_integer(v)
}

fn open_tree(dir: &tempfile::TempDir, leaf_max: u16, internal_max: u16) -> Tree {
    let disk = DiskManager::open(dir.path().join("index.adb")).unwrap();
    let bpm = Arc::new(BufferPool::new(64, disk).unwrap());
    let header_page_id = bpm.new_page().unwrap().page_id();
    BPlusTree::open(
        "it_index",
        header_page_id,
        bpm,
        GenericComparator::default(),
        leaf_max,
        internal_max,
    )
    .unwrap()
}

fn scan(tree: &Tree) -> Vec<i64> {
    let mut out = Vec::new();
    let mut it = tree.begin().unwrap();
    while let Some((k, _)) = it.next_entry().unwrap() {
        out.push(k.as_i64());
    }
    out
}

// ============================================================================
// Round-trip laws
// ============================================================================

#[test]
fn insert_get_remove_laws_hold() {
    let dir = tempdir().unwrap();
    let tree = open_tree(&dir, 4, 4);

    assert!(tree.insert(&key(1), rid(1)).unwrap());
    assert_eq!(tree.get(&key(1)).unwrap(), Some(rid(1)));

    // Re-insert fails and the stored value is untouched.
    assert!(!tree.insert(&key(1), rid(999)).unwrap());
    assert_eq!(tree.get(&key(1)).unwrap(), Some(rid(1)));

    // Remove is idempotent.
    tree.remove(&key(1)).unwrap();
    assert_eq!(tree.get(&key(1)).unwrap(), None);
    tree.remove(&key(1)).unwrap();
    assert!(tree.is_empty().unwrap());
}

#[test]
fn insert_then_remove_restores_emptiness() {
    let dir = tempdir().unwrap();
    let tree = open_tree(&dir, 4, 4);

    assert!(tree.is_empty().unwrap());
    tree.insert(&key(7), rid(7)).unwrap();
    assert!(!tree.is_empty().unwrap());
    tree.remove(&key(7)).unwrap();
    assert!(tree.is_empty().unwrap());
    assert_eq!(tree.root_page_id().unwrap(), INVALID_PAGE_ID);
}

// ============================================================================
// Permutation workloads
// ============================================================================

#[test]
fn shuffled_insert_reverse_drain_empties_the_tree() {
    let dir = tempdir().unwrap();
    let tree = open_tree(&dir, 4, 4);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xA11CE);

    let mut values: Vec<i64> = (1..=500).collect();
    values.shuffle(&mut rng);

    for &v in &values {
        assert!(tree.insert(&key(v), rid(v)).unwrap());
    }
    tree.verify_integrity().unwrap();
    assert_eq!(scan(&tree), (1..=500).collect::<Vec<_>>());

    for &v in values.iter().rev() {
        tree.remove(&key(v)).unwrap();
    }
    tree.verify_integrity().unwrap();
    assert!(tree.is_empty().unwrap());
    assert_eq!(tree.root_page_id().unwrap(), INVALID_PAGE_ID);
}

#[test]
fn random_mixed_workload_stays_consistent() {
    let dir = tempdir().unwrap();
    let tree = open_tree(&dir, 4, 4);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xBEEF);

    let mut values: Vec<i64> = (1..=300).collect();
    values.shuffle(&mut rng);
    let (first, second) = values.split_at(150);

    for &v in first {
        tree.insert(&key(v), rid(v)).unwrap();
    }
    tree.verify_integrity().unwrap();

    // Remove half of the first batch while inserting the second.
    for (i, &v) in second.iter().enumerate() {
        tree.insert(&key(v), rid(v)).unwrap();
        if i % 2 == 0 {
            tree.remove(&key(first[i / 2])).unwrap();
        }
    }
    tree.verify_integrity().unwrap();

    let mut expected: Vec<i64> = second.to_vec();
    expected.extend(first.iter().skip(75).copied());
    expected.sort_unstable();
    assert_eq!(scan(&tree), expected);
}

#[test]
fn odd_fanouts_keep_nodes_half_full() {
    let dir = tempdir().unwrap();
    let tree = open_tree(&dir, 3, 3);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x0DD);

    let mut values: Vec<i64> = (1..=400).collect();
    values.shuffle(&mut rng);

    for (i, &v) in values.iter().enumerate() {
        assert!(tree.insert(&key(v), rid(v)).unwrap());
        if i % 50 == 0 {
            tree.verify_integrity().unwrap();
        }
    }
    tree.verify_integrity().unwrap();
    assert_eq!(scan(&tree), (1..=400).collect::<Vec<_>>());

    values.shuffle(&mut rng);
    for (i, &v) in values.iter().enumerate() {
        tree.remove(&key(v)).unwrap();
        if i % 50 == 0 {
            tree.verify_integrity().unwrap();
        }
    }
    assert!(tree.is_empty().unwrap());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn disjoint_range_writers_do_not_interfere() {
    let dir = tempdir().unwrap();
    let tree = Arc::new(open_tree(&dir, 4, 4));

    let mut handles = Vec::new();
    for t in 0..4i64 {
        let tree = Arc::clone(&tree);
        handles.push(std::thread::spawn(move || {
            for v in (t * 1000)..(t * 1000 + 200) {
                assert!(tree.insert(&key(v), rid(v)).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    tree.verify_integrity().unwrap();
    for t in 0..4i64 {
        for v in (t * 1000)..(t * 1000 + 200) {
            assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)));
        }
    }
    assert_eq!(scan(&tree).len(), 800);
}

#[test]
fn readers_race_writers_without_errors() {
    let dir = tempdir().unwrap();
    let tree = Arc::new(open_tree(&dir, 4, 4));

    for v in 0..100i64 {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    let writer = {
        let tree = Arc::clone(&tree);
        std::thread::spawn(move || {
            for v in 100..400i64 {
                tree.insert(&key(v), rid(v)).unwrap();
            }
        })
    };
    let reader = {
        let tree = Arc::clone(&tree);
        std::thread::spawn(move || {
            for _ in 0..10 {
                for v in 0..100i64 {
                    // The initial hundred keys are always visible.
                    assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)));
                }
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();

    tree.verify_integrity().unwrap();
    assert_eq!(scan(&tree).len(), 400);
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn flushed_tree_reopens_with_same_contents() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("persist.adb");
    let header_page_id;

    {
        let disk = DiskManager::open(&path).unwrap();
        let bpm = Arc::new(BufferPool::new(64, disk).unwrap());
        header_page_id = bpm.new_page().unwrap().page_id();
        let tree: Tree = BPlusTree::open(
            "persist",
            header_page_id,
            bpm.clone(),
            GenericComparator::default(),
            4,
            4,
        )
        .unwrap();
        for v in 1..=100i64 {
            tree.insert(&key(v), rid(v)).unwrap();
        }
        bpm.flush_all().unwrap();
    }

    let disk = DiskManager::open(&path).unwrap();
    let bpm = Arc::new(BufferPool::new(64, disk).unwrap());
    let tree: Tree = BPlusTree::open(
        "persist",
        header_page_id,
        bpm,
        GenericComparator::default(),
        4,
        4,
    )
    .unwrap();

    tree.verify_integrity().unwrap();
    assert_eq!(scan(&tree), (1..=100).collect::<Vec<_>>());
}

// ============================================================================
// File-driven utilities
// ============================================================================

#[test]
fn insert_and_remove_from_files() {
    let dir = tempdir().unwrap();
    let tree = open_tree(&dir, 4, 4);

    let insert_path = dir.path().join("insert.txt");
    let remove_path = dir.path().join("remove.txt");
    std::fs::write(&insert_path, "5 3 8\n1 9 2\n7").unwrap();
    std::fs::write(&remove_path, "3 9\n5").unwrap();

    tree.insert_from_file(&insert_path).unwrap();
    assert_eq!(scan(&tree), vec![1, 2, 3, 5, 7, 8, 9]);
    assert_eq!(tree.get(&key(7)).unwrap(), Some(rid(7)));

    tree.remove_from_file(&remove_path).unwrap();
    assert_eq!(scan(&tree), vec![1, 2, 7, 8]);
    tree.verify_integrity().unwrap();
}

// ============================================================================
// Debug printers
// ============================================================================

#[test]
fn printers_render_empty_and_populated_trees() {
    let dir = tempdir().unwrap();
    let tree = open_tree(&dir, 4, 4);

    assert_eq!(tree.to_printable().unwrap(), "()");

    // Drawing an empty tree writes nothing.
    let dot_path = dir.path().join("tree.dot");
    tree.draw(&dot_path).unwrap();
    assert!(!dot_path.exists());

    for v in 1..=10i64 {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    let text = tree.to_printable().unwrap();
    assert!(text.contains("Internal"));
    assert!(text.contains("Leaf"));

    tree.draw(&dot_path).unwrap();
    let dot = std::fs::read_to_string(&dot_path).unwrap();
    assert!(dot.starts_with("digraph G {"));
    assert!(dot.contains("color=green"));
    assert!(dot.contains("color=pink"));
}
