//! # Concurrent Trie
//!
//! An in-memory character-branching trie mapping strings to values of
//! any type. One node per character; a node holding a value is the
//! terminal of a key. A single reader-writer latch covers the whole
//! tree: lookups walk under the shared side, inserts and removals take
//! the exclusive side for the full key walk.
//!
//! Terminals are a tag, not a distinct node type: `value: Some(..)`
//! marks the end of a key, and converting a non-terminal into a
//! terminal (or back) leaves its children untouched. Values are stored
//! as `Box<dyn Any>`; [`Trie::get`] checks the requested type with a
//! downcast and reports a mismatch the same way as a missing key.
//!
//! Removal prunes: once a key's value is cleared, every ancestor that
//! is left non-terminal and childless is unlinked on the way back up,
//! so the trie never retains dead branches.

use std::any::Any;

use hashbrown::HashMap;
use parking_lot::RwLock;

struct TrieNode {
    key_char: char,
    children: HashMap<char, Box<TrieNode>>,
    value: Option<Box<dyn Any + Send + Sync>>,
}

impl TrieNode {
    fn new(key_char: char) -> Self {
        Self {
            key_char,
            children: HashMap::new(),
            value: None,
        }
    }

    fn is_terminal(&self) -> bool {
        self.value.is_some()
    }
}

pub struct Trie {
    root: RwLock<TrieNode>,
}

impl Trie {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(TrieNode::new('\0')),
        }
    }

    /// Inserts `value` under `key`. Fails on an empty key and on a key
    /// that already has a value; existing values are never overwritten.
    pub fn insert<T: Any + Send + Sync>(&self, key: &str, value: T) -> bool {
        let chars: Vec<char> = key.chars().collect();
        let Some((&last, prefix)) = chars.split_last() else {
            return false;
        };

        let mut root = self.root.write();
        let mut node = &mut *root;
        for &c in prefix {
            node = node
                .children
                .entry(c)
                .or_insert_with(|| Box::new(TrieNode::new(c)))
                .as_mut();
        }

        let terminal = node
            .children
            .entry(last)
            .or_insert_with(|| Box::new(TrieNode::new(last)));
        if terminal.is_terminal() {
            return false;
        }
        terminal.value = Some(Box::new(value));
        true
    }

    /// Removes the value under `key`, pruning branches that no longer
    /// lead to any terminal. Returns `false` when the key is absent.
    pub fn remove(&self, key: &str) -> bool {
        let chars: Vec<char> = key.chars().collect();
        if chars.is_empty() {
            return false;
        }

        let mut root = self.root.write();
        Self::remove_below(&mut root, &chars)
    }

    fn remove_below(node: &mut TrieNode, path: &[char]) -> bool {
        let (&c, rest) = path.split_first().unwrap(); // INVARIANT: callers pass non-empty paths
        let Some(child) = node.children.get_mut(&c) else {
            return false;
        };

        let removed = if rest.is_empty() {
            if !child.is_terminal() {
                return false;
            }
            child.value = None;
            true
        } else {
            Self::remove_below(child, rest)
        };

        if removed && !child.is_terminal() && child.children.is_empty() {
            debug_assert_eq!(child.key_char, c);
            node.children.remove(&c);
        }
        removed
    }

    /// Looks up the value under `key` as a `T`. A missing path, a
    /// non-terminal end node, and a stored value of a different type
    /// all yield `None`.
    pub fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        if key.is_empty() {
            return None;
        }

        let root = self.root.read();
        let mut node = &*root;
        for c in key.chars() {
            node = node.children.get(&c)?.as_ref();
        }
        node.value.as_ref()?.downcast_ref::<T>().cloned()
    }
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_round_trip() {
        let trie = Trie::new();

        assert!(trie.insert("abc", 7i32));
        assert_eq!(trie.get::<i32>("abc"), Some(7));
        assert_eq!(trie.get::<i32>("ab"), None);
    }

    #[test]
    fn insert_rejects_empty_key() {
        let trie = Trie::new();

        assert!(!trie.insert("", 1i32));
        assert_eq!(trie.get::<i32>(""), None);
    }

    #[test]
    fn insert_never_overwrites() {
        let trie = Trie::new();

        assert!(trie.insert("abc", 7i32));
        assert!(!trie.insert("abc", 8i32));
        assert_eq!(trie.get::<i32>("abc"), Some(7));
    }

    #[test]
    fn insert_converts_interior_node_to_terminal() {
        let trie = Trie::new();

        assert!(trie.insert("abcd", 9i32));
        assert!(trie.insert("abc", 7i32));
        assert_eq!(trie.get::<i32>("abc"), Some(7));
        assert_eq!(trie.get::<i32>("abcd"), Some(9));
    }

    #[test]
    fn get_rejects_type_mismatch() {
        let trie = Trie::new();

        assert!(trie.insert("abc", 7i32));
        assert_eq!(trie.get::<String>("abc"), None);
        assert_eq!(trie.get::<i32>("abc"), Some(7));
    }

    #[test]
    fn remove_keeps_longer_keys_alive() {
        let trie = Trie::new();

        assert!(trie.insert("abc", 7i32));
        assert!(trie.insert("abcd", 9i32));
        assert!(trie.remove("abc"));
        assert_eq!(trie.get::<i32>("abc"), None);
        assert_eq!(trie.get::<i32>("abcd"), Some(9));
    }

    #[test]
    fn remove_prunes_dead_branches() {
        let trie = Trie::new();

        assert!(trie.insert("abc", 7i32));
        assert!(trie.insert("axe", 1i32));
        assert!(trie.remove("abc"));

        // The b/c branch is gone; reinserting works from scratch.
        assert!(trie.insert("abc", 10i32));
        assert_eq!(trie.get::<i32>("abc"), Some(10));
        assert_eq!(trie.get::<i32>("axe"), Some(1));
    }

    #[test]
    fn remove_of_absent_key_is_rejected() {
        let trie = Trie::new();

        assert!(trie.insert("abc", 7i32));
        assert!(!trie.remove("ab"));
        assert!(!trie.remove("abcd"));
        assert!(!trie.remove(""));
        assert_eq!(trie.get::<i32>("abc"), Some(7));
    }

    #[test]
    fn values_of_mixed_types_coexist() {
        let trie = Trie::new();

        assert!(trie.insert("num", 42i64));
        assert!(trie.insert("text", String::from("hello")));
        assert_eq!(trie.get::<i64>("num"), Some(42));
        assert_eq!(trie.get::<String>("text"), Some(String::from("hello")));
    }

    #[test]
    fn concurrent_readers_and_writers() {
        use std::sync::Arc;

        let trie = Arc::new(Trie::new());
        let mut handles = Vec::new();
        for t in 0..4u32 {
            let trie = Arc::clone(&trie);
            handles.push(std::thread::spawn(move || {
                for i in 0..100u32 {
                    let key = format!("k{}_{}", t, i);
                    assert!(trie.insert(key.as_str(), t * 1000 + i));
                    assert_eq!(trie.get::<u32>(key.as_str()), Some(t * 1000 + i));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for t in 0..4u32 {
            for i in 0..100u32 {
                assert_eq!(trie.get::<u32>(&format!("k{}_{}", t, i)), Some(t * 1000 + i));
            }
        }
    }
}
