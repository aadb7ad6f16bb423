//! Debug renderings of the tree shape.
//!
//! Two formats: a Graphviz DOT digraph (`draw`) and an indented text
//! dump (`to_printable`). Both walk the tree over basic guards; they are
//! exploratory tools, not part of the latched access protocol.

use std::fmt::Write as _;
use std::path::Path;

use eyre::Result;
use tracing::warn;

use super::internal::InternalNode;
use super::leaf::LeafNode;
use super::page::{node_kind, NodeKind};
use super::tree::BPlusTree;
use crate::types::{IndexKey, KeyComparator, PageId, INVALID_PAGE_ID};

impl<K: IndexKey, C: KeyComparator<K>> BPlusTree<K, C> {
    /// Writes the tree as a DOT digraph to `path`: leaves green,
    /// internals pink, leaf-chain edges ranked side by side.
    pub fn draw(&self, path: impl AsRef<Path>) -> Result<()> {
        if self.is_empty()? {
            warn!(index = %self.name(), "drawing an empty tree");
            return Ok(());
        }

        let mut out = String::new();
        writeln!(out, "digraph G {{")?;
        self.graph_node(self.root_page_id()?, &mut out)?;
        writeln!(out, "}}")?;
        std::fs::write(path, out)?;
        Ok(())
    }

    fn graph_node(&self, page_id: PageId, out: &mut String) -> Result<()> {
        let guard = self.bpm().fetch_page_basic(page_id)?;
        let data = guard.data();
        match node_kind(&data)? {
            NodeKind::Leaf => {
                let leaf = LeafNode::<K>::from_page(&data)?;
                write!(out, "  leaf_{page_id} [shape=record color=green label=\"P{page_id}")?;
                for i in 0..leaf.size() {
                    write!(out, "|{:?}", leaf.key_at(i)?)?;
                }
                writeln!(out, "\"];")?;
                if leaf.next_leaf() != INVALID_PAGE_ID {
                    writeln!(out, "  leaf_{page_id} -> leaf_{};", leaf.next_leaf())?;
                    writeln!(
                        out,
                        "  {{rank=same leaf_{page_id} leaf_{}}};",
                        leaf.next_leaf()
                    )?;
                }
            }
            NodeKind::Internal => {
                let children = {
                    let node = InternalNode::<K>::from_page(&data)?;
                    write!(out, "  int_{page_id} [shape=record color=pink label=\"P{page_id}")?;
                    let mut children = Vec::with_capacity(node.size());
                    for i in 0..node.size() {
                        if i > 0 {
                            write!(out, "|{:?}", node.key_at(i)?)?;
                        }
                        children.push(node.child_at(i)?);
                    }
                    writeln!(out, "\"];")?;
                    children
                };
                drop(data);
                drop(guard);
                for child in children {
                    let child_guard = self.bpm().fetch_page_basic(child)?;
                    let prefix = match node_kind(&child_guard.data())? {
                        NodeKind::Leaf => "leaf",
                        NodeKind::Internal => "int",
                    };
                    drop(child_guard);
                    writeln!(out, "  int_{page_id} -> {prefix}_{child};")?;
                    self.graph_node(child, out)?;
                }
            }
        }
        Ok(())
    }

    /// Indented text rendering; `"()"` for an empty tree.
    pub fn to_printable(&self) -> Result<String> {
        if self.is_empty()? {
            return Ok("()".to_string());
        }
        let mut out = String::new();
        self.print_node(self.root_page_id()?, 0, &mut out)?;
        Ok(out)
    }

    fn print_node(&self, page_id: PageId, depth: usize, out: &mut String) -> Result<()> {
        let guard = self.bpm().fetch_page_basic(page_id)?;
        let data = guard.data();
        match node_kind(&data)? {
            NodeKind::Leaf => {
                let leaf = LeafNode::<K>::from_page(&data)?;
                write!(out, "{:indent$}Leaf P{page_id} [", "", indent = depth * 2)?;
                for i in 0..leaf.size() {
                    if i > 0 {
                        write!(out, ", ")?;
                    }
                    write!(out, "{:?}", leaf.key_at(i)?)?;
                }
                writeln!(out, "] -> P{}", leaf.next_leaf())?;
            }
            NodeKind::Internal => {
                let children = {
                    let node = InternalNode::<K>::from_page(&data)?;
                    write!(out, "{:indent$}Internal P{page_id} [", "", indent = depth * 2)?;
                    let mut children = Vec::with_capacity(node.size());
                    for i in 0..node.size() {
                        if i > 1 {
                            write!(out, ", ")?;
                        }
                        if i > 0 {
                            write!(out, "{:?}", node.key_at(i)?)?;
                        }
                        children.push(node.child_at(i)?);
                    }
                    writeln!(out, "]")?;
                    children
                };
                drop(data);
                drop(guard);
                for child in children {
                    self.print_node(child, depth + 1, out)?;
                }
            }
        }
        Ok(())
    }
}
