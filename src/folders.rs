// Copyright (C) 2026 The Floe Catalog Authors
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::HashSet;

use xxhash_rust::xxh64::xxh64;

/// Index of a node within its owning `FolderTree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A single named node. Children form a singly linked sibling list in
/// insertion order, mirrored by index links instead of pointers so that nodes
/// can live in a plain growable arena.
#[derive(Debug)]
pub struct FolderNode {
    /// The path component this node represents.
    name: String,
    /// An optional prettier name for UI display.
    display_name: Option<String>,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
    /// An index into whatever container the owner associates with this node.
    user_data: Option<usize>,
}

/// An ordered n-ary tree of named folders. Identity is the fold-hash of the
/// full path from the node up to its root, so `a/b` and `c/b` never collide.
#[derive(Debug)]
pub struct FolderTree {
    nodes: Vec<FolderNode>,
    root: NodeId,
}

impl FolderTree {
    /// Creates a tree containing only a root node.
    pub fn new(root_name: impl Into<String>) -> FolderTree {
        FolderTree {
            nodes: vec![FolderNode {
                name: root_name.into(),
                display_name: None,
                parent: None,
                first_child: None,
                next_sibling: None,
                user_data: None,
            }],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The number of nodes in the tree, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    /// The display name if one was set, otherwise the node name.
    pub fn display_name(&self, id: NodeId) -> &str {
        self.nodes[id.0]
            .display_name
            .as_deref()
            .unwrap_or(&self.nodes[id.0].name)
    }

    pub fn set_display_name(&mut self, id: NodeId, display_name: impl Into<String>) {
        self.nodes[id.0].display_name = Some(display_name.into());
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].first_child
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].next_sibling
    }

    pub fn user_data(&self, id: NodeId) -> Option<usize> {
        self.nodes[id.0].user_data
    }

    pub fn set_user_data(&mut self, id: NodeId, user_data: usize) {
        self.nodes[id.0].user_data = Some(user_data);
    }

    /// Iterates the children of a node in insertion (or post-sort) order.
    pub fn children(&self, id: NodeId) -> ChildIter<'_> {
        ChildIter {
            tree: self,
            next: self.nodes[id.0].first_child,
        }
    }

    /// Walks down from `root` matching one path part per level, inserting any
    /// missing nodes at the tail of their sibling list. Returns `None` if the
    /// part list exceeds `max_depth`.
    pub fn find_or_insert_parts(
        &mut self,
        root: NodeId,
        parts: &[&str],
        max_depth: usize,
    ) -> Option<NodeId> {
        if parts.len() > max_depth {
            return None;
        }
        let mut current = root;
        for part in parts {
            current = match self.children(current).find(|&c| self.name(c) == *part) {
                Some(existing) => existing,
                None => self.append_child(current, part),
            };
        }
        Some(current)
    }

    /// Splits `subpath` on `/`, keeps at most `max_parts` leading parts and
    /// delegates to `find_or_insert_parts`.
    pub fn find_or_insert_path(
        &mut self,
        root: NodeId,
        subpath: &str,
        max_parts: usize,
    ) -> Option<NodeId> {
        let parts: Vec<&str> = subpath
            .split('/')
            .filter(|p| !p.is_empty())
            .take(max_parts)
            .collect();
        self.find_or_insert_parts(root, &parts, max_parts)
    }

    fn append_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(FolderNode {
            name: name.to_string(),
            display_name: None,
            parent: Some(parent),
            first_child: None,
            next_sibling: None,
            user_data: None,
        });

        // Append at the tail so insertion order is preserved.
        match self.nodes[parent.0].first_child {
            None => self.nodes[parent.0].first_child = Some(id),
            Some(first) => {
                let mut tail = first;
                while let Some(next) = self.nodes[tail.0].next_sibling {
                    tail = next;
                }
                self.nodes[tail.0].next_sibling = Some(id);
            }
        }
        id
    }

    /// Sorts every sibling list under `root` ascending by name. Sibling lists
    /// are tiny, so a bubble sort over the links is fine and keeps equal names
    /// stable.
    pub fn sort_tree(&mut self, root: NodeId) {
        self.sort_children(root);
        let children: Vec<NodeId> = self.children(root).collect();
        for child in children {
            self.sort_tree(child);
        }
    }

    fn sort_children(&mut self, parent: NodeId) {
        loop {
            let mut swapped = false;
            let mut prev: Option<NodeId> = None;
            let mut current = match self.nodes[parent.0].first_child {
                Some(c) => c,
                None => return,
            };
            while let Some(next) = self.nodes[current.0].next_sibling {
                if self.nodes[current.0].name > self.nodes[next.0].name {
                    // Unlink `next` and relink it before `current`.
                    self.nodes[current.0].next_sibling = self.nodes[next.0].next_sibling;
                    self.nodes[next.0].next_sibling = Some(current);
                    match prev {
                        None => self.nodes[parent.0].first_child = Some(next),
                        Some(p) => self.nodes[p.0].next_sibling = Some(next),
                    }
                    prev = Some(next);
                    swapped = true;
                } else {
                    prev = Some(current);
                    current = next;
                }
            }
            if !swapped {
                return;
            }
        }
    }

    /// The deepest node that is an ancestor-or-self of every input. All inputs
    /// must share a single root.
    pub fn first_common_ancestor(&self, nodes: &[NodeId]) -> Option<NodeId> {
        let first = *nodes.first()?;
        let mut candidates: Vec<NodeId> = self.ancestor_chain(first);
        for &node in &nodes[1..] {
            let chain: HashSet<NodeId> = self.ancestor_chain(node).into_iter().collect();
            candidates.retain(|c| chain.contains(c));
        }
        // The chain is ordered deepest-first.
        candidates.first().copied()
    }

    fn ancestor_chain(&self, node: NodeId) -> Vec<NodeId> {
        let mut chain = vec![node];
        let mut current = node;
        while let Some(parent) = self.nodes[current.0].parent {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Fold-hash of the node's name up through its parents. Two folders with
    /// the same leaf name but different ancestry hash differently.
    pub fn hash(&self, node: NodeId) -> u64 {
        let mut hash = 0u64;
        let mut current = Some(node);
        while let Some(id) = current {
            hash = xxh64(self.nodes[id.0].name.as_bytes(), hash);
            current = self.nodes[id.0].parent;
        }
        hash
    }

    /// True if the node itself or any ancestor hashes to `folder_hash`.
    pub fn is_inside_folder(&self, node: NodeId, folder_hash: u64) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if self.hash(id) == folder_hash {
                return true;
            }
            current = self.nodes[id.0].parent;
        }
        false
    }
}

pub struct ChildIter<'a> {
    tree: &'a FolderTree,
    next: Option<NodeId>,
}

impl<'a> Iterator for ChildIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.nodes[current.0].next_sibling;
        Some(current)
    }
}
