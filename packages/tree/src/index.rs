//! Relational Index - secondary lookups over the local tree
//!
//! Maps block ids to their current path, and text / children-collection ids
//! back to the block that owns them. Entries are derived from the tree and
//! never persisted; a full rebuild from the tree is always possible.

use crate::{
    parent_and_index, walk_element, ElementNode, LocalTree, Path, TextRun, Visitor,
};
use blocksync_schema::{BlockId, ChildrenId, TextId};
use std::collections::HashMap;

/// Result of a verified lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Path),
    /// Not mounted in the tree
    Absent,
    /// The index disagreed with the tree even after a rebuild
    Inconsistent,
}

#[derive(Debug, Default, Clone)]
pub struct RelationalIndex {
    /// block id -> current path
    paths: HashMap<BlockId, Path>,
    /// text id -> owning block id
    text_owners: HashMap<TextId, BlockId>,
    /// children collection id -> owning block id
    children_owners: HashMap<ChildrenId, BlockId>,
    rebuilds: usize,
}

impl RelationalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(tree: &LocalTree) -> Self {
        let mut index = Self::new();
        index.index_subtree(tree.root(), &[]);
        index
    }

    /// Drop every entry and re-derive them from `tree`
    pub fn rebuild(&mut self, tree: &LocalTree) {
        self.paths.clear();
        self.text_owners.clear();
        self.children_owners.clear();
        self.index_subtree(tree.root(), &[]);
        self.rebuilds += 1;
        tracing::info!(blocks = self.paths.len(), "relational index rebuilt");
    }

    pub fn path_of(&self, id: &BlockId) -> Option<&Path> {
        self.paths.get(id)
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.paths.contains_key(id)
    }

    pub fn block_for_text(&self, text_id: &TextId) -> Option<&BlockId> {
        self.text_owners.get(text_id)
    }

    pub fn block_for_children(&self, children_id: &ChildrenId) -> Option<&BlockId> {
        self.children_owners.get(children_id)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Full rebuilds performed so far
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }

    /// Path lookup checked against the tree. A stale entry triggers one
    /// full rebuild before giving up.
    pub fn locate(&mut self, tree: &LocalTree, id: &BlockId) -> Lookup {
        let Some(path) = self.paths.get(id) else {
            return Lookup::Absent;
        };
        if tree.get(path).is_some_and(|node| &node.block_id == id) {
            return Lookup::Found(path.clone());
        }

        tracing::warn!(block_id = %id, ?path, "stale index entry, rebuilding");
        self.rebuild(tree);
        match self.paths.get(id) {
            Some(path) if tree.get(path).is_some_and(|node| &node.block_id == id) => {
                Lookup::Found(path.clone())
            }
            Some(_) => Lookup::Inconsistent,
            None => Lookup::Absent,
        }
    }

    /// Index a freshly mounted subtree at `path` and shift the paths of the
    /// siblings after it.
    pub fn node_inserted(&mut self, tree: &LocalTree, path: &[usize]) {
        if let Some((parent, index)) = parent_and_index(path) {
            self.reindex_from(tree, parent, index);
        }
    }

    /// Forget a detached subtree that used to live at `path` and shift the
    /// paths of the siblings that followed it.
    pub fn node_removed(&mut self, tree: &LocalTree, path: &[usize], removed: &ElementNode) {
        self.unindex_subtree(removed);
        if let Some((parent, index)) = parent_and_index(path) {
            self.reindex_from(tree, parent, index);
        }
    }

    /// Refresh the text owner after a node's text run was replaced
    pub fn text_replaced(&mut self, owner: &BlockId, previous: Option<&TextId>, current: Option<&TextId>) {
        if previous == current {
            return;
        }
        if let Some(previous) = previous {
            if self.text_owners.get(previous) == Some(owner) {
                self.text_owners.remove(previous);
            }
        }
        if let Some(current) = current {
            self.text_owners.insert(current.clone(), owner.clone());
        }
    }

    /// Compare every entry against the tree. Returns the ids that disagree.
    pub fn check(&self, tree: &LocalTree) -> Vec<BlockId> {
        let mut fresh = RelationalIndex::build(tree);
        let mut bad: Vec<BlockId> = self
            .paths
            .iter()
            .filter(|(id, path)| fresh.paths.remove(*id).as_ref() != Some(*path))
            .map(|(id, _)| id.clone())
            .collect();
        bad.extend(fresh.paths.into_keys());
        bad.sort();
        bad
    }

    fn reindex_from(&mut self, tree: &LocalTree, parent_path: &[usize], from: usize) {
        let Some(parent) = tree.get(parent_path) else {
            return;
        };
        let mut child_path = parent_path.to_vec();
        child_path.push(0);
        for (i, child) in parent.children.iter().enumerate().skip(from) {
            if let Some(last) = child_path.last_mut() {
                *last = crate::child_segment(i);
            }
            self.index_subtree(child, &child_path);
        }
    }

    fn index_subtree(&mut self, node: &ElementNode, path: &[usize]) {
        let mut builder = IndexBuilder { index: self };
        builder.visit_element(node, path);
    }

    fn unindex_subtree(&mut self, node: &ElementNode) {
        if self.paths.remove(&node.block_id).is_none() {
            tracing::debug!(block_id = %node.block_id, "unindexing block that was not indexed");
        }
        if let Some(text_id) = &node.text.text_id {
            self.text_owners.remove(text_id);
        }
        self.children_owners.remove(&node.children_id);
        for child in &node.children {
            self.unindex_subtree(child);
        }
    }
}

struct IndexBuilder<'a> {
    index: &'a mut RelationalIndex,
}

impl Visitor for IndexBuilder<'_> {
    fn visit_element(&mut self, node: &ElementNode, path: &[usize]) {
        self.index.paths.insert(node.block_id.clone(), path.to_vec());
        self.index
            .children_owners
            .insert(node.children_id.clone(), node.block_id.clone());
        walk_element(self, node, path);
    }

    fn visit_text(&mut self, owner: &ElementNode, text: &TextRun, _path: &[usize]) {
        if let Some(text_id) = &text.text_id {
            self.index
                .text_owners
                .insert(text_id.clone(), owner.block_id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::fixtures::{element, paragraph, with_children};
    use crate::TreeOp;
    use blocksync_schema::BlockType;

    fn sample() -> LocalTree {
        LocalTree::new(with_children(
            element("page", BlockType::Page, ""),
            vec![
                with_children(paragraph("a", "x"), vec![paragraph("c", "z")]),
                paragraph("b", "y"),
            ],
        ))
    }

    fn id(s: &str) -> BlockId {
        BlockId::from(s)
    }

    #[test]
    fn test_build_indexes_every_relation() {
        let tree = sample();
        let index = RelationalIndex::build(&tree);

        assert_eq!(index.len(), 4);
        assert_eq!(index.path_of(&id("c")), Some(&vec![1, 1]));
        assert_eq!(index.block_for_text(&TextId::from("t-b")), Some(&id("b")));
        assert_eq!(index.block_for_children(&ChildrenId::from("c-a")), Some(&id("a")));
        assert_eq!(index.block_for_children(&ChildrenId::from("c-page")), Some(&id("page")));
    }

    #[test]
    fn test_insert_shifts_following_siblings() {
        let mut tree = sample();
        let mut index = RelationalIndex::build(&tree);

        let path = vec![1];
        tree.apply(&TreeOp::InsertNode {
            path: path.clone(),
            node: paragraph("x", ""),
        })
        .unwrap();
        index.node_inserted(&tree, &path);

        assert_eq!(index.path_of(&id("x")), Some(&vec![1]));
        assert_eq!(index.path_of(&id("a")), Some(&vec![2]));
        assert_eq!(index.path_of(&id("c")), Some(&vec![2, 1]));
        assert_eq!(index.path_of(&id("b")), Some(&vec![3]));
        assert!(index.check(&tree).is_empty());
    }

    #[test]
    fn test_remove_forgets_subtree() {
        let mut tree = sample();
        let mut index = RelationalIndex::build(&tree);

        let path = vec![1];
        let removed = tree
            .apply(&TreeOp::RemoveNode {
                path: path.clone(),
                block_id: id("a"),
            })
            .unwrap()
            .unwrap();
        index.node_removed(&tree, &path, &removed);

        assert!(!index.contains(&id("a")));
        assert!(!index.contains(&id("c")));
        assert!(index.block_for_text(&TextId::from("t-c")).is_none());
        assert_eq!(index.path_of(&id("b")), Some(&vec![1]));
        assert!(index.check(&tree).is_empty());
    }

    #[test]
    fn test_locate_repairs_stale_entry() {
        let mut tree = sample();
        let mut index = RelationalIndex::build(&tree);

        // Mutate the tree behind the index's back
        tree.apply(&TreeOp::InsertNode {
            path: vec![1],
            node: paragraph("x", ""),
        })
        .unwrap();
        assert_eq!(index.check(&tree), vec![id("a"), id("b"), id("c"), id("x")]);

        assert_eq!(index.locate(&tree, &id("b")), Lookup::Found(vec![3]));
        assert_eq!(index.rebuild_count(), 1);
        assert_eq!(index.locate(&tree, &id("nope")), Lookup::Absent);
        assert!(index.check(&tree).is_empty());
    }

    #[test]
    fn test_text_replaced() {
        let tree = sample();
        let mut index = RelationalIndex::build(&tree);
        let old = TextId::from("t-a");
        let new = TextId::from("t-a2");

        index.text_replaced(&id("a"), Some(&old), Some(&new));
        assert!(index.block_for_text(&old).is_none());
        assert_eq!(index.block_for_text(&new), Some(&id("a")));
    }
}
