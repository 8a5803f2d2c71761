use crate::{child_index, parent_and_index, ElementNode, Path, Result, TextRun, TreeError};
use blocksync_schema::{Attributes, BlockId, BlockKind};
use serde::Serialize;

/// One local edit, in the order it was applied
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TreeOp {
    /// Mount `node` (with its subtree) at `path`
    InsertNode { path: Path, node: ElementNode },

    /// Unmount the subtree rooted at `path`
    RemoveNode { path: Path, block_id: BlockId },

    /// Replace the kind and attribute payload of the node at `path`
    SetNode {
        path: Path,
        kind: BlockKind,
        attributes: Attributes,
    },

    /// Replace the whole text run of the element at `path`
    ReplaceText { path: Path, text: TextRun },
}

impl TreeOp {
    pub fn path(&self) -> &Path {
        match self {
            TreeOp::InsertNode { path, .. }
            | TreeOp::RemoveNode { path, .. }
            | TreeOp::SetNode { path, .. }
            | TreeOp::ReplaceText { path, .. } => path,
        }
    }
}

/// The editable mirror tree rooted at the page block
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTree {
    root: ElementNode,
}

impl LocalTree {
    pub fn new(root: ElementNode) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &ElementNode {
        &self.root
    }

    pub fn root_id(&self) -> &BlockId {
        &self.root.block_id
    }

    /// Element at `path`. Paths into the text slot yield `None`.
    pub fn get(&self, path: &[usize]) -> Option<&ElementNode> {
        let mut node = &self.root;
        for segment in path {
            node = node.children.get(child_index(*segment)?)?;
        }
        Some(node)
    }

    fn get_mut(&mut self, path: &[usize]) -> Option<&mut ElementNode> {
        let mut node = &mut self.root;
        for segment in path {
            node = node.children.get_mut(child_index(*segment)?)?;
        }
        Some(node)
    }

    /// Apply one edit. A `RemoveNode` hands back the detached subtree.
    pub fn apply(&mut self, op: &TreeOp) -> Result<Option<ElementNode>> {
        match op {
            TreeOp::InsertNode { path, node } => {
                let (parent_path, index) = parent_and_index(path).ok_or(TreeError::RootImmutable)?;
                let parent = self
                    .get_mut(parent_path)
                    .ok_or_else(|| TreeError::InvalidPath(path.clone()))?;
                if index > parent.children.len() {
                    return Err(TreeError::InvalidPath(path.clone()));
                }
                parent.children.insert(index, node.clone());
                Ok(None)
            }
            TreeOp::RemoveNode { path, block_id } => {
                let (parent_path, index) = parent_and_index(path).ok_or(TreeError::RootImmutable)?;
                let parent = self
                    .get_mut(parent_path)
                    .ok_or_else(|| TreeError::InvalidPath(path.clone()))?;
                let found = parent
                    .children
                    .get(index)
                    .ok_or_else(|| TreeError::InvalidPath(path.clone()))?;
                if &found.block_id != block_id {
                    return Err(TreeError::NodeMismatch {
                        path: path.clone(),
                        expected: block_id.clone(),
                        found: found.block_id.clone(),
                    });
                }
                Ok(Some(parent.children.remove(index)))
            }
            TreeOp::SetNode {
                path,
                kind,
                attributes,
            } => {
                let node = self
                    .get_mut(path)
                    .ok_or_else(|| TreeError::InvalidPath(path.clone()))?;
                node.kind = kind.clone();
                node.attributes = attributes.clone();
                Ok(None)
            }
            TreeOp::ReplaceText { path, text } => {
                let node = self
                    .get_mut(path)
                    .ok_or_else(|| TreeError::InvalidPath(path.clone()))?;
                node.text = text.clone();
                Ok(None)
            }
        }
    }

    /// Path of `id` by scanning the tree. Used to cross-check the index.
    pub fn find_path(&self, id: &BlockId) -> Option<Path> {
        fn search(node: &ElementNode, id: &BlockId, path: &mut Path) -> bool {
            if &node.block_id == id {
                return true;
            }
            for (i, child) in node.children.iter().enumerate() {
                path.push(crate::child_segment(i));
                if search(child, id, path) {
                    return true;
                }
                path.pop();
            }
            false
        }

        let mut path = Path::new();
        search(&self.root, id, &mut path).then_some(path)
    }

    /// Number of element nodes, root included
    pub fn node_count(&self) -> usize {
        self.root.subtree_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::fixtures::{paragraph, with_children};
    use crate::TextRun;
    use blocksync_schema::{BlockType, InlineRun};

    fn sample() -> LocalTree {
        let page = crate::node::fixtures::element("page", BlockType::Page, "Title");
        LocalTree::new(with_children(
            page,
            vec![
                with_children(paragraph("a", "first"), vec![paragraph("c", "nested")]),
                paragraph("b", "second"),
            ],
        ))
    }

    #[test]
    fn test_get_by_path() {
        let tree = sample();
        assert_eq!(tree.get(&[]).unwrap().block_id, BlockId::from("page"));
        assert_eq!(tree.get(&[1]).unwrap().block_id, BlockId::from("a"));
        assert_eq!(tree.get(&[1, 1]).unwrap().block_id, BlockId::from("c"));
        assert_eq!(tree.get(&[2]).unwrap().block_id, BlockId::from("b"));
        assert!(tree.get(&[0]).is_none());
        assert!(tree.get(&[3]).is_none());
    }

    #[test]
    fn test_insert_and_remove() {
        let mut tree = sample();
        tree.apply(&TreeOp::InsertNode {
            path: vec![2],
            node: paragraph("x", "inserted"),
        })
        .unwrap();
        assert_eq!(tree.get(&[2]).unwrap().block_id, BlockId::from("x"));
        assert_eq!(tree.get(&[3]).unwrap().block_id, BlockId::from("b"));

        let removed = tree
            .apply(&TreeOp::RemoveNode {
                path: vec![1],
                block_id: BlockId::from("a"),
            })
            .unwrap()
            .unwrap();
        assert_eq!(removed.subtree_len(), 2);
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn test_remove_checks_identity() {
        let mut tree = sample();
        let err = tree
            .apply(&TreeOp::RemoveNode {
                path: vec![1],
                block_id: BlockId::from("b"),
            })
            .unwrap_err();
        assert!(matches!(err, TreeError::NodeMismatch { .. }));
    }

    #[test]
    fn test_insert_past_end_is_rejected() {
        let mut tree = sample();
        let err = tree
            .apply(&TreeOp::InsertNode {
                path: vec![5],
                node: paragraph("x", ""),
            })
            .unwrap_err();
        assert_eq!(err, TreeError::InvalidPath(vec![5]));
        assert!(tree
            .apply(&TreeOp::InsertNode {
                path: vec![],
                node: paragraph("x", ""),
            })
            .is_err());
    }

    #[test]
    fn test_replace_text() {
        let mut tree = sample();
        let text = TextRun::new(
            tree.get(&[2]).unwrap().text.text_id.clone(),
            vec![InlineRun::plain("changed")],
        );
        tree.apply(&TreeOp::ReplaceText {
            path: vec![2],
            text,
        })
        .unwrap();
        assert_eq!(tree.get(&[2]).unwrap().text.plain_text(), "changed");
    }

    #[test]
    fn test_find_path() {
        let tree = sample();
        assert_eq!(tree.find_path(&BlockId::from("c")), Some(vec![1, 1]));
        assert_eq!(tree.find_path(&BlockId::from("page")), Some(vec![]));
        assert_eq!(tree.find_path(&BlockId::from("zzz")), None);
    }
}
