use crate::{walk_element, ElementNode, LocalTree, Path, Visitor};
use blocksync_schema::{plain_text, Attributes, BlockId, BlockKind, BlockType, InlineRun, TextId};
use serde::Serialize;

/// Flattened, read-only view of one mirror node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub block_id: BlockId,
    pub block_type: BlockType,
    pub kind: BlockKind,
    pub attributes: Attributes,
    pub path: Path,
    pub parent: Option<BlockId>,
    pub children: Vec<BlockId>,
    pub text_id: Option<TextId>,
    pub text: Vec<InlineRun>,
}

/// Read-only copy of the local tree handed to the rendering surface.
///
/// Nodes are listed in document (pre-)order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeSnapshot {
    pub root: BlockId,
    pub nodes: Vec<NodeSnapshot>,
}

impl TreeSnapshot {
    pub fn capture(tree: &LocalTree) -> Self {
        let mut collector = SnapshotCollector {
            nodes: Vec::with_capacity(tree.node_count()),
            parents: Vec::new(),
        };
        collector.visit_element(tree.root(), &[]);
        Self {
            root: tree.root_id().clone(),
            nodes: collector.nodes,
        }
    }

    pub fn node(&self, id: &BlockId) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|node| &node.block_id == id)
    }

    pub fn text_of(&self, id: &BlockId) -> Option<String> {
        self.node(id).map(|node| plain_text(&node.text))
    }

    pub fn children_of(&self, id: &BlockId) -> Option<&[BlockId]> {
        self.node(id).map(|node| node.children.as_slice())
    }

    /// Block ids in document order
    pub fn block_ids(&self) -> Vec<&BlockId> {
        self.nodes.iter().map(|node| &node.block_id).collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

struct SnapshotCollector {
    nodes: Vec<NodeSnapshot>,
    parents: Vec<BlockId>,
}

impl Visitor for SnapshotCollector {
    fn visit_element(&mut self, node: &ElementNode, path: &[usize]) {
        self.nodes.push(NodeSnapshot {
            block_id: node.block_id.clone(),
            block_type: node.block_type(),
            kind: node.kind.clone(),
            attributes: node.attributes.clone(),
            path: path.to_vec(),
            parent: self.parents.last().cloned(),
            children: node.children.iter().map(|c| c.block_id.clone()).collect(),
            text_id: node.text.text_id.clone(),
            text: node.text.runs.clone(),
        });
        self.parents.push(node.block_id.clone());
        walk_element(self, node, path);
        self.parents.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::fixtures::{element, paragraph, with_children};

    #[test]
    fn test_capture_lists_nodes_in_document_order() {
        let tree = LocalTree::new(with_children(
            element("page", BlockType::Page, ""),
            vec![
                with_children(paragraph("a", "one"), vec![paragraph("c", "three")]),
                paragraph("b", "two"),
            ],
        ));
        let snapshot = TreeSnapshot::capture(&tree);

        let ids: Vec<_> = snapshot.block_ids().iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["page", "a", "c", "b"]);

        let c = snapshot.node(&BlockId::from("c")).unwrap();
        assert_eq!(c.parent, Some(BlockId::from("a")));
        assert_eq!(c.path, vec![1, 1]);
        assert_eq!(snapshot.text_of(&BlockId::from("b")).as_deref(), Some("two"));
        assert_eq!(
            snapshot.children_of(&BlockId::from("page")).unwrap(),
            &[BlockId::from("a"), BlockId::from("b")]
        );
        assert!(snapshot.to_json().unwrap().contains("\"block_type\": \"paragraph\""));
    }
}
