use blocksync_schema::{
    plain_text, Attributes, Block, BlockId, BlockKind, BlockType, ChildrenId, InlineRun, TextId,
};
use serde::Serialize;

/// Mirror of a block's text sequence.
///
/// Blocks without a text sequence (embeds) still carry an empty run with no
/// `text_id`, so every element has the same shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRun {
    pub text_id: Option<TextId>,
    pub runs: Vec<InlineRun>,
}

impl TextRun {
    pub fn new(text_id: Option<TextId>, runs: Vec<InlineRun>) -> Self {
        Self { text_id, runs }
    }

    pub fn empty() -> Self {
        Self::new(None, Vec::new())
    }

    pub fn plain_text(&self) -> String {
        plain_text(&self.runs)
    }
}

/// Mirror of one block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementNode {
    pub block_id: BlockId,
    pub kind: BlockKind,
    /// Full attribute payload as last seen in the block record
    pub attributes: Attributes,
    pub children_id: ChildrenId,
    pub text: TextRun,
    pub children: Vec<ElementNode>,
}

impl ElementNode {
    /// Mirror node for `block` with no children mounted yet
    pub fn from_block(block: Block, runs: Vec<InlineRun>) -> Self {
        Self {
            text: TextRun::new(block.text_id, runs),
            block_id: block.id,
            kind: block.kind,
            attributes: block.attributes,
            children_id: block.children_id,
            children: Vec::new(),
        }
    }

    pub fn block_type(&self) -> BlockType {
        self.kind.block_type()
    }

    pub fn child_ids(&self) -> Vec<&BlockId> {
        self.children.iter().map(|child| &child.block_id).collect()
    }

    pub fn position_of(&self, id: &BlockId) -> Option<usize> {
        self.children.iter().position(|child| &child.block_id == id)
    }

    /// Number of element nodes in this subtree, including self
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(ElementNode::subtree_len).sum::<usize>()
    }

    /// Whether `id` is this node or one of its descendants
    pub fn contains(&self, id: &BlockId) -> bool {
        &self.block_id == id || self.children.iter().any(|child| child.contains(id))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn element(id: &str, ty: BlockType, text: &str) -> ElementNode {
        let text_id = ty.has_text().then(|| TextId::new(format!("t-{id}")));
        let runs = if text.is_empty() {
            Vec::new()
        } else {
            vec![InlineRun::plain(text)]
        };
        ElementNode {
            block_id: BlockId::from(id),
            kind: BlockKind::resolve(ty, &Attributes::new()),
            attributes: Attributes::new(),
            children_id: ChildrenId::new(format!("c-{id}")),
            text: TextRun::new(text_id, runs),
            children: Vec::new(),
        }
    }

    pub fn paragraph(id: &str, text: &str) -> ElementNode {
        element(id, BlockType::Paragraph, text)
    }

    pub fn with_children(mut node: ElementNode, children: Vec<ElementNode>) -> ElementNode {
        node.children = children;
        node
    }
}
