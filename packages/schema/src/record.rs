use crate::{Attributes, BlockId, BlockKind, BlockType, ChildrenId, Result, TextId};
use serde::{Deserialize, Serialize};

/// External type tag for text sequences in the text map
pub const EXTERNAL_TYPE_TEXT: &str = "text";

/// Field keys of a block's map in the `blocks` map. Each field is its own
/// CRDT entry, so concurrent writes to different fields of one block merge.
pub mod field {
    pub const ID: &str = "id";
    pub const TY: &str = "ty";
    pub const PARENT: &str = "parent";
    pub const CHILDREN: &str = "children";
    pub const EXTERNAL_ID: &str = "external_id";
    pub const EXTERNAL_TYPE: &str = "external_type";
    /// Attribute payload, one JSON string
    pub const DATA: &str = "data";
}

/// A block as stored in the `blocks` map, one entry per field.
///
/// `ty` stays a raw string so a type this build does not know survives a
/// read-modify-write by a local command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: BlockId,
    pub ty: String,
    #[serde(default)]
    pub parent: Option<BlockId>,
    pub children: ChildrenId,
    #[serde(default)]
    pub external_id: Option<TextId>,
    #[serde(default)]
    pub external_type: Option<String>,
    #[serde(default)]
    pub data: Attributes,
}

impl BlockRecord {
    /// New record with fresh children and (for textual types) text ids
    pub fn new(ty: BlockType, parent: Option<BlockId>, data: Attributes) -> Self {
        let external_id = ty.has_text().then(TextId::generate);
        Self {
            id: BlockId::generate(),
            ty: ty.as_str().to_string(),
            parent,
            children: ChildrenId::generate(),
            external_type: external_id.as_ref().map(|_| EXTERNAL_TYPE_TEXT.to_string()),
            external_id,
            data,
        }
    }

    /// Attribute payload as stored under [`field::DATA`]
    pub fn data_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.data)?)
    }

    /// Parse a stored attribute payload. An empty string is an empty payload.
    pub fn parse_data(json: &str) -> Result<Attributes> {
        if json.trim().is_empty() {
            return Ok(Attributes::new());
        }
        Ok(serde_json::from_str(json)?)
    }

    pub fn block_type(&self) -> BlockType {
        match BlockType::parse(&self.ty) {
            Some(ty) => ty,
            None => {
                tracing::warn!(block_id = %self.id, ty = %self.ty, "unknown block type, treating as paragraph");
                BlockType::Paragraph
            }
        }
    }
}

/// A decoded block with its kind resolved
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    pub attributes: Attributes,
    pub parent: Option<BlockId>,
    pub children_id: ChildrenId,
    pub text_id: Option<TextId>,
}

impl Block {
    pub fn block_type(&self) -> BlockType {
        self.kind.block_type()
    }
}

impl From<BlockRecord> for Block {
    fn from(record: BlockRecord) -> Self {
        let kind = BlockKind::resolve(record.block_type(), &record.data);
        Block {
            id: record.id,
            kind,
            attributes: record.data,
            parent: record.parent,
            children_id: record.children,
            text_id: record.external_id,
        }
    }
}
