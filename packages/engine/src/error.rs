use crate::CommandOutcome;
use blocksync_schema::{BlockId, ChildrenId, DocId, SchemaError, TextId};
use blocksync_tree::TreeError;
use thiserror::Error;

/// Errors surfaced by the sync engine
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Block not found: {0}")]
    BlockNotFound(BlockId),

    #[error("Text not found: {0}")]
    TextNotFound(TextId),

    #[error("Children collection not found: {0}")]
    ChildrenNotFound(ChildrenId),

    #[error("Document has no page root")]
    MissingRoot,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// A batch stopped at command `index`. The commands before it stay
    /// applied and their outcomes are in `applied`.
    #[error("Command {index} of the batch failed: {source}")]
    BatchFailed {
        index: usize,
        applied: Vec<CommandOutcome>,
        source: Box<SyncError>,
    },

    #[error("Failed to decode update: {0}")]
    Decode(String),

    #[error("Failed to apply update: {0}")]
    Apply(String),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    /// The local tree could not be brought back in line with the CRDT state.
    /// The caller should reload the document from storage.
    #[error("Resync required for document {doc_id}: {reason}")]
    ResyncRequired { doc_id: DocId, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Session not found: {0}")]
    SessionNotFound(DocId),

    #[error("Session already open: {0}")]
    SessionExists(DocId),
}

impl SyncError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        SyncError::InvalidCommand(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
