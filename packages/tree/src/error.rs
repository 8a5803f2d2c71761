use crate::Path;
use blocksync_schema::BlockId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("No node at path {0:?}")]
    InvalidPath(Path),

    #[error("Expected block {expected} at {path:?}, found {found}")]
    NodeMismatch {
        path: Path,
        expected: BlockId,
        found: BlockId,
    },

    #[error("The root node cannot be inserted or removed")]
    RootImmutable,
}

pub type Result<T> = std::result::Result<T, TreeError>;
