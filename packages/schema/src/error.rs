use thiserror::Error;

/// Errors raised while decoding or validating schema values
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Invalid block record: {0}")]
    InvalidRecord(#[from] serde_json::Error),

    #[error("Block {block_id} is missing field {field}")]
    MissingField { block_id: String, field: &'static str },

    #[error("Invalid attribute {key}: {reason}")]
    InvalidAttribute { key: String, reason: String },

    #[error("Offset {offset} is outside text of length {len}")]
    OffsetOutOfBounds { offset: u32, len: u32 },

    #[error("Offset {offset} splits a surrogate pair")]
    SplitsCodePoint { offset: u32 },
}

pub type Result<T> = std::result::Result<T, SchemaError>;
