//! # Command Translator
//!
//! Discrete user-intent edits from the rendering surface, translated into
//! [`CrdtDocument`] operations.
//!
//! Commands never touch the local tree. Their effect comes back as the
//! change events of the transaction they ran in, and the Event Translator
//! applies those like any remote batch.
//!
//! - Each command runs in one yrs transaction, so its echo is one batch
//! - Validation happens before the first write; a rejected command leaves
//!   the document unchanged

use crate::operations::MergeDirection;
use crate::{CrdtDocument, Result, SyncError};
use blocksync_schema::{Attributes, BlockId, BlockType, InlineRun, TextId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use yrs::TransactionMut;

/// User-intent edits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Create a block under `parent` at `index`
    InsertBlock {
        parent: BlockId,
        index: usize,
        ty: BlockType,
        #[serde(default)]
        attributes: Attributes,
        /// Initial text for textual blocks
        #[serde(default)]
        text: Vec<InlineRun>,
    },

    /// Remove a block and everything below it
    DeleteBlock { block_id: BlockId },

    MoveBlock {
        block_id: BlockId,
        parent: BlockId,
        index: usize,
    },

    /// Set one attribute; `null` removes it
    SetAttribute {
        block_id: BlockId,
        key: String,
        value: Value,
    },

    InsertText {
        text_id: TextId,
        offset: u32,
        content: String,
        #[serde(default)]
        attributes: Attributes,
    },

    DeleteText {
        text_id: TextId,
        offset: u32,
        length: u32,
    },

    /// Split at a cursor offset (UTF-16 units)
    SplitBlock { block_id: BlockId, offset: u32 },

    MergeBlock {
        block_id: BlockId,
        direction: MergeDirection,
    },

    Indent { block_id: BlockId },

    Outdent { block_id: BlockId },

    /// Turn a block into another type, keeping ids, text and children
    ChangeType {
        block_id: BlockId,
        ty: BlockType,
        #[serde(default)]
        attributes: Attributes,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::InsertBlock { .. } => "insert_block",
            Command::DeleteBlock { .. } => "delete_block",
            Command::MoveBlock { .. } => "move_block",
            Command::SetAttribute { .. } => "set_attribute",
            Command::InsertText { .. } => "insert_text",
            Command::DeleteText { .. } => "delete_text",
            Command::SplitBlock { .. } => "split_block",
            Command::MergeBlock { .. } => "merge_block",
            Command::Indent { .. } => "indent",
            Command::Outdent { .. } => "outdent",
            Command::ChangeType { .. } => "change_type",
        }
    }

    /// Run against `document` inside an open transaction
    pub fn apply(&self, document: &CrdtDocument, txn: &mut TransactionMut) -> Result<CommandOutcome> {
        match self {
            Command::InsertBlock {
                parent,
                index,
                ty,
                attributes,
                text,
            } => document
                .insert_block(txn, parent, *index, *ty, attributes.clone(), text)
                .map(CommandOutcome::block),

            Command::DeleteBlock { block_id } => {
                document.delete_block(txn, block_id).map(|_| CommandOutcome::none())
            }

            Command::MoveBlock {
                block_id,
                parent,
                index,
            } => document
                .move_block(txn, block_id, parent, *index)
                .map(|_| CommandOutcome::none()),

            Command::SetAttribute {
                block_id,
                key,
                value,
            } => document
                .set_attribute(txn, block_id, key, value.clone())
                .map(|_| CommandOutcome::none()),

            Command::InsertText {
                text_id,
                offset,
                content,
                attributes,
            } => document
                .insert_text_at(txn, text_id, *offset, content, attributes)
                .map(|_| CommandOutcome::none()),

            Command::DeleteText {
                text_id,
                offset,
                length,
            } => document
                .delete_text_range(txn, text_id, *offset, *length)
                .map(|_| CommandOutcome::none()),

            Command::SplitBlock { block_id, offset } => document
                .split_block(txn, block_id, *offset)
                .map(CommandOutcome::block),

            Command::MergeBlock {
                block_id,
                direction,
            } => document
                .merge_block(txn, block_id, *direction)
                .map(CommandOutcome::block),

            Command::Indent { block_id } => {
                document.indent_block(txn, block_id).map(|_| CommandOutcome::none())
            }

            Command::Outdent { block_id } => {
                document.outdent_block(txn, block_id).map(|_| CommandOutcome::none())
            }

            Command::ChangeType {
                block_id,
                ty,
                attributes,
            } => document
                .change_type(txn, block_id, *ty, attributes.clone())
                .map(|_| CommandOutcome::none()),
        }
    }
}

/// Result of a command
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandOutcome {
    /// Block created by an insert or split, or the survivor of a merge
    pub block_id: Option<BlockId>,
}

impl CommandOutcome {
    fn none() -> Self {
        Self::default()
    }

    fn block(block_id: BlockId) -> Self {
        Self {
            block_id: Some(block_id),
        }
    }
}

/// Applies commands to a document, one transaction each
pub struct CommandTranslator<'doc> {
    document: &'doc CrdtDocument,
}

impl<'doc> CommandTranslator<'doc> {
    pub fn new(document: &'doc CrdtDocument) -> Self {
        Self { document }
    }

    /// Run one command. The transaction commits when this returns, which
    /// is when the document emits the command's change events.
    pub fn execute(&self, command: &Command) -> Result<CommandOutcome> {
        debug!(command = command.name(), "executing command");
        let mut txn = self.document.transact_mut();
        command.apply(self.document, &mut txn)
    }

    /// Run several commands in one transaction. Stops at the first rejected
    /// command; the ones before it stay applied. When some did, the error is
    /// [`SyncError::BatchFailed`] carrying their outcomes.
    pub fn execute_all(&self, commands: &[Command]) -> Result<Vec<CommandOutcome>> {
        let mut txn = self.document.transact_mut();
        let mut applied = Vec::with_capacity(commands.len());
        for (index, command) in commands.iter().enumerate() {
            debug!(command = command.name(), index, "executing command");
            match command.apply(self.document, &mut txn) {
                Ok(outcome) => applied.push(outcome),
                Err(e) if applied.is_empty() => return Err(e),
                Err(e) => {
                    return Err(SyncError::BatchFailed {
                        index,
                        applied,
                        source: Box::new(e),
                    })
                }
            }
        }
        Ok(applied)
    }
}
