//! # Block Operations
//!
//! Typed edits on a [`CrdtDocument`], one per command. Every operation
//! checks its preconditions against the state visible in `txn` before the
//! first write, so a rejected edit leaves the document untouched.
//!
//! ## Semantics
//!
//! ### Split
//! - The new block goes right after the original in the same parent and
//!   takes over the original's children
//! - An expanded toggle keeps its children; the new block becomes its first
//!   child instead
//! - Splitting the page title creates the page's first block
//! - Write order: new record, children insert, child transfer, text delete,
//!   text insert
//!
//! ### Merge
//! - Backward merges the block into the previous block in document order
//! - Forward merges the next block in document order into this one
//! - The source's children land where the source was when the target is its
//!   parent, at the front of the target's children otherwise, or right
//!   after the target when it cannot hold children
//!
//! ### Move, indent, outdent
//! - The block keeps its id, text and children
//! - Fails if the block would end up inside its own subtree

use crate::{CrdtDocument, Result, SyncError};
use blocksync_schema::{
    check_boundary, content_len, split_runs, Attributes, Block, BlockId, BlockKind, BlockRecord, BlockType,
    InlineRun, TextId, EXTERNAL_TYPE_TEXT,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;
use yrs::TransactionMut;

/// Which neighbour a merge joins with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeDirection {
    /// Into the previous block in document order
    Backward,
    /// Pull the next block in document order into this one
    Forward,
}

impl CrdtDocument {
    /// Create a block under `parent` at `index` (clamped). Returns its id.
    pub fn insert_block(
        &self,
        txn: &mut TransactionMut,
        parent: &BlockId,
        index: usize,
        ty: BlockType,
        attributes: Attributes,
        text: &[InlineRun],
    ) -> Result<BlockId> {
        let parent_record = self.record(&*txn, parent)?;
        ensure_accepts_children(&parent_record)?;
        if ty == BlockType::Page {
            return Err(SyncError::invalid("a document has exactly one page block"));
        }
        if !text.is_empty() && !ty.has_text() {
            return Err(SyncError::invalid(format!("{ty} blocks carry no text")));
        }

        let record = BlockRecord::new(ty, Some(parent.clone()), attributes);
        self.insert_block_record(txn, &record, text)?;
        self.insert_child(txn, &parent_record.children, index, &record.id)?;
        debug!(block_id = %record.id, %parent, index, %ty, "inserted block");
        Ok(record.id)
    }

    /// Remove a block and its whole subtree
    pub fn delete_block(&self, txn: &mut TransactionMut, id: &BlockId) -> Result<()> {
        self.ensure_not_page(&*txn, id, "delete")?;
        let (parent, index) = self.parent_of(&*txn, id)?;
        let parent_record = self.record(&*txn, &parent)?;
        let subtree = self.subtree_records(&*txn, id)?;

        self.remove_child(txn, &parent_record.children, index)?;
        for record in &subtree {
            self.remove_block_record(txn, record);
        }
        debug!(block_id = %id, removed = subtree.len(), "deleted block");
        Ok(())
    }

    /// Move a block under `parent`. `index` counts positions after the
    /// block has left its old place and is clamped to the end.
    pub fn move_block(
        &self,
        txn: &mut TransactionMut,
        id: &BlockId,
        parent: &BlockId,
        index: usize,
    ) -> Result<()> {
        self.ensure_not_page(&*txn, id, "move")?;
        let target = self.record(&*txn, parent)?;
        ensure_accepts_children(&target)?;
        if self.is_within(&*txn, parent, id)? {
            return Err(SyncError::invalid(format!(
                "cannot move {id} into its own subtree"
            )));
        }
        let mut record = self.record(&*txn, id)?;
        let (old_parent, old_index) = self.parent_of(&*txn, id)?;
        let old_children = self.record(&*txn, &old_parent)?.children;

        self.remove_child(txn, &old_children, old_index)?;
        self.insert_child(txn, &target.children, index, id)?;
        if record.parent.as_ref() != Some(parent) {
            record.parent = Some(parent.clone());
            self.write_record(txn, &record)?;
        }
        debug!(block_id = %id, from = %old_parent, to = %parent, index, "moved block");
        Ok(())
    }

    /// Set one attribute. A null value removes the key.
    pub fn set_attribute(
        &self,
        txn: &mut TransactionMut,
        id: &BlockId,
        key: &str,
        value: Value,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(SyncError::invalid("attribute key is empty"));
        }
        let mut record = self.record(&*txn, id)?;
        let changed = if value.is_null() {
            record.data.remove(key).is_some()
        } else {
            record.data.insert(key.to_string(), value.clone()) != Some(value)
        };
        if changed {
            self.write_record(txn, &record)?;
        }
        Ok(())
    }

    /// Insert `content` at a UTF-16 `offset`. Empty `attributes` let the
    /// text take on the surrounding formatting.
    pub fn insert_text_at(
        &self,
        txn: &mut TransactionMut,
        text_id: &TextId,
        offset: u32,
        content: &str,
        attributes: &Attributes,
    ) -> Result<()> {
        let runs = self.text_runs(&*txn, text_id)?;
        check_boundary(&runs, offset)?;
        if content.is_empty() {
            return Ok(());
        }
        self.insert_text(txn, text_id, offset, content, attributes)
    }

    /// Delete `length` UTF-16 units starting at `offset`
    pub fn delete_text_range(
        &self,
        txn: &mut TransactionMut,
        text_id: &TextId,
        offset: u32,
        length: u32,
    ) -> Result<()> {
        let runs = self.text_runs(&*txn, text_id)?;
        let end = offset
            .checked_add(length)
            .ok_or_else(|| SyncError::invalid("text range overflows"))?;
        check_boundary(&runs, offset)?;
        check_boundary(&runs, end)?;
        self.delete_text(txn, text_id, offset, length)
    }

    /// Split a block at a UTF-16 `offset`. The tail moves into a new block
    /// placed right after the original, which also takes over the original's
    /// children. An expanded toggle keeps its children and gets the new block
    /// as its first child. Splitting the page title creates the page's first
    /// child. Returns the new block's id.
    pub fn split_block(&self, txn: &mut TransactionMut, id: &BlockId, offset: u32) -> Result<BlockId> {
        let record = self.record(&*txn, id)?;
        let text_id = record
            .external_id
            .clone()
            .ok_or_else(|| SyncError::invalid(format!("block {id} has no text to split")))?;
        let runs = self.text_runs(&*txn, &text_id)?;
        let (head, tail) = split_runs(&runs, offset)?;
        let tail_len = content_len(&runs) - content_len(&head);

        let block = Block::from(record.clone());
        let nests = record.parent.is_none()
            || matches!(block.kind, BlockKind::Toggle { collapsed: false, .. });
        let (parent, index) = if nests {
            (record.id.clone(), 0)
        } else {
            let (parent, index) = self.parent_of(&*txn, id)?;
            (parent, index + 1)
        };
        let parent_children = self.record(&*txn, &parent)?.children;
        let (ty, attributes) = if record.parent.is_none() {
            (BlockType::Paragraph, Attributes::new())
        } else {
            block.kind.split_target()
        };
        let mut transferred = Vec::new();
        if !nests {
            for child in self.children(&*txn, &record.children)? {
                transferred.push(self.record(&*txn, &child)?);
            }
        }

        let created = BlockRecord::new(ty, Some(parent.clone()), attributes);
        let created_text = created
            .external_id
            .clone()
            .ok_or_else(|| SyncError::invalid(format!("{ty} blocks carry no text")))?;
        self.insert_block_record(txn, &created, &[])?;
        self.insert_child(txn, &parent_children, index, &created.id)?;
        for (at, mut child) in transferred.into_iter().enumerate() {
            self.remove_child(txn, &record.children, 0)?;
            self.insert_child(txn, &created.children, at, &child.id)?;
            child.parent = Some(created.id.clone());
            self.write_record(txn, &child)?;
        }
        self.delete_text(txn, &text_id, offset, tail_len)?;
        self.append_runs(txn, &created_text, &tail)?;
        debug!(block_id = %id, new_block = %created.id, offset, nested = nests, "split block");
        Ok(created.id)
    }

    /// Merge two neighbouring blocks. Returns the id of the block that
    /// survives and now holds both texts.
    pub fn merge_block(
        &self,
        txn: &mut TransactionMut,
        id: &BlockId,
        direction: MergeDirection,
    ) -> Result<BlockId> {
        let (target_id, source_id) = match direction {
            MergeDirection::Backward => {
                let previous = self
                    .previous_in_order(&*txn, id)?
                    .ok_or_else(|| SyncError::invalid(format!("no block before {id} to merge into")))?;
                (previous, id.clone())
            }
            MergeDirection::Forward => {
                let next = self
                    .next_in_order(&*txn, id)?
                    .ok_or_else(|| SyncError::invalid(format!("no block after {id} to merge")))?;
                (id.clone(), next)
            }
        };

        let target = self.record(&*txn, &target_id)?;
        let source = self.record(&*txn, &source_id)?;
        self.ensure_not_page(&*txn, &source_id, "merge")?;
        let target_text = target
            .external_id
            .clone()
            .ok_or_else(|| SyncError::invalid(format!("block {target_id} has no text to merge into")))?;
        let source_runs = match &source.external_id {
            Some(text_id) => self.text_runs(&*txn, text_id)?,
            None => {
                return Err(SyncError::invalid(format!("block {source_id} has no text to merge")));
            }
        };
        let source_children = self.children(&*txn, &source.children)?;
        let mut moved = Vec::with_capacity(source_children.len());
        for child in &source_children {
            moved.push(self.record(&*txn, child)?);
        }
        let (source_parent, source_index) = self.parent_of(&*txn, &source_id)?;
        let source_parent_children = self.record(&*txn, &source_parent)?.children;
        let target_accepts_children = target.block_type().accepts_children();
        if !target_accepts_children {
            self.parent_of(&*txn, &target_id)?;
        }

        // Detach the source first so sibling indices below are final
        self.remove_child(txn, &source_parent_children, source_index)?;

        let (destination, destination_parent, mut at) = if target_accepts_children {
            let at = if source_parent == target_id { source_index } else { 0 };
            (target.children.clone(), target_id.clone(), at)
        } else {
            let (parent, index) = self.parent_of(&*txn, &target_id)?;
            (self.record(&*txn, &parent)?.children, parent, index + 1)
        };
        for mut child in moved {
            self.insert_child(txn, &destination, at, &child.id)?;
            child.parent = Some(destination_parent.clone());
            self.write_record(txn, &child)?;
            at += 1;
        }

        self.append_runs(txn, &target_text, &source_runs)?;
        self.remove_block_record(txn, &source);
        debug!(target = %target_id, source = %source_id, ?direction, "merged blocks");
        Ok(target_id)
    }

    /// Nest a block under its previous sibling, as its last child
    pub fn indent_block(&self, txn: &mut TransactionMut, id: &BlockId) -> Result<()> {
        self.ensure_not_page(&*txn, id, "indent")?;
        let (parent, index) = self.parent_of(&*txn, id)?;
        if index == 0 {
            return Err(SyncError::invalid(format!("block {id} has no previous sibling")));
        }
        let siblings = self.children_of(&*txn, &parent)?;
        let previous = siblings
            .get(index - 1)
            .cloned()
            .ok_or_else(|| SyncError::invalid(format!("block {id} has no previous sibling")))?;
        let len = self.children_of(&*txn, &previous)?.len();
        self.move_block(txn, id, &previous, len)
    }

    /// Lift a block out of its parent, right after the parent
    pub fn outdent_block(&self, txn: &mut TransactionMut, id: &BlockId) -> Result<()> {
        self.ensure_not_page(&*txn, id, "outdent")?;
        let (parent, _) = self.parent_of(&*txn, id)?;
        if self.page_id(&*txn).as_ref() == Some(&parent) {
            return Err(SyncError::invalid(format!("block {id} is already at the top level")));
        }
        let (grandparent, parent_index) = self.parent_of(&*txn, &parent)?;
        self.move_block(txn, id, &grandparent, parent_index + 1)
    }

    /// Turn a block into another type. Ids, text and children are kept;
    /// `attributes` are laid over the existing payload.
    pub fn change_type(
        &self,
        txn: &mut TransactionMut,
        id: &BlockId,
        ty: BlockType,
        attributes: Attributes,
    ) -> Result<()> {
        self.ensure_not_page(&*txn, id, "change the type of")?;
        if ty == BlockType::Page {
            return Err(SyncError::invalid("a document has exactly one page block"));
        }
        let mut record = self.record(&*txn, id)?;
        if !ty.accepts_children() && !self.children(&*txn, &record.children)?.is_empty() {
            return Err(SyncError::invalid(format!("{ty} blocks cannot hold children")));
        }

        record.ty = ty.as_str().to_string();
        record.data.extend(attributes);
        let needs_text = ty.has_text() && record.external_id.is_none();
        if needs_text {
            record.external_id = Some(TextId::generate());
            record.external_type = Some(EXTERNAL_TYPE_TEXT.to_string());
        }
        self.write_record(txn, &record)?;
        if let Some(text_id) = record.external_id.as_ref().filter(|_| needs_text) {
            self.create_text(txn, text_id);
        }
        Ok(())
    }

    // ---- helpers -------------------------------------------------------

    fn ensure_not_page<T: yrs::ReadTxn>(&self, txn: &T, id: &BlockId, action: &str) -> Result<()> {
        if self.page_id(txn).as_ref() == Some(id) {
            return Err(SyncError::invalid(format!("cannot {action} the page block")));
        }
        Ok(())
    }

    /// Whether `id` is `ancestor` or sits below it
    fn is_within<T: yrs::ReadTxn>(&self, txn: &T, id: &BlockId, ancestor: &BlockId) -> Result<bool> {
        let page = self.page_id(txn);
        let mut seen = HashSet::new();
        let mut current = id.clone();
        loop {
            if &current == ancestor {
                return Ok(true);
            }
            if page.as_ref() == Some(&current) || !seen.insert(current.clone()) {
                return Ok(false);
            }
            current = self.parent_of(txn, &current)?.0;
        }
    }

    /// Records of `id` and every block below it, parents first
    fn subtree_records<T: yrs::ReadTxn>(&self, txn: &T, id: &BlockId) -> Result<Vec<BlockRecord>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let record = self.record(txn, &current)?;
            let children = self.children(txn, &record.children).unwrap_or_default();
            stack.extend(children.into_iter().rev());
            out.push(record);
        }
        Ok(out)
    }

    /// The block before `id` in document order, never the page
    fn previous_in_order<T: yrs::ReadTxn>(&self, txn: &T, id: &BlockId) -> Result<Option<BlockId>> {
        if self.page_id(txn).as_ref() == Some(id) {
            return Ok(None);
        }
        let (parent, index) = self.parent_of(txn, id)?;
        if index == 0 {
            let is_page = self.page_id(txn).as_ref() == Some(&parent);
            return Ok((!is_page).then_some(parent));
        }
        let siblings = self.children_of(txn, &parent)?;
        let mut current = match siblings.get(index - 1) {
            Some(previous) => previous.clone(),
            None => return Ok(None),
        };
        // Descend to the last descendant of the previous sibling
        let mut seen = HashSet::new();
        while seen.insert(current.clone()) {
            match self.children_of(txn, &current)?.last() {
                Some(last) => current = last.clone(),
                None => break,
            }
        }
        Ok(Some(current))
    }

    /// The block after `id` in document order
    fn next_in_order<T: yrs::ReadTxn>(&self, txn: &T, id: &BlockId) -> Result<Option<BlockId>> {
        if let Some(first) = self.children_of(txn, id)?.first() {
            return Ok(Some(first.clone()));
        }
        let page = self.page_id(txn);
        let mut current = id.clone();
        while page.as_ref() != Some(&current) {
            let (parent, index) = self.parent_of(txn, &current)?;
            if let Some(next) = self.children_of(txn, &parent)?.get(index + 1) {
                return Ok(Some(next.clone()));
            }
            current = parent;
        }
        Ok(None)
    }
}

fn ensure_accepts_children(record: &BlockRecord) -> Result<()> {
    let ty = record.block_type();
    if !ty.accepts_children() {
        return Err(SyncError::invalid(format!(
            "{ty} block {} cannot hold children",
            record.id
        )));
    }
    Ok(())
}
