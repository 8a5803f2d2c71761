//! Event Translator - applies CRDT change batches to the local tree.
//!
//! ## Approach
//!
//! - Records are applied in emission order, one [`TreeOp`] at a time, with
//!   the [`RelationalIndex`] repaired after every op.
//! - Mirror subtrees are always built from the current CRDT state. Nested
//!   objects created in the same transaction as their parent emit no events
//!   of their own, so the events alone never describe a new subtree fully.
//! - An insert whose parent is not mounted yet is deferred. Deferred inserts
//!   are retried at the end of the batch; if the parent still is not mounted,
//!   its path is synthesized by walking the CRDT parent chain up to a mounted
//!   ancestor.
//! - After the batch, each touched parent's children are compared with the
//!   CRDT collection and reconciled on mismatch. A mismatch that survives
//!   reconciliation raises [`SyncSignal::ResyncRequired`].
//!
//! A block listed in more than one children collection (concurrent moves)
//! is mounted under the parent named by its record, so every replica picks
//! the same place.

use crate::accessors::DocumentView;
use crate::capture::{ChangeBatch, ChangeRecord};
use crate::{EngineConfig, Result, SyncError};
use blocksync_schema::{Block, BlockId, ChildrenId, InlineRun, TextId};
use blocksync_tree::{
    child_path, is_ancestor, parent_and_index, ElementNode, LocalTree, Lookup, Path,
    RelationalIndex, TextRun, TreeError, TreeOp,
};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Read access to authoritative document state
pub trait BlockSource {
    fn page_id(&self) -> Option<BlockId>;
    fn block(&self, id: &BlockId) -> Option<Block>;
    fn children(&self, children_id: &ChildrenId) -> Option<Vec<BlockId>>;
    fn text(&self, text_id: &TextId) -> Option<Vec<InlineRun>>;
    fn owner_of_children(&self, children_id: &ChildrenId) -> Option<BlockId>;
}

impl BlockSource for DocumentView<'_> {
    fn page_id(&self) -> Option<BlockId> {
        DocumentView::page_id(self)
    }

    fn block(&self, id: &BlockId) -> Option<Block> {
        DocumentView::block(self, id).ok()
    }

    fn children(&self, children_id: &ChildrenId) -> Option<Vec<BlockId>> {
        DocumentView::children(self, children_id).ok()
    }

    fn text(&self, text_id: &TextId) -> Option<Vec<InlineRun>> {
        self.text_runs(text_id).ok()
    }

    fn owner_of_children(&self, children_id: &ChildrenId) -> Option<BlockId> {
        DocumentView::owner_of_children(self, children_id)
    }
}

/// Fatal condition surfaced to the owner of the session
#[derive(Debug, Clone, PartialEq)]
pub enum SyncSignal {
    ResyncRequired { reason: String },
}

/// Why a record was skipped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("unresolvable reference: {0}")]
    Unresolvable(String),

    #[error("index inconsistent for block {0}")]
    Inconsistent(BlockId),

    #[error("moving {0} would make it its own ancestor")]
    Cycle(BlockId),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub record: ChangeRecord,
    pub reason: SkipReason,
}

/// What one batch did to the local tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Local edits in the order they were applied
    pub ops: Vec<TreeOp>,
    pub skipped: Vec<SkippedRecord>,
    /// Parents whose children had to be reconciled after the batch
    pub repaired: Vec<BlockId>,
    pub signal: Option<SyncSignal>,
}

impl BatchReport {
    pub fn is_noop(&self) -> bool {
        self.ops.is_empty() && self.skipped.is_empty() && self.signal.is_none()
    }
}

#[derive(Debug)]
struct PendingInsert {
    owner: BlockId,
    record: ChangeRecord,
    index: usize,
    ids: Vec<BlockId>,
}

#[derive(Default)]
struct BatchState {
    report: BatchReport,
    pending: Vec<PendingInsert>,
    pending_texts: Vec<(TextId, ChangeRecord)>,
    /// Parents whose children collections changed in this batch
    touched: BTreeSet<BlockId>,
    /// Parents that must be reconciled whatever the config says
    reconcile: BTreeSet<BlockId>,
}

impl BatchState {
    fn signal(&mut self, reason: String) {
        if self.report.signal.is_none() {
            tracing::error!(%reason, "resync required");
            self.report.signal = Some(SyncSignal::ResyncRequired { reason });
        }
    }
}

/// Owns the local tree and its index. Nothing else mutates either.
pub struct EventTranslator {
    tree: LocalTree,
    index: RelationalIndex,
    max_deferred_passes: u32,
    verify_touched_parents: bool,
}

impl EventTranslator {
    /// Build the whole local tree from document state
    pub fn load(source: &dyn BlockSource, config: &EngineConfig) -> Result<Self> {
        let tree = build_tree(source)?;
        let index = RelationalIndex::build(&tree);
        Ok(Self {
            tree,
            index,
            max_deferred_passes: config.max_deferred_passes,
            verify_touched_parents: config.verify_touched_parents,
        })
    }

    /// Discard the local tree and rebuild it from document state
    pub fn reload(&mut self, source: &dyn BlockSource) -> Result<()> {
        self.tree = build_tree(source)?;
        self.index = RelationalIndex::build(&self.tree);
        info!(blocks = self.tree.node_count(), "local tree reloaded");
        Ok(())
    }

    pub fn tree(&self) -> &LocalTree {
        &self.tree
    }

    pub fn index(&self) -> &RelationalIndex {
        &self.index
    }

    /// Apply one batch. Records that cannot be applied are skipped and
    /// reported; the rest of the batch still goes through.
    pub fn apply_batch(&mut self, batch: &ChangeBatch, source: &dyn BlockSource) -> BatchReport {
        let mut state = BatchState::default();

        for record in &batch.records {
            if let Err(reason) = self.apply_record(record, source, &mut state) {
                warn!(path = ?record.path(), %reason, "skipping change record");
                state.report.skipped.push(SkippedRecord {
                    record: record.clone(),
                    reason,
                });
            }
        }

        self.resolve_pending(source, &mut state);
        self.resolve_pending_texts(source, &mut state);
        self.reconcile_parents(source, &mut state);

        debug!(
            records = batch.len(),
            ops = state.report.ops.len(),
            skipped = state.report.skipped.len(),
            "batch applied"
        );
        state.report
    }

    /// Blocks whose mirror disagrees with document state: children order,
    /// kind, attributes or text.
    pub fn diverged(&self, source: &dyn BlockSource) -> Vec<BlockId> {
        fn check(node: &ElementNode, source: &dyn BlockSource, out: &mut Vec<BlockId>) {
            let matches = source.block(&node.block_id).is_some_and(|block| {
                let runs = block
                    .text_id
                    .as_ref()
                    .and_then(|id| source.text(id))
                    .unwrap_or_default();
                block.kind == node.kind
                    && block.attributes == node.attributes
                    && block.text_id == node.text.text_id
                    && runs == node.text.runs
            });
            let desired = claimed_children(source, &node.block_id, &node.children_id);
            let local: Vec<BlockId> = node.children.iter().map(|c| c.block_id.clone()).collect();
            if !matches || desired != local {
                out.push(node.block_id.clone());
            }
            for child in &node.children {
                check(child, source, out);
            }
        }

        let mut out = Vec::new();
        if source.page_id().as_ref() != Some(self.tree.root_id()) {
            out.push(self.tree.root_id().clone());
            return out;
        }
        check(self.tree.root(), source, &mut out);
        out
    }

    fn apply_record(
        &mut self,
        record: &ChangeRecord,
        source: &dyn BlockSource,
        state: &mut BatchState,
    ) -> std::result::Result<(), SkipReason> {
        match record {
            ChangeRecord::ChildrenInserted {
                children_id,
                index,
                ids,
            } => {
                let owner = self.owner_of(children_id, source).ok_or_else(|| {
                    SkipReason::Unresolvable(format!("no block owns children {children_id}"))
                })?;
                if self.find(&owner, state)?.is_none() {
                    debug!(%owner, "parent not mounted yet, deferring insert");
                    state.pending.push(PendingInsert {
                        owner,
                        record: record.clone(),
                        index: *index,
                        ids: ids.clone(),
                    });
                    return Ok(());
                }
                self.mount_children(&owner, *index, ids, source, state)
            }
            ChangeRecord::ChildrenRemoved {
                children_id, ids, ..
            } => {
                if let Some(owner) = self.index.block_for_children(children_id) {
                    state.touched.insert(owner.clone());
                }
                for id in ids {
                    self.unmount_from(children_id, id, state)?;
                }
                Ok(())
            }
            ChangeRecord::ChildrenSet { children_id } | ChangeRecord::ChildrenDropped { children_id } => {
                if let Some(owner) = self.index.block_for_children(children_id) {
                    state.reconcile.insert(owner.clone());
                }
                Ok(())
            }
            ChangeRecord::BlockSet { block_id, new, .. } => {
                let Some(path) = self.find(block_id, state)? else {
                    // Not mounted. If its parent is, let reconciliation place it.
                    if let Some(parent) = &new.parent {
                        if self.index.contains(parent) {
                            state.reconcile.insert(parent.clone());
                        }
                    }
                    return Ok(());
                };
                // A parent change without matching children events (the
                // record lost a concurrent write) is settled by reconciling
                let local_parent = parent_and_index(&path)
                    .and_then(|(parent_path, _)| self.tree.get(parent_path))
                    .map(|parent| parent.block_id.clone());
                if let (Some(local), Some(recorded)) = (local_parent, &new.parent) {
                    if &local != recorded {
                        state.reconcile.insert(local);
                        if self.index.contains(recorded) {
                            state.reconcile.insert(recorded.clone());
                        }
                    }
                }
                self.update_node(path, new.clone().into(), source, state)
            }
            ChangeRecord::BlockRemoved { block_id, .. } => {
                if let Some(path) = self.find(block_id, state)? {
                    if let Some((parent_path, _)) = parent_and_index(&path) {
                        if let Some(parent) = self.tree.get(parent_path) {
                            state.reconcile.insert(parent.block_id.clone());
                        }
                    }
                }
                Ok(())
            }
            ChangeRecord::TextChanged { text_id } => {
                if self.index.block_for_text(text_id).is_none() {
                    state.pending_texts.push((text_id.clone(), record.clone()));
                    return Ok(());
                }
                self.refresh_text(text_id, source, state)
            }
            ChangeRecord::TextDropped { text_id } => {
                // Usually the owner is being deleted in the same batch
                let still_used = self
                    .index
                    .block_for_text(text_id)
                    .and_then(|owner| source.block(owner))
                    .is_some_and(|block| block.text_id.as_ref() == Some(text_id));
                if still_used {
                    self.refresh_text(text_id, source, state)?;
                }
                Ok(())
            }
        }
    }

    // ---- structure -----------------------------------------------------

    fn mount_children(
        &mut self,
        owner: &BlockId,
        index: usize,
        ids: &[BlockId],
        source: &dyn BlockSource,
        state: &mut BatchState,
    ) -> std::result::Result<(), SkipReason> {
        state.touched.insert(owner.clone());
        for (offset, id) in ids.iter().enumerate() {
            if !claims(source, owner, id) {
                debug!(block_id = %id, %owner, "block belongs to another parent, not mounting here");
                continue;
            }
            self.mount_child(owner, index + offset, id, source, state)?;
        }
        Ok(())
    }

    /// Mount `id` as child `index` of `owner`. An id that is already mounted
    /// is moved, or left alone when it already sits there.
    fn mount_child(
        &mut self,
        owner: &BlockId,
        index: usize,
        id: &BlockId,
        source: &dyn BlockSource,
        state: &mut BatchState,
    ) -> std::result::Result<(), SkipReason> {
        let owner_path = self.require(owner, state)?;

        if let Some(current) = self.find(id, state)? {
            if current == owner_path || is_ancestor(&current, &owner_path) {
                return Err(SkipReason::Cycle(id.clone()));
            }
            if let Some((parent_path, position)) = parent_and_index(&current) {
                let len = self.child_count(&owner_path);
                if parent_path == owner_path.as_slice() && position == index.min(len.saturating_sub(1)) {
                    debug!(block_id = %id, "duplicate insert, already in place");
                    return Ok(());
                }
            }
            let node = self.remove_at(current, id, state)?;
            return self.insert_under(owner, index, node, state);
        }

        let node = self.build_node(source, id, owner, &mut HashSet::new(), state).ok_or_else(|| {
            SkipReason::Unresolvable(format!("block {id} is not in the document"))
        })?;
        self.insert_under(owner, index, node, state)
    }

    /// Remove `id` if its mounted parent owns `children_id`
    fn unmount_from(
        &mut self,
        children_id: &ChildrenId,
        id: &BlockId,
        state: &mut BatchState,
    ) -> std::result::Result<(), SkipReason> {
        let Some(path) = self.find(id, state)? else {
            debug!(block_id = %id, "remove for absent block, ignoring");
            return Ok(());
        };
        let owned_here = parent_and_index(&path)
            .and_then(|(parent_path, _)| self.tree.get(parent_path))
            .is_some_and(|parent| &parent.children_id == children_id);
        if !owned_here {
            debug!(block_id = %id, %children_id, "block already mounted elsewhere, ignoring remove");
            return Ok(());
        }
        self.remove_at(path, id, state)?;
        Ok(())
    }

    /// Mirror subtree for `id` from document state. Children that are
    /// already mounted elsewhere are adopted rather than duplicated, unless
    /// adopting them would detach `anchor`.
    fn build_node(
        &mut self,
        source: &dyn BlockSource,
        id: &BlockId,
        anchor: &BlockId,
        visiting: &mut HashSet<BlockId>,
        state: &mut BatchState,
    ) -> Option<ElementNode> {
        if !visiting.insert(id.clone()) {
            warn!(block_id = %id, "cycle in children collections");
            return None;
        }
        let block = source.block(id)?;
        let runs = block
            .text_id
            .as_ref()
            .and_then(|text_id| source.text(text_id))
            .unwrap_or_default();
        let children = claimed_children(source, &block.id, &block.children_id);
        let mut node = ElementNode::from_block(block, runs);

        for child_id in children {
            match self.index.locate(&self.tree, &child_id) {
                Lookup::Found(path) => {
                    let anchor_path = self.index.path_of(anchor).cloned().unwrap_or_default();
                    if path == anchor_path || is_ancestor(&path, &anchor_path) {
                        warn!(block_id = %child_id, "child is an ancestor of the insertion point, skipping");
                        continue;
                    }
                    match self.remove_at(path, &child_id, state) {
                        Ok(existing) => node.children.push(existing),
                        Err(e) => warn!(block_id = %child_id, error = %e, "failed to adopt mounted child"),
                    }
                }
                Lookup::Absent => {
                    if let Some(child) = self.build_node(source, &child_id, anchor, visiting, state) {
                        node.children.push(child);
                    }
                }
                Lookup::Inconsistent => state.signal(format!("index inconsistent for {child_id}")),
            }
        }
        Some(node)
    }

    fn resolve_pending(&mut self, source: &dyn BlockSource, state: &mut BatchState) {
        for pass in 0..self.max_deferred_passes {
            if state.pending.is_empty() {
                return;
            }
            let mut progressed = false;
            for insert in std::mem::take(&mut state.pending) {
                if self.index.contains(&insert.owner) {
                    progressed = true;
                    self.finish_pending(insert, source, state);
                } else {
                    state.pending.push(insert);
                }
            }
            debug!(pass, remaining = state.pending.len(), "deferred insert pass");
            if !progressed {
                break;
            }
        }

        for insert in std::mem::take(&mut state.pending) {
            if self.index.contains(&insert.owner) || self.synthesize(&insert.owner, source, state) {
                self.finish_pending(insert, source, state);
            } else {
                warn!(owner = %insert.owner, "parent never became reachable, dropping insert");
                state.report.skipped.push(SkippedRecord {
                    record: insert.record,
                    reason: SkipReason::Unresolvable(format!(
                        "parent {} is not reachable from the page",
                        insert.owner
                    )),
                });
            }
        }
    }

    fn finish_pending(&mut self, insert: PendingInsert, source: &dyn BlockSource, state: &mut BatchState) {
        if let Err(reason) = self.mount_children(&insert.owner, insert.index, &insert.ids, source, state) {
            warn!(owner = %insert.owner, %reason, "deferred insert failed");
            state.report.skipped.push(SkippedRecord {
                record: insert.record,
                reason,
            });
        }
    }

    /// Mount the nearest unmounted ancestor of `owner` under its mounted
    /// parent, following the `parent` fields in document state.
    fn synthesize(&mut self, owner: &BlockId, source: &dyn BlockSource, state: &mut BatchState) -> bool {
        let mut seen = HashSet::new();
        let mut current = owner.clone();
        loop {
            if !seen.insert(current.clone()) {
                return false;
            }
            let Some(block) = source.block(&current) else {
                return false;
            };
            let Some(parent_id) = block.parent else {
                return false;
            };
            let Some(parent) = source.block(&parent_id) else {
                return false;
            };
            let siblings = claimed_children(source, &parent_id, &parent.children_id);
            let Some(position) = siblings.iter().position(|id| id == &current) else {
                return false;
            };
            if self.index.contains(&parent_id) {
                debug!(%owner, via = %current, "synthesized path for deferred insert");
                return self.mount_child(&parent_id, position, &current, source, state).is_ok()
                    && self.index.contains(owner);
            }
            current = parent_id;
        }
    }

    fn reconcile_parents(&mut self, source: &dyn BlockSource, state: &mut BatchState) {
        let mut targets = std::mem::take(&mut state.reconcile);
        if self.verify_touched_parents {
            targets.extend(std::mem::take(&mut state.touched));
        }

        for owner in targets {
            let Ok(Some(path)) = self.find(&owner, state) else {
                continue;
            };
            let Some(node) = self.tree.get(&path) else {
                continue;
            };
            let children_id = node.children_id.clone();
            let desired = claimed_children(source, &owner, &children_id);
            if self.local_children(&path) == desired {
                continue;
            }

            info!(block_id = %owner, "reconciling children with document state");
            self.reconcile(&owner, &desired, source, state);
            state.report.repaired.push(owner.clone());

            let settled = self
                .index
                .path_of(&owner)
                .cloned()
                .is_some_and(|path| self.local_children(&path) == desired);
            if !settled {
                state.signal(format!("children of {owner} still diverge after reconciliation"));
            }
        }
    }

    fn reconcile(&mut self, owner: &BlockId, desired: &[BlockId], source: &dyn BlockSource, state: &mut BatchState) {
        let wanted: HashSet<&BlockId> = desired.iter().collect();

        // Drop children that no longer belong here, last first
        if let Some(path) = self.index.path_of(owner).cloned() {
            let local = self.local_children(&path);
            for (i, id) in local.iter().enumerate().rev() {
                if !wanted.contains(id) {
                    if let Err(e) = self.remove_at(child_path(&path, i), id, state) {
                        warn!(block_id = %id, error = %e, "failed to drop stale child");
                    }
                }
            }
        }

        for (i, id) in desired.iter().enumerate() {
            let Some(owner_path) = self.index.path_of(owner).cloned() else {
                return;
            };
            let in_place = self
                .tree
                .get(&owner_path)
                .and_then(|node| node.children.get(i))
                .is_some_and(|child| &child.block_id == id);
            if in_place {
                continue;
            }
            if let Err(e) = self.mount_child(owner, i, id, source, state) {
                warn!(block_id = %id, error = %e, "failed to place child during reconciliation");
            }
        }
    }

    // ---- attributes and text -------------------------------------------

    fn update_node(
        &mut self,
        path: Path,
        block: Block,
        source: &dyn BlockSource,
        state: &mut BatchState,
    ) -> std::result::Result<(), SkipReason> {
        let node = self
            .tree
            .get(&path)
            .ok_or_else(|| TreeError::InvalidPath(path.clone()))?;

        if node.children_id != block.children_id {
            // Children collections are never re-created; rebuild the mirror
            // so it follows the new one
            warn!(block_id = %block.id, "children collection replaced, remounting block");
            let parent = parent_and_index(&path)
                .and_then(|(parent_path, index)| Some((self.tree.get(parent_path)?.block_id.clone(), index)));
            let Some((parent, index)) = parent else {
                state.signal(format!("children collection of the page {} replaced", block.id));
                return Ok(());
            };
            self.remove_at(path, &block.id, state)?;
            return self.mount_child(&parent, index, &block.id, source, state);
        }

        if node.kind != block.kind || node.attributes != block.attributes {
            self.apply_op(
                TreeOp::SetNode {
                    path: path.clone(),
                    kind: block.kind.clone(),
                    attributes: block.attributes.clone(),
                },
                state,
            )?;
        }

        if node_text_id(&self.tree, &path) != block.text_id {
            let runs = block
                .text_id
                .as_ref()
                .and_then(|text_id| source.text(text_id))
                .unwrap_or_default();
            let previous = node_text_id(&self.tree, &path);
            self.apply_op(
                TreeOp::ReplaceText {
                    path,
                    text: TextRun::new(block.text_id.clone(), runs),
                },
                state,
            )?;
            self.index
                .text_replaced(&block.id, previous.as_ref(), block.text_id.as_ref());
        }
        Ok(())
    }

    fn refresh_text(
        &mut self,
        text_id: &TextId,
        source: &dyn BlockSource,
        state: &mut BatchState,
    ) -> std::result::Result<(), SkipReason> {
        let owner = self
            .index
            .block_for_text(text_id)
            .cloned()
            .ok_or_else(|| SkipReason::Unresolvable(format!("no mounted block uses text {text_id}")))?;
        if source.block(&owner).is_none() {
            debug!(%text_id, %owner, "text of a removed block, ignoring");
            return Ok(());
        }
        let path = self.require(&owner, state)?;
        let runs = source.text(text_id).unwrap_or_default();
        let unchanged = self
            .tree
            .get(&path)
            .is_some_and(|node| node.text.runs == runs);
        if unchanged {
            return Ok(());
        }
        self.apply_op(
            TreeOp::ReplaceText {
                path,
                text: TextRun::new(Some(text_id.clone()), runs),
            },
            state,
        )?;
        Ok(())
    }

    fn resolve_pending_texts(&mut self, source: &dyn BlockSource, state: &mut BatchState) {
        for (text_id, record) in std::mem::take(&mut state.pending_texts) {
            if let Err(reason) = self.refresh_text(&text_id, source, state) {
                warn!(%text_id, %reason, "skipping text change");
                state.report.skipped.push(SkippedRecord { record, reason });
            }
        }
    }

    // ---- primitives ----------------------------------------------------

    fn apply_op(&mut self, op: TreeOp, state: &mut BatchState) -> std::result::Result<Option<ElementNode>, SkipReason> {
        let removed = self.tree.apply(&op)?;
        match (&op, &removed) {
            (TreeOp::InsertNode { path, .. }, _) => self.index.node_inserted(&self.tree, path),
            (TreeOp::RemoveNode { path, .. }, Some(node)) => self.index.node_removed(&self.tree, path, node),
            _ => {}
        }
        state.report.ops.push(op);
        Ok(removed)
    }

    fn remove_at(&mut self, path: Path, id: &BlockId, state: &mut BatchState) -> std::result::Result<ElementNode, SkipReason> {
        let op = TreeOp::RemoveNode {
            path: path.clone(),
            block_id: id.clone(),
        };
        self.apply_op(op, state)?
            .ok_or(SkipReason::Tree(TreeError::InvalidPath(path)))
    }

    fn insert_under(
        &mut self,
        owner: &BlockId,
        index: usize,
        node: ElementNode,
        state: &mut BatchState,
    ) -> std::result::Result<(), SkipReason> {
        let owner_path = self.require(owner, state)?;
        let at = index.min(self.child_count(&owner_path));
        self.apply_op(
            TreeOp::InsertNode {
                path: child_path(&owner_path, at),
                node,
            },
            state,
        )?;
        Ok(())
    }

    /// Verified path lookup. `Ok(None)` means not mounted.
    fn find(&mut self, id: &BlockId, state: &mut BatchState) -> std::result::Result<Option<Path>, SkipReason> {
        match self.index.locate(&self.tree, id) {
            Lookup::Found(path) => Ok(Some(path)),
            Lookup::Absent => Ok(None),
            Lookup::Inconsistent => {
                state.signal(format!("index inconsistent for {id}"));
                Err(SkipReason::Inconsistent(id.clone()))
            }
        }
    }

    fn require(&mut self, id: &BlockId, state: &mut BatchState) -> std::result::Result<Path, SkipReason> {
        self.find(id, state)?
            .ok_or_else(|| SkipReason::Unresolvable(format!("block {id} is not mounted")))
    }

    fn owner_of(&self, children_id: &ChildrenId, source: &dyn BlockSource) -> Option<BlockId> {
        self.index
            .block_for_children(children_id)
            .cloned()
            .or_else(|| source.owner_of_children(children_id))
    }

    fn child_count(&self, path: &[usize]) -> usize {
        self.tree.get(path).map_or(0, |node| node.children.len())
    }

    fn local_children(&self, path: &[usize]) -> Vec<BlockId> {
        self.tree
            .get(path)
            .map(|node| node.children.iter().map(|c| c.block_id.clone()).collect())
            .unwrap_or_default()
    }
}

fn node_text_id(tree: &LocalTree, path: &[usize]) -> Option<TextId> {
    tree.get(path).and_then(|node| node.text.text_id.clone())
}

fn build_tree(source: &dyn BlockSource) -> Result<LocalTree> {
    let page_id = source.page_id().ok_or(SyncError::MissingRoot)?;
    let root = build_detached(source, &page_id, &mut HashSet::new())
        .ok_or(SyncError::BlockNotFound(page_id))?;
    Ok(LocalTree::new(root))
}

fn build_detached(source: &dyn BlockSource, id: &BlockId, visiting: &mut HashSet<BlockId>) -> Option<ElementNode> {
    if !visiting.insert(id.clone()) {
        warn!(block_id = %id, "cycle in children collections");
        return None;
    }
    let block = source.block(id)?;
    let runs = block
        .text_id
        .as_ref()
        .and_then(|text_id| source.text(text_id))
        .unwrap_or_default();
    let children = claimed_children(source, &block.id, &block.children_id);
    let mut node = ElementNode::from_block(block, runs);
    node.children = children
        .iter()
        .filter_map(|child| build_detached(source, child, visiting))
        .collect();
    Some(node)
}

/// Children of `owner` that should be mounted under it: existing blocks,
/// first occurrence only, and not claimed by a different parent that also
/// lists them.
fn claimed_children(source: &dyn BlockSource, owner: &BlockId, children_id: &ChildrenId) -> Vec<BlockId> {
    let mut seen = HashSet::new();
    source
        .children(children_id)
        .unwrap_or_default()
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .filter(|id| claims(source, owner, id))
        .collect()
}

fn claims(source: &dyn BlockSource, owner: &BlockId, id: &BlockId) -> bool {
    let Some(block) = source.block(id) else {
        return false;
    };
    match &block.parent {
        Some(parent) if parent != owner => !source
            .block(parent)
            .and_then(|parent| source.children(&parent.children_id))
            .is_some_and(|siblings| siblings.contains(id)),
        _ => true,
    }
}
