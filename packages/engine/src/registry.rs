//! Session registry - the set of currently open documents.
//!
//! Owned by whatever component manages open documents and passed to the
//! code that needs it; there is no process-wide instance.

use crate::session::SyncSession;
use crate::translator::BatchReport;
use crate::{EngineConfig, Result, SyncError};
use blocksync_schema::{BlockId, BlockKind, DocId};
use blocksync_tree::{walk_element, walk_tree, ElementNode, TextRun, Visitor};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

/// How one document points at another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Embedded database view block
    DatabaseView,
    LinkToPage,
    /// Inline `@page` mention inside a text run
    PageMention,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DocReference {
    pub source: DocId,
    pub block_id: BlockId,
    pub target: DocId,
    pub kind: ReferenceKind,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<DocId, SyncSession>,
    config: EngineConfig,
}

impl SessionRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            config,
        }
    }

    /// Open a brand-new document
    pub fn create(&mut self, doc_id: DocId, title: &str) -> Result<&mut SyncSession> {
        self.ensure_vacant(&doc_id)?;
        let session = SyncSession::create(doc_id.clone(), title, self.config.clone())?;
        Ok(self.sessions.entry(doc_id).or_insert(session))
    }

    /// Open a document from its encoded state
    pub fn open(&mut self, doc_id: DocId, state: &[u8]) -> Result<&mut SyncSession> {
        self.ensure_vacant(&doc_id)?;
        let session = SyncSession::open(doc_id.clone(), state, self.config.clone())?;
        Ok(self.sessions.entry(doc_id).or_insert(session))
    }

    pub fn get(&self, doc_id: &DocId) -> Result<&SyncSession> {
        self.sessions
            .get(doc_id)
            .ok_or_else(|| SyncError::SessionNotFound(doc_id.clone()))
    }

    pub fn get_mut(&mut self, doc_id: &DocId) -> Result<&mut SyncSession> {
        self.sessions
            .get_mut(doc_id)
            .ok_or_else(|| SyncError::SessionNotFound(doc_id.clone()))
    }

    /// Close a document, handing back its session
    pub fn close(&mut self, doc_id: &DocId) -> Result<SyncSession> {
        let session = self
            .sessions
            .remove(doc_id)
            .ok_or_else(|| SyncError::SessionNotFound(doc_id.clone()))?;
        info!(%doc_id, "session closed");
        Ok(session)
    }

    pub fn contains(&self, doc_id: &DocId) -> bool {
        self.sessions.contains_key(doc_id)
    }

    /// Open document ids, sorted
    pub fn ids(&self) -> Vec<DocId> {
        let mut ids: Vec<DocId> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drain every session's inbox. Sessions that need a resync are
    /// reported with their error; the rest keep going.
    pub fn drain_inboxes(&mut self) -> (Vec<(DocId, BatchReport)>, Vec<(DocId, SyncError)>) {
        let mut reports = Vec::new();
        let mut failures = Vec::new();
        for doc_id in self.ids() {
            let Some(session) = self.sessions.get_mut(&doc_id) else {
                continue;
            };
            match session.drain_inbox() {
                Ok(batch) => reports.extend(batch.into_iter().map(|r| (doc_id.clone(), r))),
                Err(e) => {
                    warn!(%doc_id, error = %e, "inbox drain failed");
                    failures.push((doc_id, e));
                }
            }
        }
        (reports, failures)
    }

    /// Cross-document references in every open document, sorted
    pub fn references(&self) -> Vec<DocReference> {
        let mut out = Vec::new();
        for (doc_id, session) in &self.sessions {
            let mut collector = ReferenceCollector {
                source: doc_id,
                found: &mut out,
            };
            walk_tree(&mut collector, session.tree());
        }
        out.sort();
        out.dedup();
        out
    }

    /// References whose target document is not open
    pub fn unresolved_references(&self) -> Vec<DocReference> {
        self.references()
            .into_iter()
            .filter(|reference| !self.sessions.contains_key(&reference.target))
            .collect()
    }

    fn ensure_vacant(&self, doc_id: &DocId) -> Result<()> {
        if self.sessions.contains_key(doc_id) {
            return Err(SyncError::SessionExists(doc_id.clone()));
        }
        Ok(())
    }
}

struct ReferenceCollector<'a> {
    source: &'a DocId,
    found: &'a mut Vec<DocReference>,
}

impl ReferenceCollector<'_> {
    fn push(&mut self, block_id: &BlockId, target: &str, kind: ReferenceKind) {
        if target.is_empty() {
            return;
        }
        self.found.push(DocReference {
            source: self.source.clone(),
            block_id: block_id.clone(),
            target: DocId::from(target),
            kind,
        });
    }
}

impl Visitor for ReferenceCollector<'_> {
    fn visit_element(&mut self, node: &ElementNode, path: &[usize]) {
        match &node.kind {
            BlockKind::Database {
                view_id: Some(view_id),
                ..
            } => self.push(&node.block_id, view_id, ReferenceKind::DatabaseView),
            BlockKind::LinkToPage {
                page_id: Some(page_id),
            } => self.push(&node.block_id, page_id, ReferenceKind::LinkToPage),
            _ => {}
        }
        walk_element(self, node, path);
    }

    fn visit_text(&mut self, owner: &ElementNode, text: &TextRun, _path: &[usize]) {
        for run in &text.runs {
            if let Some(page) = run.mentioned_page() {
                self.push(&owner.block_id, page, ReferenceKind::PageMention);
            }
        }
    }
}
