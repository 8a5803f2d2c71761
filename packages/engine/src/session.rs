//! # Sync Session
//!
//! One open block document: the CRDT, its event capture, the translator
//! that owns the local tree, and the channels to the outside.
//!
//! ```text
//! command ──► CommandTranslator ──► yrs txn ──┐
//!                                              ├─► EventCapture ─► batch ─► EventTranslator ─► hooks
//! inbox / apply_remote_update ──► yrs update ─┘
//!                 local edits ──► outgoing (broadcast of encoded updates)
//! ```
//!
//! Every command and every remote update is followed by exactly one flush,
//! so a command's echo is applied before anything else is processed.

use crate::capture::EventCapture;
use crate::commands::{Command, CommandOutcome, CommandTranslator};
use crate::translator::{BatchReport, EventTranslator, SyncSignal};
use crate::{CrdtDocument, EngineConfig, Result, SyncError};
use blocksync_schema::{BlockId, DocId};
use blocksync_tree::{LocalTree, TreeSnapshot};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Called after each batch has been fully applied
pub type RenderHook = Box<dyn FnMut(&BatchReport, &LocalTree) + Send>;

/// Handle for removing a render hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

pub struct SyncSession {
    doc_id: DocId,
    capture: EventCapture,
    document: CrdtDocument,
    translator: EventTranslator,
    config: EngineConfig,

    hooks: Vec<(HookId, RenderHook)>,
    next_hook: u64,

    /// Encoded updates produced by local commands
    outgoing: broadcast::Sender<Vec<u8>>,
    inbox_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbox_rx: mpsc::UnboundedReceiver<Vec<u8>>,

    /// Reloads since the last clean batch
    resync_attempts: u32,
}

impl SyncSession {
    /// New document holding only a page titled `title`
    pub fn create(doc_id: DocId, title: &str, config: EngineConfig) -> Result<Self> {
        let document = CrdtDocument::new();
        document.bootstrap_page(title)?;
        Self::with_document(doc_id, document, config)
    }

    /// Document restored from an encoded state update
    pub fn open(doc_id: DocId, state: &[u8], config: EngineConfig) -> Result<Self> {
        let document = CrdtDocument::from_update(state)?;
        Self::with_document(doc_id, document, config)
    }

    fn with_document(doc_id: DocId, document: CrdtDocument, config: EngineConfig) -> Result<Self> {
        let capture = EventCapture::attach(&document);
        let translator = EventTranslator::load(&document.view(), &config)?;
        let (outgoing, _) = broadcast::channel(config.outgoing_capacity.max(1));
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        info!(%doc_id, blocks = translator.tree().node_count(), "session opened");

        Ok(Self {
            doc_id,
            capture,
            document,
            translator,
            config,
            hooks: Vec::new(),
            next_hook: 0,
            outgoing,
            inbox_tx,
            inbox_rx,
            resync_attempts: 0,
        })
    }

    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn document(&self) -> &CrdtDocument {
        &self.document
    }

    pub fn page_id(&self) -> &BlockId {
        self.translator.tree().root_id()
    }

    // ---- local edits ---------------------------------------------------

    /// Run one command and apply its echo before returning
    pub fn execute(&mut self, command: &Command) -> Result<CommandOutcome> {
        let before = self.document.state_vector();
        let outcome = CommandTranslator::new(&self.document).execute(command);
        self.after_local_change(&before)?;
        outcome
    }

    /// Run several commands in one transaction, so they echo as one batch
    pub fn execute_all(&mut self, commands: &[Command]) -> Result<Vec<CommandOutcome>> {
        let before = self.document.state_vector();
        let outcomes = CommandTranslator::new(&self.document).execute_all(commands);
        self.after_local_change(&before)?;
        outcomes
    }

    fn after_local_change(&mut self, before: &[u8]) -> Result<()> {
        self.flush()?;
        if self.document.state_vector() == before {
            return Ok(());
        }
        let update = self.document.encode_diff(before)?;
        // No receivers is fine; nobody is listening yet
        if self.outgoing.send(update).is_err() {
            debug!(doc_id = %self.doc_id, "no outgoing subscribers");
        }
        Ok(())
    }

    // ---- remote updates ------------------------------------------------

    /// Integrate a remote update and translate its events
    pub fn apply_remote_update(&mut self, update: &[u8]) -> Result<BatchReport> {
        let applied = self.document.apply_update(update);
        let report = self.flush()?;
        applied?;
        Ok(report)
    }

    /// Sender half of the remote-update inbox, for network tasks
    pub fn inbox_sender(&self) -> mpsc::UnboundedSender<Vec<u8>> {
        self.inbox_tx.clone()
    }

    /// Apply every update waiting in the inbox, in arrival order.
    /// Undecodable updates are logged and dropped.
    pub fn drain_inbox(&mut self) -> Result<Vec<BatchReport>> {
        let mut reports = Vec::new();
        while let Ok(update) = self.inbox_rx.try_recv() {
            match self.apply_remote_update(&update) {
                Ok(report) => reports.push(report),
                Err(e @ SyncError::ResyncRequired { .. }) => return Err(e),
                Err(e) => warn!(doc_id = %self.doc_id, error = %e, "dropping remote update"),
            }
        }
        Ok(reports)
    }

    /// Wait for the next inbox update and apply it. `None` once every
    /// sender is gone, which cannot happen while the session is alive.
    pub async fn recv_remote(&mut self) -> Option<Result<BatchReport>> {
        let update = self.inbox_rx.recv().await?;
        Some(self.apply_remote_update(&update))
    }

    // ---- translation ---------------------------------------------------

    /// Translate whatever the capture holds as one batch
    fn flush(&mut self) -> Result<BatchReport> {
        let batch = self.capture.take_batch();
        if batch.is_empty() {
            return Ok(BatchReport::default());
        }

        let report = {
            let view = self.document.view();
            self.translator.apply_batch(&batch, &view)
        };
        match &report.signal {
            Some(SyncSignal::ResyncRequired { reason }) => self.resync(reason)?,
            None => self.resync_attempts = 0,
        }

        for (_, hook) in self.hooks.iter_mut() {
            hook(&report, self.translator.tree());
        }
        Ok(report)
    }

    /// Reload the local tree, up to the configured number of attempts
    fn resync(&mut self, reason: &str) -> Result<()> {
        if self.resync_attempts >= self.config.max_resync_attempts {
            error!(doc_id = %self.doc_id, %reason, "giving up on automatic resync");
            return Err(SyncError::ResyncRequired {
                doc_id: self.doc_id.clone(),
                reason: reason.to_string(),
            });
        }
        self.resync_attempts += 1;
        warn!(
            doc_id = %self.doc_id,
            attempt = self.resync_attempts,
            %reason,
            "reloading local tree"
        );
        self.reload()?;

        let diverged = self.verify();
        if !diverged.is_empty() {
            return Err(SyncError::ResyncRequired {
                doc_id: self.doc_id.clone(),
                reason: format!("{} blocks still diverge after reload", diverged.len()),
            });
        }
        Ok(())
    }

    /// Rebuild the local tree from the CRDT state and drop any captured
    /// events, which the rebuilt tree already reflects
    pub fn reload(&mut self) -> Result<()> {
        self.capture.take_batch();
        let view = self.document.view();
        self.translator.reload(&view)
    }

    /// Blocks whose mirror disagrees with the CRDT state
    pub fn verify(&self) -> Vec<BlockId> {
        let view = self.document.view();
        self.translator.diverged(&view)
    }

    // ---- reads ---------------------------------------------------------

    pub fn tree(&self) -> &LocalTree {
        self.translator.tree()
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot::capture(self.translator.tree())
    }

    pub fn encode_state(&self) -> Vec<u8> {
        self.document.encode_state()
    }

    pub fn state_vector(&self) -> Vec<u8> {
        self.document.state_vector()
    }

    pub fn encode_diff(&self, state_vector: &[u8]) -> Result<Vec<u8>> {
        self.document.encode_diff(state_vector)
    }

    // ---- subscriptions -------------------------------------------------

    pub fn subscribe(&mut self, hook: RenderHook) -> HookId {
        let id = HookId(self.next_hook);
        self.next_hook += 1;
        self.hooks.push((id, hook));
        id
    }

    /// Returns false if the hook was already gone
    pub fn unsubscribe(&mut self, id: HookId) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|(hook_id, _)| *hook_id != id);
        self.hooks.len() != before
    }

    /// Stream of encoded updates produced by local commands
    pub fn subscribe_outgoing(&self) -> broadcast::Receiver<Vec<u8>> {
        self.outgoing.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocksync_schema::{Attributes, BlockType, InlineRun};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn session() -> SyncSession {
        SyncSession::create(DocId::from("doc"), "Title", EngineConfig::default()).unwrap()
    }

    fn paragraph(parent: &BlockId, text: &str) -> Command {
        Command::InsertBlock {
            parent: parent.clone(),
            index: usize::MAX,
            ty: BlockType::Paragraph,
            attributes: Attributes::new(),
            text: vec![InlineRun::plain(text)],
        }
    }

    #[test]
    fn test_create_mounts_page() {
        let session = session();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.text_of(session.page_id()).as_deref(), Some("Title"));
        assert!(session.verify().is_empty());
    }

    #[test]
    fn test_execute_updates_tree_and_fires_hooks() {
        let mut session = session();
        let calls = Arc::new(AtomicUsize::new(0));
        let hook = {
            let calls = Arc::clone(&calls);
            session.subscribe(Box::new(move |report, tree| {
                assert!(!report.ops.is_empty());
                assert_eq!(tree.node_count(), 2);
                calls.fetch_add(1, Ordering::SeqCst);
            }))
        };

        let page = session.page_id().clone();
        let outcome = session.execute(&paragraph(&page, "hello")).unwrap();
        let id = outcome.block_id.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.snapshot().text_of(&id).as_deref(), Some("hello"));
        assert!(session.unsubscribe(hook));
        assert!(!session.unsubscribe(hook));
    }

    #[test]
    fn test_local_edit_is_broadcast() {
        let mut session = session();
        let mut peer =
            SyncSession::open(DocId::from("doc"), &session.encode_state(), EngineConfig::default())
                .unwrap();
        let mut outgoing = session.subscribe_outgoing();
        let page = session.page_id().clone();

        session.execute(&paragraph(&page, "x")).unwrap();
        let update = outgoing.try_recv().unwrap();

        let report = peer.apply_remote_update(&update).unwrap();
        assert!(!report.ops.is_empty());
        assert_eq!(peer.snapshot(), session.snapshot());
    }

    #[test]
    fn test_rejected_command_broadcasts_nothing() {
        let mut session = session();
        let mut outgoing = session.subscribe_outgoing();
        let page = session.page_id().clone();

        let result = session.execute(&Command::SplitBlock {
            block_id: page,
            offset: 99,
        });
        assert!(matches!(result, Err(SyncError::Schema(_))));
        assert!(outgoing.try_recv().is_err());
    }

    #[test]
    fn test_bad_remote_update_is_an_error() {
        let mut session = session();
        assert!(session.apply_remote_update(&[0xff, 0xff, 0xff]).is_err());
        assert_eq!(session.tree().node_count(), 1);
    }

    #[test]
    fn test_reload_matches_incremental_tree() {
        let mut session = session();
        let page = session.page_id().clone();
        session.execute(&paragraph(&page, "a")).unwrap();
        session.execute(&paragraph(&page, "b")).unwrap();

        let before = session.snapshot();
        session.reload().unwrap();
        assert_eq!(session.snapshot(), before);
    }
}
