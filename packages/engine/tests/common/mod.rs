//! Helpers shared by the integration tests

#![allow(dead_code)]

use blocksync_engine::schema::{Attributes, BlockId, BlockType, DocId, InlineRun, TextId};
use blocksync_engine::tree::TreeSnapshot;
use blocksync_engine::{Command, EngineConfig, SyncSession};
use tokio::sync::broadcast;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn new_session(title: &str) -> SyncSession {
    init_tracing();
    SyncSession::create(DocId::from("doc"), title, EngineConfig::default()).unwrap()
}

/// Another replica of the same document
pub fn fork(session: &SyncSession) -> SyncSession {
    SyncSession::open(
        session.doc_id().clone(),
        &session.encode_state(),
        EngineConfig::default(),
    )
    .unwrap()
}

pub fn insert(parent: &BlockId, index: usize, ty: BlockType, text: &str) -> Command {
    Command::InsertBlock {
        parent: parent.clone(),
        index,
        ty,
        attributes: Attributes::new(),
        text: if text.is_empty() {
            Vec::new()
        } else {
            vec![InlineRun::plain(text)]
        },
    }
}

pub fn paragraph(parent: &BlockId, index: usize, text: &str) -> Command {
    insert(parent, index, BlockType::Paragraph, text)
}

/// Insert a paragraph and return its id
pub fn add(session: &mut SyncSession, parent: &BlockId, index: usize, text: &str) -> BlockId {
    session
        .execute(&paragraph(parent, index, text))
        .unwrap()
        .block_id
        .unwrap()
}

pub fn text_id(session: &SyncSession, id: &BlockId) -> TextId {
    session.snapshot().node(id).unwrap().text_id.clone().unwrap()
}

pub fn text(session: &SyncSession, id: &BlockId) -> String {
    session.snapshot().text_of(id).unwrap()
}

pub fn children(session: &SyncSession, id: &BlockId) -> Vec<BlockId> {
    session.snapshot().children_of(id).unwrap().to_vec()
}

/// Texts of the children of `id`, in order
pub fn child_texts(session: &SyncSession, id: &BlockId) -> Vec<String> {
    let snapshot = session.snapshot();
    snapshot
        .children_of(id)
        .unwrap()
        .iter()
        .map(|child| snapshot.text_of(child).unwrap_or_default())
        .collect()
}

/// Indented outline of the tree, one `type: text` line per block
pub fn outline(snapshot: &TreeSnapshot) -> Vec<String> {
    snapshot
        .nodes
        .iter()
        .skip(1)
        .map(|node| {
            format!(
                "{}{}: {}",
                "  ".repeat(node.path.len() - 1),
                node.block_type,
                blocksync_engine::schema::plain_text(&node.text)
            )
        })
        .collect()
}

/// Every update currently waiting on an outgoing receiver
pub fn collect(rx: &mut broadcast::Receiver<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

/// Bring two replicas up to date with each other
pub fn sync_pair(a: &mut SyncSession, b: &mut SyncSession) {
    let to_b = a.encode_diff(&b.state_vector()).unwrap();
    let to_a = b.encode_diff(&a.state_vector()).unwrap();
    b.apply_remote_update(&to_b).unwrap();
    a.apply_remote_update(&to_a).unwrap();
}

/// Block ids in the local tree, checking none is mounted twice
pub fn assert_no_duplicates(session: &SyncSession) {
    let snapshot = session.snapshot();
    let mut ids: Vec<&BlockId> = snapshot.block_ids();
    let total = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), total, "a block is mounted twice");
}

/// Local tree, index and CRDT agree
pub fn assert_consistent(session: &SyncSession) {
    assert_no_duplicates(session);
    let diverged = session.verify();
    assert!(diverged.is_empty(), "diverged blocks: {diverged:?}");
}
