//! Event capture - turns yrs deep-observer callbacks into owned change
//! records.
//!
//! yrs hands out events that borrow the committing transaction, so each
//! callback converts them into [`ChangeRecord`]s right away and appends them
//! to a shared buffer. The session seals the buffer into one [`ChangeBatch`]
//! after every command or remote update.
//!
//! Array removals in yrs only report a count. A shadow copy of every children
//! collection lets removal records carry the ids that left. Blocks get the
//! same treatment: each block is a nested map whose field events carry no
//! previous record, so the last decoded record of every block is kept.

use crate::accessors::{out_to_block_id, read_ids, read_record, CrdtDocument};
use blocksync_schema::{BlockId, BlockRecord, ChildrenId, TextId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use yrs::types::{Change, EntryChange, Event, Events, PathSegment};
use yrs::{DeepObservable, Out, Subscription, TransactionMut};

/// Which CRDT object a record is about, addressed by stable id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectPath {
    Blocks,
    ChildrenMap,
    Children(ChildrenId),
    TextMap,
    Text(TextId),
}

/// One observed CRDT change
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeRecord {
    /// Ids inserted into a children collection at `index`
    ChildrenInserted {
        children_id: ChildrenId,
        index: usize,
        ids: Vec<BlockId>,
    },
    /// Ids removed from a children collection, previously starting at `index`
    ChildrenRemoved {
        children_id: ChildrenId,
        index: usize,
        ids: Vec<BlockId>,
    },
    /// A children collection was created or replaced in the children map
    ChildrenSet { children_id: ChildrenId },
    /// A children collection was removed from the children map
    ChildrenDropped { children_id: ChildrenId },
    /// A block record was created or overwritten
    BlockSet {
        block_id: BlockId,
        old: Option<BlockRecord>,
        new: BlockRecord,
    },
    BlockRemoved {
        block_id: BlockId,
        old: Option<BlockRecord>,
    },
    /// Content of a text sequence changed, or the sequence was created
    TextChanged { text_id: TextId },
    TextDropped { text_id: TextId },
}

impl ChangeRecord {
    pub fn path(&self) -> ObjectPath {
        match self {
            ChangeRecord::ChildrenInserted { children_id, .. }
            | ChangeRecord::ChildrenRemoved { children_id, .. } => {
                ObjectPath::Children(children_id.clone())
            }
            ChangeRecord::ChildrenSet { .. } | ChangeRecord::ChildrenDropped { .. } => {
                ObjectPath::ChildrenMap
            }
            ChangeRecord::BlockSet { .. } | ChangeRecord::BlockRemoved { .. } => ObjectPath::Blocks,
            ChangeRecord::TextChanged { text_id } => ObjectPath::Text(text_id.clone()),
            ChangeRecord::TextDropped { .. } => ObjectPath::TextMap,
        }
    }
}

/// Records from one committed unit of work, in emission order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    pub records: Vec<ChangeRecord>,
}

impl ChangeBatch {
    pub fn new(records: Vec<ChangeRecord>) -> Self {
        Self { records }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[derive(Default)]
struct CaptureBuffer {
    records: Vec<ChangeRecord>,
    /// Last known contents of every children collection
    shadow: HashMap<ChildrenId, Vec<BlockId>>,
    /// Last decoded record of every block
    blocks: HashMap<BlockId, BlockRecord>,
}

/// Observer registrations on one document plus their shared buffer
pub struct EventCapture {
    buffer: Arc<Mutex<CaptureBuffer>>,
    _subscriptions: Vec<Subscription>,
}

impl EventCapture {
    /// Subscribe to `document`. Nothing that happened before this call is
    /// reported.
    pub fn attach(document: &CrdtDocument) -> Self {
        let mut buffer = CaptureBuffer::default();
        {
            let view = document.view();
            for block_id in view.block_ids() {
                if let Ok(record) = view.record(&block_id) {
                    if let Ok(ids) = view.children(&record.children) {
                        buffer.shadow.insert(record.children.clone(), ids);
                    }
                    buffer.blocks.insert(block_id, record);
                }
            }
        }
        let buffer = Arc::new(Mutex::new(buffer));
        let roots = document.roots();

        let blocks = {
            let buffer = Arc::clone(&buffer);
            roots
                .blocks
                .observe_deep(move |txn, events| buffer.lock().capture_blocks(txn, events))
        };
        let children = {
            let buffer = Arc::clone(&buffer);
            roots
                .children
                .observe_deep(move |txn, events| buffer.lock().capture_children(txn, events))
        };
        let texts = {
            let buffer = Arc::clone(&buffer);
            roots
                .texts
                .observe_deep(move |txn, events| buffer.lock().capture_texts(txn, events))
        };

        Self {
            buffer,
            _subscriptions: vec![blocks, children, texts],
        }
    }

    /// Seal everything captured so far into one batch
    pub fn take_batch(&self) -> ChangeBatch {
        ChangeBatch::new(std::mem::take(&mut self.buffer.lock().records))
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.lock().records.is_empty()
    }
}

impl CaptureBuffer {
    fn capture_blocks(&mut self, txn: &TransactionMut, events: &Events) {
        for event in events.iter() {
            let Event::Map(event) = event else { continue };
            match first_key(event.path()) {
                // Blocks added to or dropped from the block map
                None => {
                    for (key, change) in sorted_keys(event.keys(txn)) {
                        let block_id = BlockId::from(key);
                        match change {
                            EntryChange::Inserted(value) | EntryChange::Updated(_, value) => {
                                if let Out::YMap(map) = value {
                                    self.block_written(block_id, read_record(map, txn));
                                }
                            }
                            EntryChange::Removed(_) => {
                                let old = self.blocks.remove(&block_id);
                                self.records.push(ChangeRecord::BlockRemoved { block_id, old });
                            }
                        }
                    }
                }
                // Fields of one block changed
                Some(key) => {
                    let block_id = BlockId::from(key);
                    self.block_written(block_id, read_record(event.target(), txn));
                }
            }
        }
    }

    fn block_written(&mut self, block_id: BlockId, decoded: crate::Result<BlockRecord>) {
        let new = match decoded {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(%block_id, error = %e, "undecodable block record");
                return;
            }
        };
        let old = self.blocks.insert(block_id.clone(), new.clone());
        if old.as_ref() == Some(&new) {
            return;
        }
        self.records.push(ChangeRecord::BlockSet { block_id, old, new });
    }

    fn capture_children(&mut self, txn: &TransactionMut, events: &Events) {
        for event in events.iter() {
            match event {
                Event::Map(event) => {
                    for (key, change) in sorted_keys(event.keys(txn)) {
                        let children_id = ChildrenId::from(key);
                        match change {
                            EntryChange::Inserted(value) | EntryChange::Updated(_, value) => {
                                let ids = match value {
                                    Out::YArray(array) => read_ids(array, txn),
                                    _ => Vec::new(),
                                };
                                self.shadow.insert(children_id.clone(), ids);
                                self.records.push(ChangeRecord::ChildrenSet { children_id });
                            }
                            EntryChange::Removed(_) => {
                                self.shadow.remove(&children_id);
                                self.records.push(ChangeRecord::ChildrenDropped { children_id });
                            }
                        }
                    }
                }
                Event::Array(event) => {
                    let Some(children_id) = first_key(event.path()).map(ChildrenId::from) else {
                        continue;
                    };
                    let shadow = self.shadow.entry(children_id.clone()).or_default();
                    let mut cursor = 0usize;
                    for change in event.delta(txn) {
                        match change {
                            Change::Retain(n) => cursor += *n as usize,
                            Change::Removed(n) => {
                                let start = cursor.min(shadow.len());
                                let end = (cursor + *n as usize).min(shadow.len());
                                let ids: Vec<BlockId> = shadow.drain(start..end).collect();
                                self.records.push(ChangeRecord::ChildrenRemoved {
                                    children_id: children_id.clone(),
                                    index: cursor,
                                    ids,
                                });
                            }
                            Change::Added(values) => {
                                let ids: Vec<BlockId> =
                                    values.iter().filter_map(out_to_block_id).collect();
                                let at = cursor.min(shadow.len());
                                shadow.splice(at..at, ids.iter().cloned());
                                self.records.push(ChangeRecord::ChildrenInserted {
                                    children_id: children_id.clone(),
                                    index: cursor,
                                    ids,
                                });
                                cursor += values.len();
                            }
                        }
                    }

                    let actual = read_ids(event.target(), txn);
                    if *shadow != actual {
                        tracing::warn!(%children_id, "children shadow drifted, resetting");
                        *shadow = actual;
                        self.records.push(ChangeRecord::ChildrenSet { children_id });
                    }
                }
                _ => {}
            }
        }
    }

    fn capture_texts(&mut self, txn: &TransactionMut, events: &Events) {
        for event in events.iter() {
            match event {
                Event::Map(event) => {
                    for (key, change) in sorted_keys(event.keys(txn)) {
                        let text_id = TextId::from(key);
                        match change {
                            EntryChange::Removed(_) => {
                                self.records.push(ChangeRecord::TextDropped { text_id })
                            }
                            _ => self.records.push(ChangeRecord::TextChanged { text_id }),
                        }
                    }
                }
                Event::Text(event) => {
                    if let Some(key) = first_key(event.path()) {
                        self.records.push(ChangeRecord::TextChanged {
                            text_id: TextId::from(key),
                        });
                    }
                }
                _ => {}
            }
        }
    }
}

/// Map keys in a stable order so batches do not depend on hash order
fn sorted_keys<K: AsRef<str>>(keys: &HashMap<K, EntryChange>) -> Vec<(&str, &EntryChange)> {
    let mut entries: Vec<_> = keys.iter().map(|(k, v)| (k.as_ref(), v)).collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn first_key(path: yrs::types::Path) -> Option<String> {
    match path.front()? {
        PathSegment::Key(key) => Some(key.to_string()),
        PathSegment::Index(_) => None,
    }
}
