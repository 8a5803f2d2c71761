//! CRDT Accessors - typed read/write facade over the yrs document.
//!
//! Layout of the shared document:
//!
//! ```text
//! meta         : Map  { page_id: String }
//! blocks       : Map  { <block id>: Map { id, ty, parent, children,
//!                                          external_id, external_type,
//!                                          data: String (JSON) } }
//! children_map : Map  { <children id>: Array<String> }
//! text_map     : Map  { <text id>: Text }
//! ```
//!
//! Reads are generic over [`ReadTxn`] so they work inside a command's write
//! transaction as well as from a read-only [`DocumentView`]. Writes take the
//! caller's `TransactionMut`; yrs emits change events when it commits.

use crate::{Result, SyncError};
use blocksync_schema::{
    field, normalize, Attributes, Block, BlockId, BlockRecord, BlockType, ChildrenId, InlineRun,
    SchemaError, TextId,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use yrs::types::text::YChange;
use yrs::types::Attrs;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, Doc, Map, MapPrelim, MapRef, OffsetKind, Options, Out, ReadTxn,
    StateVector, Text, TextPrelim, TextRef, Transact, Transaction, TransactionMut, Update,
};

pub const META: &str = "meta";
pub const BLOCKS: &str = "blocks";
pub const CHILDREN_MAP: &str = "children_map";
pub const TEXT_MAP: &str = "text_map";
pub const PAGE_ID: &str = "page_id";

/// Handles to the four root maps
#[derive(Clone)]
pub(crate) struct Roots {
    pub meta: MapRef,
    pub blocks: MapRef,
    pub children: MapRef,
    pub texts: MapRef,
}

/// One block document backed by a yrs `Doc`
pub struct CrdtDocument {
    doc: Doc,
    roots: Roots,
}

impl CrdtDocument {
    /// Empty document. Text offsets are UTF-16 code units.
    pub fn new() -> Self {
        let doc = Doc::with_options(Options {
            offset_kind: OffsetKind::Utf16,
            ..Options::default()
        });
        let roots = Roots {
            meta: doc.get_or_insert_map(META),
            blocks: doc.get_or_insert_map(BLOCKS),
            children: doc.get_or_insert_map(CHILDREN_MAP),
            texts: doc.get_or_insert_map(TEXT_MAP),
        };
        Self { doc, roots }
    }

    /// Document restored from an encoded state update
    pub fn from_update(update: &[u8]) -> Result<Self> {
        let document = Self::new();
        document.apply_update(update)?;
        Ok(document)
    }

    /// Create the page root with a title and point `meta.page_id` at it
    pub fn bootstrap_page(&self, title: &str) -> Result<BlockId> {
        let record = BlockRecord::new(BlockType::Page, None, Attributes::new());
        let runs = if title.is_empty() {
            Vec::new()
        } else {
            vec![InlineRun::plain(title)]
        };

        let mut txn = self.doc.transact_mut();
        self.insert_block_record(&mut txn, &record, &runs)?;
        self.roots
            .meta
            .insert(&mut txn, PAGE_ID, Any::String(record.id.as_str().into()));
        Ok(record.id)
    }

    pub(crate) fn roots(&self) -> &Roots {
        &self.roots
    }

    pub fn transact_mut(&self) -> TransactionMut<'_> {
        self.doc.transact_mut()
    }

    /// Read-only view holding one read transaction
    pub fn view(&self) -> DocumentView<'_> {
        DocumentView {
            document: self,
            txn: self.doc.transact(),
        }
    }

    // ---- reads ---------------------------------------------------------

    pub fn page_id<T: ReadTxn>(&self, txn: &T) -> Option<BlockId> {
        match self.roots.meta.get(txn, PAGE_ID)? {
            Out::Any(Any::String(id)) => Some(BlockId::new(id.to_string())),
            _ => None,
        }
    }

    pub fn record<T: ReadTxn>(&self, txn: &T, id: &BlockId) -> Result<BlockRecord> {
        match self.roots.blocks.get(txn, id.as_str()) {
            Some(Out::YMap(map)) => read_record(&map, txn),
            _ => Err(SyncError::BlockNotFound(id.clone())),
        }
    }

    pub fn block<T: ReadTxn>(&self, txn: &T, id: &BlockId) -> Result<Block> {
        Ok(self.record(txn, id)?.into())
    }

    pub fn contains_block<T: ReadTxn>(&self, txn: &T, id: &BlockId) -> bool {
        self.roots.blocks.contains_key(txn, id.as_str())
    }

    pub fn block_ids<T: ReadTxn>(&self, txn: &T) -> Vec<BlockId> {
        let mut ids: Vec<BlockId> = self
            .roots
            .blocks
            .keys(txn)
            .map(BlockId::from)
            .collect();
        ids.sort();
        ids
    }

    pub fn children<T: ReadTxn>(&self, txn: &T, children_id: &ChildrenId) -> Result<Vec<BlockId>> {
        let array = self.children_ref(txn, children_id)?;
        Ok(read_ids(&array, txn))
    }

    /// Children of a block, via its record
    pub fn children_of<T: ReadTxn>(&self, txn: &T, id: &BlockId) -> Result<Vec<BlockId>> {
        let record = self.record(txn, id)?;
        self.children(txn, &record.children)
    }

    pub fn text_runs<T: ReadTxn>(&self, txn: &T, text_id: &TextId) -> Result<Vec<InlineRun>> {
        let text = self.text_ref(txn, text_id)?;
        Ok(read_runs(&text, txn))
    }

    pub fn text_len<T: ReadTxn>(&self, txn: &T, text_id: &TextId) -> Result<u32> {
        Ok(self.text_ref(txn, text_id)?.len(txn))
    }

    /// Block owning a children collection. Scans the block map.
    pub fn owner_of_children<T: ReadTxn>(&self, txn: &T, children_id: &ChildrenId) -> Option<BlockId> {
        self.roots.blocks.iter(txn).find_map(|(key, value)| match value {
            Out::YMap(map) => (read_str(&map, txn, field::CHILDREN).as_deref()
                == Some(children_id.as_str()))
            .then(|| BlockId::from(key)),
            _ => None,
        })
    }

    /// Structural parent of `id` and its position among the parent's children.
    ///
    /// The `parent` field of the record is tried first. If that collection no
    /// longer lists the block, every children collection is scanned.
    pub fn parent_of<T: ReadTxn>(&self, txn: &T, id: &BlockId) -> Result<(BlockId, usize)> {
        let record = self.record(txn, id)?;
        if let Some(parent) = &record.parent {
            if let Ok(siblings) = self.children_of(txn, parent) {
                if let Some(index) = siblings.iter().position(|sibling| sibling == id) {
                    return Ok((parent.clone(), index));
                }
            }
        }

        for (key, value) in self.roots.children.iter(txn) {
            let Out::YArray(array) = value else { continue };
            if let Some(index) = read_ids(&array, txn).iter().position(|child| child == id) {
                let children_id = ChildrenId::from(key);
                if let Some(owner) = self.owner_of_children(txn, &children_id) {
                    tracing::debug!(block_id = %id, parent = %owner, "parent field stale, found by scan");
                    return Ok((owner, index));
                }
            }
        }
        Err(SyncError::invalid(format!("block {id} has no parent")))
    }

    fn children_ref<T: ReadTxn>(&self, txn: &T, children_id: &ChildrenId) -> Result<ArrayRef> {
        match self.roots.children.get(txn, children_id.as_str()) {
            Some(Out::YArray(array)) => Ok(array),
            _ => Err(SyncError::ChildrenNotFound(children_id.clone())),
        }
    }

    fn text_ref<T: ReadTxn>(&self, txn: &T, text_id: &TextId) -> Result<TextRef> {
        match self.roots.texts.get(txn, text_id.as_str()) {
            Some(Out::YText(text)) => Ok(text),
            _ => Err(SyncError::TextNotFound(text_id.clone())),
        }
    }

    // ---- writes --------------------------------------------------------

    /// Store a new block: its record, an empty children collection and, for
    /// textual blocks, a text sequence seeded with `runs`.
    pub fn insert_block_record(
        &self,
        txn: &mut TransactionMut,
        record: &BlockRecord,
        runs: &[InlineRun],
    ) -> Result<()> {
        self.write_record(txn, record)?;
        self.roots
            .children
            .insert(txn, record.children.as_str(), ArrayPrelim::default());
        if let Some(text_id) = &record.external_id {
            let text = self.roots.texts.insert(txn, text_id.as_str(), TextPrelim::new(""));
            append_runs(&text, txn, runs);
        }
        Ok(())
    }

    /// Store `record`. An existing block only has the fields that differ
    /// written, so a concurrent write to another field of the same block
    /// survives the merge.
    pub fn write_record(&self, txn: &mut TransactionMut, record: &BlockRecord) -> Result<()> {
        let data = record.data_json()?;
        let current = match self.roots.blocks.get(&*txn, record.id.as_str()) {
            Some(Out::YMap(map)) => map,
            _ => {
                let map = self
                    .roots
                    .blocks
                    .insert(txn, record.id.as_str(), MapPrelim::default());
                write_str(&map, txn, field::ID, Some(record.id.as_str()));
                write_str(&map, txn, field::TY, Some(&record.ty));
                write_str(&map, txn, field::PARENT, record.parent.as_ref().map(BlockId::as_str));
                write_str(&map, txn, field::CHILDREN, Some(record.children.as_str()));
                write_str(&map, txn, field::EXTERNAL_ID, record.external_id.as_ref().map(TextId::as_str));
                write_str(&map, txn, field::EXTERNAL_TYPE, record.external_type.as_deref());
                write_str(&map, txn, field::DATA, Some(&data));
                return Ok(());
            }
        };

        let stored = read_record(&current, &*txn)?;
        let fields: [(&str, Option<&str>, bool); 5] = [
            (field::TY, Some(record.ty.as_str()), stored.ty != record.ty),
            (
                field::PARENT,
                record.parent.as_ref().map(BlockId::as_str),
                stored.parent != record.parent,
            ),
            (
                field::CHILDREN,
                Some(record.children.as_str()),
                stored.children != record.children,
            ),
            (
                field::EXTERNAL_ID,
                record.external_id.as_ref().map(TextId::as_str),
                stored.external_id != record.external_id,
            ),
            (
                field::EXTERNAL_TYPE,
                record.external_type.as_deref(),
                stored.external_type != record.external_type,
            ),
        ];
        for (key, value, changed) in fields {
            if changed {
                write_str(&current, txn, key, value);
            }
        }
        if stored.data != record.data {
            write_str(&current, txn, field::DATA, Some(&data));
        }
        Ok(())
    }

    /// Drop a block's record, children collection and text sequence
    pub fn remove_block_record(&self, txn: &mut TransactionMut, record: &BlockRecord) {
        self.roots.blocks.remove(txn, record.id.as_str());
        self.roots.children.remove(txn, record.children.as_str());
        if let Some(text_id) = &record.external_id {
            self.roots.texts.remove(txn, text_id.as_str());
        }
    }

    /// Insert `id` into a children collection. `index` is clamped to the end.
    pub fn insert_child(
        &self,
        txn: &mut TransactionMut,
        children_id: &ChildrenId,
        index: usize,
        id: &BlockId,
    ) -> Result<()> {
        let array = self.children_ref(&*txn, children_id)?;
        let index = u32::try_from(index).unwrap_or(u32::MAX).min(array.len(&*txn));
        array.insert(txn, index, Any::String(id.as_str().into()));
        Ok(())
    }

    pub fn remove_child(
        &self,
        txn: &mut TransactionMut,
        children_id: &ChildrenId,
        index: usize,
    ) -> Result<()> {
        let array = self.children_ref(&*txn, children_id)?;
        let position = u32::try_from(index)
            .ok()
            .filter(|position| *position < array.len(&*txn))
            .ok_or_else(|| {
                SyncError::invalid(format!("child index {index} out of bounds in {children_id}"))
            })?;
        array.remove_range(txn, position, 1);
        Ok(())
    }

    /// Insert text. Without attributes the text takes on the formatting
    /// around `offset`.
    pub fn insert_text(
        &self,
        txn: &mut TransactionMut,
        text_id: &TextId,
        offset: u32,
        content: &str,
        attributes: &Attributes,
    ) -> Result<()> {
        let text = self.text_ref(&*txn, text_id)?;
        if attributes.is_empty() {
            text.insert(txn, offset, content);
        } else {
            text.insert_with_attributes(txn, offset, content, json_to_attrs(attributes));
        }
        Ok(())
    }

    /// Register an empty text sequence under `text_id`
    pub fn create_text(&self, txn: &mut TransactionMut, text_id: &TextId) {
        self.roots.texts.insert(txn, text_id.as_str(), TextPrelim::new(""));
    }

    /// Append runs with their exact attributes to the end of a text
    pub fn append_runs(&self, txn: &mut TransactionMut, text_id: &TextId, runs: &[InlineRun]) -> Result<()> {
        let text = self.text_ref(&*txn, text_id)?;
        append_runs(&text, txn, runs);
        Ok(())
    }

    pub fn delete_text(
        &self,
        txn: &mut TransactionMut,
        text_id: &TextId,
        offset: u32,
        length: u32,
    ) -> Result<()> {
        let text = self.text_ref(&*txn, text_id)?;
        if length > 0 {
            text.remove_range(txn, offset, length);
        }
        Ok(())
    }

    // ---- sync ----------------------------------------------------------

    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Full state as one update
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Update carrying everything missing from a remote state vector
    pub fn encode_diff(&self, state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(state_vector).map_err(|e| SyncError::Decode(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Decode and integrate a remote update in one transaction
    pub fn apply_update(&self, update: &[u8]) -> Result<()> {
        let update = Update::decode_v1(update).map_err(|e| SyncError::Decode(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| SyncError::Apply(e.to_string()))?;
        Ok(())
    }
}

impl Default for CrdtDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// A consistent read-only view of the document
pub struct DocumentView<'doc> {
    document: &'doc CrdtDocument,
    txn: Transaction<'doc>,
}

impl DocumentView<'_> {
    pub fn page_id(&self) -> Option<BlockId> {
        self.document.page_id(&self.txn)
    }

    pub fn block(&self, id: &BlockId) -> Result<Block> {
        self.document.block(&self.txn, id)
    }

    pub fn children(&self, children_id: &ChildrenId) -> Result<Vec<BlockId>> {
        self.document.children(&self.txn, children_id)
    }

    pub fn text_runs(&self, text_id: &TextId) -> Result<Vec<InlineRun>> {
        self.document.text_runs(&self.txn, text_id)
    }

    pub fn owner_of_children(&self, children_id: &ChildrenId) -> Option<BlockId> {
        self.document.owner_of_children(&self.txn, children_id)
    }

    pub fn parent_of(&self, id: &BlockId) -> Result<(BlockId, usize)> {
        self.document.parent_of(&self.txn, id)
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.document.block_ids(&self.txn)
    }

    pub fn record(&self, id: &BlockId) -> Result<BlockRecord> {
        self.document.record(&self.txn, id)
    }
}

/// Decode one block map. `id`, `ty` and `children` are required.
pub(crate) fn read_record<T: ReadTxn>(map: &MapRef, txn: &T) -> Result<BlockRecord> {
    let id = read_str(map, txn, field::ID).unwrap_or_default();
    let required = |key: &'static str| {
        read_str(map, txn, key).ok_or_else(|| SchemaError::MissingField {
            block_id: id.clone(),
            field: key,
        })
    };
    let ty = required(field::TY)?;
    let children = required(field::CHILDREN)?;
    if id.is_empty() {
        return Err(SchemaError::MissingField { block_id: id, field: field::ID }.into());
    }
    let data = match read_str(map, txn, field::DATA) {
        Some(json) => BlockRecord::parse_data(&json)?,
        None => Attributes::new(),
    };
    Ok(BlockRecord {
        id: BlockId::from(id),
        ty,
        parent: read_str(map, txn, field::PARENT).map(BlockId::from),
        children: ChildrenId::from(children),
        external_id: read_str(map, txn, field::EXTERNAL_ID).map(TextId::from),
        external_type: read_str(map, txn, field::EXTERNAL_TYPE),
        data,
    })
}

fn read_str<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<String> {
    match map.get(txn, key)? {
        Out::Any(Any::String(value)) => Some(value.to_string()),
        _ => None,
    }
}

/// Set a string field, or remove it for `None`
fn write_str(map: &MapRef, txn: &mut TransactionMut, key: &str, value: Option<&str>) {
    match value {
        Some(value) => {
            map.insert(txn, key, Any::String(value.into()));
        }
        None => {
            map.remove(txn, key);
        }
    }
}

pub(crate) fn read_ids<T: ReadTxn>(array: &ArrayRef, txn: &T) -> Vec<BlockId> {
    array.iter(txn).filter_map(|value| out_to_block_id(&value)).collect()
}

pub(crate) fn out_to_block_id(value: &Out) -> Option<BlockId> {
    match value {
        Out::Any(Any::String(id)) => Some(BlockId::new(id.to_string())),
        _ => None,
    }
}

fn read_runs<T: ReadTxn>(text: &TextRef, txn: &T) -> Vec<InlineRun> {
    let mut runs = Vec::new();
    for chunk in text.diff(txn, YChange::identity) {
        let attributes = chunk
            .attributes
            .map(|attrs| attrs_to_json(&attrs))
            .unwrap_or_default();
        match chunk.insert {
            Out::Any(Any::String(s)) => runs.push(InlineRun::styled(s.to_string(), attributes)),
            _ => tracing::debug!("skipping non-string chunk in text sequence"),
        }
    }
    normalize(runs)
}

fn append_runs(text: &TextRef, txn: &mut TransactionMut, runs: &[InlineRun]) {
    for run in runs.iter().filter(|run| !run.is_empty()) {
        let offset = text.len(&*txn);
        text.insert_with_attributes(txn, offset, &run.insert, json_to_attrs(&run.attributes));
    }
}

fn attrs_to_json(attrs: &Attrs) -> Attributes {
    attrs
        .iter()
        .map(|(key, value)| (key.to_string(), any_to_json(value)))
        .collect()
}

fn json_to_attrs(attributes: &Attributes) -> Attrs {
    attributes
        .iter()
        .map(|(key, value)| (Arc::<str>::from(key.as_str()), json_to_any(value)))
        .collect()
}

/// Largest integer a JS number holds exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => Value::from(*n as i64),
        Any::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Any::BigInt(n) => Value::from(*n),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), any_to_json(value)))
                .collect(),
        ),
    }
}

fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => Any::Number(n.as_f64().unwrap_or_default()),
        Value::String(s) => Any::String(s.as_str().into()),
        Value::Array(items) => Any::Array(items.iter().map(json_to_any).collect::<Vec<_>>().into()),
        Value::Object(entries) => Any::Map(Arc::new(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), json_to_any(value)))
                .collect::<HashMap<String, Any>>(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bold() -> Attributes {
        serde_json::from_value(json!({ "bold": true })).unwrap()
    }

    #[test]
    fn test_bootstrap_page() {
        let document = CrdtDocument::new();
        let page_id = document.bootstrap_page("Untitled").unwrap();

        let view = document.view();
        assert_eq!(view.page_id(), Some(page_id.clone()));
        let page = view.block(&page_id).unwrap();
        assert_eq!(page.block_type(), BlockType::Page);
        assert!(view.children(&page.children_id).unwrap().is_empty());
        let title = view.text_runs(page.text_id.as_ref().unwrap()).unwrap();
        assert_eq!(title, vec![InlineRun::plain("Untitled")]);
    }

    #[test]
    fn test_block_not_found() {
        let document = CrdtDocument::new();
        let txn = document.transact_mut();
        let err = document.block(&txn, &BlockId::from("missing")).unwrap_err();
        assert!(matches!(err, SyncError::BlockNotFound(_)));
    }

    #[test]
    fn test_children_and_parent_lookup() {
        let document = CrdtDocument::new();
        let page_id = document.bootstrap_page("").unwrap();

        let child = BlockRecord::new(BlockType::Paragraph, Some(page_id.clone()), Attributes::new());
        {
            let mut txn = document.transact_mut();
            let page = document.record(&txn, &page_id).unwrap();
            document
                .insert_block_record(&mut txn, &child, &[InlineRun::plain("hi")])
                .unwrap();
            document.insert_child(&mut txn, &page.children, 99, &child.id).unwrap();
        }

        let view = document.view();
        assert_eq!(view.parent_of(&child.id).unwrap(), (page_id.clone(), 0));
        let page = view.block(&page_id).unwrap();
        assert_eq!(view.owner_of_children(&page.children_id), Some(page_id));
        assert_eq!(view.children(&page.children_id).unwrap(), vec![child.id.clone()]);
    }

    #[test]
    fn test_rich_text_round_trips_through_yrs() {
        let document = CrdtDocument::new();
        let page_id = document.bootstrap_page("").unwrap();
        let text_id = {
            let txn = document.transact_mut();
            document.record(&txn, &page_id).unwrap().external_id.unwrap()
        };

        {
            let mut txn = document.transact_mut();
            document
                .append_runs(
                    &mut txn,
                    &text_id,
                    &[InlineRun::plain("plain "), InlineRun::styled("bold", bold()), InlineRun::plain("!")],
                )
                .unwrap();
        }

        let view = document.view();
        assert_eq!(
            view.text_runs(&text_id).unwrap(),
            vec![
                InlineRun::plain("plain "),
                InlineRun::styled("bold", bold()),
                InlineRun::plain("!"),
            ]
        );
    }

    #[test]
    fn test_utf16_offsets() {
        let document = CrdtDocument::new();
        let page_id = document.bootstrap_page("a😀b").unwrap();
        let txn = document.transact_mut();
        let text_id = document.record(&txn, &page_id).unwrap().external_id.unwrap();
        assert_eq!(document.text_len(&txn, &text_id).unwrap(), 4);
    }

    #[test]
    fn test_state_exchange() {
        let a = CrdtDocument::new();
        let page_id = a.bootstrap_page("Shared").unwrap();

        let b = CrdtDocument::from_update(&a.encode_state()).unwrap();
        assert_eq!(b.view().page_id(), Some(page_id));

        let diff = a.encode_diff(&b.state_vector()).unwrap();
        b.apply_update(&diff).unwrap();
        assert!(matches!(a.encode_diff(&[0xff, 0xff]), Err(SyncError::Decode(_))));
    }

    #[test]
    fn test_block_fields_merge_independently() {
        let a = CrdtDocument::new();
        let page_id = a.bootstrap_page("").unwrap();
        let b = CrdtDocument::from_update(&a.encode_state()).unwrap();

        {
            let txn = a.transact_mut();
            let Some(Out::YMap(map)) = a.roots.blocks.get(&txn, page_id.as_str()) else {
                panic!("block is not a nested map");
            };
            assert_eq!(read_str(&map, &txn, field::ID).as_deref(), Some(page_id.as_str()));
            assert_eq!(read_str(&map, &txn, field::TY).as_deref(), Some("page"));
        }

        {
            let mut txn = a.transact_mut();
            let mut record = a.record(&txn, &page_id).unwrap();
            record.data.insert("icon".into(), json!("📄"));
            a.write_record(&mut txn, &record).unwrap();
        }
        {
            let mut txn = b.transact_mut();
            let mut record = b.record(&txn, &page_id).unwrap();
            record.external_type = Some("rich".into());
            b.write_record(&mut txn, &record).unwrap();
        }

        b.apply_update(&a.encode_diff(&b.state_vector()).unwrap()).unwrap();
        a.apply_update(&b.encode_diff(&a.state_vector()).unwrap()).unwrap();

        for document in [&a, &b] {
            let record = document.view().record(&page_id).unwrap();
            assert_eq!(record.data.get("icon"), Some(&json!("📄")));
            assert_eq!(record.external_type.as_deref(), Some("rich"));
        }
    }

    #[test]
    fn test_any_json_conversion() {
        let value = json!({ "n": 3, "f": 1.5, "s": "x", "list": [true, null] });
        let back = any_to_json(&json_to_any(&value));
        assert_eq!(back, value);
    }
}
