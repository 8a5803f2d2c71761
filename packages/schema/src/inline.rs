//! Inline rich-text runs.
//!
//! Offsets and lengths are UTF-16 code units, matching how JS peers index
//! the same text sequences.

use crate::{Attributes, Result, SchemaError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Placeholder character carrying an inline embed
pub const EMBED_PLACEHOLDER: &str = "$";

const MENTION_KEY: &str = "mention";
const FORMULA_KEY: &str = "formula";

/// A run of text sharing one set of inline attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineRun {
    pub insert: String,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl InlineRun {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            insert: text.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn styled(text: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            insert: text.into(),
            attributes,
        }
    }

    /// Inline mention of another page
    pub fn page_mention(page_id: &str) -> Self {
        let mut attributes = Attributes::new();
        attributes.insert(
            MENTION_KEY.to_string(),
            json!({ "type": "page", "page_id": page_id }),
        );
        Self::styled(EMBED_PLACEHOLDER, attributes)
    }

    pub fn formula(formula: &str) -> Self {
        let mut attributes = Attributes::new();
        attributes.insert(FORMULA_KEY.to_string(), Value::String(formula.to_string()));
        Self::styled(EMBED_PLACEHOLDER, attributes)
    }

    /// Page id referenced by an inline page mention
    pub fn mentioned_page(&self) -> Option<&str> {
        let mention = self.attributes.get(MENTION_KEY)?;
        if mention.get("type").and_then(Value::as_str) != Some("page") {
            return None;
        }
        mention.get("page_id").and_then(Value::as_str)
    }

    pub fn len(&self) -> u32 {
        utf16_len(&self.insert)
    }

    pub fn is_empty(&self) -> bool {
        self.insert.is_empty()
    }
}

pub fn utf16_len(s: &str) -> u32 {
    u32::try_from(s.encode_utf16().count()).unwrap_or(u32::MAX)
}

/// Byte index of a UTF-16 offset, or `None` when the offset falls inside a
/// code point or past the end.
pub fn utf16_to_byte(s: &str, offset: u32) -> Option<usize> {
    let mut units = 0u32;
    for (byte, ch) in s.char_indices() {
        if units == offset {
            return Some(byte);
        }
        if units > offset {
            return None;
        }
        units += ch.len_utf16() as u32;
    }
    (units == offset).then_some(s.len())
}

pub fn content_len(runs: &[InlineRun]) -> u32 {
    runs.iter().map(InlineRun::len).sum()
}

pub fn plain_text(runs: &[InlineRun]) -> String {
    runs.iter().map(|run| run.insert.as_str()).collect()
}

/// Split runs into head `[0, offset)` and tail `[offset, len)`.
pub fn split_runs(runs: &[InlineRun], offset: u32) -> Result<(Vec<InlineRun>, Vec<InlineRun>)> {
    let len = content_len(runs);
    if offset > len {
        return Err(SchemaError::OffsetOutOfBounds { offset, len });
    }

    let mut head = Vec::new();
    let mut tail = Vec::new();
    let mut cursor = 0u32;
    for run in runs {
        let run_len = run.len();
        if cursor + run_len <= offset {
            head.push(run.clone());
        } else if cursor >= offset {
            tail.push(run.clone());
        } else {
            let local = offset - cursor;
            let byte = utf16_to_byte(&run.insert, local)
                .ok_or(SchemaError::SplitsCodePoint { offset })?;
            let (left, right) = run.insert.split_at(byte);
            head.push(InlineRun::styled(left, run.attributes.clone()));
            tail.push(InlineRun::styled(right, run.attributes.clone()));
        }
        cursor += run_len;
    }

    Ok((normalize(head), normalize(tail)))
}

/// Check that `offset` is a valid boundary in `runs`
pub fn check_boundary(runs: &[InlineRun], offset: u32) -> Result<()> {
    split_runs(runs, offset).map(|_| ())
}

/// Drop empty runs and merge neighbours with equal attributes
pub fn normalize(runs: Vec<InlineRun>) -> Vec<InlineRun> {
    let mut out: Vec<InlineRun> = Vec::with_capacity(runs.len());
    for run in runs.into_iter().filter(|run| !run.is_empty()) {
        match out.last_mut() {
            Some(last) if last.attributes == run.attributes => last.insert.push_str(&run.insert),
            _ => out.push(run),
        }
    }
    out
}
