//! Block types and their typed attribute payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Open key/value payload attached to a block or an inline run
pub type Attributes = BTreeMap<String, Value>;

/// Closed set of block types, named as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    #[serde(rename = "page")]
    Page,
    #[serde(rename = "paragraph")]
    Paragraph,
    #[serde(rename = "heading")]
    Heading,
    #[serde(rename = "todo_list")]
    TodoList,
    #[serde(rename = "bulleted_list")]
    BulletedList,
    #[serde(rename = "numbered_list")]
    NumberedList,
    #[serde(rename = "toggle_list")]
    ToggleList,
    #[serde(rename = "quote")]
    Quote,
    #[serde(rename = "callout")]
    Callout,
    #[serde(rename = "code")]
    Code,
    #[serde(rename = "divider")]
    Divider,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "math_equation")]
    MathEquation,
    #[serde(rename = "table")]
    Table,
    #[serde(rename = "table/cell")]
    TableCell,
    #[serde(rename = "grid")]
    Grid,
    #[serde(rename = "link_to_page")]
    LinkToPage,
}

impl BlockType {
    pub const ALL: [BlockType; 17] = [
        BlockType::Page,
        BlockType::Paragraph,
        BlockType::Heading,
        BlockType::TodoList,
        BlockType::BulletedList,
        BlockType::NumberedList,
        BlockType::ToggleList,
        BlockType::Quote,
        BlockType::Callout,
        BlockType::Code,
        BlockType::Divider,
        BlockType::Image,
        BlockType::MathEquation,
        BlockType::Table,
        BlockType::TableCell,
        BlockType::Grid,
        BlockType::LinkToPage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Page => "page",
            BlockType::Paragraph => "paragraph",
            BlockType::Heading => "heading",
            BlockType::TodoList => "todo_list",
            BlockType::BulletedList => "bulleted_list",
            BlockType::NumberedList => "numbered_list",
            BlockType::ToggleList => "toggle_list",
            BlockType::Quote => "quote",
            BlockType::Callout => "callout",
            BlockType::Code => "code",
            BlockType::Divider => "divider",
            BlockType::Image => "image",
            BlockType::MathEquation => "math_equation",
            BlockType::Table => "table",
            BlockType::TableCell => "table/cell",
            BlockType::Grid => "grid",
            BlockType::LinkToPage => "link_to_page",
        }
    }

    /// Parse a wire name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<BlockType> {
        Self::ALL.iter().copied().find(|ty| ty.as_str() == name)
    }

    /// Embed blocks render their content from attributes and carry no text sequence.
    pub fn has_text(&self) -> bool {
        !matches!(
            self,
            BlockType::Divider
                | BlockType::Image
                | BlockType::MathEquation
                | BlockType::Table
                | BlockType::Grid
                | BlockType::LinkToPage
        )
    }

    /// Whether blocks of this type may hold nested child blocks
    pub fn accepts_children(&self) -> bool {
        !matches!(
            self,
            BlockType::Divider
                | BlockType::Image
                | BlockType::MathEquation
                | BlockType::Code
                | BlockType::Grid
                | BlockType::LinkToPage
        )
    }

    pub fn is_list(&self) -> bool {
        matches!(
            self,
            BlockType::TodoList | BlockType::BulletedList | BlockType::NumberedList
        )
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A block type with its attribute payload resolved into typed fields.
///
/// Resolution is lenient: a missing or mistyped attribute falls back to the
/// field default so a malformed remote record never prevents mounting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
    Page,
    Paragraph,
    Heading { level: u8 },
    TodoList { checked: bool },
    BulletedList,
    NumberedList { number: Option<u32> },
    Toggle { collapsed: bool, level: Option<u8> },
    Quote,
    Callout { icon: Option<String> },
    Code { language: Option<String> },
    Divider,
    Image { url: Option<String> },
    Equation { formula: String },
    Table { rows: u32, cols: u32 },
    TableCell { row: u32, col: u32 },
    Database { view_id: Option<String>, database_id: Option<String> },
    LinkToPage { page_id: Option<String> },
}

impl BlockKind {
    pub fn resolve(ty: BlockType, attrs: &Attributes) -> BlockKind {
        match ty {
            BlockType::Page => BlockKind::Page,
            BlockType::Paragraph => BlockKind::Paragraph,
            BlockType::Heading => BlockKind::Heading {
                level: small(attrs, "level").map(|l| l.clamp(1, 6)).unwrap_or(1),
            },
            BlockType::TodoList => BlockKind::TodoList {
                checked: flag(attrs, "checked"),
            },
            BlockType::BulletedList => BlockKind::BulletedList,
            BlockType::NumberedList => BlockKind::NumberedList {
                number: count(attrs, "number"),
            },
            BlockType::ToggleList => BlockKind::Toggle {
                collapsed: flag(attrs, "collapsed"),
                level: small(attrs, "level"),
            },
            BlockType::Quote => BlockKind::Quote,
            BlockType::Callout => BlockKind::Callout {
                icon: string(attrs, "icon"),
            },
            BlockType::Code => BlockKind::Code {
                language: string(attrs, "language"),
            },
            BlockType::Divider => BlockKind::Divider,
            BlockType::Image => BlockKind::Image {
                url: string(attrs, "url"),
            },
            BlockType::MathEquation => BlockKind::Equation {
                formula: string(attrs, "formula").unwrap_or_default(),
            },
            BlockType::Table => BlockKind::Table {
                rows: count(attrs, "rowsLen").unwrap_or(0),
                cols: count(attrs, "colsLen").unwrap_or(0),
            },
            BlockType::TableCell => BlockKind::TableCell {
                row: count(attrs, "rowPosition").unwrap_or(0),
                col: count(attrs, "colPosition").unwrap_or(0),
            },
            BlockType::Grid => BlockKind::Database {
                view_id: string(attrs, "view_id"),
                database_id: string(attrs, "database_id"),
            },
            BlockType::LinkToPage => BlockKind::LinkToPage {
                page_id: string(attrs, "page_id"),
            },
        }
    }

    pub fn block_type(&self) -> BlockType {
        match self {
            BlockKind::Page => BlockType::Page,
            BlockKind::Paragraph => BlockType::Paragraph,
            BlockKind::Heading { .. } => BlockType::Heading,
            BlockKind::TodoList { .. } => BlockType::TodoList,
            BlockKind::BulletedList => BlockType::BulletedList,
            BlockKind::NumberedList { .. } => BlockType::NumberedList,
            BlockKind::Toggle { .. } => BlockType::ToggleList,
            BlockKind::Quote => BlockType::Quote,
            BlockKind::Callout { .. } => BlockType::Callout,
            BlockKind::Code { .. } => BlockType::Code,
            BlockKind::Divider => BlockType::Divider,
            BlockKind::Image { .. } => BlockType::Image,
            BlockKind::Equation { .. } => BlockType::MathEquation,
            BlockKind::Table { .. } => BlockType::Table,
            BlockKind::TableCell { .. } => BlockType::TableCell,
            BlockKind::Database { .. } => BlockType::Grid,
            BlockKind::LinkToPage { .. } => BlockType::LinkToPage,
        }
    }

    /// Type and initial attributes of the block created when this one is split.
    ///
    /// Headings, quotes and expanded toggles continue as a paragraph. Every
    /// other type carries on as itself with a fresh payload, so a todo starts
    /// unchecked.
    pub fn split_target(&self) -> (BlockType, Attributes) {
        match self {
            BlockKind::Page
            | BlockKind::Heading { .. }
            | BlockKind::Quote
            | BlockKind::Toggle {
                collapsed: false, ..
            } => (BlockType::Paragraph, Attributes::new()),
            BlockKind::TodoList { .. } => {
                let mut attrs = Attributes::new();
                attrs.insert("checked".to_string(), Value::Bool(false));
                (BlockType::TodoList, attrs)
            }
            other => (other.block_type(), Attributes::new()),
        }
    }
}

fn flag(attrs: &Attributes, key: &str) -> bool {
    attrs.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn uint(attrs: &Attributes, key: &str) -> Option<u64> {
    match attrs.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Small unsigned value such as a level, saturating at `u8::MAX`
fn small(attrs: &Attributes, key: &str) -> Option<u8> {
    uint(attrs, key).map(|n| u8::try_from(n).unwrap_or(u8::MAX))
}

/// Count or position, saturating at `u32::MAX`
fn count(attrs: &Attributes, key: &str) -> Option<u32> {
    uint(attrs, key).map(|n| u32::try_from(n).unwrap_or(u32::MAX))
}

fn string(attrs: &Attributes, key: &str) -> Option<String> {
    attrs.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_wire_names_round_trip() {
        for ty in BlockType::ALL {
            assert_eq!(BlockType::parse(ty.as_str()), Some(ty));
            let encoded = serde_json::to_string(&ty).unwrap();
            assert_eq!(encoded, format!("\"{}\"", ty.as_str()));
        }
        assert_eq!(BlockType::parse("kanban"), None);
    }

    #[test]
    fn test_resolve_heading_level() {
        let kind = BlockKind::resolve(BlockType::Heading, &attrs(json!({ "level": 3 })));
        assert_eq!(kind, BlockKind::Heading { level: 3 });

        let clamped = BlockKind::resolve(BlockType::Heading, &attrs(json!({ "level": 12 })));
        assert_eq!(clamped, BlockKind::Heading { level: 6 });
    }

    #[test]
    fn test_resolve_tolerates_bad_payload() {
        let kind = BlockKind::resolve(BlockType::TodoList, &attrs(json!({ "checked": "yes" })));
        assert_eq!(kind, BlockKind::TodoList { checked: false });
    }

    #[test]
    fn test_split_target_rules() {
        let todo = BlockKind::TodoList { checked: true };
        let (ty, attrs) = todo.split_target();
        assert_eq!(ty, BlockType::TodoList);
        assert_eq!(attrs.get("checked"), Some(&Value::Bool(false)));

        let open_toggle = BlockKind::Toggle {
            collapsed: false,
            level: None,
        };
        assert_eq!(open_toggle.split_target().0, BlockType::Paragraph);

        let closed_toggle = BlockKind::Toggle {
            collapsed: true,
            level: Some(2),
        };
        assert_eq!(closed_toggle.split_target(), (BlockType::ToggleList, Attributes::new()));

        for kind in [BlockKind::Heading { level: 2 }, BlockKind::Quote] {
            assert_eq!(kind.split_target().0, BlockType::Paragraph);
        }

        let callout = BlockKind::Callout {
            icon: Some("💡".into()),
        };
        assert_eq!(callout.split_target(), (BlockType::Callout, Attributes::new()));
        let code = BlockKind::Code {
            language: Some("rust".into()),
        };
        assert_eq!(code.split_target().0, BlockType::Code);
        assert_eq!(BlockKind::BulletedList.split_target().0, BlockType::BulletedList);
        assert_eq!(BlockKind::Paragraph.split_target().0, BlockType::Paragraph);
    }

    #[test]
    fn test_oversized_numbers_saturate() {
        let toggle = BlockKind::resolve(BlockType::ToggleList, &attrs(json!({ "level": 300 })));
        assert_eq!(
            toggle,
            BlockKind::Toggle {
                collapsed: false,
                level: Some(u8::MAX)
            }
        );

        let table = BlockKind::resolve(BlockType::Table, &attrs(json!({ "rowsLen": 5_000_000_000u64 })));
        assert_eq!(table, BlockKind::Table { rows: u32::MAX, cols: 0 });

        let heading = BlockKind::resolve(BlockType::Heading, &attrs(json!({ "level": 1000 })));
        assert_eq!(heading, BlockKind::Heading { level: 6 });
    }

    #[test]
    fn test_embeds_have_no_text() {
        assert!(!BlockType::Divider.has_text());
        assert!(!BlockType::Grid.has_text());
        assert!(BlockType::Paragraph.has_text());
        assert!(BlockType::ToggleList.accepts_children());
        assert!(!BlockType::Image.accepts_children());
    }
}
