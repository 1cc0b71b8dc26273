//! Block tree model: the canonical structured document format.
//!
//! ```text
//! Document ── meta    ── [Block, Block, ...]
//!          ├─ content ── [Block ── meta/content/links ── ...]
//!          └─ links   ── [Block, ...]
//! ```
//!
//! Scalar fields serialize only when non-empty. The three child
//! collections always serialize, even when empty.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type of the plain paragraph block produced by [`text_to_blocks`].
pub const TEXT_TYPE: &str = "core/text";

/// A node of the block tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Stable identifier, survives edits
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Namespaced type, e.g. `core/text`. Required on decode.
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub contenttype: String,
    /// Flat string map, never nested
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub meta: Vec<Block>,
    #[serde(default)]
    pub content: Vec<Block>,
    #[serde(default)]
    pub links: Vec<Block>,
}

impl Block {
    /// Create an empty block of the given type.
    pub fn new(r#type: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Look up a data entry, treating a missing key as empty.
    pub fn data_str(&self, key: &str) -> &str {
        self.data.get(key).map(String::as_str).unwrap_or("")
    }

    /// Field-wise equality where an absent data entry equals an empty one.
    ///
    /// Scalar fields already collapse absent into empty on decode, and child
    /// collections are compared element by element in order.
    pub fn equivalent(&self, other: &Block) -> bool {
        self.id == other.id
            && self.r#type == other.r#type
            && self.title == other.title
            && self.name == other.name
            && self.role == other.role
            && self.value == other.value
            && self.uri == other.uri
            && self.url == other.url
            && self.rel == other.rel
            && self.contenttype == other.contenttype
            && data_equivalent(&self.data, &other.data)
            && blocks_equivalent(&self.meta, &other.meta)
            && blocks_equivalent(&self.content, &other.content)
            && blocks_equivalent(&self.links, &other.links)
    }
}

/// The persisted unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub uuid: String,
    #[serde(rename = "type", default)]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default)]
    pub meta: Vec<Block>,
    #[serde(default)]
    pub content: Vec<Block>,
    #[serde(default)]
    pub links: Vec<Block>,
    /// Assigned by the repository on a successful write (0 = never stored)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub version: u64,
}

impl Document {
    pub fn new(uuid: impl Into<String>, r#type: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            r#type: r#type.into(),
            ..Self::default()
        }
    }

    /// Same equality rules as [`Block::equivalent`]; `version` is ignored.
    pub fn equivalent(&self, other: &Document) -> bool {
        self.uuid == other.uuid
            && self.r#type == other.r#type
            && self.uri == other.uri
            && self.url == other.url
            && self.language == other.language
            && self.title == other.title
            && blocks_equivalent(&self.meta, &other.meta)
            && blocks_equivalent(&self.content, &other.content)
            && blocks_equivalent(&self.links, &other.links)
    }
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

fn blocks_equivalent(a: &[Block], b: &[Block]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equivalent(y))
}

fn data_equivalent(a: &BTreeMap<String, String>, b: &BTreeMap<String, String>) -> bool {
    let lookup = |map: &BTreeMap<String, String>, key: &str| {
        map.get(key).map(String::as_str).unwrap_or("").to_owned()
    };
    a.keys()
        .chain(b.keys())
        .all(|key| lookup(a, key) == lookup(b, key))
}

/// Expand multi-line text into one paragraph block per line.
///
/// The empty string yields a single empty paragraph, so that
/// `blocks_to_text(&text_to_blocks(s)) == s` for every `s`.
pub fn text_to_blocks(text: &str) -> Vec<Block> {
    text.split('\n')
        .map(|line| {
            Block::new(TEXT_TYPE)
                .with_id(uuid::Uuid::new_v4().to_string())
                .with_data("text", line)
        })
        .collect()
}

/// Collapse paragraph blocks back into newline-joined text.
pub fn blocks_to_text(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(|block| block.data_str("text"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_serializes_empty_collections() {
        let block = Block::new("core/text");
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "core/text");
        assert_eq!(json["meta"], serde_json::json!([]));
        assert_eq!(json["content"], serde_json::json!([]));
        assert_eq!(json["links"], serde_json::json!([]));
        assert!(json.get("title").is_none());
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_block_requires_type() {
        let result: Result<Block, _> = serde_json::from_str(r#"{"id":"a"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_block_rejects_nested_data() {
        let result: Result<Block, _> =
            serde_json::from_str(r#"{"type":"core/text","data":{"text":{"x":1}}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_block_missing_collections_decode_empty() {
        let block: Block = serde_json::from_str(r#"{"type":"core/text"}"#).unwrap();
        assert!(block.meta.is_empty());
        assert!(block.content.is_empty());
        assert!(block.links.is_empty());
    }

    #[test]
    fn test_equivalent_treats_empty_data_as_absent() {
        let a = Block::new("core/text").with_id("1").with_data("text", "");
        let b = Block::new("core/text").with_id("1");
        assert!(a.equivalent(&b));
        assert!(b.equivalent(&a));
        assert_ne!(a, b);

        let c = Block::new("core/text").with_id("1").with_data("text", "x");
        assert!(!a.equivalent(&c));
    }

    #[test]
    fn test_equivalent_is_order_sensitive() {
        let mut a = Block::new("core/table");
        a.content = vec![Block::new("x"), Block::new("y")];
        let mut b = Block::new("core/table");
        b.content = vec![Block::new("y"), Block::new("x")];
        assert!(!a.equivalent(&b));
    }

    #[test]
    fn test_text_to_blocks_one_per_line() {
        let blocks = text_to_blocks("first\nsecond\n\nfourth");
        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|b| b.r#type == TEXT_TYPE && !b.id.is_empty()));
        assert_eq!(blocks[2].data_str("text"), "");
        assert_eq!(blocks_to_text(&blocks), "first\nsecond\n\nfourth");
    }

    #[test]
    fn test_text_to_blocks_empty_string() {
        let blocks = text_to_blocks("");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks_to_text(&blocks), "");
    }

    #[test]
    fn test_document_version_skipped_when_zero() {
        let doc = Document::new("8f4b5e1c-0000-4000-8000-000000000001", "core/article");
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("version").is_none());

        let stored = Document { version: 3, ..doc.clone() };
        assert!(stored.equivalent(&doc));
    }
}
