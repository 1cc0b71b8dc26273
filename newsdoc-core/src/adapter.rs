//! Replicated document adapter.
//!
//! Walks yrs shared types into a closed [`Node`] tree and back out to plain
//! `serde_json` values. Rich-text fragments collapse to newline-joined
//! strings on read and expand to one text run per line on write.
//!
//! ```text
//!   yrs                         Node                     serde_json
//!   MapRef          ───►  Map(BTreeMap)        ───►  Object
//!   ArrayRef        ───►  Sequence(Vec)        ───►  Array
//!   XmlElementRef   ───►  TextFragment(runs)   ───►  String (runs joined by '\n')
//!   Any             ───►  Scalar(Any)          ───►  Null/Bool/Number/String
//! ```
//!
//! The writer decides which strings become fragments by asking the
//! [`Registry`] whether a key is text-bearing for the enclosing node's
//! `type`. Maps without a `type` of their own (`data`, `properties`, text
//! leaves) inherit it from their parent.

use std::collections::BTreeMap;

use serde_json::Value;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, GetString, Map, MapPrelim, MapRef, Out, ReadTxn,
    TransactionMut, XmlElementPrelim, XmlFragment, XmlOut, XmlTextPrelim,
};

use crate::transform::{Registry, TransformError};

/// XML tag of a rich-text fragment.
pub const RICH_TEXT_TAG: &str = "richtext";

const LINE_SEPARATOR: char = '\n';

/// Adapter errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("Failed to decode replicated value: {0}")]
    Decode(String),

    #[error("Failed to encode value for replication: {0}")]
    Encode(String),

    #[error(transparent)]
    Transform(#[from] TransformError),
}

// ─── Rich text capability ───────────────────────────────────────────

/// The only two things the adapter needs from a rich-text fragment.
pub trait RichText {
    /// Ordered line-equivalent text runs.
    fn runs<T: ReadTxn>(&self, txn: &T) -> Vec<String>;

    /// Append one run per entry.
    fn fill(&self, txn: &mut TransactionMut, runs: &[&str]);
}

impl<F: XmlFragment> RichText for F {
    fn runs<T: ReadTxn>(&self, txn: &T) -> Vec<String> {
        (0..self.len(txn))
            .filter_map(|index| self.get(txn, index))
            .map(|child| xml_plain_text(txn, child))
            .collect()
    }

    fn fill(&self, txn: &mut TransactionMut, runs: &[&str]) {
        for run in runs {
            self.push_back(txn, XmlTextPrelim::new(run.to_string()));
        }
    }
}

/// Text content of an XML node with markup dropped.
fn xml_plain_text<T: ReadTxn>(txn: &T, node: XmlOut) -> String {
    match node {
        XmlOut::Text(text) => text.get_string(txn),
        XmlOut::Element(element) => element.runs(txn).concat(),
        XmlOut::Fragment(fragment) => fragment.runs(txn).concat(),
    }
}

// ─── Read side ──────────────────────────────────────────────────────

/// Closed shape of a replicated value.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Any),
    Sequence(Vec<Node>),
    Map(BTreeMap<String, Node>),
    TextFragment(Vec<String>),
}

impl Node {
    pub fn read<T: ReadTxn>(txn: &T, value: Out) -> Node {
        match value {
            Out::Any(any) => Node::Scalar(any),
            Out::YMap(map) => Node::read_map(txn, &map),
            Out::YArray(array) => Node::read_array(txn, &array),
            Out::YXmlElement(element) => Node::TextFragment(element.runs(txn)),
            Out::YXmlFragment(fragment) => Node::TextFragment(fragment.runs(txn)),
            Out::YXmlText(text) => Node::TextFragment(split_lines(&text.get_string(txn))),
            Out::YText(text) => Node::TextFragment(split_lines(&text.get_string(txn))),
            _ => Node::Scalar(Any::Null),
        }
    }

    pub fn read_map<T: ReadTxn>(txn: &T, map: &MapRef) -> Node {
        Node::Map(
            map.iter(txn)
                .map(|(key, value)| (key.to_string(), Node::read(txn, value)))
                .collect(),
        )
    }

    pub fn read_array<T: ReadTxn>(txn: &T, array: &ArrayRef) -> Node {
        Node::Sequence(array.iter(txn).map(|value| Node::read(txn, value)).collect())
    }

    /// Plain value with every fragment resolved to its joined text.
    pub fn into_value(self) -> Value {
        match self {
            Node::Scalar(any) => any_to_json(&any),
            Node::Sequence(items) => Value::Array(items.into_iter().map(Node::into_value).collect()),
            Node::Map(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(key, node)| (key, node.into_value()))
                    .collect(),
            ),
            Node::TextFragment(runs) => Value::String(runs.join("\n")),
        }
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.split(LINE_SEPARATOR).map(str::to_string).collect()
}

fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
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
        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}

// ─── Write side ─────────────────────────────────────────────────────

fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Any::BigInt(i),
            None => Any::Number(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Any::String(s.as_str().into()),
        Value::Array(items) => Any::Array(items.iter().map(json_to_any).collect()),
        Value::Object(entries) => Any::Map(std::sync::Arc::new(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), json_to_any(value)))
                .collect(),
        )),
    }
}

/// `type` of a map, or the inherited one when it has none.
fn node_type<'a>(object: &'a serde_json::Map<String, Value>, inherited: &'a str) -> &'a str {
    object.get("type").and_then(Value::as_str).unwrap_or(inherited)
}

/// Populate `map` from a JSON object.
pub fn write_map(
    txn: &mut TransactionMut,
    map: &MapRef,
    object: &serde_json::Map<String, Value>,
    inherited_type: &str,
    registry: &Registry,
) {
    let ty = node_type(object, inherited_type);
    for (key, value) in object {
        match value {
            Value::String(text) if registry.is_text_bearing(ty, key) => {
                let fragment = map.insert(txn, key.as_str(), XmlElementPrelim::empty(RICH_TEXT_TAG));
                let lines: Vec<&str> = text.split(LINE_SEPARATOR).collect();
                fragment.fill(txn, &lines);
            }
            Value::Object(child) => {
                let nested = map.insert(txn, key.as_str(), MapPrelim::default());
                write_map(txn, &nested, child, ty, registry);
            }
            Value::Array(items) => {
                let nested = map.insert(txn, key.as_str(), ArrayPrelim::default());
                write_array(txn, &nested, items, ty, registry);
            }
            scalar => {
                map.insert(txn, key.as_str(), json_to_any(scalar));
            }
        }
    }
}

/// Append every item to `array`.
pub fn write_array(
    txn: &mut TransactionMut,
    array: &ArrayRef,
    items: &[Value],
    inherited_type: &str,
    registry: &Registry,
) {
    for item in items {
        match item {
            Value::Object(child) => {
                let nested = array.push_back(txn, MapPrelim::default());
                write_map(txn, &nested, child, inherited_type, registry);
            }
            Value::Array(inner) => {
                let nested = array.push_back(txn, ArrayPrelim::default());
                write_array(txn, &nested, inner, inherited_type, registry);
            }
            scalar => {
                array.push_back(txn, json_to_any(scalar));
            }
        }
    }
}
