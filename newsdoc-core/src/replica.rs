//! Whole-document layout inside a `yrs::Doc`.
//!
//! ```text
//! Doc
//! ├── "root"    MapRef    uuid, type, uri, url, language, title
//! ├── "meta"    ArrayRef  [Block map, ...]
//! ├── "content" ArrayRef  [Element map, ...]   (registry transform/revert)
//! └── "links"   ArrayRef  [Block map, ...]
//! ```
//!
//! The repository `version` is not replicated; it travels with the
//! session's snapshot marker instead.

use serde_json::Value;
use yrs::{Array, ArrayRef, Doc, Map, ReadTxn, Transact, TransactionMut};

use crate::adapter::{write_array, write_map, AdapterError, Node};
use crate::block::Document;
use crate::element::Element;
use crate::transform::Registry;

pub const ROOT: &str = "root";
pub const META: &str = "meta";
pub const CONTENT: &str = "content";
pub const LINKS: &str = "links";

/// Create a fresh replica holding `document`.
pub fn new_replica(document: &Document, registry: &Registry) -> Result<Doc, AdapterError> {
    let doc = Doc::new();
    write_document(&doc, document, registry)?;
    Ok(doc)
}

/// Replace the replica's contents with `document` in one transaction.
pub fn write_document(
    doc: &Doc,
    document: &Document,
    registry: &Registry,
) -> Result<(), AdapterError> {
    let root_value = root_object(document)?;
    let meta = to_values(&document.meta)?;
    let links = to_values(&document.links)?;
    let content = to_values(&registry.transform_all(&document.content)?)?;

    let root = doc.get_or_insert_map(ROOT);
    let meta_ref = doc.get_or_insert_array(META);
    let content_ref = doc.get_or_insert_array(CONTENT);
    let links_ref = doc.get_or_insert_array(LINKS);

    let mut txn = doc.transact_mut();
    root.clear(&mut txn);
    for array in [&meta_ref, &content_ref, &links_ref] {
        clear_array(&mut txn, array);
    }

    let ty = document.r#type.as_str();
    write_map(&mut txn, &root, &root_value, ty, registry);
    write_array(&mut txn, &meta_ref, &meta, ty, registry);
    write_array(&mut txn, &content_ref, &content, ty, registry);
    write_array(&mut txn, &links_ref, &links, ty, registry);
    Ok(())
}

/// Materialize the replica as a Document within a single read transaction.
pub fn read_document<T: ReadTxn>(txn: &T, registry: &Registry) -> Result<Document, AdapterError> {
    let mut object = match txn.get_map(ROOT) {
        Some(root) => match Node::read_map(txn, &root).into_value() {
            Value::Object(object) => object,
            _ => serde_json::Map::new(),
        },
        None => serde_json::Map::new(),
    };
    object.insert(META.into(), read_array(txn, META));
    object.insert(LINKS.into(), read_array(txn, LINKS));

    let mut document: Document = from_value(Value::Object(object))?;
    let elements: Vec<Element> = from_value(read_array(txn, CONTENT))?;
    document.content = registry.revert_all(&elements)?;
    Ok(document)
}

/// Convenience wrapper opening its own read transaction.
pub fn document_of(doc: &Doc, registry: &Registry) -> Result<Document, AdapterError> {
    let txn = doc.transact();
    read_document(&txn, registry)
}

/// Plain JSON view of the whole replica, fragments resolved.
pub fn plain_value<T: ReadTxn>(txn: &T) -> Value {
    let root = txn
        .get_map(ROOT)
        .map(|root| Node::read_map(txn, &root).into_value())
        .unwrap_or(Value::Null);
    serde_json::json!({
        ROOT: root,
        META: read_array(txn, META),
        CONTENT: read_array(txn, CONTENT),
        LINKS: read_array(txn, LINKS),
    })
}

fn read_array<T: ReadTxn>(txn: &T, name: &str) -> Value {
    txn.get_array(name)
        .map(|array| Node::read_array(txn, &array).into_value())
        .unwrap_or_else(|| Value::Array(Vec::new()))
}

fn clear_array(txn: &mut TransactionMut, array: &ArrayRef) {
    let len = array.len(txn);
    if len > 0 {
        array.remove_range(txn, 0, len);
    }
}

fn root_object(document: &Document) -> Result<serde_json::Map<String, Value>, AdapterError> {
    let mut object = match serde_json::to_value(document) {
        Ok(Value::Object(object)) => object,
        Ok(other) => return Err(AdapterError::Encode(format!("document is not an object: {other}"))),
        Err(e) => return Err(AdapterError::Encode(e.to_string())),
    };
    for key in [META, CONTENT, LINKS, "version"] {
        object.remove(key);
    }
    Ok(object)
}

fn to_values<S: serde::Serialize>(items: &[S]) -> Result<Vec<Value>, AdapterError> {
    items
        .iter()
        .map(|item| serde_json::to_value(item).map_err(|e| AdapterError::Encode(e.to_string())))
        .collect()
}

fn from_value<D: serde::de::DeserializeOwned>(value: Value) -> Result<D, AdapterError> {
    serde_json::from_value(value).map_err(|e| AdapterError::Decode(e.to_string()))
}
