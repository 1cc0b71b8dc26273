//! Identity handler and the flattening helpers shared by every handler.
//!
//! Property naming:
//! - block scalars keep their field name (`title`, `uri`, ...)
//! - data entries are prefixed: `data.<key>`
//! - child collections are JSON-encoded under `meta`, `content`, `links`

use std::collections::BTreeMap;

use uuid::Uuid;

use super::TransformError;
use crate::block::Block;
use crate::element::{Element, ElementClass};

pub const DATA_PREFIX: &str = "data.";

const SCALAR_FIELDS: [&str; 8] = [
    "title",
    "name",
    "role",
    "value",
    "uri",
    "url",
    "rel",
    "contenttype",
];

const COLLECTION_FIELDS: [&str; 3] = ["meta", "content", "links"];

/// Keep the block id, or mint one when the block has none.
pub fn element_id(block: &Block) -> String {
    if block.id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        block.id.clone()
    }
}

fn scalar<'a>(block: &'a Block, field: &str) -> &'a str {
    match field {
        "title" => block.title.as_str(),
        "name" => block.name.as_str(),
        "role" => block.role.as_str(),
        "value" => block.value.as_str(),
        "uri" => block.uri.as_str(),
        "url" => block.url.as_str(),
        "rel" => block.rel.as_str(),
        "contenttype" => block.contenttype.as_str(),
        _ => "",
    }
}

fn scalar_mut<'a>(block: &'a mut Block, field: &str) -> Option<&'a mut String> {
    match field {
        "title" => Some(&mut block.title),
        "name" => Some(&mut block.name),
        "role" => Some(&mut block.role),
        "value" => Some(&mut block.value),
        "uri" => Some(&mut block.uri),
        "url" => Some(&mut block.url),
        "rel" => Some(&mut block.rel),
        "contenttype" => Some(&mut block.contenttype),
        _ => None,
    }
}

fn collection<'a>(block: &'a Block, field: &str) -> &'a [Block] {
    match field {
        "meta" => &block.meta,
        "content" => &block.content,
        _ => &block.links,
    }
}

fn collection_mut<'a>(block: &'a mut Block, field: &str) -> &'a mut Vec<Block> {
    match field {
        "meta" => &mut block.meta,
        "content" => &mut block.content,
        _ => &mut block.links,
    }
}

/// Flatten non-empty scalars and data entries into element properties.
pub fn flatten(block: &Block, skip_data: &[&str]) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    for field in SCALAR_FIELDS {
        let value = scalar(block, field);
        if !value.is_empty() {
            properties.insert(field.to_string(), value.to_string());
        }
    }
    for (key, value) in &block.data {
        if !skip_data.contains(&key.as_str()) {
            properties.insert(format!("{DATA_PREFIX}{key}"), value.clone());
        }
    }
    properties
}

/// JSON-encode child collections into properties.
///
/// With `always` unset, empty collections are left out.
pub fn encode_collections(
    block: &Block,
    properties: &mut BTreeMap<String, String>,
    always: bool,
) -> Result<(), TransformError> {
    for field in COLLECTION_FIELDS {
        let blocks = collection(block, field);
        if blocks.is_empty() && !always {
            continue;
        }
        let encoded = serde_json::to_string(blocks).map_err(|e| TransformError::Encode {
            block_type: block.r#type.clone(),
            field: field.to_string(),
            reason: e.to_string(),
        })?;
        properties.insert(field.to_string(), encoded);
    }
    Ok(())
}

/// Rebuild id, type, scalars, data and encoded collections from an element.
///
/// Properties outside the naming scheme are ignored; handlers pick those
/// up themselves. A collection payload that fails to decode is an error.
pub fn restore(element: &Element) -> Result<Block, TransformError> {
    let mut block = Block::new(element.r#type.clone()).with_id(element.id.clone());

    for (key, value) in &element.properties {
        if let Some(data_key) = key.strip_prefix(DATA_PREFIX) {
            block.data.insert(data_key.to_string(), value.clone());
        } else if let Some(slot) = scalar_mut(&mut block, key) {
            *slot = value.clone();
        }
    }

    for field in COLLECTION_FIELDS {
        if let Some(raw) = element.property(field) {
            let decoded: Vec<Block> =
                serde_json::from_str(raw).map_err(|e| TransformError::MalformedPayload {
                    block_type: element.r#type.clone(),
                    field: field.to_string(),
                    reason: e.to_string(),
                })?;
            *collection_mut(&mut block, field) = decoded;
        }
    }

    Ok(block)
}

/// Identity transform: every field copied through as a property.
pub fn transform(block: &Block) -> Result<Element, TransformError> {
    let mut element = Element::new(element_id(block), ElementClass::Block, block.r#type.clone());
    element.properties = flatten(block, &[]);
    encode_collections(block, &mut element.properties, false)?;
    Ok(element)
}

pub fn revert(element: &Element) -> Result<Block, TransformError> {
    restore(element)
}
