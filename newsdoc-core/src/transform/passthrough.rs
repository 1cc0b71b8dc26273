//! Wire and print-article blocks.
//!
//! Their child collections are opaque to the editor: always JSON-encoded
//! into properties and decoded strictly on the way back.

use super::generic::{element_id, encode_collections, flatten, restore};
use super::TransformError;
use crate::block::Block;
use crate::element::{Element, ElementClass};

pub const PASSTHROUGH_TYPES: [&str; 2] = ["tt/wire", "tt/print-article"];

pub fn transform(block: &Block) -> Result<Element, TransformError> {
    let mut element = Element::new(element_id(block), ElementClass::Block, block.r#type.clone());
    element.properties = flatten(block, &[]);
    encode_collections(block, &mut element.properties, true)?;
    Ok(element)
}

/// Fails when an encoded collection is not a valid block sequence.
pub fn revert(element: &Element) -> Result<Block, TransformError> {
    restore(element)
}
