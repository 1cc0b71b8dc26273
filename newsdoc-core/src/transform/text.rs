//! `core/text` paragraphs.
//!
//! The paragraph body (`data.text`) becomes the element's text leaves;
//! everything else is flattened into properties.

use super::generic::{element_id, encode_collections, flatten, restore};
use super::TransformError;
use crate::block::Block;
use crate::element::{EditorNode, Element, ElementClass};

pub use crate::block::TEXT_TYPE;

pub fn transform(block: &Block) -> Result<Element, TransformError> {
    let mut element = Element::new(element_id(block), ElementClass::Text, block.r#type.clone());
    element.properties = flatten(block, &["text"]);
    encode_collections(block, &mut element.properties, false)?;
    element.children = vec![EditorNode::text(block.data_str("text"))];
    Ok(element)
}

/// Leaf runs are concatenated with no separator.
pub fn revert(element: &Element) -> Result<Block, TransformError> {
    let mut block = restore(element)?;
    let text = element.plain_text();
    if !text.is_empty() {
        block.data.insert("text".to_string(), text);
    }
    Ok(block)
}
