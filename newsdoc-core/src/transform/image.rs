//! `core/image` with crop and focus.
//!
//! A crop metadata block leading `meta` is folded into the image element:
//!
//! ```text
//! Block core/image                      Element core/image
//!   meta: [ core/softcrop               properties:
//!           data.crop  = "x y w h"  ──►   crop    = "x y w h"
//!           data.focus = "x y" ]          focus   = "x y"
//!                                         cropId  = <crop block id>
//! ```
//!
//! Raw crop/focus strings are carried verbatim; parsing happens on demand
//! through [`Element::crop`] and [`Element::focus`].

use super::generic::{element_id, encode_collections, flatten, restore};
use super::TransformError;
use crate::block::Block;
use crate::element::{Element, ElementClass};

pub const IMAGE_TYPE: &str = "core/image";
pub const CROP_TYPE: &str = "core/softcrop";

const CROP_KEYS: [&str; 2] = ["crop", "focus"];
const CROP_ID: &str = "cropId";

/// A meta block that can be folded losslessly into image properties.
fn is_foldable_crop(block: &Block) -> bool {
    block.r#type == CROP_TYPE
        && !block.data.is_empty()
        && block.data.keys().all(|k| CROP_KEYS.contains(&k.as_str()))
        && block.title.is_empty()
        && block.name.is_empty()
        && block.role.is_empty()
        && block.value.is_empty()
        && block.uri.is_empty()
        && block.url.is_empty()
        && block.rel.is_empty()
        && block.contenttype.is_empty()
        && block.meta.is_empty()
        && block.content.is_empty()
        && block.links.is_empty()
}

pub fn transform(block: &Block) -> Result<Element, TransformError> {
    let mut rest = block.clone();
    let crop = if rest.meta.first().is_some_and(is_foldable_crop) {
        Some(rest.meta.remove(0))
    } else {
        None
    };

    let mut element = Element::new(element_id(block), ElementClass::Block, block.r#type.clone());
    element.properties = flatten(&rest, &[]);
    encode_collections(&rest, &mut element.properties, false)?;

    if let Some(crop) = crop {
        for key in CROP_KEYS {
            if let Some(value) = crop.data.get(key) {
                element.properties.insert(key.to_string(), value.clone());
            }
        }
        if !crop.id.is_empty() {
            element.properties.insert(CROP_ID.to_string(), crop.id);
        }
    }

    Ok(element)
}

/// Split crop/focus back out into a leading metadata block.
pub fn revert(element: &Element) -> Result<Block, TransformError> {
    let mut block = restore(element)?;

    let mut crop = Block::new(CROP_TYPE).with_id(element.property(CROP_ID).unwrap_or(""));
    for key in CROP_KEYS {
        if let Some(value) = element.property(key) {
            crop.data.insert(key.to_string(), value.to_string());
        }
    }
    if !crop.data.is_empty() {
        block.meta.insert(0, crop);
    }

    Ok(block)
}
