//! Pre-persistence cleanup of a Document.
//!
//! The repository never receives placeholder fields:
//! - top-level `meta` blocks with an empty `data` map are dropped
//! - top-level `links` without a `url` are dropped
//! - concept blocks lose `data` entries with empty values, at any depth
//!
//! When the document itself is a concept, every block is treated as one.

use crate::block::{Block, Document};

/// Block types describing concepts rather than content.
pub const CONCEPT_TYPES: [&str; 5] = [
    "core/section",
    "core/contact",
    "core/contact-info",
    "core/author",
    "core/organiser",
];

pub fn is_concept_type(r#type: &str) -> bool {
    CONCEPT_TYPES.contains(&r#type)
}

pub fn normalize(document: &mut Document) {
    document.meta.retain(|block| !block.data.is_empty());
    document.links.retain(|block| !block.url.is_empty());

    let all_concepts = is_concept_type(&document.r#type);
    for collection in [&mut document.meta, &mut document.content, &mut document.links] {
        for block in collection.iter_mut() {
            prune_concept_data(block, all_concepts);
        }
    }
}

fn prune_concept_data(block: &mut Block, all_concepts: bool) {
    if all_concepts || is_concept_type(&block.r#type) {
        block.data.retain(|_, value| !value.is_empty());
    }
    for child in block
        .meta
        .iter_mut()
        .chain(block.content.iter_mut())
        .chain(block.links.iter_mut())
    {
        prune_concept_data(child, all_concepts);
    }
}
