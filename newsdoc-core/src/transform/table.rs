//! `core/table` with an HTML-ish body.
//!
//! ```text
//! data.tbody = "<tr><td>a</td><td>b</td></tr>"
//!
//! core/table (block)
//!   └─ core/table/row (block)
//!        ├─ core/table/cell (text) ── "a"
//!        └─ core/table/cell (text) ── "b"
//! ```
//!
//! The scanner is lenient: tag names are case-insensitive, attributes are
//! dropped and a missing close tag runs to the end of the enclosing scope.

use super::generic::{element_id, encode_collections, flatten, restore};
use super::TransformError;
use crate::block::Block;
use crate::element::{EditorNode, Element, ElementClass};

use uuid::Uuid;

pub const TABLE_TYPE: &str = "core/table";
pub const ROW_TYPE: &str = "core/table/row";
pub const CELL_TYPE: &str = "core/table/cell";

const TBODY: &str = "tbody";

pub fn transform(block: &Block) -> Result<Element, TransformError> {
    let mut element = Element::new(element_id(block), ElementClass::Block, block.r#type.clone());
    element.properties = flatten(block, &[TBODY]);
    encode_collections(block, &mut element.properties, false)?;

    element.children = parse_rows(block.data_str(TBODY))
        .into_iter()
        .map(|cells| {
            let mut row = Element::new(Uuid::new_v4().to_string(), ElementClass::Block, ROW_TYPE);
            row.children = cells
                .into_iter()
                .map(|text| {
                    let mut cell =
                        Element::new(Uuid::new_v4().to_string(), ElementClass::Text, CELL_TYPE);
                    cell.children = vec![EditorNode::text(text)];
                    EditorNode::Element(cell)
                })
                .collect();
            EditorNode::Element(row)
        })
        .collect();

    Ok(element)
}

/// Serialize rows back into `tbody`. Multiple runs inside one cell are
/// concatenated with no separator.
pub fn revert(element: &Element) -> Result<Block, TransformError> {
    let mut block = restore(element)?;

    let mut tbody = String::new();
    for row in element.elements() {
        tbody.push_str("<tr>");
        for cell in row.elements() {
            tbody.push_str("<td>");
            tbody.push_str(&cell.plain_text());
            tbody.push_str("</td>");
        }
        tbody.push_str("</tr>");
    }
    if !tbody.is_empty() {
        block.data.insert(TBODY.to_string(), tbody);
    }

    Ok(block)
}

/// Split a table body into rows of cell texts.
pub fn parse_rows(tbody: &str) -> Vec<Vec<String>> {
    scan_elements(tbody, "tr")
        .into_iter()
        .map(|row| {
            scan_elements(row, "td")
                .into_iter()
                .map(|cell| {
                    if cell.trim().is_empty() {
                        String::new()
                    } else {
                        cell.to_string()
                    }
                })
                .collect()
        })
        .collect()
}

/// Inner content of every `<tag ...>...</tag>` in order.
fn scan_elements<'a>(haystack: &'a str, tag: &str) -> Vec<&'a str> {
    let lower = haystack.to_ascii_lowercase();
    let close = format!("</{tag}>");
    let mut found = Vec::new();
    let mut cursor = 0;

    while let Some(start) = open_tag(&lower, cursor, tag) {
        let end = lower[start..]
            .find(&close)
            .map(|offset| start + offset)
            .unwrap_or(haystack.len());
        found.push(&haystack[start..end]);
        cursor = (end + close.len()).min(haystack.len());
    }

    found
}

/// Byte offset just past the `>` of the next `<tag>` or `<tag attr...>`.
fn open_tag(lower: &str, from: usize, tag: &str) -> Option<usize> {
    let needle = format!("<{tag}");
    let mut cursor = from;
    while let Some(offset) = lower[cursor..].find(&needle) {
        let after_name = cursor + offset + needle.len();
        match lower[after_name..].chars().next() {
            Some('>') => return Some(after_name + 1),
            Some(c) if c.is_ascii_whitespace() || c == '/' => {
                return lower[after_name..].find('>').map(|gt| after_name + gt + 1);
            }
            _ => cursor = after_name,
        }
    }
    None
}
