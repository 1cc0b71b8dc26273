//! Editor element model.
//!
//! The editor works on a tree of elements. An element is either a
//! `block` (void or container of other elements) or a `text` element
//! whose children are text leaves.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Element class discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementClass {
    Block,
    Text,
}

/// A leaf carrying a run of text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextLeaf {
    pub text: String,
}

/// A child of an element: a nested element or a text leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EditorNode {
    Element(Element),
    Text(TextLeaf),
}

impl EditorNode {
    pub fn text(text: impl Into<String>) -> Self {
        EditorNode::Text(TextLeaf { text: text.into() })
    }

    /// Concatenated text of this node and everything below it.
    pub fn plain_text(&self) -> String {
        match self {
            EditorNode::Text(leaf) => leaf.text.clone(),
            EditorNode::Element(element) => element.plain_text(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    pub class: ElementClass,
    #[serde(rename = "type")]
    pub r#type: String,
    /// Flattened scalar fields
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<EditorNode>,
}

impl Element {
    pub fn new(id: impl Into<String>, class: ElementClass, r#type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class,
            r#type: r#type.into(),
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Child elements, skipping text leaves.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            EditorNode::Element(element) => Some(element),
            EditorNode::Text(_) => None,
        })
    }

    /// All text below this element, concatenated with no separator.
    pub fn plain_text(&self) -> String {
        self.children.iter().map(EditorNode::plain_text).collect()
    }

    /// Parsed `crop` property. `None` when absent or malformed.
    pub fn crop(&self) -> Option<Crop> {
        self.property("crop").and_then(Crop::parse)
    }

    /// Parsed `focus` property. `None` when absent or malformed.
    pub fn focus(&self) -> Option<Focus> {
        self.property("focus").and_then(Focus::parse)
    }
}

/// Relative crop rectangle, every component in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crop {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Crop {
    /// Parse `"x y w h"`. Wrong token count, non-numbers and values
    /// outside `[0, 1]` yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match parse_unit_floats(raw)?.as_slice() {
            [x, y, w, h] => Some(Self { x: *x, y: *y, w: *w, h: *h }),
            _ => None,
        }
    }
}

/// Relative focus point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Focus {
    pub x: f64,
    pub y: f64,
}

impl Focus {
    /// Parse `"x y"`.
    pub fn parse(raw: &str) -> Option<Self> {
        match parse_unit_floats(raw)?.as_slice() {
            [x, y] => Some(Self { x: *x, y: *y }),
            _ => None,
        }
    }
}

fn parse_unit_floats(raw: &str) -> Option<Vec<f64>> {
    raw.split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .ok()
                .filter(|v| (0.0..=1.0).contains(v))
        })
        .collect()
}
