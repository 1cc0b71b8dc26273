//! Transformation registry: per-type conversion between blocks and editor elements.
//!
//! ```text
//!            transform                 revert
//!  Block ──────────────► Element ──────────────► Block
//!    │   registry[type]     │    registry[type]     │
//!    └── unknown type ──► identity handler ◄────────┘
//! ```
//!
//! Every registered pair satisfies `revert(transform(b)) ≡ b` under
//! [`Block::equivalent`], provided `b` carries an id.

pub mod generic;
pub mod image;
pub mod passthrough;
pub mod table;
pub mod text;

use std::collections::HashMap;

use crate::block::Block;
use crate::element::Element;

/// Converts a block subtree into an editor element.
pub type TransformFn = fn(&Block) -> Result<Element, TransformError>;
/// Converts an editor element back into a block subtree.
pub type RevertFn = fn(&Element) -> Result<Block, TransformError>;

/// Transformation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("Malformed '{field}' payload on {block_type}: {reason}")]
    MalformedPayload {
        block_type: String,
        field: String,
        reason: String,
    },

    #[error("Failed to encode '{field}' on {block_type}: {reason}")]
    Encode {
        block_type: String,
        field: String,
        reason: String,
    },
}

/// A `(transform, revert)` pair for one block type.
#[derive(Debug, Clone, Copy)]
pub struct Handler {
    pub transform: TransformFn,
    pub revert: RevertFn,
}

impl Handler {
    pub const fn new(transform: TransformFn, revert: RevertFn) -> Self {
        Self { transform, revert }
    }
}

/// Fields holding rich text unless a type overrides them.
const DEFAULT_TEXT_FIELDS: [&str; 2] = ["text", "title"];

/// Lookup table from block type to handler and text-bearing fields.
#[derive(Debug, Clone)]
pub struct Registry {
    handlers: HashMap<String, Handler>,
    text_fields: HashMap<String, Vec<String>>,
    default_text_fields: Vec<String>,
    fallback: Handler,
}

impl Registry {
    /// Empty registry: every type goes through the identity handler.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            text_fields: HashMap::new(),
            default_text_fields: DEFAULT_TEXT_FIELDS.iter().map(|f| f.to_string()).collect(),
            fallback: Handler::new(generic::transform, generic::revert),
        }
    }

    /// Registry with the built-in newsroom handlers.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(text::TEXT_TYPE, Handler::new(text::transform, text::revert));
        registry.register(image::IMAGE_TYPE, Handler::new(image::transform, image::revert));
        registry.register(table::TABLE_TYPE, Handler::new(table::transform, table::revert));
        for ty in passthrough::PASSTHROUGH_TYPES {
            registry.register(ty, Handler::new(passthrough::transform, passthrough::revert));
        }
        registry.set_text_fields("tt/slugline", ["value"]);
        registry
    }

    /// Register (or replace) the handler for a type.
    pub fn register(&mut self, r#type: impl Into<String>, handler: Handler) {
        self.handlers.insert(r#type.into(), handler);
    }

    /// Override which fields of a type are text-bearing.
    pub fn set_text_fields<I, S>(&mut self, r#type: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.text_fields
            .insert(r#type.into(), fields.into_iter().map(Into::into).collect());
    }

    pub fn is_registered(&self, r#type: &str) -> bool {
        self.handlers.contains_key(r#type)
    }

    /// Handler for a type, falling back to the identity handler.
    pub fn handler(&self, r#type: &str) -> Handler {
        match self.handlers.get(r#type) {
            Some(handler) => *handler,
            None => {
                log::trace!("No handler for {}, copying fields through", r#type);
                self.fallback
            }
        }
    }

    pub fn text_fields(&self, r#type: &str) -> &[String] {
        self.text_fields
            .get(r#type)
            .unwrap_or(&self.default_text_fields)
    }

    /// Whether `key` holds rich text on a node of type `type`.
    ///
    /// Dotted keys (`data.text`) are matched on their last segment.
    pub fn is_text_bearing(&self, r#type: &str, key: &str) -> bool {
        let field = key.rsplit('.').next().unwrap_or(key);
        self.text_fields(r#type).iter().any(|f| f == field)
    }

    pub fn transform(&self, block: &Block) -> Result<Element, TransformError> {
        (self.handler(&block.r#type).transform)(block)
    }

    pub fn revert(&self, element: &Element) -> Result<Block, TransformError> {
        (self.handler(&element.r#type).revert)(element)
    }

    pub fn transform_all(&self, blocks: &[Block]) -> Result<Vec<Element>, TransformError> {
        blocks.iter().map(|b| self.transform(b)).collect()
    }

    pub fn revert_all(&self, elements: &[Element]) -> Result<Vec<Block>, TransformError> {
        elements.iter().map(|e| self.revert(e)).collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}
