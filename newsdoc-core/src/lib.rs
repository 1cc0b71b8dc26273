//! # newsdoc-core — Block tree model and its replicated form
//!
//! Converts between the canonical structured document ("block tree") and
//! the shared `yrs` document editors mutate concurrently.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  transform   ┌─────────────┐   write    ┌─────────────┐
//! │  Document   │ ───────────► │  Elements   │ ─────────► │  yrs::Doc   │
//! │ (Block tree)│ ◄─────────── │ (editor)    │ ◄───────── │ (replica)   │
//! └─────────────┘   revert     └─────────────┘   adapter  └─────────────┘
//!        │
//!        ▼
//!   normalize (before persistence)
//! ```
//!
//! ## Modules
//!
//! - [`block`] — Block / Document model, equivalence, text helpers
//! - [`element`] — editor element tree, crop/focus parsing
//! - [`transform`] — per-type transform/revert registry
//! - [`adapter`] — yrs shared types to plain values and back
//! - [`replica`] — whole-document layout inside a `yrs::Doc`
//! - [`normalize`] — pre-persistence pruning

pub mod adapter;
pub mod block;
pub mod element;
pub mod normalize;
pub mod replica;
pub mod transform;

pub use adapter::{AdapterError, Node, RichText};
pub use block::{blocks_to_text, text_to_blocks, Block, Document};
pub use element::{Crop, EditorNode, Element, ElementClass, Focus, TextLeaf};
pub use normalize::normalize;
pub use replica::{document_of, new_replica, read_document, write_document};
pub use transform::{Handler, Registry, TransformError};
