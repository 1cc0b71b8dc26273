//! Cache store for idle replicated documents.
//!
//! ```text
//! ┌──────────────┐  get (open)    ┌──────────────────────────────┐
//! │ SessionMgr   │ ─────────────► │ CacheStore                   │
//! │              │  store (close) │  "newsdoc:<uuid>" → bytes    │
//! │              │ ─────────────► │                              │
//! │              │  touch (miss)  │  touched: ts → key (sorted)  │
//! └──────────────┘ ─────────────► └──────────────────────────────┘
//! ```
//!
//! The touched index is diagnostics only; nothing reads it for
//! correctness.

pub mod memory;
pub mod rocks;

pub use memory::MemoryCacheStore;
pub use rocks::{CacheConfig, RocksCacheStore};

use std::time::SystemTime;

use futures_util::future::BoxFuture;

/// Namespace prepended to every document key.
pub const DEFAULT_KEY_PREFIX: &str = "newsdoc:";

/// Cache errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

impl From<rocksdb::Error> for CacheError {
    fn from(e: rocksdb::Error) -> Self {
        CacheError::Database(e.to_string())
    }
}

/// External key-value store holding serialized replicas.
pub trait CacheStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>>;

    fn store<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Record a cache-miss timestamp for `key` in the touched index.
    fn touch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>>;
}

/// Cache key for a document identity.
pub fn cache_key(prefix: &str, id: &uuid::Uuid) -> String {
    format!("{prefix}{id}")
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
