//! # newsdoc-collab — Session, cache and snapshot layer for NewsDoc replicas
//!
//! Keeps one shared yrs replica per open document, parks idle replicas in a
//! cache, and hardens replicas into repository versions on request.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  open / close   ┌────────────────┐  get / store   ┌────────────┐
//! │ collaboration│ ──────────────► │ SessionManager │ ─────────────► │ CacheStore │
//! │ provider     │                 │ (resident docs)│                │ (rocks/mem)│
//! └──────────────┘                 └───────┬────────┘                └────────────┘
//!                                          │ replica
//!                                          ▼
//!                                  ┌────────────────┐     put        ┌────────────┐
//!                                  │SnapshotPipeline│ ─────────────► │ Repository │
//!                                  │ (one per doc)  │                │ (http/mem) │
//!                                  └────────────────┘                └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`cache`] — Keyed byte cache with touch tracking (RocksDB or memory)
//! - [`repository`] — Versioned document store client (HTTP or memory)
//! - [`session`] — Open-document registry and cache round trips
//! - [`snapshot`] — Replica to repository pipeline with change detection

pub mod cache;
pub mod repository;
pub mod session;
pub mod snapshot;

// Re-exports for convenience
pub use cache::{cache_key, CacheError, CacheStore, DEFAULT_KEY_PREFIX};
pub use cache::memory::MemoryCacheStore;
pub use cache::rocks::{CacheConfig, RocksCacheStore};
pub use repository::{
    Agent, HttpRepository, HttpRepositoryConfig, MemoryRepository, PutOptions, PutResponse,
    Repository, RepositoryError, SnapshotContext, Status, StoredVersion, FAILED_PRECONDITION,
    STATUS_OK,
};
pub use session::{
    parse_identity, ActiveDocument, DocumentInfo, SessionConfig, SessionError, SessionManager,
    SessionStats, SnapshotMarker,
};
pub use snapshot::{
    content_hash, SnapshotConfig, SnapshotError, SnapshotOptions, SnapshotPipeline,
    SnapshotResult, SnapshotState, ABORTED_CODE, TIMEOUT_CODE, UNAVAILABLE_CODE,
};
