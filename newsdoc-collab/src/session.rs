//! Session manager: the set of resident replicated documents.
//!
//! ```text
//!            open(id)                              close(id)
//!               │                                      │
//!    resident? ─┴─ yes ──► connections += 1            ▼
//!               │                              connections -= 1
//!               no                                     │
//!               ▼                                 zero? ── no ──► done
//!     CacheStore.get("newsdoc:<id>")                   │ yes
//!       hit ──► decode envelope ──┐                    ▼
//!       miss / undecodable ───────┤          CacheStore.store(envelope)
//!         └─ touch (best effort)  │             ok ──► evict
//!                                 ▼             err ─► stay resident
//!                       fresh / template doc
//! ```
//!
//! Opens of different identities never wait on each other: the map lock is
//! held only to find or insert the entry, and loading happens in a
//! per-document `OnceCell` that concurrent openers of the same id share.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use newsdoc_core::{new_replica, AdapterError, Document, Registry};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell, RwLock};
use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::cache::{
    cache_key, CacheConfig, CacheError, CacheStore, MemoryCacheStore, RocksCacheStore,
    DEFAULT_KEY_PREFIX,
};
use crate::snapshot::materialize;

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// RocksDB cache (None = in-memory cache store)
    pub cache: Option<CacheConfig>,
    /// Namespace for cache keys
    pub key_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl SessionConfig {
    /// RocksDB cache with small buffers at `path`.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            cache: Some(CacheConfig::for_testing(path)),
            ..Self::default()
        }
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid document identity: {0}")]
    InvalidIdentity(String),

    #[error("Document {0} is not active")]
    NotActive(Uuid),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Failed to apply update: {0}")]
    Update(String),

    #[error("Failed to build document: {0}")]
    Template(#[from] AdapterError),
}

/// Parse a document identity presented at the produced surface.
pub fn parse_identity(id: &str) -> Result<Uuid, SessionError> {
    Uuid::parse_str(id).map_err(|_| SessionError::InvalidIdentity(id.to_string()))
}

/// What the last successful snapshot saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMarker {
    /// Repository version assigned to it
    pub version: u64,
    /// SHA-256 of the normalized document, hex
    pub hash: String,
    /// Encoded yrs snapshot (state vector and delete set) at read time
    pub replica_state: Vec<u8>,
}

/// Cached value: full replica state plus the snapshot marker.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope {
    update: Vec<u8>,
    marker: Option<SnapshotMarker>,
}

impl CacheEnvelope {
    fn encode(&self) -> Result<Vec<u8>, CacheError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// Decode the envelope and rebuild the replica it holds.
    fn restore(bytes: &[u8]) -> Result<(Doc, Option<SnapshotMarker>), String> {
        let (envelope, _): (CacheEnvelope, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| e.to_string())?;
        let update = Update::decode_v1(&envelope.update).map_err(|e| e.to_string())?;
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            txn.apply_update(update).map_err(|e| e.to_string())?;
        }
        Ok((doc, envelope.marker))
    }
}

/// Session statistics.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub opens: u64,
    pub closes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub decode_failures: u64,
    pub touch_failures: u64,
    pub evictions: u64,
    pub cache_write_failures: u64,
}

/// Diagnostic entry of [`SessionManager::memory_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub id: Uuid,
    pub connections: usize,
    /// Size of the full encoded state in bytes
    pub state_size: usize,
}

// ─── Active document ────────────────────────────────────────────────

/// A resident replicated document.
pub struct ActiveDocument {
    id: Uuid,
    doc: OnceCell<Doc>,
    connections: AtomicUsize,
    marker: Mutex<Option<SnapshotMarker>>,
    /// Held across the last-close cache write and eviction, so cache writes
    /// for one identity land in order.
    transition: Mutex<()>,
}

impl ActiveDocument {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            doc: OnceCell::new(),
            connections: AtomicUsize::new(0),
            marker: Mutex::new(None),
            transition: Mutex::new(()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// The replica, once loading has finished.
    pub fn doc(&self) -> Option<&Doc> {
        self.doc.get()
    }

    fn loaded(&self) -> Result<&Doc, SessionError> {
        self.doc.get().ok_or(SessionError::NotActive(self.id))
    }

    /// Merge a yrs v1 update from an editor.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), SessionError> {
        let doc = self.loaded()?;
        let update = Update::decode_v1(update).map_err(|e| SessionError::Update(e.to_string()))?;
        let mut txn = doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| SessionError::Update(e.to_string()))
    }

    /// Full state as a yrs v1 update.
    pub fn encode_state(&self) -> Result<Vec<u8>, SessionError> {
        let doc = self.loaded()?;
        let txn = doc.transact();
        Ok(txn.encode_state_as_update_v1(&StateVector::default()))
    }

    /// Encoded yrs state vector.
    pub fn state_vector(&self) -> Result<Vec<u8>, SessionError> {
        let doc = self.loaded()?;
        let txn = doc.transact();
        Ok(txn.state_vector().encode_v1())
    }

    pub async fn marker(&self) -> Option<SnapshotMarker> {
        self.marker.lock().await.clone()
    }

    pub(crate) async fn set_marker(&self, marker: SnapshotMarker) {
        *self.marker.lock().await = Some(marker);
    }

    async fn envelope(&self) -> Result<Vec<u8>, SessionError> {
        let envelope = CacheEnvelope {
            update: self.encode_state()?,
            marker: self.marker().await,
        };
        Ok(envelope.encode()?)
    }
}

/// Replica to use when the cache has nothing usable.
struct Seed {
    doc: Doc,
    marker: Option<SnapshotMarker>,
}

// ─── Session manager ────────────────────────────────────────────────

pub struct SessionManager {
    config: SessionConfig,
    registry: Arc<Registry>,
    cache: Arc<dyn CacheStore>,
    documents: RwLock<HashMap<Uuid, Arc<ActiveDocument>>>,
    stats: RwLock<SessionStats>,
}

impl SessionManager {
    /// Open the configured cache store and create the manager.
    pub fn new(config: SessionConfig, registry: Arc<Registry>) -> Result<Self, SessionError> {
        let cache: Arc<dyn CacheStore> = match &config.cache {
            Some(cache_config) => Arc::new(RocksCacheStore::open(cache_config.clone())?),
            None => Arc::new(MemoryCacheStore::new()),
        };
        Ok(Self::with_cache(config, registry, cache))
    }

    /// Use an already-constructed cache store.
    pub fn with_cache(
        config: SessionConfig,
        registry: Arc<Registry>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            config,
            registry,
            cache,
            documents: RwLock::new(HashMap::new()),
            stats: RwLock::new(SessionStats::default()),
        }
    }

    /// In-memory cache, standard registry.
    pub fn in_memory() -> Self {
        Self::with_cache(
            SessionConfig::default(),
            Arc::new(Registry::standard()),
            Arc::new(MemoryCacheStore::new()),
        )
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Open a connection to `id`, loading it if it is not resident.
    pub async fn open(&self, id: &str) -> Result<Arc<ActiveDocument>, SessionError> {
        let id = parse_identity(id)?;
        self.open_seeded(id, None).await
    }

    /// Like [`open`](Self::open), but a cache miss starts from `template`.
    ///
    /// When the template carries a repository version the snapshot marker is
    /// seeded, so an unedited document snapshots as not necessary.
    pub async fn open_with_template(
        &self,
        id: &str,
        template: &Document,
    ) -> Result<Arc<ActiveDocument>, SessionError> {
        let id = parse_identity(id)?;

        let mut template = template.clone();
        template.uuid = id.to_string();
        let doc = new_replica(&template, &self.registry)?;
        let marker = if template.version > 0 {
            let materialized = materialize(&doc, &self.registry, &id)?;
            Some(SnapshotMarker {
                version: template.version,
                hash: materialized.hash,
                replica_state: materialized.replica_state,
            })
        } else {
            None
        };

        self.open_seeded(id, Some(Seed { doc, marker })).await
    }

    async fn open_seeded(
        &self,
        id: Uuid,
        seed: Option<Seed>,
    ) -> Result<Arc<ActiveDocument>, SessionError> {
        let document = {
            let mut documents = self.documents.write().await;
            let entry = documents
                .entry(id)
                .or_insert_with(|| Arc::new(ActiveDocument::new(id)));
            entry.connections.fetch_add(1, Ordering::SeqCst);
            Arc::clone(entry)
        };

        let target = Arc::clone(&document);
        document
            .doc
            .get_or_init(move || async move {
                let (doc, marker) = self.load(id, seed).await;
                if let Some(marker) = marker {
                    target.set_marker(marker).await;
                }
                doc
            })
            .await;

        self.stats.write().await.opens += 1;
        log::debug!("Opened {id} ({} connections)", document.connections());
        Ok(document)
    }

    /// Cache lookup; anything short of a decodable hit falls back to the seed.
    async fn load(&self, id: Uuid, seed: Option<Seed>) -> (Doc, Option<SnapshotMarker>) {
        let key = cache_key(&self.config.key_prefix, &id);

        match self.cache.get(&key).await {
            Ok(Some(bytes)) => match CacheEnvelope::restore(&bytes) {
                Ok(restored) => {
                    self.stats.write().await.cache_hits += 1;
                    log::info!("Cache hit for {id} ({} bytes)", bytes.len());
                    return restored;
                }
                Err(e) => {
                    self.stats.write().await.decode_failures += 1;
                    log::warn!("Discarding undecodable cache entry for {id}: {e}");
                }
            },
            Ok(None) => log::info!("Cache miss for {id}"),
            Err(e) => log::warn!("Cache read failed for {id}, treating as miss: {e}"),
        }

        self.stats.write().await.cache_misses += 1;
        if let Err(e) = self.cache.touch(&key).await {
            self.stats.write().await.touch_failures += 1;
            log::warn!("Failed to record cache touch for {id}: {e}");
        }

        match seed {
            Some(seed) => (seed.doc, seed.marker),
            None => (Doc::new(), None),
        }
    }

    /// Close one connection. The last close writes the replica to the cache
    /// and evicts it; if that write fails the document stays resident with
    /// no connections until [`park_idle`](Self::park_idle) succeeds.
    pub async fn close(&self, id: &str) -> Result<(), SessionError> {
        let id = parse_identity(id)?;
        let document = self.get(&id).await.ok_or(SessionError::NotActive(id))?;
        let _transition = document.transition.lock().await;

        let remaining = document
            .connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map_err(|_| SessionError::NotActive(id))?
            - 1;
        self.stats.write().await.closes += 1;
        if remaining > 0 {
            return Ok(());
        }

        self.park(&document).await
    }

    /// Retry the cache write for resident documents without connections.
    /// Returns how many were cached and evicted.
    pub async fn park_idle(&self) -> usize {
        let idle: Vec<Arc<ActiveDocument>> = self
            .documents
            .read()
            .await
            .values()
            .filter(|document| document.connections() == 0 && document.doc().is_some())
            .cloned()
            .collect();

        let mut parked = 0;
        for document in idle {
            let _transition = document.transition.lock().await;
            let still_resident = self
                .documents
                .read()
                .await
                .get(&document.id)
                .is_some_and(|current| Arc::ptr_eq(current, &document));
            if !still_resident || document.connections() > 0 {
                continue;
            }
            log::info!("Retrying cache write for idle document {}", document.id);
            if self.park(&document).await.is_ok() {
                parked += 1;
            }
        }
        parked
    }

    /// Write an idle document to the cache and evict it unless a connection
    /// arrived meanwhile. Callers hold the document's transition lock.
    async fn park(&self, document: &ActiveDocument) -> Result<(), SessionError> {
        let id = document.id;
        let key = cache_key(&self.config.key_prefix, &id);
        let envelope = document.envelope().await?;
        let size = envelope.len();

        match self.cache.store(&key, envelope).await {
            Ok(()) => {
                let mut documents = self.documents.write().await;
                if document.connections() == 0 {
                    documents.remove(&id);
                    drop(documents);
                    self.stats.write().await.evictions += 1;
                    log::info!("Cached and evicted {id} ({size} bytes)");
                }
                Ok(())
            }
            Err(e) => {
                self.stats.write().await.cache_write_failures += 1;
                log::error!("Cache write failed for {id}, keeping it resident: {e}");
                Err(SessionError::Cache(e))
            }
        }
    }

    /// A resident, fully loaded document.
    pub async fn get(&self, id: &Uuid) -> Option<Arc<ActiveDocument>> {
        self.documents
            .read()
            .await
            .get(id)
            .filter(|document| document.doc().is_some())
            .cloned()
    }

    pub async fn document_ids(&self) -> Vec<Uuid> {
        self.documents.read().await.keys().copied().collect()
    }

    /// Open connections across all resident documents.
    pub async fn connections_count(&self) -> usize {
        self.documents
            .read()
            .await
            .values()
            .map(|document| document.connections())
            .sum()
    }

    /// Distinct resident documents.
    pub async fn documents_count(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Identities and state sizes of every resident document.
    pub async fn memory_snapshot(&self) -> Vec<DocumentInfo> {
        let documents = self.documents.read().await;
        let mut infos: Vec<DocumentInfo> = documents
            .values()
            .map(|document| DocumentInfo {
                id: document.id,
                connections: document.connections(),
                state_size: document.encode_state().map(|s| s.len()).unwrap_or(0),
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub async fn stats(&self) -> SessionStats {
        self.stats.read().await.clone()
    }
}
