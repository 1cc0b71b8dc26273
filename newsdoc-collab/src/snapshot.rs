//! Snapshot pipeline: harden a replica into a repository version.
//!
//! ```text
//! PENDING ─┬─ unchanged ───────────────────────────────► SKIPPED
//!          └─ TRANSFORMING ─► PERSISTING ─┬─ OK ───────► SUCCEEDED
//!                                         ├─ conflict ─► REJECTED
//!                                         └─ other ────► FAILED
//! ```
//!
//! At most one pipeline runs per document. A request arriving while one is
//! in flight awaits that run's result instead of starting another.
//!
//! "Unchanged" is decided in two stages against the marker left by the
//! last successful write: an identical yrs snapshot (state vector plus
//! delete set; a pure deletion leaves the state vector unchanged), then an
//! identical SHA-256 of the normalized document (edits that cancelled out).
//!
//! Each run is a spawned task, so it completes even if every caller
//! awaiting it is dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use newsdoc_core::{normalize, read_document, AdapterError, Document, Registry};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, Transact, Update};

use crate::repository::{PutOptions, Repository, SnapshotContext, FAILED_PRECONDITION};
use crate::session::{ActiveDocument, SessionManager, SnapshotMarker};

/// Status code reported when the repository does not answer in time.
pub const TIMEOUT_CODE: &str = "deadline_exceeded";
/// Status code reported for transport failures.
pub const UNAVAILABLE_CODE: &str = "unavailable";
/// Status code reported when the run's task panicked or was cancelled.
pub const ABORTED_CODE: &str = "aborted";

/// Snapshot pipeline configuration.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Repository call timeout unless the caller overrides it (default: 10s)
    pub timeout: Duration,
    /// Period of the background scheduler (None = no scheduler)
    pub interval: Option<Duration>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            interval: None,
        }
    }
}

impl SnapshotConfig {
    pub fn for_testing() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            interval: None,
        }
    }
}

/// Pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    Pending,
    Transforming,
    Persisting,
    Succeeded,
    Rejected,
    Failed,
    Skipped,
}

impl fmt::Display for SnapshotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SnapshotState::Pending => "PENDING",
            SnapshotState::Transforming => "TRANSFORMING",
            SnapshotState::Persisting => "PERSISTING",
            SnapshotState::Succeeded => "SUCCEEDED",
            SnapshotState::Rejected => "REJECTED",
            SnapshotState::Failed => "FAILED",
            SnapshotState::Skipped => "SKIPPED",
        };
        f.write_str(name)
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotResult {
    /// Nothing changed since the last stored version
    NotNecessary,
    Stored { uuid: String, version: u64 },
    /// Version conflict; the caller decides whether to retry
    Rejected { code: String, message: String },
    /// Write outcome unknown or refused; safe to retry
    Failed { code: String, message: String },
}

impl SnapshotResult {
    pub fn state(&self) -> SnapshotState {
        match self {
            SnapshotResult::NotNecessary => SnapshotState::Skipped,
            SnapshotResult::Stored { .. } => SnapshotState::Succeeded,
            SnapshotResult::Rejected { .. } => SnapshotState::Rejected,
            SnapshotResult::Failed { .. } => SnapshotState::Failed,
        }
    }
}

/// Snapshot errors. I/O and conflicts are [`SnapshotResult`]s, not errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("Invalid document identity: {0}")]
    InvalidIdentity(String),

    #[error("Document {0} is not active and no base state was given")]
    NotActive(Uuid),

    #[error("Invalid base state for {id}: {reason}")]
    InvalidBaseState { id: Uuid, reason: String },

    #[error("Replica of {id} claims identity {found}")]
    IdentityMismatch { id: Uuid, found: String },

    #[error("Failed to transform document: {0}")]
    Transform(#[from] AdapterError),
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    pub status: Option<String>,
    pub cause: Option<String>,
    pub add_to_history: bool,
    /// Flush: write a new version even if nothing changed
    pub force: bool,
    /// Expected latest repository version; defaults to the marker's
    pub base_version: Option<u64>,
    /// Full yrs update to snapshot when the document is not resident
    pub base_state: Option<Vec<u8>>,
    /// Repository call timeout override
    pub timeout: Option<Duration>,
}

impl SnapshotOptions {
    /// A forced snapshot.
    pub fn flush() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }
}

type SnapshotOutcome = Result<SnapshotResult, SnapshotError>;
type InFlight = Shared<BoxFuture<'static, SnapshotOutcome>>;

// ─── Materialization ────────────────────────────────────────────────

/// A normalized read of a replica.
pub(crate) struct Materialized {
    pub document: Document,
    pub hash: String,
    /// Encoded yrs snapshot: state vector plus delete set
    pub replica_state: Vec<u8>,
}

/// Read, normalize and fingerprint a replica in one read transaction.
pub(crate) fn materialize(
    doc: &Doc,
    registry: &Registry,
    id: &Uuid,
) -> Result<Materialized, AdapterError> {
    let (mut document, replica_state) = {
        let txn = doc.transact();
        (read_document(&txn, registry)?, txn.snapshot().encode_v1())
    };
    if document.uuid.is_empty() {
        document.uuid = id.to_string();
    }
    normalize(&mut document);
    let hash = content_hash(&document);
    Ok(Materialized {
        document,
        hash,
        replica_state,
    })
}

/// Hex SHA-256 of the document's JSON form, version excluded.
pub fn content_hash(document: &Document) -> String {
    let unversioned = Document {
        version: 0,
        ..document.clone()
    };
    let json = serde_json::to_vec(&unversioned).unwrap_or_default();
    hex::encode(Sha256::digest(&json))
}

// ─── Pipeline ───────────────────────────────────────────────────────

pub struct SnapshotPipeline {
    sessions: Arc<SessionManager>,
    repository: Arc<dyn Repository>,
    config: SnapshotConfig,
    in_flight: Mutex<HashMap<Uuid, InFlight>>,
}

impl SnapshotPipeline {
    pub fn new(
        sessions: Arc<SessionManager>,
        repository: Arc<dyn Repository>,
        config: SnapshotConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions,
            repository,
            config,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Snapshot one document, joining an in-flight run if there is one.
    pub async fn snapshot(
        self: &Arc<Self>,
        id: &str,
        context: SnapshotContext,
        options: SnapshotOptions,
    ) -> SnapshotOutcome {
        let id = Uuid::parse_str(id).map_err(|_| SnapshotError::InvalidIdentity(id.to_string()))?;

        let run = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&id) {
                Some(existing) => {
                    log::debug!("Joining in-flight snapshot of {id}");
                    existing.clone()
                }
                None => {
                    let this = Arc::clone(self);
                    let task = tokio::spawn(async move {
                        let outcome = this.run(id, context, options).await;
                        this.in_flight.lock().await.remove(&id);
                        outcome
                    });
                    let pipeline = Arc::clone(self);
                    let run = async move {
                        match task.await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                pipeline.in_flight.lock().await.remove(&id);
                                Ok(SnapshotResult::Failed {
                                    code: ABORTED_CODE.to_string(),
                                    message: format!("snapshot task of {id} ended: {e}"),
                                })
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(id, run.clone());
                    run
                }
            }
        };

        run.await
    }

    /// Snapshot every resident document concurrently.
    pub async fn snapshot_all(
        self: &Arc<Self>,
        context: SnapshotContext,
    ) -> Vec<(Uuid, SnapshotOutcome)> {
        let ids = self.sessions.document_ids().await;
        let runs = ids.iter().map(|id| {
            let context = context.clone();
            async move {
                let outcome = self
                    .snapshot(&id.to_string(), context, SnapshotOptions::default())
                    .await;
                (*id, outcome)
            }
        });
        join_all(runs).await
    }

    /// Run [`snapshot_all`](Self::snapshot_all) every `interval` as the
    /// server agent, then retry cache writes for idle documents. Abort the
    /// handle to stop.
    pub fn spawn_scheduler(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let outcomes = this.snapshot_all(SnapshotContext::server()).await;
                let stored = outcomes
                    .iter()
                    .filter(|(_, o)| matches!(o, Ok(SnapshotResult::Stored { .. })))
                    .count();
                let parked = this.sessions.park_idle().await;
                log::debug!(
                    "Scheduled snapshot tick: {} documents, {stored} stored, {parked} parked",
                    outcomes.len()
                );
            }
        })
    }

    /// Start the scheduler if the configuration asks for one.
    pub fn spawn_configured_scheduler(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.config.interval.map(|interval| self.spawn_scheduler(interval))
    }

    async fn run(&self, id: Uuid, context: SnapshotContext, options: SnapshotOptions) -> SnapshotOutcome {
        let started = Instant::now();
        let outcome = self.execute(id, &context, &options).await;
        let elapsed = started.elapsed();

        let agent = context.agent;
        match &outcome {
            Ok(SnapshotResult::Failed { code, message }) => log::warn!(
                "snapshot {id} {agent:?}: {} ({code}: {message}) in {elapsed:?}",
                SnapshotState::Failed
            ),
            Ok(SnapshotResult::Rejected { code, message }) => log::warn!(
                "snapshot {id} {agent:?}: {} ({code}: {message}) in {elapsed:?}",
                SnapshotState::Rejected
            ),
            Ok(result) => log::info!("snapshot {id} {agent:?}: {} in {elapsed:?}", result.state()),
            Err(e) => log::error!(
                "snapshot {id} {agent:?}: {} ({e}) in {elapsed:?}",
                SnapshotState::Failed
            ),
        }
        outcome
    }

    async fn execute(
        &self,
        id: Uuid,
        context: &SnapshotContext,
        options: &SnapshotOptions,
    ) -> SnapshotOutcome {
        let registry = self.sessions.registry();

        // PENDING
        let resident = self.sessions.get(&id).await;
        let detached;
        let (doc, active): (&Doc, Option<&ActiveDocument>) = match &resident {
            Some(active) => match active.doc() {
                Some(doc) => (doc, Some(&**active)),
                None => return Err(SnapshotError::NotActive(id)),
            },
            None => {
                let base = options.base_state.as_ref().ok_or(SnapshotError::NotActive(id))?;
                detached = replica_from_update(id, base)?;
                (&detached, None)
            }
        };
        let marker = match active {
            Some(active) => active.marker().await,
            None => None,
        };

        if !options.force {
            if let Some(marker) = &marker {
                let current = doc.transact().snapshot().encode_v1();
                if current == marker.replica_state {
                    return Ok(SnapshotResult::NotNecessary);
                }
            }
        }

        // TRANSFORMING
        let materialized = materialize(doc, registry, &id)?;
        if materialized.document.uuid != id.to_string() {
            return Err(SnapshotError::IdentityMismatch {
                id,
                found: materialized.document.uuid,
            });
        }
        if materialized.document.r#type.is_empty() {
            log::debug!("Replica of {id} was never initialized, nothing to persist");
            return Ok(SnapshotResult::NotNecessary);
        }

        if !options.force {
            if let (Some(marker), Some(active)) = (&marker, active) {
                if marker.hash == materialized.hash {
                    active
                        .set_marker(SnapshotMarker {
                            replica_state: materialized.replica_state,
                            ..marker.clone()
                        })
                        .await;
                    return Ok(SnapshotResult::NotNecessary);
                }
            }
        }

        // PERSISTING
        let put_options = PutOptions {
            status: options.status.clone(),
            cause: options.cause.clone(),
            add_to_history: options.add_to_history,
            base_version: options
                .base_version
                .or_else(|| marker.as_ref().map(|m| m.version)),
        };
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let response = tokio::time::timeout(
            timeout,
            self.repository
                .put(&materialized.document, context, &put_options),
        )
        .await;

        let response = match response {
            Err(_) => {
                return Ok(SnapshotResult::Failed {
                    code: TIMEOUT_CODE.to_string(),
                    message: format!("repository did not answer within {timeout:?}"),
                })
            }
            Ok(Err(e)) => {
                return Ok(SnapshotResult::Failed {
                    code: UNAVAILABLE_CODE.to_string(),
                    message: e.to_string(),
                })
            }
            Ok(Ok(response)) => response,
        };

        if !response.is_ok() {
            let code = response.status.code;
            let message = format!("repository refused the write with status {code}");
            return Ok(if code == FAILED_PRECONDITION {
                SnapshotResult::Rejected { code, message }
            } else {
                SnapshotResult::Failed { code, message }
            });
        }

        let Some(stored) = response.response else {
            return Ok(SnapshotResult::Failed {
                code: UNAVAILABLE_CODE.to_string(),
                message: "repository reported OK without a version".to_string(),
            });
        };

        // SUCCEEDED
        if let Some(active) = active {
            active
                .set_marker(SnapshotMarker {
                    version: stored.version,
                    hash: materialized.hash,
                    replica_state: materialized.replica_state,
                })
                .await;
        }
        Ok(SnapshotResult::Stored {
            uuid: stored.uuid,
            version: stored.version,
        })
    }
}

fn replica_from_update(id: Uuid, update: &[u8]) -> Result<Doc, SnapshotError> {
    let invalid = |reason: String| SnapshotError::InvalidBaseState { id, reason };
    let update = Update::decode_v1(update).map_err(|e| invalid(e.to_string()))?;
    let doc = Doc::new();
    {
        let mut txn = doc.transact_mut();
        txn.apply_update(update).map_err(|e| invalid(e.to_string()))?;
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use newsdoc_core::{write_document, Block};
    use yrs::Array;

    const ID: &str = "7c6b5a49-3827-4160-9f8e-7d6c5b4a3928";

    fn article(text: &str) -> Document {
        let mut document = Document::new(ID, "core/article");
        document.title = "Snapshot".into();
        document
            .content
            .push(Block::new("core/text").with_id("p1").with_data("text", text));
        document
    }

    async fn setup(repo: MemoryRepository) -> (Arc<SnapshotPipeline>, Arc<MemoryRepository>) {
        let sessions = Arc::new(SessionManager::in_memory());
        let repo = Arc::new(repo);
        let pipeline = SnapshotPipeline::new(sessions, repo.clone(), SnapshotConfig::for_testing());
        let active = pipeline.sessions().open(ID).await.unwrap();
        write_document(
            active.doc().unwrap(),
            &article("first"),
            pipeline.sessions().registry(),
        )
        .unwrap();
        (pipeline, repo)
    }

    async fn edit(pipeline: &SnapshotPipeline, text: &str) {
        let id = Uuid::parse_str(ID).unwrap();
        let active = pipeline.sessions().get(&id).await.unwrap();
        write_document(active.doc().unwrap(), &article(text), pipeline.sessions().registry())
            .unwrap();
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SnapshotState::Skipped.to_string(), "SKIPPED");
        assert_eq!(SnapshotResult::NotNecessary.state(), SnapshotState::Skipped);
        assert_eq!(
            SnapshotResult::Rejected { code: "c".into(), message: "m".into() }.state(),
            SnapshotState::Rejected
        );
    }

    #[test]
    fn test_content_hash_ignores_version() {
        let document = article("x");
        let stored = Document { version: 9, ..document.clone() };
        assert_eq!(content_hash(&document), content_hash(&stored));
        assert_ne!(content_hash(&document), content_hash(&article("y")));
        assert_eq!(content_hash(&document).len(), 64);
    }

    #[tokio::test]
    async fn test_store_then_skip() {
        let (pipeline, repo) = setup(MemoryRepository::new()).await;

        let first = pipeline
            .snapshot(ID, SnapshotContext::user("u"), SnapshotOptions::default())
            .await
            .unwrap();
        assert_eq!(first, SnapshotResult::Stored { uuid: ID.into(), version: 1 });

        let second = pipeline
            .snapshot(ID, SnapshotContext::user("u"), SnapshotOptions::default())
            .await
            .unwrap();
        assert_eq!(second, SnapshotResult::NotNecessary);
        assert_eq!(repo.put_count(), 1);
    }

    #[tokio::test]
    async fn test_edit_that_restores_content_is_skipped_by_hash() {
        let (pipeline, repo) = setup(MemoryRepository::new()).await;
        pipeline
            .snapshot(ID, SnapshotContext::server(), SnapshotOptions::default())
            .await
            .unwrap();

        edit(&pipeline, "first").await;
        let result = pipeline
            .snapshot(ID, SnapshotContext::server(), SnapshotOptions::default())
            .await
            .unwrap();
        assert_eq!(result, SnapshotResult::NotNecessary);
        assert_eq!(repo.put_count(), 1);
    }

    #[tokio::test]
    async fn test_flush_forces_new_version() {
        let (pipeline, repo) = setup(MemoryRepository::new()).await;
        pipeline
            .snapshot(ID, SnapshotContext::server(), SnapshotOptions::default())
            .await
            .unwrap();
        let flushed = pipeline
            .snapshot(ID, SnapshotContext::user("u"), SnapshotOptions::flush())
            .await
            .unwrap();
        assert_eq!(flushed, SnapshotResult::Stored { uuid: ID.into(), version: 2 });
        assert_eq!(repo.put_count(), 2);
    }

    #[tokio::test]
    async fn test_edit_produces_next_version_with_base() {
        let (pipeline, repo) = setup(MemoryRepository::new()).await;
        pipeline
            .snapshot(ID, SnapshotContext::server(), SnapshotOptions::default())
            .await
            .unwrap();
        edit(&pipeline, "second").await;

        let result = pipeline
            .snapshot(ID, SnapshotContext::server(), SnapshotOptions::default())
            .await
            .unwrap();
        assert_eq!(result, SnapshotResult::Stored { uuid: ID.into(), version: 2 });
        let latest = repo.latest(ID).await.unwrap();
        assert_eq!(latest.options.base_version, Some(1));
        assert_eq!(latest.document.content[0].data_str("text"), "second");
    }

    #[tokio::test]
    async fn test_stale_base_version_rejected_and_marker_kept() {
        let (pipeline, repo) = setup(MemoryRepository::new()).await;
        pipeline
            .snapshot(ID, SnapshotContext::server(), SnapshotOptions::default())
            .await
            .unwrap();
        edit(&pipeline, "changed").await;

        let options = SnapshotOptions {
            base_version: Some(0),
            ..SnapshotOptions::default()
        };
        let result = pipeline
            .snapshot(ID, SnapshotContext::user("u"), options)
            .await
            .unwrap();
        assert!(matches!(result, SnapshotResult::Rejected { ref code, .. } if code == FAILED_PRECONDITION));

        let id = Uuid::parse_str(ID).unwrap();
        let active = pipeline.sessions().get(&id).await.unwrap();
        assert_eq!(active.marker().await.map(|m| m.version), Some(1));
        assert_eq!(repo.history(ID).await.len(), 1);
    }

    #[tokio::test]
    async fn test_non_ok_status_is_failed() {
        let (pipeline, _) = setup(MemoryRepository::new().with_status("permission_denied")).await;
        let result = pipeline
            .snapshot(ID, SnapshotContext::server(), SnapshotOptions::default())
            .await
            .unwrap();
        match result {
            SnapshotResult::Failed { code, message } => {
                assert_eq!(code, "permission_denied");
                assert!(message.contains("permission_denied"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_failed_and_marker_untouched() {
        let (pipeline, _) =
            setup(MemoryRepository::new().with_latency(Duration::from_millis(200))).await;
        let options = SnapshotOptions {
            timeout: Some(Duration::from_millis(20)),
            ..SnapshotOptions::default()
        };
        let result = pipeline
            .snapshot(ID, SnapshotContext::server(), options)
            .await
            .unwrap();
        assert!(matches!(result, SnapshotResult::Failed { ref code, .. } if code == TIMEOUT_CODE));

        let id = Uuid::parse_str(ID).unwrap();
        let active = pipeline.sessions().get(&id).await.unwrap();
        assert!(active.marker().await.is_none());
    }

    #[tokio::test]
    async fn test_not_resident_without_base_state() {
        let pipeline = SnapshotPipeline::new(
            Arc::new(SessionManager::in_memory()),
            Arc::new(MemoryRepository::new()),
            SnapshotConfig::for_testing(),
        );
        let err = pipeline
            .snapshot(ID, SnapshotContext::server(), SnapshotOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, SnapshotError::NotActive(Uuid::parse_str(ID).unwrap()));

        let err = pipeline
            .snapshot("bogus", SnapshotContext::server(), SnapshotOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, SnapshotError::InvalidIdentity("bogus".into()));
    }

    #[tokio::test]
    async fn test_snapshot_from_base_state() {
        let registry = Registry::standard();
        let doc = newsdoc_core::new_replica(&article("detached"), &registry).unwrap();
        let update = doc
            .transact()
            .encode_state_as_update_v1(&yrs::StateVector::default());

        let repo = Arc::new(MemoryRepository::new());
        let pipeline = SnapshotPipeline::new(
            Arc::new(SessionManager::in_memory()),
            repo.clone(),
            SnapshotConfig::for_testing(),
        );
        let options = SnapshotOptions {
            base_state: Some(update),
            ..SnapshotOptions::default()
        };
        let result = pipeline
            .snapshot(ID, SnapshotContext::server(), options)
            .await
            .unwrap();
        assert_eq!(result, SnapshotResult::Stored { uuid: ID.into(), version: 1 });
        assert_eq!(
            repo.latest(ID).await.unwrap().document.content[0].data_str("text"),
            "detached"
        );
    }

    #[tokio::test]
    async fn test_uninitialized_replica_is_skipped() {
        let sessions = Arc::new(SessionManager::in_memory());
        let repo = Arc::new(MemoryRepository::new());
        let pipeline = SnapshotPipeline::new(sessions.clone(), repo.clone(), SnapshotConfig::for_testing());
        sessions.open(ID).await.unwrap();

        let result = pipeline
            .snapshot(ID, SnapshotContext::server(), SnapshotOptions::default())
            .await
            .unwrap();
        assert_eq!(result, SnapshotResult::NotNecessary);
        assert_eq!(repo.put_count(), 0);
    }

    #[tokio::test]
    async fn test_pure_deletion_is_persisted() {
        let (pipeline, repo) = setup(MemoryRepository::new()).await;
        let id = Uuid::parse_str(ID).unwrap();
        let active = pipeline.sessions().get(&id).await.unwrap();
        let doc = active.doc().unwrap();

        let mut two = article("first");
        two.content
            .push(Block::new("core/text").with_id("p2").with_data("text", "second"));
        write_document(doc, &two, pipeline.sessions().registry()).unwrap();
        pipeline
            .snapshot(ID, SnapshotContext::server(), SnapshotOptions::default())
            .await
            .unwrap();
        assert_eq!(repo.latest(ID).await.unwrap().document.content.len(), 2);

        let content = doc.get_or_insert_array(newsdoc_core::replica::CONTENT);
        {
            let mut txn = doc.transact_mut();
            content.remove(&mut txn, 1);
        }

        let result = pipeline
            .snapshot(ID, SnapshotContext::server(), SnapshotOptions::default())
            .await
            .unwrap();
        assert_eq!(result, SnapshotResult::Stored { uuid: ID.into(), version: 2 });
        let latest = repo.latest(ID).await.unwrap().document;
        assert_eq!(latest.content.len(), 1);
        assert_eq!(latest.content[0].data_str("text"), "first");
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_stall_run() {
        let (pipeline, repo) =
            setup(MemoryRepository::new().with_latency(Duration::from_millis(100))).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            pipeline.snapshot(ID, SnapshotContext::user("u"), SnapshotOptions::default()),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(repo.history(ID).await.len(), 1);
        assert!(pipeline.in_flight.lock().await.is_empty());

        edit(&pipeline, "new").await;
        let flushed = pipeline
            .snapshot(ID, SnapshotContext::user("u"), SnapshotOptions::flush())
            .await
            .unwrap();
        assert_eq!(flushed, SnapshotResult::Stored { uuid: ID.into(), version: 2 });
        assert_eq!(
            repo.latest(ID).await.unwrap().document.content[0].data_str("text"),
            "new"
        );
    }
}
