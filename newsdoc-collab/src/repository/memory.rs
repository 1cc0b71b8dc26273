//! In-process repository with optimistic concurrency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use newsdoc_core::Document;
use tokio::sync::RwLock;

use super::{
    PutOptions, PutResponse, Repository, RepositoryError, SnapshotContext, FAILED_PRECONDITION,
};

/// A stored version and the write that produced it.
#[derive(Debug, Clone)]
pub struct StoredWrite {
    pub document: Document,
    pub context: SnapshotContext,
    pub options: PutOptions,
}

/// Keeps every version in memory. Versions start at 1 and increase by one
/// per accepted write.
#[derive(Default)]
pub struct MemoryRepository {
    versions: RwLock<HashMap<String, Vec<StoredWrite>>>,
    puts: AtomicUsize,
    latency: Option<Duration>,
    forced_code: Option<String>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `put` (for exercising timeouts and in-flight joins).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Answer every `put` with `code` instead of storing.
    pub fn with_status(mut self, code: impl Into<String>) -> Self {
        self.forced_code = Some(code.into());
        self
    }

    /// Number of `put` calls received, accepted or not.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub async fn latest(&self, uuid: &str) -> Option<StoredWrite> {
        self.versions
            .read()
            .await
            .get(uuid)
            .and_then(|history| history.last().cloned())
    }

    pub async fn history(&self, uuid: &str) -> Vec<StoredWrite> {
        self.versions
            .read()
            .await
            .get(uuid)
            .cloned()
            .unwrap_or_default()
    }
}

impl Repository for MemoryRepository {
    fn put<'a>(
        &'a self,
        document: &'a Document,
        context: &'a SnapshotContext,
        options: &'a PutOptions,
    ) -> BoxFuture<'a, Result<PutResponse, RepositoryError>> {
        async move {
            self.puts.fetch_add(1, Ordering::SeqCst);
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            if let Some(code) = &self.forced_code {
                return Ok(PutResponse::rejected(code.clone()));
            }

            let mut versions = self.versions.write().await;
            let history = versions.entry(document.uuid.clone()).or_default();
            let current = history.len() as u64;
            if let Some(base) = options.base_version {
                if base != current {
                    log::debug!(
                        "Rejecting write to {}: base version {base}, latest {current}",
                        document.uuid
                    );
                    return Ok(PutResponse::rejected(FAILED_PRECONDITION));
                }
            }

            let version = current + 1;
            let mut stored = document.clone();
            stored.version = version;
            history.push(StoredWrite {
                document: stored,
                context: context.clone(),
                options: options.clone(),
            });
            Ok(PutResponse::ok(document.uuid.clone(), version))
        }
        .boxed()
    }
}
