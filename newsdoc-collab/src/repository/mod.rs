//! Repository client contract.
//!
//! The repository durably stores document versions. A reply whose
//! `status.code` is not [`STATUS_OK`] is a domain rejection, returned as a
//! value; [`RepositoryError`] is reserved for transport failures.

pub mod http;
pub mod memory;

pub use http::{HttpRepository, HttpRepositoryConfig};
pub use memory::MemoryRepository;

use futures_util::future::BoxFuture;
use newsdoc_core::Document;
use serde::{Deserialize, Serialize};

/// Success code.
pub const STATUS_OK: &str = "OK";
/// Optimistic-concurrency conflict: the base version is stale.
pub const FAILED_PRECONDITION: &str = "failed_precondition";

/// Who asked for the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    /// Policy-triggered (scheduler, idle flush)
    Server,
    /// An editor's explicit store/flush
    User,
}

/// Identity attached to a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotContext {
    pub agent: Agent,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
}

impl SnapshotContext {
    pub fn server() -> Self {
        Self {
            agent: Agent::Server,
            subject: String::new(),
        }
    }

    pub fn user(subject: impl Into<String>) -> Self {
        Self {
            agent: Agent::User,
            subject: subject.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub add_to_history: bool,
    /// Reject the write unless this is still the latest version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredVersion {
    pub uuid: String,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    pub status: Status,
    #[serde(default)]
    pub response: Option<StoredVersion>,
}

impl PutResponse {
    pub fn ok(uuid: impl Into<String>, version: u64) -> Self {
        Self {
            status: Status {
                code: STATUS_OK.to_string(),
            },
            response: Some(StoredVersion {
                uuid: uuid.into(),
                version,
            }),
        }
    }

    pub fn rejected(code: impl Into<String>) -> Self {
        Self {
            status: Status { code: code.into() },
            response: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.code == STATUS_OK
    }
}

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("Repository transport error: {0}")]
    Transport(String),

    #[error("Repository request timed out")]
    Timeout,

    #[error("Invalid repository response: {0}")]
    InvalidResponse(String),
}

/// Durable versioned document storage.
pub trait Repository: Send + Sync {
    fn put<'a>(
        &'a self,
        document: &'a Document,
        context: &'a SnapshotContext,
        options: &'a PutOptions,
    ) -> BoxFuture<'a, Result<PutResponse, RepositoryError>>;
}
