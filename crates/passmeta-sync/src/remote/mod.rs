//! Remote passfile server abstraction.

pub mod http;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use passmeta_db::schema::b64;
use passmeta_db::{LocalState, PassFile, PassFileId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpRemoteClient;

/// Unexpected remote failures. Expected outcomes such as version conflicts
/// or missing passfiles are reported through the outcome enums instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote API returned {status}: {message}")]
    Api { status: u16, message: String },
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Passfile as stored on the server: metadata plus sealed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePassFile {
    pub id: PassFileId,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    pub version: u32,
    #[serde(with = "b64")]
    pub data_encrypted: Vec<u8>,
    pub created_on: DateTime<Utc>,
    pub info_changed_on: DateTime<Utc>,
    pub version_changed_on: DateTime<Utc>,
}

impl RemotePassFile {
    /// Whether name or color differ from the local copy.
    pub fn info_differs(&self, local: &PassFile) -> bool {
        self.name != local.name || self.color != local.color
    }

    /// Local synced copy of this remote passfile.
    pub fn to_local(&self) -> PassFile {
        PassFile {
            id: self.id,
            name: self.name.clone(),
            color: self.color.clone(),
            version: self.version,
            remote_version: Some(self.version),
            data_encrypted: self.data_encrypted.clone(),
            origin_encrypted: Some(self.data_encrypted.clone()),
            sections: None,
            state: LocalState::Synced,
            problem: None,
            created_on: self.created_on,
            info_changed_on: self.info_changed_on,
            version_changed_on: self.version_changed_on,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed { version: u32 },
    /// The server holds a newer version than the one the push was based on.
    /// The version is absent when the server did not report it.
    VersionConflict { remote_version: Option<u32> },
    /// The passfile no longer exists on the server.
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRemote {
    pub id: PassFileId,
    pub version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Client for the remote passfile server. Stateless per call.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Metadata and sealed content of every passfile on the server.
    async fn fetch_list(&self) -> RemoteResult<Vec<RemotePassFile>>;

    /// Update an existing passfile, accepted only if the server is still at
    /// `expected_version`.
    async fn push(&self, passfile: &PassFile, expected_version: u32) -> RemoteResult<PushOutcome>;

    /// Create a passfile that only exists locally.
    async fn push_new(&self, passfile: &PassFile) -> RemoteResult<CreatedRemote>;

    async fn delete(&self, id: PassFileId) -> RemoteResult<DeleteOutcome>;
}
