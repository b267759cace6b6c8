use passmeta_db::schema::IllegalTransition;
use passmeta_db::{DbError, PassFileId};
use thiserror::Error;

use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Passfile not found: {0}")]
    NotFound(PassFileId),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Passfile {0} is locked: passphrase required")]
    PassphraseRequired(PassFileId),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Storage error: {0}")]
    Storage(DbError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("No pending merge for passfile {0}")]
    NoPendingMerge(PassFileId),

    #[error("Passfile {id} still has {count} unresolved conflicts")]
    UnresolvedConflicts { id: PassFileId, count: usize },
}

impl From<DbError> for SyncError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(id) => SyncError::NotFound(id),
            DbError::Decryption(msg) => SyncError::Decryption(msg),
            other => SyncError::Storage(other),
        }
    }
}

impl From<IllegalTransition> for SyncError {
    fn from(e: IllegalTransition) -> Self {
        SyncError::IllegalState(e.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
