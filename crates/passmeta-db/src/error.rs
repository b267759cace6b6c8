use thiserror::Error;

use crate::schema::PassFileId;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Passfile not found: {0}")]
    NotFound(PassFileId),

    #[error("Storage write failed: {0}")]
    StorageWriteFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] passmeta_crypto::CryptoError),
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
