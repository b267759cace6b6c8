use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    #[error("AEAD decryption failed: wrong passphrase or tampered data")]
    DecryptionFailed,

    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Malformed envelope: {0}")]
    Malformed(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
