pub mod aead;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod passphrase;

pub use error::{CryptoError, CryptoResult};
pub use kdf::{ContentKey, KdfParams};
pub use passphrase::Passphrase;
