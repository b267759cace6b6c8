//! XChaCha20-Poly1305 for passfile bodies.
//!
//! The envelope header is passed as associated data, so the costs, salt and
//! nonce a body was sealed with cannot be swapped without failing the tag.

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::ContentKey;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;

/// A fresh random nonce. Generated before the header is written, since the
/// header carries it.
pub fn fresh_nonce() -> [u8; NONCE_SIZE] {
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let mut bytes = [0u8; NONCE_SIZE];
    bytes.copy_from_slice(&nonce);
    bytes
}

/// Cipher keyed for one envelope body.
pub struct BodyCipher {
    cipher: XChaCha20Poly1305,
}

impl BodyCipher {
    pub fn new(key: &ContentKey) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.as_bytes().into()),
        }
    }

    pub fn encrypt(
        &self,
        nonce: &[u8; NONCE_SIZE],
        header: &[u8],
        plaintext: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let payload = Payload {
            msg: plaintext,
            aad: header,
        };
        self.cipher
            .encrypt(XNonce::from_slice(nonce), payload)
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Decrypt and authenticate a body against the header it was sealed under.
    pub fn decrypt(
        &self,
        nonce: &[u8; NONCE_SIZE],
        header: &[u8],
        ciphertext: &[u8],
    ) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let payload = Payload {
            msg: ciphertext,
            aad: header,
        };
        self.cipher
            .decrypt(XNonce::from_slice(nonce), payload)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
