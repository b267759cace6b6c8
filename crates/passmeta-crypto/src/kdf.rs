use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::aead::KEY_SIZE;
use crate::error::{CryptoError, CryptoResult};
use crate::passphrase::Passphrase;

pub const SALT_SIZE: usize = 16;

/// 1 GiB.
pub const MAX_MEM_COST_KIB: u32 = 1024 * 1024;
pub const MAX_TIME_COST: u32 = 16;
pub const MAX_PARALLELISM: u32 = 16;

const CONTENT_KEY_INFO: &[u8] = b"passmeta-passfile-content-v1";

/// Argon2id cost parameters. Stored in every sealed envelope so that
/// decryption does not depend on the current configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub mem_cost_kib: u32,
    /// Number of passes.
    pub time_cost: u32,
    /// Degree of parallelism (lanes).
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 19_456,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheapest parameters Argon2 accepts. Only meant for tests.
    pub const fn minimal() -> Self {
        Self {
            mem_cost_kib: 8,
            time_cost: 1,
            parallelism: 1,
        }
    }

    /// Whether every cost lies inside the range this crate seals and opens.
    /// Costs read from an envelope header are untrusted until checked here.
    pub fn within_limits(&self) -> bool {
        (1..=MAX_TIME_COST).contains(&self.time_cost)
            && (1..=MAX_PARALLELISM).contains(&self.parallelism)
            && (8 * self.parallelism..=MAX_MEM_COST_KIB).contains(&self.mem_cost_kib)
    }

    fn to_argon2(self) -> CryptoResult<Params> {
        Params::new(
            self.mem_cost_kib,
            self.time_cost,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::DerivationFailed(e.to_string()))
    }
}

/// Symmetric key protecting one sealed passfile body.
///
/// Derivation: Argon2id(passphrase, salt) stretched secret, then HKDF-SHA256
/// expand with a fixed content label.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ContentKey {
    bytes: [u8; KEY_SIZE],
}

impl ContentKey {
    /// Derive the content key for a passphrase and per-envelope salt.
    pub fn derive(
        passphrase: &Passphrase,
        salt: &[u8; SALT_SIZE],
        params: &KdfParams,
    ) -> CryptoResult<Self> {
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);
        let mut stretched = Zeroizing::new([0u8; KEY_SIZE]);
        argon
            .hash_password_into(passphrase.as_bytes(), salt, &mut *stretched)
            .map_err(|e| CryptoError::DerivationFailed(e.to_string()))?;

        let hk = Hkdf::<Sha256>::new(Some(salt), &stretched[..]);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(CONTENT_KEY_INFO, &mut bytes)
            .map_err(|e| CryptoError::DerivationFailed(e.to_string()))?;
        Ok(Self { bytes })
    }

    /// Access the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: [u8; SALT_SIZE] = [3u8; SALT_SIZE];

    #[test]
    fn derivation_deterministic() {
        let pass = Passphrase::new("my passphrase");
        let k1 = ContentKey::derive(&pass, &SALT, &KdfParams::minimal()).unwrap();
        let k2 = ContentKey::derive(&pass, &SALT, &KdfParams::minimal()).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn different_passphrases_differ() {
        let k1 = ContentKey::derive(&"A".into(), &SALT, &KdfParams::minimal()).unwrap();
        let k2 = ContentKey::derive(&"B".into(), &SALT, &KdfParams::minimal()).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn different_salts_differ() {
        let pass = Passphrase::new("same");
        let k1 = ContentKey::derive(&pass, &[1u8; SALT_SIZE], &KdfParams::minimal()).unwrap();
        let k2 = ContentKey::derive(&pass, &[2u8; SALT_SIZE], &KdfParams::minimal()).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn limits_cover_defaults_and_reject_extremes() {
        assert!(KdfParams::default().within_limits());
        assert!(KdfParams::minimal().within_limits());
        let huge_memory = KdfParams {
            mem_cost_kib: 0xFF00_0008,
            ..KdfParams::minimal()
        };
        assert!(!huge_memory.within_limits());
        let slow = KdfParams {
            time_cost: MAX_TIME_COST + 1,
            ..KdfParams::minimal()
        };
        assert!(!slow.within_limits());
        let wide = KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 64,
        };
        assert!(!wide.within_limits());
    }

    #[test]
    fn invalid_params_rejected() {
        let params = KdfParams {
            mem_cost_kib: 1,
            time_cost: 0,
            parallelism: 0,
        };
        let result = ContentKey::derive(&"pw".into(), &SALT, &params);
        assert!(matches!(result, Err(CryptoError::DerivationFailed(_))));
    }

    #[test]
    fn debug_redacts_key() {
        let key = ContentKey::derive(&"pw".into(), &SALT, &KdfParams::minimal()).unwrap();
        assert!(format!("{:?}", key).contains("REDACTED"));
    }
}
