//! Self-describing sealed envelope for passfile bodies.
//!
//! Layout: `magic "PMF" | version | m_cost | t_cost | lanes | salt | nonce | ciphertext`
//! with the three cost fields as little-endian `u32`. Salt and nonce are fresh
//! for every seal, so sealing the same plaintext twice yields different bytes.

use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
use zeroize::Zeroizing;

use crate::aead::{fresh_nonce, BodyCipher, NONCE_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{ContentKey, KdfParams, SALT_SIZE};
use crate::passphrase::Passphrase;

const MAGIC: &[u8; 3] = b"PMF";
const FORMAT_VERSION: u8 = 1;
const HEADER_SIZE: usize = MAGIC.len() + 1 + 12 + SALT_SIZE + NONCE_SIZE;

/// Seal `plaintext` under a key derived from `passphrase`.
///
/// The whole header is authenticated along with the body.
pub fn seal(
    plaintext: &[u8],
    passphrase: &Passphrase,
    params: &KdfParams,
) -> CryptoResult<Vec<u8>> {
    if !params.within_limits() {
        return Err(CryptoError::DerivationFailed(format!(
            "kdf parameters out of range: {params:?}"
        )));
    }
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    let nonce = fresh_nonce();

    let mut output = Vec::with_capacity(HEADER_SIZE + plaintext.len() + 16);
    output.extend_from_slice(MAGIC);
    output.push(FORMAT_VERSION);
    output.extend_from_slice(&params.mem_cost_kib.to_le_bytes());
    output.extend_from_slice(&params.time_cost.to_le_bytes());
    output.extend_from_slice(&params.parallelism.to_le_bytes());
    output.extend_from_slice(&salt);
    output.extend_from_slice(&nonce);

    let key = ContentKey::derive(passphrase, &salt, params)?;
    let ciphertext = BodyCipher::new(&key).encrypt(&nonce, &output, plaintext)?;
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Open a sealed envelope. A wrong passphrase or any modification of the
/// bytes fails with [`CryptoError::DecryptionFailed`]; a header that is
/// truncated, foreign or carries out-of-range costs is
/// [`CryptoError::Malformed`] and no key derivation is attempted.
pub fn open(sealed: &[u8], passphrase: &Passphrase) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let header = parse_header(sealed)?;
    let key = ContentKey::derive(passphrase, &header.salt, &header.params)?;
    let (header_bytes, body) = sealed.split_at(HEADER_SIZE);
    BodyCipher::new(&key).decrypt(&header.nonce, header_bytes, body)
}

/// Read the KDF parameters an envelope was sealed with.
pub fn params_of(sealed: &[u8]) -> CryptoResult<KdfParams> {
    parse_header(sealed).map(|h| h.params)
}

struct Header {
    params: KdfParams,
    salt: [u8; SALT_SIZE],
    nonce: [u8; NONCE_SIZE],
}

fn parse_header(sealed: &[u8]) -> CryptoResult<Header> {
    if sealed.len() < HEADER_SIZE {
        return Err(CryptoError::Malformed(format!(
            "envelope too short: {} bytes",
            sealed.len()
        )));
    }
    if &sealed[..MAGIC.len()] != MAGIC {
        return Err(CryptoError::Malformed("bad magic".into()));
    }
    let version = sealed[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(CryptoError::Malformed(format!(
            "unsupported envelope version {version}"
        )));
    }

    let mut offset = MAGIC.len() + 1;
    let read_u32 = |offset: &mut usize| {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&sealed[*offset..*offset + 4]);
        *offset += 4;
        u32::from_le_bytes(buf)
    };
    let params = KdfParams {
        mem_cost_kib: read_u32(&mut offset),
        time_cost: read_u32(&mut offset),
        parallelism: read_u32(&mut offset),
    };

    if !params.within_limits() {
        return Err(CryptoError::Malformed(format!(
            "kdf parameters out of range: {params:?}"
        )));
    }

    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&sealed[offset..offset + SALT_SIZE]);
    offset += SALT_SIZE;

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&sealed[offset..offset + NONCE_SIZE]);

    Ok(Header {
        params,
        salt,
        nonce,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(s: &str) -> Passphrase {
        Passphrase::new(s)
    }

    #[test]
    fn seal_open_roundtrip() {
        let sealed = seal(b"[{\"id\":\"1\"}]", &pass("pw"), &KdfParams::minimal()).unwrap();
        let opened = open(&sealed, &pass("pw")).unwrap();
        assert_eq!(opened.as_slice(), b"[{\"id\":\"1\"}]");
    }

    #[test]
    fn wrong_passphrase_fails_cleanly() {
        let sealed = seal(b"secret", &pass("pw"), &KdfParams::minimal()).unwrap();
        assert!(matches!(
            open(&sealed, &pass("wrong")),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn sealing_is_randomized() {
        let a = seal(b"same", &pass("pw"), &KdfParams::minimal()).unwrap();
        let b = seal(b"same", &pass("pw"), &KdfParams::minimal()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_body_fails() {
        let mut sealed = seal(b"secret", &pass("pw"), &KdfParams::minimal()).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            open(&sealed, &pass("pw")),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn truncated_or_foreign_input_is_malformed() {
        assert!(matches!(
            open(b"PMF", &pass("pw")),
            Err(CryptoError::Malformed(_))
        ));
        let mut sealed = seal(b"x", &pass("pw"), &KdfParams::minimal()).unwrap();
        sealed[0] = b'X';
        assert!(matches!(
            open(&sealed, &pass("pw")),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn corrupted_cost_field_is_malformed() {
        let mut sealed = seal(b"secret", &pass("pw"), &KdfParams::minimal()).unwrap();
        // High byte of the memory cost.
        sealed[7] = 0xFF;
        assert!(matches!(
            open(&sealed, &pass("pw")),
            Err(CryptoError::Malformed(_))
        ));
        assert!(params_of(&sealed).is_err());

        let mut sealed = seal(b"secret", &pass("pw"), &KdfParams::minimal()).unwrap();
        // Time cost 1 -> 0xFF.
        sealed[8] = 0xFF;
        assert!(matches!(
            open(&sealed, &pass("pw")),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn header_change_within_limits_fails_authentication() {
        let mut sealed = seal(b"secret", &pass("pw"), &KdfParams::minimal()).unwrap();
        // Time cost 1 -> 2: still in range, so it reaches the cipher.
        sealed[8] = 2;
        assert!(matches!(
            open(&sealed, &pass("pw")),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn sealing_with_out_of_range_costs_is_refused() {
        let params = KdfParams {
            time_cost: 100,
            ..KdfParams::minimal()
        };
        assert!(matches!(
            seal(b"x", &pass("pw"), &params),
            Err(CryptoError::DerivationFailed(_))
        ));
    }

    #[test]
    fn params_are_read_from_header() {
        let params = KdfParams {
            mem_cost_kib: 16,
            time_cost: 2,
            parallelism: 1,
        };
        let sealed = seal(b"x", &pass("pw"), &params).unwrap();
        assert_eq!(params_of(&sealed).unwrap(), params);
        assert_eq!(open(&sealed, &pass("pw")).unwrap().as_slice(), b"x");
    }
}
