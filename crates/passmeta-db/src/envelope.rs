//! Section-level envelope: a section list sealed into passfile content.

use passmeta_crypto::{envelope, CryptoError, KdfParams, Passphrase};
use zeroize::Zeroizing;

use crate::error::{DbError, DbResult};
use crate::schema::Section;

/// Serialize and seal a section list.
pub fn encrypt_sections(
    sections: &[Section],
    passphrase: &Passphrase,
    params: &KdfParams,
) -> DbResult<Vec<u8>> {
    let json = Zeroizing::new(serde_json::to_vec(sections)?);
    Ok(envelope::seal(&json, passphrase, params)?)
}

/// Open sealed content and parse it back into sections.
///
/// Both a wrong passphrase and a body that authenticates but does not parse
/// are reported as [`DbError::Decryption`].
pub fn decrypt_sections(sealed: &[u8], passphrase: &Passphrase) -> DbResult<Vec<Section>> {
    let plaintext = envelope::open(sealed, passphrase).map_err(|e| match e {
        CryptoError::DecryptionFailed | CryptoError::Malformed(_) => {
            DbError::Decryption(e.to_string())
        }
        other => DbError::Crypto(other),
    })?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| DbError::Decryption(format!("content is not a section list: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SectionItem;

    fn sample() -> Vec<Section> {
        vec![
            Section::with_id("1", "Mail", vec![SectionItem::new("login", "me@example.org")]),
            Section::with_id("2", "Bank", vec![SectionItem::new("pin", "1234")]),
        ]
    }

    #[test]
    fn sections_roundtrip() {
        let sealed = encrypt_sections(&sample(), &"pw".into(), &KdfParams::minimal()).unwrap();
        let opened = decrypt_sections(&sealed, &"pw".into()).unwrap();
        assert_eq!(opened, sample());
    }

    #[test]
    fn wrong_passphrase_is_decryption_error() {
        let sealed = encrypt_sections(&sample(), &"pw".into(), &KdfParams::minimal()).unwrap();
        assert!(matches!(
            decrypt_sections(&sealed, &"wrong".into()),
            Err(DbError::Decryption(_))
        ));
    }

    #[test]
    fn ciphertext_contains_no_plaintext() {
        let sealed = encrypt_sections(&sample(), &"pw".into(), &KdfParams::minimal()).unwrap();
        let haystack = String::from_utf8_lossy(&sealed);
        assert!(!haystack.contains("me@example.org"));
    }

    #[test]
    fn corrupted_header_is_decryption_error() {
        let mut sealed = encrypt_sections(&sample(), &"pw".into(), &KdfParams::minimal()).unwrap();
        sealed[7] = 0xFF;
        assert!(matches!(
            decrypt_sections(&sealed, &"pw".into()),
            Err(DbError::Decryption(_))
        ));
    }

    #[test]
    fn non_section_body_is_rejected() {
        let sealed = envelope::seal(b"not json", &"pw".into(), &KdfParams::minimal()).unwrap();
        assert!(matches!(
            decrypt_sections(&sealed, &"pw".into()),
            Err(DbError::Decryption(_))
        ));
    }
}
