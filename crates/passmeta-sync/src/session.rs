//! Session-scoped passphrase keyring.

use std::collections::HashMap;
use std::sync::RwLock;

use passmeta_crypto::Passphrase;
use passmeta_db::PassFileId;

/// Passphrases of the passfiles opened in this session.
///
/// Held in memory only; entries are wiped when removed or on `clear`.
#[derive(Default)]
pub struct SessionKeys {
    keys: RwLock<HashMap<PassFileId, Passphrase>>,
}

impl SessionKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: PassFileId, passphrase: Passphrase) {
        self.write().insert(id, passphrase);
    }

    pub fn get(&self, id: PassFileId) -> Option<Passphrase> {
        self.read().get(&id).cloned()
    }

    pub fn contains(&self, id: PassFileId) -> bool {
        self.read().contains_key(&id)
    }

    pub fn forget(&self, id: PassFileId) {
        self.write().remove(&id);
    }

    /// Move a passphrase to the id a passfile received from the remote.
    pub fn rekey(&self, old: PassFileId, new: PassFileId) {
        let mut keys = self.write();
        if let Some(passphrase) = keys.remove(&old) {
            keys.insert(new, passphrase);
        }
    }

    /// Drop every passphrase, e.g. on logout.
    pub fn clear(&self) {
        let mut keys = self.write();
        let count = keys.len();
        keys.clear();
        tracing::debug!("Session keyring cleared ({count} passphrases)");
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PassFileId, Passphrase>> {
        self.keys.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PassFileId, Passphrase>> {
        self.keys.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rekey_moves_passphrase() {
        let keys = SessionKeys::new();
        keys.set(PassFileId(-1), "pw".into());
        keys.rekey(PassFileId(-1), PassFileId(42));
        assert!(keys.get(PassFileId(-1)).is_none());
        assert_eq!(keys.get(PassFileId(42)), Some(Passphrase::new("pw")));
    }

    #[test]
    fn clear_forgets_everything() {
        let keys = SessionKeys::new();
        keys.set(PassFileId(1), "a".into());
        keys.set(PassFileId(2), "b".into());
        keys.forget(PassFileId(1));
        assert!(!keys.contains(PassFileId(1)));
        keys.clear();
        assert!(!keys.contains(PassFileId(2)));
    }
}
