//! In-memory mock implementation of LocalStore for testing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{DbError, DbResult};
use crate::schema::{PassFile, PassFileId};
use crate::traits::LocalStore;

/// In-memory LocalStore with optional write-failure injection.
#[derive(Default)]
pub struct MockStore {
    files: RwLock<BTreeMap<PassFileId, PassFile>>,
    fail_writes: AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(files: impl IntoIterator<Item = PassFile>) -> Self {
        let store = Self::new();
        {
            let mut map = store.files.write().unwrap();
            for pf in files {
                map.insert(pf.id, pf.without_secrets());
            }
        }
        store
    }

    /// Make every subsequent save/delete fail with `StorageWriteFailed`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Synchronous snapshot for assertions.
    pub fn get(&self, id: PassFileId) -> Option<PassFile> {
        self.files.read().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.files.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> DbResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DbError::StorageWriteFailed("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for MockStore {
    async fn load(&self, id: PassFileId) -> DbResult<PassFile> {
        self.get(id).ok_or(DbError::NotFound(id))
    }

    async fn save(&self, passfile: &PassFile) -> DbResult<()> {
        self.check_writable()?;
        self.files
            .write()
            .unwrap()
            .insert(passfile.id, passfile.without_secrets());
        Ok(())
    }

    async fn delete(&self, id: PassFileId) -> DbResult<()> {
        self.check_writable()?;
        self.files.write().unwrap().remove(&id);
        Ok(())
    }

    async fn list_all(&self) -> DbResult<Vec<PassFile>> {
        Ok(self.files.read().unwrap().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_write_failure_keeps_old_record() {
        let store = MockStore::new();
        let pf = PassFile::new_local(PassFileId(-1), "a".into(), None, vec![1]);
        store.save(&pf).await.unwrap();

        store.fail_writes(true);
        let mut changed = pf.clone();
        changed.name = "b".into();
        assert!(matches!(
            store.save(&changed).await,
            Err(DbError::StorageWriteFailed(_))
        ));
        assert_eq!(store.load(PassFileId(-1)).await.unwrap().name, "a");
    }

    #[tokio::test]
    async fn list_is_sorted_by_id() {
        let store = MockStore::with_files([
            PassFile::new_local(PassFileId(3), "c".into(), None, vec![]),
            PassFile::new_local(PassFileId(-2), "a".into(), None, vec![]),
        ]);
        let ids: Vec<_> = store.list_all().await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![PassFileId(-2), PassFileId(3)]);
    }
}
