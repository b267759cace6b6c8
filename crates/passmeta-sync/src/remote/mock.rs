//! In-memory mock of the passfile server for testing.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use passmeta_db::{PassFile, PassFileId};

use super::{
    CreatedRemote, DeleteOutcome, PushOutcome, RemoteClient, RemoteError, RemotePassFile,
    RemoteResult,
};

/// Build a remote passfile with the given content.
pub fn remote_passfile(
    id: i64,
    name: &str,
    version: u32,
    data_encrypted: Vec<u8>,
) -> RemotePassFile {
    let now = Utc::now();
    RemotePassFile {
        id: PassFileId(id),
        name: name.to_string(),
        color: None,
        version,
        data_encrypted,
        created_on: now,
        info_changed_on: now,
        version_changed_on: now,
    }
}

/// Server double with optimistic version checks and failure injection.
pub struct MockRemote {
    files: Mutex<BTreeMap<PassFileId, RemotePassFile>>,
    next_id: AtomicI64,
    failing: Mutex<HashSet<PassFileId>>,
    fail_list: AtomicBool,
    delay: Mutex<Option<Duration>>,
    pushes: AtomicUsize,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            failing: Mutex::new(HashSet::new()),
            fail_list: AtomicBool::new(false),
            delay: Mutex::new(None),
            pushes: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, file: RemotePassFile) {
        let next = file.id.0 + 1;
        self.next_id.fetch_max(next, Ordering::SeqCst);
        self.files.lock().unwrap().insert(file.id, file);
    }

    pub fn get(&self, id: PassFileId) -> Option<RemotePassFile> {
        self.files.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simulate another device storing new content. Returns the new version.
    pub fn advance(&self, id: PassFileId, data_encrypted: Vec<u8>) -> Option<u32> {
        let mut files = self.files.lock().unwrap();
        let file = files.get_mut(&id)?;
        file.version += 1;
        file.data_encrypted = data_encrypted;
        file.version_changed_on = Utc::now();
        Some(file.version)
    }

    /// Simulate another device renaming the passfile.
    pub fn rename(&self, id: PassFileId, name: &str) {
        if let Some(file) = self.files.lock().unwrap().get_mut(&id) {
            file.name = name.to_string();
            file.info_changed_on = Utc::now();
        }
    }

    pub fn remove(&self, id: PassFileId) {
        self.files.lock().unwrap().remove(&id);
    }

    /// Every call touching `id` fails with a network error.
    pub fn fail_network_for(&self, id: PassFileId) {
        self.failing.lock().unwrap().insert(id);
    }

    pub fn fail_fetch_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Delay applied to every push before it takes effect.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    async fn enter(&self, id: PassFileId) -> RemoteResult<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&id) {
            return Err(RemoteError::Network(format!("connection reset ({id})")));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn fetch_list(&self) -> RemoteResult<Vec<RemotePassFile>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("server unreachable".into()));
        }
        Ok(self.files.lock().unwrap().values().cloned().collect())
    }

    async fn push(&self, passfile: &PassFile, expected_version: u32) -> RemoteResult<PushOutcome> {
        self.enter(passfile.id).await?;
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let mut files = self.files.lock().unwrap();
        let Some(file) = files.get_mut(&passfile.id) else {
            return Ok(PushOutcome::NotFound);
        };
        if file.version != expected_version {
            return Ok(PushOutcome::VersionConflict {
                remote_version: Some(file.version),
            });
        }
        let now = Utc::now();
        if file.name != passfile.name || file.color != passfile.color {
            file.name = passfile.name.clone();
            file.color = passfile.color.clone();
            file.info_changed_on = now;
        }
        if file.data_encrypted != passfile.data_encrypted {
            file.data_encrypted = passfile.data_encrypted.clone();
            file.version_changed_on = now;
        }
        file.version += 1;
        Ok(PushOutcome::Pushed {
            version: file.version,
        })
    }

    async fn push_new(&self, passfile: &PassFile) -> RemoteResult<CreatedRemote> {
        self.enter(passfile.id).await?;
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let id = PassFileId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut file = remote_passfile(id.0, &passfile.name, 1, passfile.data_encrypted.clone());
        file.color = passfile.color.clone();
        self.files.lock().unwrap().insert(id, file);
        Ok(CreatedRemote { id, version: 1 })
    }

    async fn delete(&self, id: PassFileId) -> RemoteResult<DeleteOutcome> {
        self.enter(id).await?;
        match self.files.lock().unwrap().remove(&id) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_checks_expected_version() {
        let remote = MockRemote::new();
        remote.insert(remote_passfile(1, "Mail", 2, vec![1]));
        let mut local = remote.get(PassFileId(1)).unwrap().to_local();
        local.data_encrypted = vec![2];

        assert_eq!(
            remote.push(&local, 1).await,
            Ok(PushOutcome::VersionConflict {
                remote_version: Some(2)
            })
        );
        assert_eq!(
            remote.push(&local, 2).await,
            Ok(PushOutcome::Pushed { version: 3 })
        );
        assert_eq!(remote.get(PassFileId(1)).unwrap().data_encrypted, vec![2]);
    }

    #[tokio::test]
    async fn push_to_removed_passfile_is_not_found() {
        let remote = MockRemote::new();
        remote.insert(remote_passfile(1, "Mail", 1, vec![1]));
        let local = remote.get(PassFileId(1)).unwrap().to_local();
        remote.remove(PassFileId(1));
        assert_eq!(remote.push(&local, 1).await, Ok(PushOutcome::NotFound));
    }

    #[tokio::test]
    async fn push_new_allocates_ids_after_existing() {
        let remote = MockRemote::new();
        remote.insert(remote_passfile(7, "a", 1, vec![]));
        let local = PassFile::new_local(PassFileId(-1), "b".into(), None, vec![]);
        let created = remote.push_new(&local).await.unwrap();
        assert_eq!(created.id, PassFileId(8));
    }

    #[tokio::test]
    async fn injected_failure_is_network_error() {
        let remote = MockRemote::new();
        remote.fail_network_for(PassFileId(3));
        assert!(matches!(
            remote.delete(PassFileId(3)).await,
            Err(RemoteError::Network(_))
        ));
        assert_eq!(remote.delete(PassFileId(4)).await, Ok(DeleteOutcome::NotFound));
    }
}
