//! Reconciles local passfiles with the remote server.
//!
//! Each passfile is planned independently from its local state and the
//! remote listing ([`plan`]), then executed in its own task. Failures stay
//! confined to the passfile they happened on.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use passmeta_crypto::{KdfParams, Passphrase};
use passmeta_db::envelope::{decrypt_sections, encrypt_sections};
use passmeta_db::{DbError, LocalState, LocalStore, PassFile, PassFileId, Problem, ProblemKind};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;

use crate::error::{SyncError, SyncResult};
use crate::merge::{merge, Conflict, ConflictChoice, MergeResult};
use crate::remote::{DeleteOutcome, PushOutcome, RemoteClient, RemoteError, RemotePassFile};
use crate::session::SessionKeys;

/// What a sync pass does with one passfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    PushNew,
    Push,
    Pull,
    PullNew,
    Merge,
    DeleteRemote,
    PurgeLocal,
    ReportDeletedRemotely,
    Skip,
}

/// Decide the action for a passfile from its local copy and remote listing.
pub fn plan(local: Option<&PassFile>, remote: Option<&RemotePassFile>) -> SyncAction {
    let Some(local) = local else {
        return match remote {
            Some(_) => SyncAction::PullNew,
            None => SyncAction::Skip,
        };
    };
    match (local.state, remote) {
        (LocalState::Created, _) => SyncAction::PushNew,
        (LocalState::Deleted { .. }, _) => SyncAction::DeleteRemote,
        (LocalState::Synced, None) => SyncAction::PurgeLocal,
        (LocalState::Changed { .. }, None) => SyncAction::ReportDeletedRemotely,
        (LocalState::Synced, Some(remote)) => match local.remote_version {
            // Listing taken before the local copy was last synced.
            Some(seen) if remote.version < seen => SyncAction::Skip,
            Some(seen) if seen == remote.version && !remote.info_differs(local) => {
                SyncAction::Skip
            }
            _ => SyncAction::Pull,
        },
        (LocalState::Changed { .. }, Some(remote)) => match local.remote_version {
            Some(seen) if remote.version <= seen => SyncAction::Push,
            _ => SyncAction::Merge,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncFailure {
    Network(String),
    DecryptionFailed,
    Storage(String),
    /// Another sync of the same passfile is still running.
    InFlight,
    Internal(String),
}

/// Terminal state of one passfile after a sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Synced,
    /// Concurrent edits; an empty list means the merge is not computed yet
    /// and happens on the next pass.
    NeedsMerge { conflicts: Vec<Conflict> },
    Conflict { detail: String },
    Failed(SyncFailure),
    Cancelled,
}

impl SyncState {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub id: PassFileId,
    pub action: SyncAction,
    pub state: SyncState,
    /// Remote id assigned to a locally created passfile.
    pub new_id: Option<PassFileId>,
}

impl SyncReport {
    fn new(id: PassFileId, action: SyncAction, state: SyncState) -> Self {
        Self {
            id,
            action,
            state,
            new_id: None,
        }
    }
}

/// Notifications for observers of sync progress.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    ItemFinished(SyncReport),
    BatchFinished { total: usize, failed: usize },
    BatchFailed { error: String },
}

/// Cooperative cancellation shared between a caller and running batches.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub max_concurrent: usize,
    /// Cost parameters for content re-sealed during merges.
    pub kdf: KdfParams,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            kdf: KdfParams::default(),
        }
    }
}

/// Merge waiting for the caller to settle its conflicts.
#[derive(Debug, Clone)]
struct PendingMerge {
    result: MergeResult,
    remote: RemotePassFile,
    /// Local content the merge was computed from.
    local_data: Vec<u8>,
}

/// Marks a passfile as being synced until dropped.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<PassFileId>>>,
    id: PassFileId,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<PassFileId>>>, id: PassFileId) -> Option<Self> {
        let inserted = set.lock().unwrap_or_else(|e| e.into_inner()).insert(id);
        inserted.then(|| Self {
            set: Arc::clone(set),
            id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

fn failure_of(err: &SyncError) -> SyncFailure {
    match err {
        SyncError::Remote(e) => e.clone().into(),
        SyncError::Decryption(_) | SyncError::PassphraseRequired(_) => {
            SyncFailure::DecryptionFailed
        }
        SyncError::Storage(e) => SyncFailure::Storage(e.to_string()),
        other => SyncFailure::Internal(other.to_string()),
    }
}

/// Overwrite the local copy with the remote passfile.
fn adopt_remote(local: &mut PassFile, remote: &RemotePassFile) {
    let id = local.id;
    *local = remote.to_local();
    local.id = id;
}

/// Take the remote name and color if they were changed more recently.
fn adopt_newer_info(local: &mut PassFile, remote: &RemotePassFile) {
    if remote.info_changed_on > local.info_changed_on {
        local.name = remote.name.clone();
        local.color = remote.color.clone();
        local.info_changed_on = remote.info_changed_on;
    }
}

/// Sync engine over injected store, remote and session keyring.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
    keys: Arc<SessionKeys>,
    options: SyncOptions,
    in_flight: Arc<Mutex<HashSet<PassFileId>>>,
    pending: Arc<Mutex<HashMap<PassFileId, PendingMerge>>>,
    events: Option<mpsc::Sender<SyncEvent>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
        keys: Arc<SessionKeys>,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            remote,
            keys,
            options,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            events: None,
        }
    }

    /// Send item and batch notifications to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<SyncEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    async fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<PassFileId, PendingMerge>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Merge waiting on conflict resolution for `id`, if any.
    pub fn pending_merge(&self, id: PassFileId) -> Option<MergeResult> {
        self.pending().get(&id).map(|p| p.result.clone())
    }

    /// Sync every local and remote passfile.
    ///
    /// Fails as a whole only when the remote listing or the local store
    /// cannot be read. Otherwise every passfile gets a report, in id order
    /// with remote-only passfiles last.
    pub async fn sync_all(&self, cancel: &CancelToken) -> SyncResult<Vec<SyncReport>> {
        let listing = match self.remote.fetch_list().await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!("Sync aborted, remote listing failed: {e}");
                self.emit(SyncEvent::BatchFailed {
                    error: e.to_string(),
                })
                .await;
                return Err(e.into());
            }
        };
        let locals = self.store.list_all().await?;

        let mut remote_by_id: BTreeMap<PassFileId, RemotePassFile> =
            listing.into_iter().map(|r| (r.id, r)).collect();
        let mut pairs: Vec<(Option<PassFile>, Option<RemotePassFile>)> = locals
            .into_iter()
            .map(|local| {
                let remote = remote_by_id.remove(&local.id);
                (Some(local), remote)
            })
            .collect();
        pairs.extend(remote_by_id.into_values().map(|r| (None, Some(r))));

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();
        let mut order = Vec::with_capacity(pairs.len());

        for (local, remote) in pairs {
            let id = match (&local, &remote) {
                (Some(l), _) => l.id,
                (None, Some(r)) => r.id,
                (None, None) => continue,
            };
            order.push((id, plan(local.as_ref(), remote.as_ref())));

            let engine = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                if cancel.is_cancelled() {
                    let action = plan(local.as_ref(), remote.as_ref());
                    return SyncReport::new(id, action, SyncState::Cancelled);
                }
                engine.sync_pair(local, remote).await
            });
        }

        let mut finished: HashMap<PassFileId, SyncReport> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    self.emit(SyncEvent::ItemFinished(report.clone())).await;
                    finished.insert(report.id, report);
                }
                Err(e) => tracing::error!("Sync task panicked: {e}"),
            }
        }

        let reports: Vec<SyncReport> = order
            .into_iter()
            .map(|(id, action)| {
                finished.remove(&id).unwrap_or_else(|| {
                    SyncReport::new(
                        id,
                        action,
                        SyncState::Failed(SyncFailure::Internal("sync task aborted".into())),
                    )
                })
            })
            .collect();

        let failed = reports.iter().filter(|r| r.state.is_failed()).count();
        tracing::info!("Sync finished: {} passfiles, {failed} failed", reports.len());
        self.emit(SyncEvent::BatchFinished {
            total: reports.len(),
            failed,
        })
        .await;
        Ok(reports)
    }

    /// Sync a single local passfile.
    pub async fn sync_one(&self, id: PassFileId) -> SyncResult<SyncReport> {
        let local = self.store.load(id).await?;
        let remote = if local.state == LocalState::Created {
            None
        } else {
            self.remote
                .fetch_list()
                .await?
                .into_iter()
                .find(|r| r.id == id)
        };
        let report = self.sync_pair(Some(local), remote).await;
        self.emit(SyncEvent::ItemFinished(report.clone())).await;
        Ok(report)
    }

    async fn sync_pair(
        &self,
        local: Option<PassFile>,
        remote: Option<RemotePassFile>,
    ) -> SyncReport {
        let planned = plan(local.as_ref(), remote.as_ref());
        let id = match (&local, &remote) {
            (Some(l), _) => l.id,
            (None, Some(r)) => r.id,
            (None, None) => return SyncReport::new(PassFileId(0), planned, SyncState::Synced),
        };

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, id) else {
            tracing::debug!("Passfile {id} already syncing");
            return SyncReport::new(id, planned, SyncState::Failed(SyncFailure::InFlight));
        };

        // The snapshot may predate a sync of the same passfile that finished
        // while this one was queued. Plan again from the stored copy.
        let fresh = match self.reload(id).await {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::warn!("Cannot reload passfile {id}: {e}");
                return SyncReport::new(id, planned, SyncState::Failed(failure_of(&e)));
            }
        };
        if local.is_some() && fresh.is_none() {
            tracing::debug!("Passfile {id} was re-keyed or purged meanwhile");
            return SyncReport::new(id, SyncAction::Skip, SyncState::Synced);
        }
        let local = fresh;
        let action = plan(local.as_ref(), remote.as_ref());

        let mut new_id = None;
        let result = match (action, local, remote) {
            (SyncAction::PushNew, Some(local), _) => self.push_new(local).await.map(|created| {
                new_id = Some(created);
                SyncState::Synced
            }),
            (SyncAction::Push, Some(local), _) => self.push(local).await,
            (SyncAction::Pull, Some(mut local), Some(remote)) => {
                adopt_remote(&mut local, &remote);
                self.store
                    .save(&local)
                    .await
                    .map(|_| SyncState::Synced)
                    .map_err(Into::into)
            }
            (SyncAction::PullNew, None, Some(remote)) => self
                .store
                .save(&remote.to_local())
                .await
                .map(|_| SyncState::Synced)
                .map_err(Into::into),
            (SyncAction::Merge, Some(local), Some(remote)) => {
                self.merge_remote(local, remote).await
            }
            (SyncAction::DeleteRemote, Some(local), _) => self.delete_remote(local).await,
            (SyncAction::PurgeLocal, Some(local), _) => self.purge(local.id).await,
            (SyncAction::ReportDeletedRemotely, Some(local), _) => {
                self.report_deleted_remotely(local).await
            }
            (SyncAction::Skip, _, _) => Ok(SyncState::Synced),
            (action, _, _) => Err(SyncError::IllegalState(format!(
                "{action:?} planned without the data it needs"
            ))),
        };

        let state = result.unwrap_or_else(|e| {
            tracing::warn!("Sync of passfile {id} ({action:?}) failed: {e}");
            SyncState::Failed(failure_of(&e))
        });
        tracing::debug!("Passfile {id}: {action:?} -> {state:?}");
        SyncReport {
            id,
            action,
            state,
            new_id,
        }
    }

    /// Current stored copy of `id`, `None` once it is gone.
    async fn reload(&self, id: PassFileId) -> SyncResult<Option<PassFile>> {
        match self.store.load(id).await {
            Ok(local) => Ok(Some(local)),
            Err(DbError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn push_new(&self, mut local: PassFile) -> SyncResult<PassFileId> {
        let created = self.remote.push_new(&local).await?;
        let old_id = local.id;
        local.id = created.id;
        local.mark_synced(created.version);

        // New record first: a crash in between duplicates instead of losing.
        self.store.save(&local).await?;
        self.store.delete(old_id).await?;
        self.keys.rekey(old_id, created.id);
        tracing::info!("Passfile {old_id} created on remote as {}", created.id);
        Ok(created.id)
    }

    async fn push(&self, mut local: PassFile) -> SyncResult<SyncState> {
        let expected = local.remote_version.ok_or_else(|| {
            SyncError::IllegalState(format!("passfile {} has never been synced", local.id))
        })?;
        match self.remote.push(&local, expected).await? {
            PushOutcome::Pushed { version } => {
                local.mark_synced(version);
                self.store.save(&local).await?;
                self.pending().remove(&local.id);
                Ok(SyncState::Synced)
            }
            PushOutcome::VersionConflict { remote_version } => {
                let detail = match remote_version {
                    Some(version) => format!("remote is at version {version}"),
                    None => "remote holds a newer version".to_string(),
                };
                tracing::info!(
                    "Passfile {} rejected, expected version {expected}: {detail}",
                    local.id
                );
                local.problem = Some(Problem::with_detail(ProblemKind::NeedsMerge, detail));
                self.store.save(&local).await?;
                Ok(SyncState::NeedsMerge {
                    conflicts: Vec::new(),
                })
            }
            PushOutcome::NotFound => self.report_deleted_remotely(local).await,
        }
    }

    async fn report_deleted_remotely(&self, mut local: PassFile) -> SyncResult<SyncState> {
        let detail = "deleted on the remote while changed locally".to_string();
        tracing::info!("Passfile {} {detail}", local.id);
        local.problem = Some(Problem::with_detail(ProblemKind::DeletedOnOneSide, &detail));
        self.store.save(&local).await?;
        Ok(SyncState::Conflict { detail })
    }

    async fn delete_remote(&self, local: PassFile) -> SyncResult<SyncState> {
        if !local.id.is_local() {
            match self.remote.delete(local.id).await? {
                DeleteOutcome::Deleted => {}
                DeleteOutcome::NotFound => {
                    tracing::debug!("Passfile {} already gone from remote", local.id)
                }
            }
        }
        self.purge(local.id).await
    }

    async fn purge(&self, id: PassFileId) -> SyncResult<SyncState> {
        self.store.delete(id).await?;
        self.keys.forget(id);
        self.pending().remove(&id);
        Ok(SyncState::Synced)
    }

    async fn fail_decryption(
        &self,
        mut local: PassFile,
        detail: String,
    ) -> SyncResult<SyncState> {
        tracing::warn!("Cannot merge passfile {}: {detail}", local.id);
        local.problem = Some(Problem::with_detail(ProblemKind::DecryptFailed, detail));
        self.store.save(&local).await?;
        Ok(SyncState::Failed(SyncFailure::DecryptionFailed))
    }

    async fn merge_remote(
        &self,
        mut local: PassFile,
        remote: RemotePassFile,
    ) -> SyncResult<SyncState> {
        // Content untouched since the last sync: only info changed locally.
        if local.origin_encrypted.as_deref() == Some(local.data_encrypted.as_slice()) {
            adopt_newer_info(&mut local, &remote);
            local.mark_merged(
                remote.data_encrypted.clone(),
                remote.version,
                remote.data_encrypted.clone(),
            );
            self.store.save(&local).await?;
            return self.push(local).await;
        }

        let Some(passphrase) = self.keys.get(local.id) else {
            return self.fail_decryption(local, "passphrase required".into()).await;
        };
        let local_sections = match decrypt_sections(&local.data_encrypted, &passphrase) {
            Ok(sections) => sections,
            Err(e) => return self.fail_decryption(local, format!("local content: {e}")).await,
        };
        let remote_sections = match decrypt_sections(&remote.data_encrypted, &passphrase) {
            Ok(sections) => sections,
            Err(e) => return self.fail_decryption(local, format!("remote content: {e}")).await,
        };
        let base = local
            .origin_encrypted
            .as_deref()
            .and_then(|origin| decrypt_sections(origin, &passphrase).ok());

        let result = merge(base.as_deref(), &local_sections, &remote_sections);
        if !result.has_conflicts() {
            tracing::info!("Passfile {} merged without conflicts", local.id);
            adopt_newer_info(&mut local, &remote);
            return self.commit_merge(local, &result, &remote, &passphrase).await;
        }

        let conflicts = result.conflicts.clone();
        tracing::info!("Passfile {} has {} merge conflicts", local.id, conflicts.len());
        local.problem = Some(Problem::with_detail(
            ProblemKind::NeedsMerge,
            format!("{} conflicting sections", conflicts.len()),
        ));
        self.store.save(&local).await?;
        let pending = PendingMerge {
            result,
            remote,
            local_data: local.data_encrypted,
        };
        self.pending().insert(local.id, pending);
        Ok(SyncState::NeedsMerge { conflicts })
    }

    /// Seal the merged sections, persist them and push against the remote
    /// version they were merged with.
    async fn commit_merge(
        &self,
        mut local: PassFile,
        result: &MergeResult,
        remote: &RemotePassFile,
        passphrase: &Passphrase,
    ) -> SyncResult<SyncState> {
        let sealed = encrypt_sections(&result.result_sections, passphrase, &self.options.kdf)?;
        local.mark_merged(sealed, remote.version, remote.data_encrypted.clone());
        self.store.save(&local).await?;
        self.pending().remove(&local.id);
        self.push(local).await
    }

    /// Settle one conflict of a pending merge.
    pub fn resolve(
        &self,
        id: PassFileId,
        section_id: &str,
        choice: ConflictChoice,
    ) -> SyncResult<MergeResult> {
        let mut pending = self.pending();
        let merge = pending.get_mut(&id).ok_or(SyncError::NoPendingMerge(id))?;
        if !merge.result.resolve(section_id, choice) {
            return Err(SyncError::InvalidInput(format!(
                "no conflict for section {section_id} in passfile {id}"
            )));
        }
        Ok(merge.result.clone())
    }

    /// Write a fully resolved merge and push it.
    pub async fn apply_merge(&self, id: PassFileId) -> SyncResult<SyncReport> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, id) else {
            let state = SyncState::Failed(SyncFailure::InFlight);
            return Ok(SyncReport::new(id, SyncAction::Merge, state));
        };
        let pending = self
            .pending()
            .get(&id)
            .cloned()
            .ok_or(SyncError::NoPendingMerge(id))?;
        if pending.result.has_conflicts() {
            return Err(SyncError::UnresolvedConflicts {
                id,
                count: pending.result.conflicts.len(),
            });
        }
        let passphrase = self.keys.get(id).ok_or(SyncError::PassphraseRequired(id))?;
        let mut local = self.store.load(id).await?;
        if local.state.is_deleted() {
            return Err(SyncError::IllegalState(format!("passfile {id} was deleted")));
        }
        // Edits made after the merge was computed are not part of it.
        if local.data_encrypted != pending.local_data {
            self.pending().remove(&id);
            return Err(SyncError::IllegalState(format!(
                "passfile {id} changed while its merge was pending, sync again"
            )));
        }
        adopt_newer_info(&mut local, &pending.remote);

        let committed = self
            .commit_merge(local, &pending.result, &pending.remote, &passphrase)
            .await;
        let state = match committed {
            Ok(state) => state,
            Err(SyncError::Remote(e)) => SyncState::Failed(e.into()),
            Err(e) => return Err(e),
        };
        let report = SyncReport::new(id, SyncAction::Merge, state);
        self.emit(SyncEvent::ItemFinished(report.clone())).await;
        Ok(report)
    }

    /// Run `sync_all` every `interval` until cancelled.
    pub async fn run_periodic(self, interval: Duration, cancel: CancelToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Auto-sync stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_all(&cancel).await {
                        tracing::warn!("Auto-sync pass failed: {e}");
                    }
                }
            }
        }
    }
}

impl From<RemoteError> for SyncFailure {
    fn from(e: RemoteError) -> Self {
        SyncFailure::Network(e.to_string())
    }
}
