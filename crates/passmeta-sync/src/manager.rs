//! Local passfile mutations: create, edit, delete, restore and friends.
//!
//! Every mutation is persisted through the `LocalStore` before the updated
//! passfile is returned, so a failed write leaves the caller's previous
//! copy authoritative.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use passmeta_crypto::{KdfParams, Passphrase};
use passmeta_db::envelope::{decrypt_sections, encrypt_sections};
use passmeta_db::file::atomic_write;
use passmeta_db::schema::{b64, SectionMark};
use passmeta_db::{LocalState, LocalStore, PassFile, PassFileId, ProblemKind, Section};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::session::SessionKeys;

/// How to settle a passfile deleted remotely while edited locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletedResolution {
    /// Keep the local copy and create it on the remote again.
    Resurrect,
    /// Accept the remote deletion.
    Discard,
}

/// Portable file holding one passfile in sealed form.
#[derive(Debug, Serialize, Deserialize)]
struct ExportedPassFile {
    name: String,
    color: Option<String>,
    #[serde(with = "b64")]
    data_encrypted: Vec<u8>,
}

fn validate_name(name: &str) -> SyncResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SyncError::InvalidInput("name must not be blank".into()));
    }
    Ok(name.to_string())
}

fn validate_color(color: Option<&str>) -> SyncResult<Option<String>> {
    let Some(color) = color.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(None);
    };
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(SyncError::InvalidInput(format!(
            "color must look like #RRGGBB, got {color}"
        )));
    }
    Ok(Some(color.to_uppercase()))
}

pub struct PassFileManager {
    store: Arc<dyn LocalStore>,
    keys: Arc<SessionKeys>,
    kdf: KdfParams,
}

impl PassFileManager {
    pub fn new(store: Arc<dyn LocalStore>, keys: Arc<SessionKeys>, kdf: KdfParams) -> Self {
        Self { store, keys, kdf }
    }

    pub async fn list(&self) -> SyncResult<Vec<PassFile>> {
        Ok(self.store.list_all().await?)
    }

    pub async fn get(&self, id: PassFileId) -> SyncResult<PassFile> {
        Ok(self.store.load(id).await?)
    }

    /// Create a local passfile sealed with `passphrase`.
    pub async fn create(
        &self,
        name: &str,
        color: Option<&str>,
        passphrase: Passphrase,
        mut sections: Vec<Section>,
    ) -> SyncResult<PassFile> {
        let name = validate_name(name)?;
        let color = validate_color(color)?;
        if passphrase.is_empty() {
            return Err(SyncError::InvalidInput("passphrase must not be empty".into()));
        }
        for section in &mut sections {
            section.mark = SectionMark::None;
        }

        let existing = self.store.list_all().await?;
        let id = PassFileId::next_local(existing.iter().map(|pf| pf.id));
        let sealed = encrypt_sections(&sections, &passphrase, &self.kdf)?;
        let mut passfile = PassFile::new_local(id, name, color, sealed);
        self.store.save(&passfile).await?;

        self.keys.set(id, passphrase);
        passfile.sections = Some(sections);
        tracing::info!("Created passfile {id} ({})", passfile.name);
        Ok(passfile)
    }

    /// Decrypt a passfile and remember the passphrase for the session.
    pub async fn decrypt(
        &self,
        id: PassFileId,
        passphrase: Passphrase,
    ) -> SyncResult<Vec<Section>> {
        let passfile = self.store.load(id).await?;
        let sections = decrypt_sections(&passfile.data_encrypted, &passphrase)?;
        self.keys.set(id, passphrase);
        Ok(sections)
    }

    async fn open(&self, id: PassFileId) -> SyncResult<(PassFile, Passphrase, Vec<Section>)> {
        let passfile = self.store.load(id).await?;
        let passphrase = self.keys.get(id).ok_or(SyncError::PassphraseRequired(id))?;
        let sections = decrypt_sections(&passfile.data_encrypted, &passphrase)?;
        Ok((passfile, passphrase, sections))
    }

    pub async fn update_info(
        &self,
        id: PassFileId,
        name: &str,
        color: Option<&str>,
    ) -> SyncResult<PassFile> {
        let name = validate_name(name)?;
        let color = validate_color(color)?;
        let mut passfile = self.store.load(id).await?;
        if passfile.name == name && passfile.color == color {
            return Ok(passfile);
        }
        passfile.record_info_change(name, color)?;
        self.store.save(&passfile).await?;
        Ok(passfile)
    }

    /// Replace the whole section list. Requires the passfile to be unlocked.
    pub async fn update_content(
        &self,
        id: PassFileId,
        sections: Vec<Section>,
    ) -> SyncResult<PassFile> {
        let passfile = self.store.load(id).await?;
        let passphrase = self.keys.get(id).ok_or(SyncError::PassphraseRequired(id))?;
        self.write_content(passfile, &passphrase, sections).await
    }

    async fn write_content(
        &self,
        mut passfile: PassFile,
        passphrase: &Passphrase,
        mut sections: Vec<Section>,
    ) -> SyncResult<PassFile> {
        if passfile.state.is_deleted() {
            return Err(SyncError::IllegalState(format!(
                "passfile {} is deleted",
                passfile.id
            )));
        }
        for section in &mut sections {
            section.mark = SectionMark::None;
        }
        let sealed = encrypt_sections(&sections, passphrase, &self.kdf)?;
        passfile.record_content_change(sealed)?;
        self.store.save(&passfile).await?;
        passfile.sections = Some(sections);
        Ok(passfile)
    }

    /// Insert or replace a section. Saving an unchanged, already committed
    /// section does nothing.
    pub async fn upsert_section(&self, id: PassFileId, section: Section) -> SyncResult<PassFile> {
        let (mut passfile, passphrase, mut sections) = self.open(id).await?;
        match sections.iter().position(|s| s.id == section.id) {
            Some(i)
                if !sections[i].differs_from(&section) && section.mark != SectionMark::Created =>
            {
                passfile.sections = Some(sections);
                return Ok(passfile);
            }
            Some(i) => sections[i] = section,
            None => sections.push(section),
        }
        self.write_content(passfile, &passphrase, sections).await
    }

    pub async fn remove_section(&self, id: PassFileId, section_id: &str) -> SyncResult<PassFile> {
        let (passfile, passphrase, mut sections) = self.open(id).await?;
        let before = sections.len();
        sections.retain(|s| s.id != section_id);
        if sections.len() == before {
            return Err(SyncError::InvalidInput(format!(
                "passfile {id} has no section {section_id}"
            )));
        }
        self.write_content(passfile, &passphrase, sections).await
    }

    /// Re-seal content and merge base under a new passphrase.
    pub async fn change_passphrase(&self, id: PassFileId, new: Passphrase) -> SyncResult<PassFile> {
        if new.is_empty() {
            return Err(SyncError::InvalidInput("passphrase must not be empty".into()));
        }
        let (mut passfile, old, sections) = self.open(id).await?;
        if let Some(origin) = passfile.origin_encrypted.take() {
            let base = decrypt_sections(&origin, &old)?;
            passfile.origin_encrypted = Some(encrypt_sections(&base, &new, &self.kdf)?);
        }
        let updated = self.write_content(passfile, &new, sections).await?;
        self.keys.set(id, new);
        tracing::info!("Passphrase of passfile {id} changed");
        Ok(updated)
    }

    /// Mark a passfile deleted. A passfile that never reached the remote is
    /// purged at once and `None` is returned.
    pub async fn delete(&self, id: PassFileId) -> SyncResult<Option<PassFile>> {
        let mut passfile = self.store.load(id).await?;
        if passfile.state == LocalState::Created {
            self.store.delete(id).await?;
            self.keys.forget(id);
            return Ok(None);
        }
        passfile.mark_deleted()?;
        self.store.save(&passfile).await?;
        Ok(Some(passfile))
    }

    pub async fn restore(&self, id: PassFileId) -> SyncResult<PassFile> {
        let mut passfile = self.store.load(id).await?;
        passfile.restore()?;
        self.store.save(&passfile).await?;
        Ok(passfile)
    }

    /// Discard local changes back to the last synced content.
    pub async fn rollback(&self, id: PassFileId) -> SyncResult<PassFile> {
        let mut passfile = self.store.load(id).await?;
        passfile.rollback()?;
        self.store.save(&passfile).await?;
        Ok(passfile)
    }

    pub async fn resolve_deleted(
        &self,
        id: PassFileId,
        resolution: DeletedResolution,
    ) -> SyncResult<Option<PassFile>> {
        let mut passfile = self.store.load(id).await?;
        if passfile.problem.as_ref().map(|p| p.kind) != Some(ProblemKind::DeletedOnOneSide) {
            return Err(SyncError::IllegalState(format!(
                "passfile {id} was not deleted on the remote"
            )));
        }
        match resolution {
            DeletedResolution::Discard => {
                self.store.delete(id).await?;
                self.keys.forget(id);
                Ok(None)
            }
            DeletedResolution::Resurrect => {
                let existing = self.store.list_all().await?;
                let new_id = PassFileId::next_local(existing.iter().map(|pf| pf.id));
                passfile.id = new_id;
                passfile.state = LocalState::Created;
                passfile.remote_version = None;
                passfile.origin_encrypted = None;
                passfile.problem = None;
                self.store.save(&passfile).await?;
                self.store.delete(id).await?;
                self.keys.rekey(id, new_id);
                Ok(Some(passfile))
            }
        }
    }

    /// Write a passfile in sealed form to `path`.
    pub async fn export_encrypted(&self, id: PassFileId, path: &Path) -> SyncResult<()> {
        let passfile = self.store.load(id).await?;
        let exported = ExportedPassFile {
            name: passfile.name,
            color: passfile.color,
            data_encrypted: passfile.data_encrypted,
        };
        let data = serde_json::to_vec_pretty(&exported)
            .map_err(|e| SyncError::Storage(e.into()))?;
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || atomic_write(&path, &data))
            .await
            .map_err(|e| SyncError::IllegalState(e.to_string()))??;
        Ok(())
    }

    /// Import a sealed passfile as a new local passfile. The passphrase must
    /// open it.
    pub async fn import_encrypted(
        &self,
        path: &Path,
        passphrase: Passphrase,
    ) -> SyncResult<PassFile> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| SyncError::InvalidInput(format!("{}: {e}", path.display())))?;
        let exported: ExportedPassFile = serde_json::from_slice(&raw)
            .map_err(|e| SyncError::InvalidInput(format!("not a passfile export: {e}")))?;
        let sections = decrypt_sections(&exported.data_encrypted, &passphrase)?;

        let name = validate_name(&exported.name)?;
        let color = validate_color(exported.color.as_deref())?;
        let existing = self.store.list_all().await?;
        let id = PassFileId::next_local(existing.iter().map(|pf| pf.id));
        let mut passfile = PassFile::new_local(id, name, color, exported.data_encrypted);
        self.store.save(&passfile).await?;

        self.keys.set(id, passphrase);
        passfile.sections = Some(sections);
        tracing::info!("Imported passfile {id} from {}", path.display());
        Ok(passfile)
    }

    /// Forget the passphrase of a passfile closed by the user.
    pub fn close(&self, id: PassFileId) {
        self.keys.forget(id);
    }
}
