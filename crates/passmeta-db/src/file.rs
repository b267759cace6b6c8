//! File-backed `LocalStore`: one JSON record per passfile.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{DbError, DbResult};
use crate::schema::{PassFile, PassFileId};
use crate::traits::LocalStore;

const RECORD_EXT: &str = "json";

/// Stores each passfile as `<dir>/<id>.json`.
///
/// Writes land in a temp file in the same directory, are synced to disk and
/// then renamed over the target, so a crash leaves either the previous or
/// the new record on disk.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> DbResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        tracing::debug!("File store opened at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: PassFileId) -> PathBuf {
        self.dir.join(format!("{}.{RECORD_EXT}", id.0))
    }
}

/// Write `data` to `path` through a synced temp file and an atomic rename.
pub fn atomic_write(path: &Path, data: &[u8]) -> DbResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| DbError::StorageWriteFailed(format!("{} has no parent", path.display())))?;
    let write_failed =
        |e: std::io::Error| DbError::StorageWriteFailed(format!("{}: {e}", path.display()));

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_failed)?;
    temp.write_all(data).map_err(write_failed)?;
    temp.as_file().sync_all().map_err(write_failed)?;
    temp.persist(path).map_err(|e| write_failed(e.error))?;
    Ok(())
}

fn read_record(path: &Path) -> DbResult<PassFile> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn blocking_failed(e: tokio::task::JoinError) -> DbError {
    DbError::Io(std::io::Error::other(e.to_string()))
}

#[async_trait]
impl LocalStore for FileStore {
    async fn load(&self, id: PassFileId) -> DbResult<PassFile> {
        let path = self.record_path(id);
        tokio::task::spawn_blocking(move || match read_record(&path) {
            Err(DbError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DbError::NotFound(id))
            }
            other => other,
        })
        .await
        .map_err(blocking_failed)?
    }

    async fn save(&self, passfile: &PassFile) -> DbResult<()> {
        let path = self.record_path(passfile.id);
        let data = serde_json::to_vec_pretty(&passfile.without_secrets())?;
        tokio::task::spawn_blocking(move || atomic_write(&path, &data))
            .await
            .map_err(|e| DbError::StorageWriteFailed(e.to_string()))??;
        tracing::debug!("Saved passfile {}", passfile.id);
        Ok(())
    }

    async fn delete(&self, id: PassFileId) -> DbResult<()> {
        let path = self.record_path(id);
        tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DbError::StorageWriteFailed(format!("{}: {e}", path.display()))),
        })
        .await
        .map_err(|e| DbError::StorageWriteFailed(e.to_string()))??;
        tracing::debug!("Deleted passfile {id}");
        Ok(())
    }

    async fn list_all(&self) -> DbResult<Vec<PassFile>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            let mut result = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                let is_record = path.extension().is_some_and(|ext| ext == RECORD_EXT)
                    && path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .is_some_and(|s| s.parse::<i64>().is_ok());
                if !is_record {
                    continue;
                }
                match read_record(&path) {
                    Ok(pf) => result.push(pf),
                    Err(e) => tracing::warn!("Skipping unreadable record {}: {e}", path.display()),
                }
            }
            result.sort_by_key(|pf| pf.id);
            Ok(result)
        })
        .await
        .map_err(blocking_failed)?
    }
}
