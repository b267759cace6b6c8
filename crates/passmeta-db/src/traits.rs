use async_trait::async_trait;

use crate::error::DbResult;
use crate::schema::{PassFile, PassFileId};

/// Durable storage of passfiles in their encrypted form.
///
/// Implementations never see decrypted sections: callers hand in
/// `PassFile::without_secrets()` views and every write replaces the previous
/// record atomically.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Load one passfile, `DbError::NotFound` if absent.
    async fn load(&self, id: PassFileId) -> DbResult<PassFile>;

    /// Insert or replace a passfile.
    async fn save(&self, passfile: &PassFile) -> DbResult<()>;

    /// Remove a passfile. Removing an absent id is not an error.
    async fn delete(&self, id: PassFileId) -> DbResult<()>;

    /// All stored passfiles ordered by id.
    async fn list_all(&self) -> DbResult<Vec<PassFile>>;
}
