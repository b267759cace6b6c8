pub mod engine;
pub mod error;
pub mod manager;
pub mod merge;
pub mod remote;
pub mod session;

pub use engine::{
    CancelToken, SyncAction, SyncEngine, SyncEvent, SyncFailure, SyncOptions, SyncReport,
    SyncState,
};
pub use error::{SyncError, SyncResult};
pub use manager::{DeletedResolution, PassFileManager};
pub use merge::{merge, Conflict, ConflictChoice, MergeResult};
pub use remote::{RemoteClient, RemoteError, RemotePassFile};
pub use session::SessionKeys;
