pub mod envelope;
pub mod error;
pub mod file;
pub mod schema;
pub mod traits;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{DbError, DbResult};
pub use file::FileStore;
pub use schema::{LocalState, PassFile, PassFileId, Problem, ProblemKind, Section, SectionItem};
pub use traits::LocalStore;
