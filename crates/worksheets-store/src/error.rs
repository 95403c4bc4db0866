//! Store-layer errors, wrapping the runtime error type.

use thiserror::Error;
use uuid::Uuid;
use worksheets_common::WorksheetError;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another transaction produced the same successor version first —
    /// either the edit uniqueness constraint fired or the conditional
    /// version update matched no row.
    #[error("concurrent update")]
    ConcurrentUpdate,

    #[error("worksheet {0} not found")]
    NotFound(Uuid),

    #[error("edit {0} not found")]
    EditNotFound(Uuid),

    #[error("worksheet {0} already persisted")]
    AlreadyPersisted(Uuid),

    /// A stored value string failed decoding against its field type.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    #[error("backend: {0}")]
    Backend(String),

    #[error(transparent)]
    Runtime(#[from] WorksheetError),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
