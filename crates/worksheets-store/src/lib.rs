pub mod backend;
pub mod codec;
pub mod error;
pub mod memory;
pub mod records;
pub mod session;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use backend::StoreTx;
pub use codec::{Decoded, decode, encode};
pub use error::StoreError;
pub use memory::{MemStore, MemTx};
pub use records::{
    EditRec, ParentEdgeRec, SliceElementRec, ValueRec, VERSION_UNBOUNDED, WorksheetRec,
};
pub use session::{Edit, Session};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteStore, SqliteTx};

// Re-export for convenience
pub use worksheets_eval::WorksheetGraph;
