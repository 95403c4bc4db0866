//! Meta crate that re-exports the worksheet stack with sensible defaults:
//! the shared value/type model, the definition-language parser, the engine,
//! and the versioned store. Depend on this crate for the full runtime, or on
//! the individual layers for deeper integration.

pub use worksheets_common as common;
pub use worksheets_eval as eval;
pub use worksheets_parse as parse;
pub use worksheets_store as store;

pub use worksheets_common::{
    INDEX_ID, INDEX_VERSION, Number, RoundingMode, Slice, SliceElement, Type, Value,
    WorksheetError, WorksheetErrorKind, WsId,
};
pub use worksheets_eval::{
    Definitions, FieldDiff, Options, Plugin, PluginMap, SliceDiff, WorksheetGraph,
};
pub use worksheets_store::{Edit, MemStore, Session, StoreError};
#[cfg(feature = "sqlite")]
pub use worksheets_store::SqliteStore;
