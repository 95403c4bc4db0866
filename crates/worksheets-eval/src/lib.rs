pub mod definitions;
pub mod diff;
mod eval;
pub mod graph;
pub mod plugin;

pub use definitions::{AccessPath, ComputedBy, Definition, Definitions, Field, Options};
pub use diff::{FieldDiff, SliceDiff, slice_diff};
pub use graph::WorksheetGraph;
pub use plugin::{Plugin, PluginMap};

// Re-export for convenience
pub use worksheets_common::{
    INDEX_ID, INDEX_VERSION, Number, RoundingMode, Slice, SliceElement, Type, Value,
    WorksheetError, WorksheetErrorKind, WsId,
};

#[cfg(test)]
mod tests;
