//! Externally computed fields.
//!
//! A plugin stands in for a `computed_by { external }` block: it declares
//! the selector paths it reads and derives the field value from them. The
//! engine re-invokes `compute` whenever any declared path changes, with the
//! resolved values in declaration order, and applies the same identity rule
//! as expression-computed fields.

use std::collections::HashMap;
use std::sync::Arc;

use worksheets_common::Value;

pub trait Plugin: Send + Sync {
    /// Selector paths (e.g. `"children.amount"`) this field depends on.
    /// Must be non-empty.
    fn args(&self) -> Vec<String>;

    /// Derive the field value. Arguments arrive in `args()` order; a path
    /// whose intermediate refs are undefined resolves to `Value::Undefined`.
    fn compute(&self, args: &[Value]) -> Value;
}

/// `worksheet name → field name → plugin`, as handed to the catalog builder.
pub type PluginMap = HashMap<String, HashMap<String, Arc<dyn Plugin>>>;
