//! Error representation shared by every layer of the worksheet stack.
//!
//! - **`WorksheetErrorKind`** : the canonical error taxonomy
//! - **`WorksheetError`**     : kind + optional message + optional source position
//!
//! The store layer wraps this type in its own error enum; everything below
//! the store speaks `WorksheetError` directly.

use std::{error::Error, fmt};

/// All recognised error kinds.
///
/// Names are CamelCase (idiomatic Rust) while `Display` renders the
/// lower-case form used in messages (`type mismatch`, …).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WorksheetErrorKind {
    /// Schema source failed to tokenize, parse, or resolve.
    Parse,
    /// Plugin registration or argument binding failed.
    Plugin,
    /// A value is not assignable to a field's declared type.
    TypeMismatch,
    /// No field with that name on the definition.
    UnknownField,
    /// No definition with that name in the catalog.
    UnknownWorksheet,
    /// Slice operation on a non-slice field.
    NotASlice,
    /// Slice element index outside `[0, len)`.
    OutOfBounds,
    /// Attempt to externally write a computed or reserved field.
    ComputedField,
    /// Expression evaluation failed (bad operand types, division without a
    /// rounding mode, division by zero, arithmetic overflow).
    Eval,
}

impl fmt::Display for WorksheetErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parse => "parse error",
            Self::Plugin => "plugin error",
            Self::TypeMismatch => "type mismatch",
            Self::UnknownField => "unknown field",
            Self::UnknownWorksheet => "unknown worksheet",
            Self::NotASlice => "not a slice",
            Self::OutOfBounds => "out of bounds",
            Self::ComputedField => "computed field",
            Self::Eval => "evaluation error",
        })
    }
}

/// The single error struct the runtime passes around.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorksheetError {
    pub kind: WorksheetErrorKind,
    pub message: Option<String>,
    /// Byte offset into the schema source, for parse-time errors.
    pub position: Option<usize>,
}

impl From<WorksheetErrorKind> for WorksheetError {
    fn from(kind: WorksheetErrorKind) -> Self {
        Self {
            kind,
            message: None,
            position: None,
        }
    }
}

impl WorksheetError {
    /// Basic constructor (no message, no position).
    pub fn new(kind: WorksheetErrorKind) -> Self {
        kind.into()
    }

    /// Attach a human-readable explanation.
    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Attach a source position.
    pub fn with_position(mut self, pos: usize) -> Self {
        self.position = Some(pos);
        self
    }
}

impl fmt::Display for WorksheetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ref msg) = self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(pos) = self.position {
            write!(f, " (at offset {pos})")?;
        }
        Ok(())
    }
}

impl Error for WorksheetError {}

impl From<WorksheetError> for String {
    fn from(error: WorksheetError) -> Self {
        format!("{error}")
    }
}
