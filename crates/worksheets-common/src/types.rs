//! Static field types and assignability.

use std::fmt::{self, Display};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Undefined,
    Text,
    Bool,
    /// Fixed-scale decimal; the scale is part of the type.
    Number(u8),
    Slice(Box<Type>),
    /// Reference to a worksheet type, by definition name.
    Ref(String),
    /// Parsed but semantics-free; nothing except `Undefined` is assignable.
    Date,
    /// Parsed but semantics-free; nothing except `Undefined` is assignable.
    Time,
}

impl Type {
    /// Whether a value of type `other` may be assigned to a slot of `self`.
    ///
    /// `Undefined` goes anywhere; `number[n]` widens into `number[m]` for
    /// `n ≤ m`; worksheet refs match by definition name, with no structural
    /// subtyping.
    pub fn accepts(&self, other: &Type) -> bool {
        if matches!(other, Type::Undefined) {
            return true;
        }
        match (self, other) {
            (Type::Text, Type::Text) => true,
            (Type::Bool, Type::Bool) => true,
            (Type::Number(m), Type::Number(n)) => n <= m,
            (Type::Slice(a), Type::Slice(b)) => a.accepts(b),
            (Type::Ref(a), Type::Ref(b)) => a == b,
            _ => false,
        }
    }

    pub fn is_slice(&self) -> bool {
        matches!(self, Type::Slice(_))
    }

    /// Element type of a slice, if this is one.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Slice(elem) => Some(elem),
            _ => None,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Undefined => write!(f, "undefined"),
            Type::Text => write!(f, "text"),
            Type::Bool => write!(f, "bool"),
            Type::Number(scale) => write!(f, "number[{scale}]"),
            Type::Slice(elem) => write!(f, "[]{elem}"),
            Type::Ref(name) => write!(f, "{name}"),
            Type::Date => write!(f, "date"),
            Type::Time => write!(f, "time"),
        }
    }
}
