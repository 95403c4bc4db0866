pub mod error;
pub mod number;
pub mod types;
pub mod value;

pub use error::{WorksheetError, WorksheetErrorKind};
pub use number::{Number, RoundingMode};
pub use types::Type;
pub use value::{Slice, SliceElement, Value, WsId};

/// Reserved field index of the worksheet id (text, set once at creation).
pub const INDEX_ID: i32 = -2;

/// Reserved field index of the worksheet version (`number[0]`, starts at 1).
pub const INDEX_VERSION: i32 = -1;
