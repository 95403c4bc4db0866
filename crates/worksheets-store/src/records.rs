//! The five persisted record kinds.
//!
//! Value-carrying records span a closed version interval
//! `[from_version, to_version]`; `VERSION_UNBOUNDED` as the upper bound means
//! "still current". A point-in-time read selects records whose interval
//! contains the target version, so the post-commit store is always a
//! consistent snapshot.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Upper bound standing in for +∞.
pub const VERSION_UNBOUNDED: i64 = i64::MAX;

/// One row per worksheet: its current head version.
#[derive(Debug, Clone, PartialEq)]
pub struct WorksheetRec {
    pub id: Uuid,
    pub version: i64,
    pub name: String,
}

/// One row per (edit, worksheet): which version the edit produced. A single
/// save/update call shares one edit id across every worksheet it touched.
#[derive(Debug, Clone, PartialEq)]
pub struct EditRec {
    pub edit_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub worksheet_id: Uuid,
    pub to_version: i64,
}

/// One field value over a version interval. `value` is `None` for
/// `Undefined`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRec {
    pub worksheet_id: Uuid,
    pub field_index: i32,
    pub from_version: i64,
    pub to_version: i64,
    pub value: Option<String>,
}

/// Inverse of a ref: the child records who points at it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParentEdgeRec {
    pub child_id: Uuid,
    pub parent_id: Uuid,
    pub parent_field_index: i32,
}

/// One slice element over a version interval.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceElementRec {
    pub slice_id: Uuid,
    pub rank: i64,
    pub from_version: i64,
    pub to_version: i64,
    pub value: Option<String>,
}
