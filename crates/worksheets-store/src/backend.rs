//! The persistence seam.
//!
//! A `StoreTx` is one open transaction over the five record kinds. The
//! session drives it; nothing it writes is visible to other transactions
//! until the backend's own commit, and the whole transaction is
//! all-or-nothing — a cascaded save that fails mid-way must leave no
//! partial rows behind.

use uuid::Uuid;

use crate::error::StoreError;
use crate::records::{EditRec, ParentEdgeRec, SliceElementRec, ValueRec, WorksheetRec};

pub trait StoreTx {
    fn insert_worksheet(&mut self, rec: &WorksheetRec) -> Result<(), StoreError>;

    /// Conditional head-version update: `SET version = new WHERE id = ? AND
    /// version = old`. Returns `false` when no row matched, which the
    /// session surfaces as `ConcurrentUpdate`.
    fn update_worksheet_version(
        &mut self,
        id: Uuid,
        old_version: i64,
        new_version: i64,
    ) -> Result<bool, StoreError>;

    fn get_worksheet(&mut self, id: Uuid) -> Result<Option<WorksheetRec>, StoreError>;

    /// Fails with `ConcurrentUpdate` when `(worksheet_id, to_version)` is
    /// already taken.
    fn insert_edit(&mut self, rec: &EditRec) -> Result<(), StoreError>;

    fn edit_records(&mut self, edit_id: Uuid) -> Result<Vec<EditRec>, StoreError>;

    fn insert_value(&mut self, rec: &ValueRec) -> Result<(), StoreError>;

    /// Close the open record for `(worksheet, field)` at `to_version`.
    /// A field persisted as undefined has no open record; that is not an
    /// error.
    fn close_value(
        &mut self,
        worksheet_id: Uuid,
        field_index: i32,
        to_version: i64,
    ) -> Result<(), StoreError>;

    /// Value records whose interval contains `version`.
    fn values_at(&mut self, worksheet_id: Uuid, version: i64) -> Result<Vec<ValueRec>, StoreError>;

    fn insert_slice_element(&mut self, rec: &SliceElementRec) -> Result<(), StoreError>;

    fn close_slice_element(
        &mut self,
        slice_id: Uuid,
        rank: i64,
        to_version: i64,
    ) -> Result<(), StoreError>;

    /// Element records for any of `slice_ids` whose interval contains
    /// `version`, ordered by rank.
    fn slice_elements_at(
        &mut self,
        slice_ids: &[Uuid],
        version: i64,
    ) -> Result<Vec<SliceElementRec>, StoreError>;

    fn insert_parent_edge(&mut self, rec: &ParentEdgeRec) -> Result<(), StoreError>;

    fn delete_parent_edge(&mut self, rec: &ParentEdgeRec) -> Result<(), StoreError>;

    fn parent_edges_of(&mut self, child_id: Uuid) -> Result<Vec<ParentEdgeRec>, StoreError>;
}
