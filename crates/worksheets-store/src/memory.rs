//! In-memory store backend.
//!
//! Transactions read from a snapshot taken at `begin` and buffer their
//! writes as an operation log. Constraints are checked twice: against the
//! transaction's own view as operations are issued, and again at commit
//! against the then-current committed state — so two transactions racing to
//! the same successor version collide at whichever point comes second,
//! exactly like the row lock + uniqueness pair of a relational backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::backend::StoreTx;
use crate::error::StoreError;
use crate::records::{
    EditRec, ParentEdgeRec, SliceElementRec, ValueRec, VERSION_UNBOUNDED, WorksheetRec,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    worksheets: BTreeMap<Uuid, WorksheetRec>,
    edits: Vec<EditRec>,
    values: Vec<ValueRec>,
    parents: Vec<ParentEdgeRec>,
    slice_elements: Vec<SliceElementRec>,
}

#[derive(Debug, Clone)]
enum Op {
    InsertWorksheet(WorksheetRec),
    UpdateWorksheetVersion {
        id: Uuid,
        old_version: i64,
        new_version: i64,
    },
    InsertEdit(EditRec),
    InsertValue(ValueRec),
    CloseValue {
        worksheet_id: Uuid,
        field_index: i32,
        to_version: i64,
    },
    InsertSliceElement(SliceElementRec),
    CloseSliceElement {
        slice_id: Uuid,
        rank: i64,
        to_version: i64,
    },
    InsertParentEdge(ParentEdgeRec),
    DeleteParentEdge(ParentEdgeRec),
}

fn apply(tables: &mut Tables, op: &Op) -> Result<(), StoreError> {
    match op {
        Op::InsertWorksheet(rec) => {
            if tables.worksheets.contains_key(&rec.id) {
                return Err(StoreError::Backend(format!(
                    "duplicate worksheet row {}",
                    rec.id
                )));
            }
            tables.worksheets.insert(rec.id, rec.clone());
            Ok(())
        }
        Op::UpdateWorksheetVersion {
            id,
            old_version,
            new_version,
        } => match tables.worksheets.get_mut(id) {
            Some(row) if row.version == *old_version => {
                row.version = *new_version;
                Ok(())
            }
            _ => Err(StoreError::ConcurrentUpdate),
        },
        Op::InsertEdit(rec) => {
            let collision = tables.edits.iter().any(|e| {
                (e.worksheet_id == rec.worksheet_id && e.to_version == rec.to_version)
                    || (e.edit_id == rec.edit_id && e.worksheet_id == rec.worksheet_id)
            });
            if collision {
                return Err(StoreError::ConcurrentUpdate);
            }
            tables.edits.push(rec.clone());
            Ok(())
        }
        Op::InsertValue(rec) => {
            tables.values.push(rec.clone());
            Ok(())
        }
        Op::CloseValue {
            worksheet_id,
            field_index,
            to_version,
        } => {
            for rec in tables.values.iter_mut() {
                if rec.worksheet_id == *worksheet_id
                    && rec.field_index == *field_index
                    && rec.to_version == VERSION_UNBOUNDED
                {
                    rec.to_version = *to_version;
                }
            }
            Ok(())
        }
        Op::InsertSliceElement(rec) => {
            tables.slice_elements.push(rec.clone());
            Ok(())
        }
        Op::CloseSliceElement {
            slice_id,
            rank,
            to_version,
        } => {
            for rec in tables.slice_elements.iter_mut() {
                if rec.slice_id == *slice_id
                    && rec.rank == *rank
                    && rec.to_version == VERSION_UNBOUNDED
                {
                    rec.to_version = *to_version;
                }
            }
            Ok(())
        }
        Op::InsertParentEdge(rec) => {
            if !tables.parents.contains(rec) {
                tables.parents.push(rec.clone());
            }
            Ok(())
        }
        Op::DeleteParentEdge(rec) => {
            tables.parents.retain(|e| e != rec);
            Ok(())
        }
    }
}

/// Shared in-memory store.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> MemTx {
        MemTx {
            store: self.inner.clone(),
            view: self.inner.lock().clone(),
            ops: Vec::new(),
        }
    }

    /* ───────────── introspection (tooling and tests) ───────────── */

    pub fn worksheet_row(&self, id: Uuid) -> Option<WorksheetRec> {
        self.inner.lock().worksheets.get(&id).cloned()
    }

    /// All value records for one field, oldest interval first.
    pub fn value_records(&self, worksheet_id: Uuid, field_index: i32) -> Vec<ValueRec> {
        let mut records: Vec<ValueRec> = self
            .inner
            .lock()
            .values
            .iter()
            .filter(|r| r.worksheet_id == worksheet_id && r.field_index == field_index)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.from_version);
        records
    }

    pub fn slice_element_records(&self, slice_id: Uuid) -> Vec<SliceElementRec> {
        let mut records: Vec<SliceElementRec> = self
            .inner
            .lock()
            .slice_elements
            .iter()
            .filter(|r| r.slice_id == slice_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.rank, r.from_version));
        records
    }

    pub fn parent_edge_records(&self, child_id: Uuid) -> Vec<ParentEdgeRec> {
        let mut records: Vec<ParentEdgeRec> = self
            .inner
            .lock()
            .parents
            .iter()
            .filter(|r| r.child_id == child_id)
            .cloned()
            .collect();
        records.sort();
        records
    }

    /// Insert raw records directly, bypassing any session. Intended for
    /// fixtures (e.g. legacy value strings).
    pub fn seed(
        &self,
        worksheets: Vec<WorksheetRec>,
        values: Vec<ValueRec>,
        elements: Vec<SliceElementRec>,
        parents: Vec<ParentEdgeRec>,
    ) {
        let mut tables = self.inner.lock();
        for rec in worksheets {
            tables.worksheets.insert(rec.id, rec);
        }
        tables.values.extend(values);
        tables.slice_elements.extend(elements);
        tables.parents.extend(parents);
    }
}

/// One open transaction on a `MemStore`.
pub struct MemTx {
    store: Arc<Mutex<Tables>>,
    view: Tables,
    ops: Vec<Op>,
}

impl MemTx {
    fn push(&mut self, op: Op) -> Result<(), StoreError> {
        apply(&mut self.view, &op)?;
        self.ops.push(op);
        Ok(())
    }

    /// Replay the operation log onto the committed state; all-or-nothing.
    pub fn commit(self) -> Result<(), StoreError> {
        let mut store = self.store.lock();
        let mut staged = store.clone();
        for op in &self.ops {
            apply(&mut staged, op)?;
        }
        *store = staged;
        Ok(())
    }

    /// Drop the transaction without applying anything.
    pub fn rollback(self) {}
}

impl StoreTx for MemTx {
    fn insert_worksheet(&mut self, rec: &WorksheetRec) -> Result<(), StoreError> {
        self.push(Op::InsertWorksheet(rec.clone()))
    }

    fn update_worksheet_version(
        &mut self,
        id: Uuid,
        old_version: i64,
        new_version: i64,
    ) -> Result<bool, StoreError> {
        let current = self.view.worksheets.get(&id).map(|r| r.version);
        if current != Some(old_version) {
            return Ok(false);
        }
        self.push(Op::UpdateWorksheetVersion {
            id,
            old_version,
            new_version,
        })?;
        Ok(true)
    }

    fn get_worksheet(&mut self, id: Uuid) -> Result<Option<WorksheetRec>, StoreError> {
        Ok(self.view.worksheets.get(&id).cloned())
    }

    fn insert_edit(&mut self, rec: &EditRec) -> Result<(), StoreError> {
        self.push(Op::InsertEdit(rec.clone()))
    }

    fn edit_records(&mut self, edit_id: Uuid) -> Result<Vec<EditRec>, StoreError> {
        Ok(self
            .view
            .edits
            .iter()
            .filter(|e| e.edit_id == edit_id)
            .cloned()
            .collect())
    }

    fn insert_value(&mut self, rec: &ValueRec) -> Result<(), StoreError> {
        self.push(Op::InsertValue(rec.clone()))
    }

    fn close_value(
        &mut self,
        worksheet_id: Uuid,
        field_index: i32,
        to_version: i64,
    ) -> Result<(), StoreError> {
        self.push(Op::CloseValue {
            worksheet_id,
            field_index,
            to_version,
        })
    }

    fn values_at(&mut self, worksheet_id: Uuid, version: i64) -> Result<Vec<ValueRec>, StoreError> {
        Ok(self
            .view
            .values
            .iter()
            .filter(|r| {
                r.worksheet_id == worksheet_id
                    && r.from_version <= version
                    && version <= r.to_version
            })
            .cloned()
            .collect())
    }

    fn insert_slice_element(&mut self, rec: &SliceElementRec) -> Result<(), StoreError> {
        self.push(Op::InsertSliceElement(rec.clone()))
    }

    fn close_slice_element(
        &mut self,
        slice_id: Uuid,
        rank: i64,
        to_version: i64,
    ) -> Result<(), StoreError> {
        self.push(Op::CloseSliceElement {
            slice_id,
            rank,
            to_version,
        })
    }

    fn slice_elements_at(
        &mut self,
        slice_ids: &[Uuid],
        version: i64,
    ) -> Result<Vec<SliceElementRec>, StoreError> {
        let mut records: Vec<SliceElementRec> = self
            .view
            .slice_elements
            .iter()
            .filter(|r| {
                slice_ids.contains(&r.slice_id)
                    && r.from_version <= version
                    && version <= r.to_version
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| r.rank);
        Ok(records)
    }

    fn insert_parent_edge(&mut self, rec: &ParentEdgeRec) -> Result<(), StoreError> {
        self.push(Op::InsertParentEdge(rec.clone()))
    }

    fn delete_parent_edge(&mut self, rec: &ParentEdgeRec) -> Result<(), StoreError> {
        self.push(Op::DeleteParentEdge(rec.clone()))
    }

    fn parent_edges_of(&mut self, child_id: Uuid) -> Result<Vec<ParentEdgeRec>, StoreError> {
        Ok(self
            .view
            .parents
            .iter()
            .filter(|r| r.child_id == child_id)
            .cloned()
            .collect())
    }
}
