//! The save/update/load session protocol.
//!
//! A session binds one open transaction to one worksheet graph. Every write
//! call walks the reachable closure of the target (children through field
//! values, parents through back-references) so the persisted graph is always
//! saved together; every worksheet touched by one call shares one edit id.
//!
//! Update performs a tentative in-memory version bump, diffs, and rolls the
//! bump back on a no-op or on any failure — the store transaction itself is
//! the caller's to commit or abandon.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use uuid::Uuid;
use worksheets_common::{INDEX_VERSION, Type, Value, WsId};
use worksheets_eval::WorksheetGraph;

use crate::backend::StoreTx;
use crate::codec::{Decoded, decode, encode};
use crate::error::StoreError;
use crate::records::{
    EditRec, ParentEdgeRec, SliceElementRec, ValueRec, VERSION_UNBOUNDED, WorksheetRec,
};

/// Summary of one edit id: when it happened and which version it produced
/// on each worksheet it touched.
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub created_at: DateTime<Utc>,
    pub versions: BTreeMap<Uuid, i64>,
}

/// One write call's shared state: the edit id, its timestamp, and the
/// worksheets already handled in this call's graph walk.
struct WriteCtx {
    edit_id: Uuid,
    created_at: DateTime<Utc>,
    visited: FxHashSet<Uuid>,
}

impl WriteCtx {
    fn new() -> Self {
        WriteCtx {
            edit_id: Uuid::new_v4(),
            created_at: Utc::now(),
            visited: FxHashSet::default(),
        }
    }
}

pub struct Session<'a, T: StoreTx> {
    tx: &'a mut T,
    graph: &'a mut WorksheetGraph,
}

impl<'a, T: StoreTx> Session<'a, T> {
    pub fn new(tx: &'a mut T, graph: &'a mut WorksheetGraph) -> Self {
        Session { tx, graph }
    }

    /* ─────────────────────────── writes ─────────────────────────── */

    /// Persist a worksheet that has never been saved, together with its
    /// reachable closure. Returns the edit id.
    pub fn save(&mut self, ws: WsId) -> Result<Uuid, StoreError> {
        if self.graph.is_persisted(ws) {
            return Err(StoreError::AlreadyPersisted(self.graph.uuid(ws)));
        }
        let mut ctx = WriteCtx::new();
        self.save_inner(ws, &mut ctx)?;
        Ok(ctx.edit_id)
    }

    /// Persist the changes of an already saved worksheet (and its closure).
    pub fn update(&mut self, ws: WsId) -> Result<Uuid, StoreError> {
        if !self.graph.is_persisted(ws) {
            return Err(StoreError::NotFound(self.graph.uuid(ws)));
        }
        let mut ctx = WriteCtx::new();
        self.update_inner(ws, &mut ctx)?;
        Ok(ctx.edit_id)
    }

    /// Save or update depending on whether the worksheet was ever persisted.
    pub fn save_or_update(&mut self, ws: WsId) -> Result<Uuid, StoreError> {
        let mut ctx = WriteCtx::new();
        self.save_or_update_inner(ws, &mut ctx)?;
        Ok(ctx.edit_id)
    }

    fn save_or_update_inner(&mut self, ws: WsId, ctx: &mut WriteCtx) -> Result<(), StoreError> {
        if self.graph.is_persisted(ws) {
            self.update_inner(ws, ctx)
        } else {
            self.save_inner(ws, ctx)
        }
    }

    fn cascade(&mut self, ws: WsId, ctx: &mut WriteCtx) -> Result<(), StoreError> {
        for child in self.graph.child_refs(ws) {
            self.save_or_update_inner(child, ctx)?;
        }
        for (parent, _) in self.graph.parent_edges(ws) {
            self.save_or_update_inner(parent, ctx)?;
        }
        Ok(())
    }

    fn save_inner(&mut self, ws: WsId, ctx: &mut WriteCtx) -> Result<(), StoreError> {
        let uuid = self.graph.uuid(ws);
        if !ctx.visited.insert(uuid) {
            return Ok(());
        }
        self.cascade(ws, ctx)?;

        let version = self.graph.version(ws);
        #[cfg(feature = "tracing")]
        tracing::debug!(worksheet = %uuid, version, "saving");
        self.tx.insert_worksheet(&WorksheetRec {
            id: uuid,
            version,
            name: self.graph.def(ws).name().to_string(),
        })?;
        self.tx.insert_edit(&EditRec {
            edit_id: ctx.edit_id,
            created_at: ctx.created_at,
            worksheet_id: uuid,
            to_version: version,
        })?;

        let fields: Vec<(i32, Value)> = self
            .graph
            .data(ws)
            .iter()
            .filter(|&(&index, _)| index >= 0)
            .map(|(&index, value)| (index, value.clone()))
            .collect();
        for (index, value) in fields {
            self.tx.insert_value(&ValueRec {
                worksheet_id: uuid,
                field_index: index,
                from_version: version,
                to_version: VERSION_UNBOUNDED,
                value: encode(self.graph, &value),
            })?;
            if let Value::Slice(slice) = &value {
                for element in &slice.elements {
                    self.tx.insert_slice_element(&SliceElementRec {
                        slice_id: slice.id,
                        rank: element.rank,
                        from_version: version,
                        to_version: VERSION_UNBOUNDED,
                        value: encode(self.graph, &element.value),
                    })?;
                }
            }
            for child in child_uuids(self.graph, &value) {
                self.tx.insert_parent_edge(&ParentEdgeRec {
                    child_id: child,
                    parent_id: uuid,
                    parent_field_index: index,
                })?;
            }
        }

        self.graph.commit_orig(ws);
        Ok(())
    }

    fn update_inner(&mut self, ws: WsId, ctx: &mut WriteCtx) -> Result<(), StoreError> {
        let uuid = self.graph.uuid(ws);
        if !ctx.visited.insert(uuid) {
            return Ok(());
        }
        self.cascade(ws, ctx)?;

        let old_version = self.graph.version(ws);
        let new_version = self.graph.bump_version(ws)?;
        match self.write_update(ws, ctx, old_version, new_version) {
            Ok(true) => {
                self.graph.commit_orig(ws);
                Ok(())
            }
            Ok(false) => {
                // nothing but the version would change; undo the bump
                self.graph.rollback_version(ws, old_version)?;
                Ok(())
            }
            Err(e) => {
                let _ = self.graph.rollback_version(ws, old_version);
                Err(e)
            }
        }
    }

    /// Write the records of one update. Returns `Ok(false)` for a no-op.
    fn write_update(
        &mut self,
        ws: WsId,
        ctx: &mut WriteCtx,
        old_version: i64,
        new_version: i64,
    ) -> Result<bool, StoreError> {
        let uuid = self.graph.uuid(ws);
        let diff = self.graph.diff(ws);
        if diff.keys().all(|&index| index == INDEX_VERSION) {
            return Ok(false);
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(worksheet = %uuid, old_version, new_version, changed = diff.len(), "updating");

        self.tx.insert_edit(&EditRec {
            edit_id: ctx.edit_id,
            created_at: ctx.created_at,
            worksheet_id: uuid,
            to_version: new_version,
        })?;

        for (index, field_diff) in &diff {
            if *index < 0 {
                continue;
            }
            match (&field_diff.before, &field_diff.after) {
                // same slice identity: element-level records
                (Value::Slice(before), Value::Slice(after)) if before.id == after.id => {
                    let changes = self.graph.slice_changes(before, after);
                    for rank in &changes.deleted {
                        self.tx.close_slice_element(after.id, *rank, old_version)?;
                    }
                    for element in &changes.changed {
                        self.tx
                            .close_slice_element(after.id, element.rank, old_version)?;
                        self.tx.insert_slice_element(&SliceElementRec {
                            slice_id: after.id,
                            rank: element.rank,
                            from_version: new_version,
                            to_version: VERSION_UNBOUNDED,
                            value: encode(self.graph, &element.value),
                        })?;
                    }
                    for element in &changes.added {
                        self.tx.insert_slice_element(&SliceElementRec {
                            slice_id: after.id,
                            rank: element.rank,
                            from_version: new_version,
                            to_version: VERSION_UNBOUNDED,
                            value: encode(self.graph, &element.value),
                        })?;
                    }
                    // the ref record itself only moves when last_rank does
                    if before.last_rank != after.last_rank {
                        self.tx.close_value(uuid, *index, old_version)?;
                        self.tx.insert_value(&ValueRec {
                            worksheet_id: uuid,
                            field_index: *index,
                            from_version: new_version,
                            to_version: VERSION_UNBOUNDED,
                            value: encode(self.graph, &field_diff.after),
                        })?;
                    }
                }
                _ => {
                    self.tx.close_value(uuid, *index, old_version)?;
                    self.tx.insert_value(&ValueRec {
                        worksheet_id: uuid,
                        field_index: *index,
                        from_version: new_version,
                        to_version: VERSION_UNBOUNDED,
                        value: encode(self.graph, &field_diff.after),
                    })?;
                    // a replacement slice brings all its elements with it
                    if let Value::Slice(after) = &field_diff.after {
                        for element in &after.elements {
                            self.tx.insert_slice_element(&SliceElementRec {
                                slice_id: after.id,
                                rank: element.rank,
                                from_version: new_version,
                                to_version: VERSION_UNBOUNDED,
                                value: encode(self.graph, &element.value),
                            })?;
                        }
                    }
                }
            }

            // adopted and orphaned children
            let before_children = child_uuids(self.graph, &field_diff.before);
            let after_children = child_uuids(self.graph, &field_diff.after);
            for orphaned in before_children.difference(&after_children) {
                self.tx.delete_parent_edge(&ParentEdgeRec {
                    child_id: *orphaned,
                    parent_id: uuid,
                    parent_field_index: *index,
                })?;
            }
            for adopted in after_children.difference(&before_children) {
                self.tx.insert_parent_edge(&ParentEdgeRec {
                    child_id: *adopted,
                    parent_id: uuid,
                    parent_field_index: *index,
                })?;
            }
        }

        if !self
            .tx
            .update_worksheet_version(uuid, old_version, new_version)?
        {
            return Err(StoreError::ConcurrentUpdate);
        }
        Ok(true)
    }

    /* ─────────────────────────── reads ─────────────────────────── */

    /// Rehydrate a worksheet (and its reachable closure) at head. A
    /// worksheet already present in the graph is returned as-is, which is
    /// also what breaks load-time reference cycles: the instance registers
    /// before its fields hydrate.
    pub fn load(&mut self, id: Uuid) -> Result<WsId, StoreError> {
        if let Some(ws) = self.graph.lookup(id) {
            return Ok(ws);
        }
        let Some(row) = self.tx.get_worksheet(id)? else {
            return Err(StoreError::NotFound(id));
        };
        #[cfg(feature = "tracing")]
        tracing::debug!(worksheet = %id, version = row.version, "loading");
        let ws = self.graph.insert_loaded(&row.name, id, row.version)?;
        let def = self.graph.def(ws).clone();

        // scalars and refs first; slice hydration is deferred so the
        // element rows can be fetched for all slices at once
        let mut slices: Vec<(i32, Type, Uuid, i64)> = Vec::new();
        for rec in self.tx.values_at(id, row.version)? {
            let Some(field) = def.field_by_index(rec.field_index) else {
                // deprecated index: ignore the record
                continue;
            };
            if field.index < 0 {
                continue;
            }
            match decode(&field.ty, rec.value.as_deref())? {
                Decoded::Scalar(value) => {
                    self.graph.set_loaded(ws, field.index, value.clone(), value);
                }
                Decoded::WsRef { id: child_id, version } => {
                    let child = self.load(child_id)?;
                    self.graph.set_loaded(
                        ws,
                        field.index,
                        Value::Worksheet(child),
                        Value::WsRefAtVersion { ws: child, version },
                    );
                }
                Decoded::SliceRef { id: slice_id, last_rank } => {
                    let Some(element_ty) = field.ty.element() else {
                        return Err(StoreError::CorruptRecord(format!(
                            "slice record on non-slice field {}.{}",
                            def.name(),
                            field.name
                        )));
                    };
                    slices.push((field.index, element_ty.clone(), slice_id, last_rank));
                }
            }
        }

        let slice_ids: Vec<Uuid> = slices.iter().map(|(_, _, id, _)| *id).collect();
        let mut elements_by_slice: BTreeMap<Uuid, Vec<SliceElementRec>> = BTreeMap::new();
        for rec in self.tx.slice_elements_at(&slice_ids, row.version)? {
            elements_by_slice.entry(rec.slice_id).or_default().push(rec);
        }
        for (index, element_ty, slice_id, last_rank) in slices {
            let rows = elements_by_slice.remove(&slice_id).unwrap_or_default();
            let (data, orig) =
                self.hydrate_slice(&element_ty, slice_id, last_rank, rows, row.version)?;
            self.graph.set_loaded(ws, index, data, orig);
        }

        // reattach who points at us
        for edge in self.tx.parent_edges_of(id)? {
            let parent = self.load(edge.parent_id)?;
            self.graph
                .install_parent(ws, parent, edge.parent_field_index);
        }
        Ok(ws)
    }

    fn hydrate_slice(
        &mut self,
        element_ty: &Type,
        slice_id: Uuid,
        last_rank: i64,
        rows: Vec<SliceElementRec>,
        version: i64,
    ) -> Result<(Value, Value), StoreError> {
        let mut data = Vec::with_capacity(rows.len());
        let mut orig = Vec::with_capacity(rows.len());
        for rec in rows {
            let (data_value, orig_value) = match decode(element_ty, rec.value.as_deref())? {
                Decoded::Scalar(value) => (value.clone(), value),
                Decoded::WsRef { id: child_id, version: child_version } => {
                    let child = self.load(child_id)?;
                    (
                        Value::Worksheet(child),
                        Value::WsRefAtVersion {
                            ws: child,
                            version: child_version,
                        },
                    )
                }
                Decoded::SliceRef { id: nested_id, last_rank: nested_last_rank } => {
                    let Some(nested_ty) = element_ty.element() else {
                        return Err(StoreError::CorruptRecord(
                            "nested slice record under non-slice element".to_string(),
                        ));
                    };
                    let rows = self.tx.slice_elements_at(&[nested_id], version)?;
                    self.hydrate_slice(nested_ty, nested_id, nested_last_rank, rows, version)?
                }
            };
            data.push(worksheets_common::SliceElement {
                rank: rec.rank,
                value: data_value,
            });
            orig.push(worksheets_common::SliceElement {
                rank: rec.rank,
                value: orig_value,
            });
        }
        Ok((
            Value::Slice(worksheets_common::Slice::from_parts(slice_id, last_rank, data)),
            Value::Slice(worksheets_common::Slice::from_parts(slice_id, last_rank, orig)),
        ))
    }

    /// When an edit happened and which version it produced per worksheet.
    pub fn edit(&mut self, edit_id: Uuid) -> Result<Edit, StoreError> {
        let records = self.tx.edit_records(edit_id)?;
        let Some(first) = records.first() else {
            return Err(StoreError::EditNotFound(edit_id));
        };
        Ok(Edit {
            created_at: first.created_at,
            versions: records
                .iter()
                .map(|r| (r.worksheet_id, r.to_version))
                .collect(),
        })
    }
}

/// Distinct ids of worksheets referenced by a value (live or persisted
/// refs, through any slice nesting).
fn child_uuids(graph: &WorksheetGraph, value: &Value) -> BTreeSet<Uuid> {
    fn collect(graph: &WorksheetGraph, value: &Value, out: &mut BTreeSet<Uuid>) {
        match value {
            Value::Worksheet(ws) | Value::WsRefAtVersion { ws, .. } => {
                out.insert(graph.uuid(*ws));
            }
            Value::Slice(slice) => {
                for element in &slice.elements {
                    collect(graph, &element.value, out);
                }
            }
            _ => {}
        }
    }
    let mut out = BTreeSet::new();
    collect(graph, value, &mut out);
    out
}
