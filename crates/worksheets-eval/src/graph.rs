//! The live worksheet graph.
//!
//! Worksheets live in an arena and are addressed by `WsId`; reference-typed
//! values hold arena ids, never owning pointers, so parent↔child cycles and
//! self-references cost nothing. All mutation goes through the graph, which
//! keeps the inverse `parents` map in sync and drives recomputation of
//! dependent computed fields after every write.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use uuid::Uuid;
use worksheets_common::{
    INDEX_ID, INDEX_VERSION, Number, Slice, Type, Value, WorksheetError, WorksheetErrorKind, WsId,
};

use crate::definitions::{ComputedBy, Definition, Definitions};
use crate::diff::FieldDiff;
use crate::eval::Evaluator;

/// `parent definition name → parent field index → parent worksheet id →
/// parent handle`; grouped so removing one edge is O(1).
type Parents = BTreeMap<String, BTreeMap<i32, BTreeMap<Uuid, WsId>>>;

struct WsState {
    def: Arc<Definition>,
    uuid: Uuid,
    /// Current field values. Absent means `Undefined`.
    data: BTreeMap<i32, Value>,
    /// Values as last persisted; empty until the first save. Worksheet refs
    /// are stored as `WsRefAtVersion`.
    orig: BTreeMap<i32, Value>,
    parents: Parents,
}

struct UndoEntry {
    ws: WsId,
    index: i32,
    previous: Option<Value>,
}

pub struct WorksheetGraph {
    defs: Arc<Definitions>,
    slots: Vec<WsState>,
    by_uuid: BTreeMap<Uuid, WsId>,
}

impl WorksheetGraph {
    pub fn new(defs: Arc<Definitions>) -> Self {
        WorksheetGraph {
            defs,
            slots: Vec::new(),
            by_uuid: BTreeMap::new(),
        }
    }

    pub fn definitions(&self) -> &Arc<Definitions> {
        &self.defs
    }

    fn state(&self, ws: WsId) -> &WsState {
        &self.slots[ws.raw() as usize]
    }

    fn state_mut(&mut self, ws: WsId) -> &mut WsState {
        &mut self.slots[ws.raw() as usize]
    }

    fn alloc(&mut self, def: Arc<Definition>, uuid: Uuid, version: i64) -> WsId {
        let ws = WsId::new(self.slots.len() as u32);
        let mut data = BTreeMap::new();
        data.insert(INDEX_ID, Value::Text(uuid.to_string()));
        data.insert(INDEX_VERSION, Value::Number(Number::from_int(version)));
        self.slots.push(WsState {
            def,
            uuid,
            data,
            orig: BTreeMap::new(),
            parents: BTreeMap::new(),
        });
        self.by_uuid.insert(uuid, ws);
        ws
    }

    /// Create a fresh instance of `type_name`: new uuid, version 1, computed
    /// fields settled once over undefined inputs.
    pub fn new_worksheet(&mut self, type_name: &str) -> Result<WsId, WorksheetError> {
        let def = self
            .defs
            .get(type_name)
            .cloned()
            .ok_or_else(|| unknown_worksheet(type_name))?;
        let uuid = Uuid::new_v4();
        let ws = self.alloc(def.clone(), uuid, 1);

        let computed: Vec<i32> = def
            .fields()
            .filter(|f| f.is_computed())
            .map(|f| f.index)
            .collect();
        let mut visited = FxHashSet::default();
        let mut undo = Vec::new();
        for index in computed {
            if visited.contains(&(ws, index)) {
                continue;
            }
            let settled = (|| {
                let value = self.eval_computed(ws, &def, index)?;
                if !value.is_undefined() {
                    visited.insert((ws, index));
                    self.write_data(ws, index, Some(value));
                    self.propagate(ws, index, &mut visited, &mut undo)?;
                }
                Ok(())
            })();
            if let Err(e) = settled {
                // discard the half-built instance
                self.by_uuid.remove(&uuid);
                self.slots.pop();
                return Err(e);
            }
        }
        Ok(ws)
    }

    /* ─────────────────────────── accessors ─────────────────────────── */

    pub fn lookup(&self, uuid: Uuid) -> Option<WsId> {
        self.by_uuid.get(&uuid).copied()
    }

    pub fn uuid(&self, ws: WsId) -> Uuid {
        self.state(ws).uuid
    }

    pub fn version(&self, ws: WsId) -> i64 {
        match self.state(ws).data.get(&INDEX_VERSION) {
            Some(Value::Number(n)) => n.mantissa,
            _ => 1,
        }
    }

    pub fn def(&self, ws: WsId) -> &Arc<Definition> {
        &self.state(ws).def
    }

    /// Set fields, by index.
    pub fn data(&self, ws: WsId) -> &BTreeMap<i32, Value> {
        &self.state(ws).data
    }

    /// Fields as last persisted, by index.
    pub fn orig(&self, ws: WsId) -> &BTreeMap<i32, Value> {
        &self.state(ws).orig
    }

    /// Whether this instance has ever been persisted.
    pub fn is_persisted(&self, ws: WsId) -> bool {
        !self.state(ws).orig.is_empty()
    }

    /// All `(parent, parent field index)` edges pointing at `ws`.
    pub fn parent_edges(&self, ws: WsId) -> Vec<(WsId, i32)> {
        let mut edges = Vec::new();
        for by_index in self.state(ws).parents.values() {
            for (&index, by_id) in by_index {
                for &parent in by_id.values() {
                    edges.push((parent, index));
                }
            }
        }
        edges
    }

    /// Worksheets reachable through `ws`'s own field values, deduplicated.
    pub fn child_refs(&self, ws: WsId) -> Vec<WsId> {
        let mut out = Vec::new();
        for value in self.state(ws).data.values() {
            for child in refs_in(value) {
                if !out.contains(&child) {
                    out.push(child);
                }
            }
        }
        out
    }

    pub fn get(&self, ws: WsId, field: &str) -> Result<Value, WorksheetError> {
        let state = self.state(ws);
        let field = state
            .def
            .field_by_name(field)
            .ok_or_else(|| unknown_field(&state.def, field))?;
        Ok(state
            .data
            .get(&field.index)
            .cloned()
            .unwrap_or(Value::Undefined))
    }

    pub fn is_set(&self, ws: WsId, field: &str) -> Result<bool, WorksheetError> {
        Ok(!self.get(ws, field)?.is_undefined())
    }

    /* ─────────────────────────── mutation ─────────────────────────── */

    pub fn set(&mut self, ws: WsId, field: &str, value: Value) -> Result<(), WorksheetError> {
        let (index, ty) = self.input_field(ws, field)?;
        let converted = self.convert_assign(&ty, value)?;
        self.mutate(ws, index, Some(converted))
    }

    pub fn unset(&mut self, ws: WsId, field: &str) -> Result<(), WorksheetError> {
        let (index, _) = self.input_field(ws, field)?;
        self.mutate(ws, index, None)
    }

    /// Append to a slice field, creating the slice on first use.
    pub fn append(&mut self, ws: WsId, field: &str, value: Value) -> Result<(), WorksheetError> {
        let (index, ty) = self.input_field(ws, field)?;
        let Some(element_ty) = ty.element().cloned() else {
            return Err(WorksheetError::new(WorksheetErrorKind::NotASlice)
                .with_message(format!("{field} is {ty}, not a slice")));
        };
        let element = self.convert_assign(&element_ty, value)?;
        let mut slice = match self.state(ws).data.get(&index) {
            Some(Value::Slice(s)) => s.clone(),
            _ => Slice::new(),
        };
        slice.push(element);
        self.mutate(ws, index, Some(Value::Slice(slice)))
    }

    /// Delete the element at position `at` (not rank).
    pub fn del(&mut self, ws: WsId, field: &str, at: usize) -> Result<(), WorksheetError> {
        let (index, ty) = self.input_field(ws, field)?;
        if !ty.is_slice() {
            return Err(WorksheetError::new(WorksheetErrorKind::NotASlice)
                .with_message(format!("{field} is {ty}, not a slice")));
        }
        let mut slice = match self.state(ws).data.get(&index) {
            Some(Value::Slice(s)) => s.clone(),
            _ => Slice::new(),
        };
        if slice.remove_at(at).is_none() {
            return Err(WorksheetError::new(WorksheetErrorKind::OutOfBounds).with_message(
                format!("index {at} out of bounds for {field} of length {}", slice.len()),
            ));
        }
        self.mutate(ws, index, Some(Value::Slice(slice)))
    }

    /// Resolve an externally writable field.
    fn input_field(&self, ws: WsId, field: &str) -> Result<(i32, Type), WorksheetError> {
        let def = &self.state(ws).def;
        let field_def = def
            .field_by_name(field)
            .ok_or_else(|| unknown_field(def, field))?;
        if field_def.is_reserved() || field_def.is_computed() {
            return Err(WorksheetError::new(WorksheetErrorKind::ComputedField)
                .with_message(format!("{}.{} cannot be set externally", def.name(), field)));
        }
        Ok((field_def.index, field_def.ty.clone()))
    }

    /// Check assignability and normalize the value to the field type
    /// (numbers widen to the declared scale, slice elements recursively).
    fn convert_assign(&self, ty: &Type, value: Value) -> Result<Value, WorksheetError> {
        let mismatch = |value: &Value| {
            WorksheetError::new(WorksheetErrorKind::TypeMismatch)
                .with_message(format!("cannot assign {} to {ty}", value.kind_name()))
        };
        match (ty, value) {
            (_, Value::Undefined) => Ok(Value::Undefined),
            (Type::Text, v @ Value::Text(_)) => Ok(v),
            (Type::Bool, v @ Value::Bool(_)) => Ok(v),
            (Type::Number(scale), Value::Number(n)) => Ok(Value::Number(n.rescale(*scale)?)),
            (Type::Ref(name), Value::Worksheet(child)) => {
                if self.state(child).def.name() == name {
                    Ok(Value::Worksheet(child))
                } else {
                    Err(mismatch(&Value::Worksheet(child)))
                }
            }
            (Type::Slice(element_ty), Value::Slice(slice)) => {
                let mut elements = Vec::with_capacity(slice.elements.len());
                for element in slice.elements {
                    elements.push(worksheets_common::SliceElement {
                        rank: element.rank,
                        value: self.convert_assign(element_ty, element.value)?,
                    });
                }
                Ok(Value::Slice(Slice::from_parts(
                    slice.id,
                    slice.last_rank,
                    elements,
                )))
            }
            (_, v) => Err(mismatch(&v)),
        }
    }

    /// Apply one field write plus its recompute cascade; roll everything
    /// back if any recomputation fails.
    fn mutate(&mut self, ws: WsId, index: i32, value: Option<Value>) -> Result<(), WorksheetError> {
        let value = match value {
            Some(Value::Undefined) => None,
            v => v,
        };
        let mut undo = vec![self.write_data(ws, index, value)];
        let mut visited = FxHashSet::default();
        visited.insert((ws, index));
        match self.propagate(ws, index, &mut visited, &mut undo) {
            Ok(()) => Ok(()),
            Err(e) => {
                for entry in undo.into_iter().rev() {
                    self.write_data(entry.ws, entry.index, entry.previous);
                }
                Err(e)
            }
        }
    }

    /// Write `data[index]` and keep the inverse parents maps of every
    /// referenced child in sync. Returns the undo entry for the write.
    fn write_data(&mut self, ws: WsId, index: i32, value: Option<Value>) -> UndoEntry {
        let previous = self.state(ws).data.get(&index).cloned();
        if let Some(prev) = &previous {
            for child in refs_in(prev) {
                self.detach_parent(child, ws, index);
            }
        }
        if let Some(next) = &value {
            for child in refs_in(next) {
                self.attach_parent(child, ws, index);
            }
        }
        let state = self.state_mut(ws);
        match value {
            Some(v) => {
                state.data.insert(index, v);
            }
            None => {
                state.data.remove(&index);
            }
        }
        UndoEntry {
            ws,
            index,
            previous,
        }
    }

    fn attach_parent(&mut self, child: WsId, parent: WsId, parent_index: i32) {
        let parent_state = self.state(parent);
        let def_name = parent_state.def.name().to_string();
        let parent_uuid = parent_state.uuid;
        self.state_mut(child)
            .parents
            .entry(def_name)
            .or_default()
            .entry(parent_index)
            .or_default()
            .insert(parent_uuid, parent);
    }

    fn detach_parent(&mut self, child: WsId, parent: WsId, parent_index: i32) {
        let parent_state = self.state(parent);
        let def_name = parent_state.def.name().to_string();
        let parent_uuid = parent_state.uuid;
        let parents = &mut self.state_mut(child).parents;
        if let Some(by_index) = parents.get_mut(&def_name) {
            if let Some(by_id) = by_index.get_mut(&parent_index) {
                by_id.remove(&parent_uuid);
                if by_id.is_empty() {
                    by_index.remove(&parent_index);
                }
            }
            if by_index.is_empty() {
                parents.remove(&def_name);
            }
        }
    }

    /* ──────────────────────── recomputation ─────────────────────── */

    /// `(ws, index)` just changed: re-evaluate its dependents, cascade
    /// through further computed fields, and propagate across parent edges.
    /// A recomputation that leaves a field's value unchanged stops the
    /// cascade through that field (the identity rule), and each
    /// `(worksheet, field)` pair is treated as changed at most once per
    /// edit.
    fn propagate(
        &mut self,
        ws: WsId,
        index: i32,
        visited: &mut FxHashSet<(WsId, i32)>,
        undo: &mut Vec<UndoEntry>,
    ) -> Result<(), WorksheetError> {
        let def = self.state(ws).def.clone();
        for &computed in def.dependents_of(index) {
            if visited.contains(&(ws, computed)) {
                continue;
            }
            let value = self.eval_computed(ws, &def, computed)?;
            let current = self
                .state(ws)
                .data
                .get(&computed)
                .cloned()
                .unwrap_or(Value::Undefined);
            if value == current {
                continue;
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(
                worksheet = %self.state(ws).uuid,
                field = computed,
                "recomputed value changed"
            );
            visited.insert((ws, computed));
            let stored = if value.is_undefined() { None } else { Some(value) };
            undo.push(self.write_data(ws, computed, stored));
            self.propagate(ws, computed, visited, undo)?;
        }

        for (parent, parent_index) in self.parent_edges(ws) {
            if visited.contains(&(parent, parent_index)) {
                continue;
            }
            if !self.state(parent).def.is_watched(parent_index) {
                continue;
            }
            visited.insert((parent, parent_index));
            self.propagate(parent, parent_index, visited, undo)?;
        }
        Ok(())
    }

    fn eval_computed(
        &self,
        ws: WsId,
        def: &Definition,
        index: i32,
    ) -> Result<Value, WorksheetError> {
        let field = def.field_by_index(index).expect("dependency table index");
        let raw = match &field.computed_by {
            Some(ComputedBy::Expr(expr)) => Evaluator::new(self, ws).eval(expr, None)?,
            Some(ComputedBy::External(plugin)) => {
                let paths = def.paths_of(index);
                let mut args = Vec::with_capacity(paths.len());
                for path in paths {
                    args.push(Evaluator::new(self, ws).eval_path(&path.segments)?);
                }
                plugin.compute(&args)
            }
            None => return Ok(Value::Undefined),
        };
        self.convert_assign(&field.ty, raw)
    }

    /* ─────────────────────────── diffing ─────────────────────────── */

    /// Every field whose current value differs from its persisted value.
    pub fn diff(&self, ws: WsId) -> BTreeMap<i32, FieldDiff> {
        let state = self.state(ws);
        let mut indices: Vec<i32> = state.orig.keys().chain(state.data.keys()).copied().collect();
        indices.sort_unstable();
        indices.dedup();

        let mut out = BTreeMap::new();
        for index in indices {
            let before = state.orig.get(&index).cloned().unwrap_or(Value::Undefined);
            let after = state.data.get(&index).cloned().unwrap_or(Value::Undefined);
            if self.value_changed(&before, &after) {
                out.insert(index, FieldDiff { before, after });
            }
        }
        out
    }

    fn value_changed(&self, before: &Value, after: &Value) -> bool {
        match (before, after) {
            // Refs compare as (child id, child version) pairs; an unknown
            // persisted version (−1) always reads as changed, which forces
            // the next write to upgrade the stored record.
            (Value::WsRefAtVersion { ws, version }, Value::Worksheet(current)) => {
                ws != current || *version != self.version(*current)
            }
            (Value::Slice(before), Value::Slice(after)) => {
                before.id != after.id
                    || before.last_rank != after.last_rank
                    || !self.slice_changes(before, after).is_empty()
            }
            (before, after) => before != after,
        }
    }

    /// Element-level slice diff with ref-aware comparison: an element that
    /// still points at the same child is unchanged even if the child's
    /// version moved on (element records are not rewritten on child bumps).
    pub fn slice_changes(&self, before: &Slice, after: &Slice) -> crate::diff::SliceDiff {
        crate::diff::slice_diff_with(before, after, &|b, a| self.element_changed(b, a))
    }

    fn element_changed(&self, before: &Value, after: &Value) -> bool {
        match (before, after) {
            (Value::WsRefAtVersion { ws, .. }, Value::Worksheet(current)) => ws != current,
            (Value::Slice(b), Value::Slice(a)) => {
                b.id != a.id || b.last_rank != a.last_rank || !self.slice_changes(b, a).is_empty()
            }
            (b, a) => b != a,
        }
    }

    /* ──────────────────── persistence support ──────────────────── */

    /// Tentatively advance the version during an update; dependents of the
    /// version field recompute like any other edit.
    pub fn bump_version(&mut self, ws: WsId) -> Result<i64, WorksheetError> {
        let next = self.version(ws) + 1;
        self.mutate(ws, INDEX_VERSION, Some(Value::Number(Number::from_int(next))))?;
        Ok(next)
    }

    /// Undo a tentative version bump (failed or no-op update).
    pub fn rollback_version(&mut self, ws: WsId, version: i64) -> Result<(), WorksheetError> {
        self.mutate(ws, INDEX_VERSION, Some(Value::Number(Number::from_int(version))))
    }

    /// After a successful save/update: `orig` mirrors `data`, with live refs
    /// captured as `WsRefAtVersion` at the referenced worksheet's current
    /// version.
    pub fn commit_orig(&mut self, ws: WsId) {
        let snapshot: BTreeMap<i32, Value> = self
            .state(ws)
            .data
            .iter()
            .map(|(&index, value)| (index, self.to_orig(value)))
            .collect();
        self.state_mut(ws).orig = snapshot;
    }

    fn to_orig(&self, value: &Value) -> Value {
        match value {
            Value::Worksheet(child) => Value::WsRefAtVersion {
                ws: *child,
                version: self.version(*child),
            },
            Value::Slice(slice) => Value::Slice(Slice::from_parts(
                slice.id,
                slice.last_rank,
                slice
                    .elements
                    .iter()
                    .map(|e| worksheets_common::SliceElement {
                        rank: e.rank,
                        value: self.to_orig(&e.value),
                    })
                    .collect(),
            )),
            other => other.clone(),
        }
    }

    /// Register a worksheet being rehydrated from the store. The instance is
    /// visible through `lookup` immediately, which is what lets a cyclic
    /// graph load without recursing forever.
    pub fn insert_loaded(
        &mut self,
        type_name: &str,
        uuid: Uuid,
        version: i64,
    ) -> Result<WsId, WorksheetError> {
        let def = self
            .defs
            .get(type_name)
            .cloned()
            .ok_or_else(|| unknown_worksheet(type_name))?;
        let ws = self.alloc(def, uuid, version);
        let state = self.state_mut(ws);
        state.orig = state.data.clone();
        Ok(ws)
    }

    /// Install one loaded field value without triggering recomputation.
    pub fn set_loaded(&mut self, ws: WsId, index: i32, data: Value, orig: Value) {
        let data = if data.is_undefined() { None } else { Some(data) };
        self.write_data(ws, index, data);
        if !orig.is_undefined() {
            self.state_mut(ws).orig.insert(index, orig);
        }
    }

    /// Install one parent back-reference recovered from the store.
    pub fn install_parent(&mut self, child: WsId, parent: WsId, parent_index: i32) {
        self.attach_parent(child, parent, parent_index);
    }
}

fn unknown_worksheet(name: &str) -> WorksheetError {
    WorksheetError::new(WorksheetErrorKind::UnknownWorksheet)
        .with_message(format!("unknown worksheet '{name}'"))
}

fn unknown_field(def: &Definition, field: &str) -> WorksheetError {
    WorksheetError::new(WorksheetErrorKind::UnknownField)
        .with_message(format!("{}.{}", def.name(), field))
}

/// Worksheets referenced by a value (a scalar ref or any slice nesting).
fn refs_in(value: &Value) -> SmallVec<[WsId; 4]> {
    fn collect(value: &Value, out: &mut SmallVec<[WsId; 4]>) {
        match value {
            Value::Worksheet(child) => out.push(*child),
            Value::Slice(slice) => {
                for element in &slice.elements {
                    collect(&element.value, out);
                }
            }
            _ => {}
        }
    }
    let mut out = SmallVec::new();
    collect(value, &mut out);
    out
}
