//! Field-level diffs between a worksheet's persisted (`orig`) and current
//! (`data`) state.

use std::collections::BTreeMap;

use worksheets_common::{Slice, SliceElement, Value};

/// Before/after pair for one changed field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDiff {
    pub before: Value,
    pub after: Value,
}

/// Element-level changes of a slice that kept its identity. Ranks are never
/// reused, so rank matching determines membership; `changed` carries
/// same-rank elements whose value differs (projections recompute in place —
/// input slices never do).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceDiff {
    pub added: Vec<SliceElement>,
    pub deleted: Vec<i64>,
    pub changed: Vec<SliceElement>,
}

impl SliceDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.changed.is_empty()
    }
}

/// Rank-matched element diff using structural value equality.
pub fn slice_diff(before: &Slice, after: &Slice) -> SliceDiff {
    slice_diff_with(before, after, &|b, a| b != a)
}

/// Rank-matched element diff with a caller-supplied change predicate for
/// same-rank pairs (the graph passes one that compares worksheet refs by
/// identity, not version).
pub fn slice_diff_with(
    before: &Slice,
    after: &Slice,
    element_changed: &dyn Fn(&Value, &Value) -> bool,
) -> SliceDiff {
    let before_by_rank: BTreeMap<i64, &SliceElement> =
        before.elements.iter().map(|e| (e.rank, e)).collect();
    let after_by_rank: BTreeMap<i64, &SliceElement> =
        after.elements.iter().map(|e| (e.rank, e)).collect();

    let mut diff = SliceDiff::default();
    for (&rank, element) in &after_by_rank {
        match before_by_rank.get(&rank) {
            None => diff.added.push((*element).clone()),
            Some(previous) if element_changed(&previous.value, &element.value) => {
                diff.changed.push((*element).clone());
            }
            Some(_) => {}
        }
    }
    for &rank in before_by_rank.keys() {
        if !after_by_rank.contains_key(&rank) {
            diff.deleted.push(rank);
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_matching_detects_adds_and_deletes() {
        let mut before = Slice::new();
        before.push(Value::int(1));
        before.push(Value::int(2));

        let mut after = before.clone();
        after.remove_at(0);
        after.push(Value::int(3));

        let diff = slice_diff(&before, &after);
        assert_eq!(diff.deleted, vec![1]);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].rank, 3);
        assert!(diff.changed.is_empty());
    }

    #[test]
    fn same_rank_value_changes_are_reported() {
        let mut before = Slice::new();
        before.push(Value::text("a"));
        let mut after = before.clone();
        after.elements[0].value = Value::text("b");

        let diff = slice_diff(&before, &after);
        assert!(diff.added.is_empty() && diff.deleted.is_empty());
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed[0].value, Value::text("b"));
    }

    #[test]
    fn identical_slices_diff_empty() {
        let mut slice = Slice::new();
        slice.push(Value::text("a"));
        assert!(slice_diff(&slice, &slice.clone()).is_empty());
    }
}
