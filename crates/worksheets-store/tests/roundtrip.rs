//! Save/update/load round trips against the memory backend.

mod common;

use common::{definitions, graph};
use worksheets_common::Value;
use worksheets_store::{MemStore, Session, StoreError, VERSION_UNBOUNDED};

const SIMPLE: &str = "type simple worksheet { 83:name text 91:age number[0] }";

#[test]
fn save_update_load_round_trip() {
    let defs = definitions(SIMPLE);
    let store = MemStore::new();
    let mut g = graph(&defs);

    let ws = g.new_worksheet("simple").unwrap();
    g.set(ws, "name", Value::text("Alice")).unwrap();
    let id = g.uuid(ws);

    let mut tx = store.begin();
    let edit = Session::new(&mut tx, &mut g).save(ws).unwrap();
    tx.commit().unwrap();
    assert!(g.diff(ws).is_empty());

    g.set(ws, "name", Value::text("Bob")).unwrap();
    let mut tx = store.begin();
    Session::new(&mut tx, &mut g).update(ws).unwrap();
    tx.commit().unwrap();
    assert!(g.diff(ws).is_empty());
    assert_eq!(g.get(ws, "version").unwrap(), Value::int(2));

    // a fresh graph sees the head state
    let mut g2 = graph(&defs);
    let mut tx = store.begin();
    let loaded = Session::new(&mut tx, &mut g2).load(id).unwrap();
    assert_eq!(g2.get(loaded, "name").unwrap(), Value::text("Bob"));
    assert_eq!(g2.get(loaded, "version").unwrap(), Value::int(2));
    assert_eq!(g2.get(loaded, "age").unwrap(), Value::Undefined);
    assert_eq!(g2.get(loaded, "id").unwrap(), Value::text(id.to_string()));
    assert!(g2.diff(loaded).is_empty());

    // append-only history on `name`
    let records = store.value_records(id, 83);
    assert_eq!(records.len(), 2);
    assert_eq!((records[0].from_version, records[0].to_version), (1, 1));
    assert_eq!(records[0].value.as_deref(), Some("Alice"));
    assert_eq!(
        (records[1].from_version, records[1].to_version),
        (2, VERSION_UNBOUNDED)
    );
    assert_eq!(records[1].value.as_deref(), Some("Bob"));

    // the save produced one edit on this worksheet
    let mut tx = store.begin();
    let summary = Session::new(&mut tx, &mut g2).edit(edit).unwrap();
    assert_eq!(summary.versions.get(&id), Some(&1));
}

#[test]
fn save_twice_is_rejected() {
    let defs = definitions(SIMPLE);
    let store = MemStore::new();
    let mut g = graph(&defs);
    let ws = g.new_worksheet("simple").unwrap();

    let mut tx = store.begin();
    Session::new(&mut tx, &mut g).save(ws).unwrap();
    let err = Session::new(&mut tx, &mut g).save(ws).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyPersisted(_)));
}

#[test]
fn noop_update_does_not_bump_the_version() {
    let defs = definitions(SIMPLE);
    let store = MemStore::new();
    let mut g = graph(&defs);
    let ws = g.new_worksheet("simple").unwrap();
    g.set(ws, "name", Value::text("Alice")).unwrap();
    let id = g.uuid(ws);

    let mut tx = store.begin();
    Session::new(&mut tx, &mut g).save(ws).unwrap();
    tx.commit().unwrap();

    // no intervening mutations: idempotent
    let mut tx = store.begin();
    Session::new(&mut tx, &mut g).update(ws).unwrap();
    tx.commit().unwrap();
    assert_eq!(g.get(ws, "version").unwrap(), Value::int(1));
    assert_eq!(store.worksheet_row(id).unwrap().version, 1);
    assert_eq!(store.value_records(id, 83).len(), 1);
}

#[test]
fn unset_persists_as_null_and_loads_as_undefined() {
    let defs = definitions(SIMPLE);
    let store = MemStore::new();
    let mut g = graph(&defs);
    let ws = g.new_worksheet("simple").unwrap();
    g.set(ws, "age", Value::int(30)).unwrap();
    let id = g.uuid(ws);

    let mut tx = store.begin();
    Session::new(&mut tx, &mut g).save(ws).unwrap();
    tx.commit().unwrap();

    g.unset(ws, "age").unwrap();
    let mut tx = store.begin();
    Session::new(&mut tx, &mut g).update(ws).unwrap();
    tx.commit().unwrap();

    let records = store.value_records(id, 91);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].value.as_deref(), Some("30"));
    assert_eq!(records[1].value, None);

    let mut g2 = graph(&defs);
    let mut tx = store.begin();
    let loaded = Session::new(&mut tx, &mut g2).load(id).unwrap();
    assert_eq!(g2.get(loaded, "age").unwrap(), Value::Undefined);
}

#[test]
fn load_of_unknown_id_fails() {
    let defs = definitions(SIMPLE);
    let store = MemStore::new();
    let mut g = graph(&defs);
    let mut tx = store.begin();
    let err = Session::new(&mut tx, &mut g)
        .load(uuid::Uuid::new_v4())
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn uncommitted_transactions_leave_no_trace() {
    let defs = definitions(SIMPLE);
    let store = MemStore::new();
    let mut g = graph(&defs);
    let ws = g.new_worksheet("simple").unwrap();
    let id = g.uuid(ws);

    let mut tx = store.begin();
    Session::new(&mut tx, &mut g).save(ws).unwrap();
    tx.rollback();

    assert!(store.worksheet_row(id).is_none());
}
