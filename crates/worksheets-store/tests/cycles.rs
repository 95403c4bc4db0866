//! Reference cycles: self-references and mutual references must save and
//! load without recursing forever.

mod common;

use common::{definitions, graph};
use worksheets_common::Value;
use worksheets_store::{MemStore, Session};

const LINKED: &str = r#"
type node worksheet {
  1:label text
  2:next node
}
"#;

#[test]
fn self_reference_round_trips() {
    let defs = definitions(LINKED);
    let store = MemStore::new();
    let mut g = graph(&defs);

    let a = g.new_worksheet("node").unwrap();
    g.set(a, "label", Value::text("loop")).unwrap();
    g.set(a, "next", Value::Worksheet(a)).unwrap();
    assert_eq!(g.parent_edges(a), vec![(a, 2)]);
    let id = g.uuid(a);

    let mut tx = store.begin();
    Session::new(&mut tx, &mut g).save(a).unwrap();
    tx.commit().unwrap();

    let mut g2 = graph(&defs);
    let mut tx = store.begin();
    let loaded = Session::new(&mut tx, &mut g2).load(id).unwrap();
    let Value::Worksheet(next) = g2.get(loaded, "next").unwrap() else {
        panic!("expected a ref");
    };
    assert_eq!(next, loaded);
    assert_eq!(g2.get(loaded, "label").unwrap(), Value::text("loop"));
}

#[test]
fn mutual_references_round_trip() {
    let defs = definitions(LINKED);
    let store = MemStore::new();
    let mut g = graph(&defs);

    let a = g.new_worksheet("node").unwrap();
    let b = g.new_worksheet("node").unwrap();
    g.set(a, "label", Value::text("a")).unwrap();
    g.set(b, "label", Value::text("b")).unwrap();
    g.set(a, "next", Value::Worksheet(b)).unwrap();
    g.set(b, "next", Value::Worksheet(a)).unwrap();
    let a_id = g.uuid(a);
    let b_id = g.uuid(b);

    // saving either end persists the whole cycle
    let mut tx = store.begin();
    Session::new(&mut tx, &mut g).save(a).unwrap();
    tx.commit().unwrap();
    assert!(store.worksheet_row(b_id).is_some());

    let mut g2 = graph(&defs);
    let mut tx = store.begin();
    let a2 = Session::new(&mut tx, &mut g2).load(a_id).unwrap();
    let b2 = g2.lookup(b_id).expect("other end loaded through the cycle");

    assert_eq!(g2.get(a2, "next").unwrap(), Value::Worksheet(b2));
    assert_eq!(g2.get(b2, "next").unwrap(), Value::Worksheet(a2));
    assert_eq!(g2.parent_edges(a2), vec![(b2, 2)]);
    assert_eq!(g2.parent_edges(b2), vec![(a2, 2)]);

    // updating one end still cascades across the cycle exactly once
    g2.set(a2, "label", Value::text("a2")).unwrap();
    let mut tx = store.begin();
    Session::new(&mut tx, &mut g2).update(a2).unwrap();
    tx.commit().unwrap();

    let mut g3 = graph(&defs);
    let mut tx = store.begin();
    let a3 = Session::new(&mut tx, &mut g3).load(a_id).unwrap();
    assert_eq!(g3.get(a3, "label").unwrap(), Value::text("a2"));
}
