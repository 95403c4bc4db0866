//! The signoff pattern: a computed field reading `version` flips as
//! updates move the worksheet forward.

mod common;

use common::{definitions, graph};
use worksheets_common::Value;
use worksheets_store::{MemStore, Session};

const DEF: &str = r#"
type signoff worksheet {
  1:signoff_at number[0]
  2:is_signedoff bool computed_by { return signoff_at + 1 == version }
  3:data text
}
"#;

#[test]
fn signing_off_holds_for_exactly_one_version() {
    let defs = definitions(DEF);
    let store = MemStore::new();
    let mut g = graph(&defs);

    let ws = g.new_worksheet("signoff").unwrap();
    let id = g.uuid(ws);
    assert_eq!(g.get(ws, "is_signedoff").unwrap(), Value::Undefined);

    let mut tx = store.begin();
    Session::new(&mut tx, &mut g).save(ws).unwrap();
    tx.commit().unwrap();

    // sign off against version 1; the update itself bumps to 2
    g.set(ws, "signoff_at", Value::int(1)).unwrap();
    assert_eq!(g.get(ws, "is_signedoff").unwrap(), Value::Bool(false));
    let mut tx = store.begin();
    Session::new(&mut tx, &mut g).update(ws).unwrap();
    tx.commit().unwrap();
    assert_eq!(g.get(ws, "version").unwrap(), Value::int(2));
    assert_eq!(g.get(ws, "is_signedoff").unwrap(), Value::Bool(true));

    {
        let mut g2 = graph(&defs);
        let mut tx = store.begin();
        let loaded = Session::new(&mut tx, &mut g2).load(id).unwrap();
        assert_eq!(g2.get(loaded, "is_signedoff").unwrap(), Value::Bool(true));
    }

    // any further edit moves past the signed-off version
    g.set(ws, "data", Value::text("changed")).unwrap();
    let mut tx = store.begin();
    Session::new(&mut tx, &mut g).update(ws).unwrap();
    tx.commit().unwrap();
    assert_eq!(g.get(ws, "version").unwrap(), Value::int(3));
    assert_eq!(g.get(ws, "is_signedoff").unwrap(), Value::Bool(false));

    {
        let mut g2 = graph(&defs);
        let mut tx = store.begin();
        let loaded = Session::new(&mut tx, &mut g2).load(id).unwrap();
        assert_eq!(g2.get(loaded, "is_signedoff").unwrap(), Value::Bool(false));
        assert_eq!(g2.get(loaded, "data").unwrap(), Value::text("changed"));
    }
}
