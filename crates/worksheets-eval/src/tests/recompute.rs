//! Reactive recomputation: expression evaluation, the identity rule, and
//! propagation across parent edges.

use std::collections::HashMap;
use std::sync::Arc;

use worksheets_common::{Number, Value, WorksheetErrorKind};

use super::{graph, graph_with_options};
use crate::plugin::Plugin;
use crate::Options;

#[test]
fn computed_fields_follow_their_inputs() {
    let mut g = graph(
        "type t worksheet {\n\
           1:price number[2]\n\
           2:count number[0]\n\
           3:total number[2] computed_by { return price * count }\n\
         }",
    );
    let ws = g.new_worksheet("t").unwrap();
    assert_eq!(g.get(ws, "total").unwrap(), Value::Undefined);

    g.set(ws, "price", Value::number(150, 2)).unwrap();
    assert_eq!(g.get(ws, "total").unwrap(), Value::Undefined);

    g.set(ws, "count", Value::int(3)).unwrap();
    assert_eq!(g.get(ws, "total").unwrap(), Value::number(450, 2));

    g.unset(ws, "count").unwrap();
    assert_eq!(g.get(ws, "total").unwrap(), Value::Undefined);
}

#[test]
fn computed_chains_cascade() {
    let mut g = graph(
        "type t worksheet {\n\
           1:base number[0]\n\
           2:double number[0] computed_by { return base * 2 }\n\
           3:quadruple number[0] computed_by { return double * 2 }\n\
         }",
    );
    let ws = g.new_worksheet("t").unwrap();
    g.set(ws, "base", Value::int(5)).unwrap();
    assert_eq!(g.get(ws, "quadruple").unwrap(), Value::int(20));
}

#[test]
fn identity_rule_stops_mutual_dependency_oscillation() {
    let mut g = graph(
        "type cyclic_edits worksheet {\n\
           1:right bool\n\
           2:a bool computed_by { return b || right }\n\
           3:b bool computed_by { return a || !right }\n\
         }",
    );
    let ws = g.new_worksheet("cyclic_edits").unwrap();
    g.set(ws, "right", Value::Bool(true)).unwrap();
    assert_eq!(g.get(ws, "a").unwrap(), Value::Undefined);
    assert_eq!(g.get(ws, "b").unwrap(), Value::Undefined);
}

#[test]
fn division_uses_the_declared_rounding_mode() {
    let mut g = graph(
        "type t worksheet {\n\
           1:total number[2]\n\
           2:count number[0]\n\
           3:each number[2] computed_by { return total / count round down }\n\
         }",
    );
    let ws = g.new_worksheet("t").unwrap();
    g.set(ws, "total", Value::number(500, 2)).unwrap();
    g.set(ws, "count", Value::int(3)).unwrap();
    assert_eq!(g.get(ws, "each").unwrap(), Value::number(166, 2));
}

#[test]
fn division_by_zero_fails_and_rolls_back() {
    let mut g = graph(
        "type t worksheet {\n\
           1:total number[2]\n\
           2:count number[0]\n\
           3:each number[2] computed_by { return total / count round down }\n\
         }",
    );
    let ws = g.new_worksheet("t").unwrap();
    g.set(ws, "total", Value::number(500, 2)).unwrap();
    let err = g.set(ws, "count", Value::int(0)).unwrap_err();
    assert_eq!(err.kind, WorksheetErrorKind::Eval);
    // the failed edit left no trace
    assert_eq!(g.get(ws, "count").unwrap(), Value::Undefined);
    assert_eq!(g.get(ws, "each").unwrap(), Value::Undefined);
}

#[test]
fn text_builtins() {
    let mut g = graph(
        "type t worksheet {\n\
           1:name text\n\
           2:initials text computed_by { return substr(name, 0, 2) }\n\
           3:length number[0] computed_by { return len(name) }\n\
         }",
    );
    let ws = g.new_worksheet("t").unwrap();
    g.set(ws, "name", Value::text("worksheets")).unwrap();
    assert_eq!(g.get(ws, "initials").unwrap(), Value::text("wo"));
    assert_eq!(g.get(ws, "length").unwrap(), Value::int(10));
}

#[test]
fn membership_operator_over_a_slice_field() {
    let mut g = graph(
        "type t worksheet {\n\
           1:winners []text\n\
           2:name text\n\
           3:is_winner bool computed_by { return name in winners }\n\
         }",
    );
    let ws = g.new_worksheet("t").unwrap();
    g.append(ws, "winners", Value::text("ada")).unwrap();
    assert_eq!(g.get(ws, "is_winner").unwrap(), Value::Undefined);

    g.set(ws, "name", Value::text("ada")).unwrap();
    assert_eq!(g.get(ws, "is_winner").unwrap(), Value::Bool(true));

    g.set(ws, "name", Value::text("bob")).unwrap();
    assert_eq!(g.get(ws, "is_winner").unwrap(), Value::Bool(false));

    g.append(ws, "winners", Value::text("bob")).unwrap();
    assert_eq!(g.get(ws, "is_winner").unwrap(), Value::Bool(true));
}

#[test]
fn selector_follows_scalar_refs_through_parents() {
    let mut g = graph(
        "type account worksheet { 1:balance number[2] }\n\
         type summary worksheet {\n\
           1:account account\n\
           2:doubled number[2] computed_by { return account.balance + account.balance }\n\
         }",
    );
    let summary = g.new_worksheet("summary").unwrap();
    let account = g.new_worksheet("account").unwrap();
    g.set(summary, "account", Value::Worksheet(account)).unwrap();
    assert_eq!(g.get(summary, "doubled").unwrap(), Value::Undefined);

    // a write on the child reaches the parent's computed field
    g.set(account, "balance", Value::number(125, 2)).unwrap();
    assert_eq!(g.get(summary, "doubled").unwrap(), Value::number(250, 2));

    g.set(account, "balance", Value::number(200, 2)).unwrap();
    assert_eq!(g.get(summary, "doubled").unwrap(), Value::number(400, 2));
}

struct SumAmounts;

impl Plugin for SumAmounts {
    fn args(&self) -> Vec<String> {
        vec!["children.amount".to_string()]
    }

    fn compute(&self, args: &[Value]) -> Value {
        let Value::Slice(amounts) = &args[0] else {
            return Value::Undefined;
        };
        let mut total = Number::new(0, 2);
        for value in amounts.values() {
            match value {
                Value::Number(n) => match total.plus(n) {
                    Ok(sum) => total = sum,
                    Err(_) => return Value::Undefined,
                },
                _ => return Value::Undefined,
            }
        }
        Value::Number(total)
    }
}

fn sum_options() -> Options {
    let mut plugins: HashMap<String, HashMap<String, Arc<dyn Plugin>>> = HashMap::new();
    plugins.entry("parent".to_string()).or_default().insert(
        "sum_child_amount".to_string(),
        Arc::new(SumAmounts),
    );
    Options { plugins }
}

const SUM_DEF: &str = r#"
type parent worksheet {
  10:sum_child_amount number[2] computed_by { external }
  20:children []child
}
type child worksheet {
  50:amount number[2]
}
"#;

#[test]
fn external_sum_tracks_slice_membership() {
    let mut g = graph_with_options(SUM_DEF, sum_options());
    let p = g.new_worksheet("parent").unwrap();

    let c1 = g.new_worksheet("child").unwrap();
    g.set(c1, "amount", Value::number(111, 2)).unwrap();
    g.append(p, "children", Value::Worksheet(c1)).unwrap();
    assert_eq!(g.get(p, "sum_child_amount").unwrap(), Value::number(111, 2));

    let c2 = g.new_worksheet("child").unwrap();
    g.set(c2, "amount", Value::number(222, 2)).unwrap();
    g.append(p, "children", Value::Worksheet(c2)).unwrap();
    assert_eq!(g.get(p, "sum_child_amount").unwrap(), Value::number(333, 2));

    g.del(p, "children", 0).unwrap();
    assert_eq!(g.get(p, "sum_child_amount").unwrap(), Value::number(222, 2));
}

#[test]
fn external_sum_tracks_element_mutations() {
    let mut g = graph_with_options(SUM_DEF, sum_options());
    let p = g.new_worksheet("parent").unwrap();
    let c = g.new_worksheet("child").unwrap();
    g.append(p, "children", Value::Worksheet(c)).unwrap();

    g.set(c, "amount", Value::number(100, 2)).unwrap();
    assert_eq!(g.get(p, "sum_child_amount").unwrap(), Value::number(100, 2));

    g.set(c, "amount", Value::number(250, 2)).unwrap();
    assert_eq!(g.get(p, "sum_child_amount").unwrap(), Value::number(250, 2));
}

#[test]
fn version_dependent_computed_field_recomputes_on_bump() {
    let mut g = graph(
        "type signoff worksheet {\n\
           1:signoff_at number[0]\n\
           2:is_signedoff bool computed_by { return signoff_at + 1 == version }\n\
           3:data text\n\
         }",
    );
    let ws = g.new_worksheet("signoff").unwrap();
    assert_eq!(g.get(ws, "is_signedoff").unwrap(), Value::Undefined);

    g.set(ws, "signoff_at", Value::int(1)).unwrap();
    assert_eq!(g.get(ws, "is_signedoff").unwrap(), Value::Bool(false));

    g.bump_version(ws).unwrap();
    assert_eq!(g.get(ws, "is_signedoff").unwrap(), Value::Bool(true));

    g.bump_version(ws).unwrap();
    assert_eq!(g.get(ws, "is_signedoff").unwrap(), Value::Bool(false));
}

#[test]
fn projection_preserves_slice_identity() {
    // a computed field whose value *is* a projection must compare stably
    // under the identity rule, or every recompute would look like a change
    let mut g = graph(
        "type parent worksheet {\n\
           1:children []child\n\
           2:names []text computed_by { return children.name }\n\
         }\n\
         type child worksheet { 1:name text }",
    );
    let p = g.new_worksheet("parent").unwrap();
    let c = g.new_worksheet("child").unwrap();
    g.set(c, "name", Value::text("x")).unwrap();
    g.append(p, "children", Value::Worksheet(c)).unwrap();

    let Value::Slice(names) = g.get(p, "names").unwrap() else {
        panic!("expected a slice");
    };
    assert_eq!(names.elements[0].value, Value::text("x"));
    assert_eq!(names.elements[0].rank, 1);

    let Value::Slice(children) = g.get(p, "children").unwrap() else {
        panic!("expected a slice");
    };
    // distinct from the source, but stable across recomputations
    assert_ne!(names.id, children.id);
    g.set(c, "name", Value::text("y")).unwrap();
    let Value::Slice(renamed) = g.get(p, "names").unwrap() else {
        panic!("expected a slice");
    };
    assert_eq!(renamed.id, names.id);
    assert_eq!(renamed.elements[0].value, Value::text("y"));
}
