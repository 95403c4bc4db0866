//! Catalog construction and validation.

use std::collections::HashMap;
use std::sync::Arc;

use worksheets_common::{Type, Value, WorksheetErrorKind};

use crate::plugin::Plugin;
use crate::{Definitions, Options};

struct NoopPlugin {
    args: Vec<&'static str>,
}

impl Plugin for NoopPlugin {
    fn args(&self) -> Vec<String> {
        self.args.iter().map(|s| s.to_string()).collect()
    }

    fn compute(&self, _args: &[Value]) -> Value {
        Value::Undefined
    }
}

fn options_with(ws: &str, field: &str, plugin: NoopPlugin) -> Options {
    let mut plugins: HashMap<String, HashMap<String, Arc<dyn Plugin>>> = HashMap::new();
    plugins
        .entry(ws.to_string())
        .or_default()
        .insert(field.to_string(), Arc::new(plugin));
    Options { plugins }
}

const EXTERNAL_DEF: &str = r#"
type parent worksheet {
  10:total number[2] computed_by { external }
  20:children []child
}
type child worksheet {
  50:amount number[2]
}
"#;

#[test]
fn builds_a_catalog_with_reserved_fields() {
    let defs = Definitions::new("type simple worksheet { 83:name text }").unwrap();
    let def = defs.get("simple").unwrap();
    assert_eq!(def.field_by_name("id").unwrap().index, -2);
    assert_eq!(def.field_by_name("id").unwrap().ty, Type::Text);
    assert_eq!(def.field_by_name("version").unwrap().index, -1);
    assert_eq!(def.field_by_name("version").unwrap().ty, Type::Number(0));
    assert_eq!(def.field_by_name("name").unwrap().index, 83);
}

#[test]
fn forward_references_resolve() {
    let defs = Definitions::new(
        "type a worksheet { 1:next b }\n type b worksheet { 1:back a }",
    )
    .unwrap();
    assert_eq!(
        defs.get("a").unwrap().field_by_name("next").unwrap().ty,
        Type::Ref("b".to_string())
    );
}

#[test]
fn unresolved_reference_is_a_parse_error() {
    let err = Definitions::new("type a worksheet { 1:next nothere }").unwrap_err();
    assert_eq!(err.kind, WorksheetErrorKind::Parse);
    assert!(err.message.as_deref().unwrap().contains("unknown type"));
}

#[test]
fn reserved_field_names_are_rejected() {
    let err = Definitions::new("type a worksheet { 1:id text }").unwrap_err();
    assert!(err.message.as_deref().unwrap().contains("reserved"));
}

#[test]
fn unknown_identifier_in_computed_expression() {
    let err =
        Definitions::new("type a worksheet { 1:b bool computed_by { return missing } }").unwrap_err();
    assert_eq!(err.kind, WorksheetErrorKind::Parse);
    assert!(err.message.as_deref().unwrap().contains("unknown identifier"));
}

#[test]
fn unknown_selector_segment_in_computed_expression() {
    let err = Definitions::new(
        "type a worksheet { 1:child b 2:c text computed_by { return child.missing } }\n\
         type b worksheet { 1:name text }",
    )
    .unwrap_err();
    assert_eq!(err.kind, WorksheetErrorKind::Parse);
}

#[test]
fn direct_self_dependency_is_rejected() {
    let err = Definitions::new(
        "type a worksheet { 1:n number[0] computed_by { return n + 1 } }",
    )
    .unwrap_err();
    assert!(err.message.as_deref().unwrap().contains("cyclic"));
}

#[test]
fn mutual_dependency_between_computed_fields_is_allowed() {
    Definitions::new(
        "type cyclic_edits worksheet {\n\
           1:right bool\n\
           2:a bool computed_by { return b || right }\n\
           3:b bool computed_by { return a || !right }\n\
         }",
    )
    .unwrap();
}

#[test]
fn unknown_function_is_rejected() {
    let err = Definitions::new(
        "type a worksheet { 1:t text 2:n number[0] computed_by { return avg(t) } }",
    )
    .unwrap_err();
    assert!(err.message.as_deref().unwrap().contains("unknown function"));
}

#[test]
fn plugin_unknown_worksheet() {
    let options = options_with("nothere", "total", NoopPlugin { args: vec!["x"] });
    let err = Definitions::new_with_options(EXTERNAL_DEF, options).unwrap_err();
    assert_eq!(err.kind, WorksheetErrorKind::Plugin);
    assert_eq!(
        err.message.as_deref().unwrap(),
        "plugins: unknown worksheet(nothere)"
    );
}

#[test]
fn plugin_unknown_field() {
    let options = options_with("parent", "nothere", NoopPlugin { args: vec!["x"] });
    let err = Definitions::new_with_options(EXTERNAL_DEF, options).unwrap_err();
    assert_eq!(
        err.message.as_deref().unwrap(),
        "plugins: unknown field parent.nothere"
    );
}

#[test]
fn plugin_on_non_external_field() {
    let options = options_with("parent", "children", NoopPlugin { args: vec!["x"] });
    let err = Definitions::new_with_options(EXTERNAL_DEF, options).unwrap_err();
    assert_eq!(
        err.message.as_deref().unwrap(),
        "plugins: field parent.children not externally defined"
    );
}

#[test]
fn external_field_without_plugin() {
    let err = Definitions::new(EXTERNAL_DEF).unwrap_err();
    assert_eq!(
        err.message.as_deref().unwrap(),
        "parent.total: missing plugin for external computed_by"
    );
}

#[test]
fn plugin_with_no_dependencies() {
    let options = options_with("parent", "total", NoopPlugin { args: vec![] });
    let err = Definitions::new_with_options(EXTERNAL_DEF, options).unwrap_err();
    assert_eq!(
        err.message.as_deref().unwrap(),
        "parent.total has no dependencies"
    );
}

#[test]
fn plugin_with_unresolvable_arg() {
    let options = options_with(
        "parent",
        "total",
        NoopPlugin {
            args: vec!["children.nothere"],
        },
    );
    let err = Definitions::new_with_options(EXTERNAL_DEF, options).unwrap_err();
    assert_eq!(
        err.message.as_deref().unwrap(),
        "parent.total references unknown arg children.nothere"
    );
}

#[test]
fn dependency_table_links_inputs_to_computed_fields() {
    let defs = Definitions::new(
        "type t worksheet {\n\
           1:price number[2]\n\
           2:count number[0]\n\
           3:total number[2] computed_by { return price * count }\n\
         }",
    )
    .unwrap();
    let def = defs.get("t").unwrap();
    assert_eq!(def.dependents_of(1), &[3]);
    assert_eq!(def.dependents_of(2), &[3]);
    assert!(def.dependents_of(3).is_empty());
    assert!(def.is_watched(1));
    assert!(!def.is_watched(3));
}
