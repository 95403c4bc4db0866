//! The immutable definitions catalog.
//!
//! `Definitions::new` consumes schema source plus options, resolves every
//! inter-type reference (forward references included), binds plugins to
//! `external` computed fields, and precomputes the per-type dependency
//! tables the recompute engine walks at runtime. After construction the
//! catalog is shared and never mutated.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use worksheets_common::{
    INDEX_ID, INDEX_VERSION, Type, WorksheetError, WorksheetErrorKind,
};
use worksheets_parse::{ComputedByDecl, Expr, ExprKind, ParserError, TypeDecl, TypeExpr, parse};

use crate::plugin::{Plugin, PluginMap};

/// Built-in functions usable in computed expressions.
static BUILTINS: Lazy<Vec<&'static str>> = Lazy::new(|| vec!["sum", "len", "substr"]);

/// Options for building a catalog.
#[derive(Default)]
pub struct Options {
    pub plugins: PluginMap,
}

/// How a computed field derives its value.
pub enum ComputedBy {
    Expr(Expr),
    External(Arc<dyn Plugin>),
}

impl fmt::Debug for ComputedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputedBy::Expr(e) => f.debug_tuple("Expr").field(e).finish(),
            ComputedBy::External(_) => f.write_str("External"),
        }
    }
}

#[derive(Debug)]
pub struct Field {
    pub index: i32,
    pub name: String,
    pub ty: Type,
    pub computed_by: Option<ComputedBy>,
    pub constrained_by: Vec<Expr>,
}

impl Field {
    pub fn is_computed(&self) -> bool {
        self.computed_by.is_some()
    }

    /// Reserved fields (`id`, `version`) are maintained by the runtime and
    /// cannot be written externally.
    pub fn is_reserved(&self) -> bool {
        self.index < 0
    }
}

/// An access path of a computed field: the root field index on the owning
/// definition plus the full selector segments.
#[derive(Debug, Clone)]
pub struct AccessPath {
    pub root: i32,
    pub segments: Vec<String>,
}

#[derive(Debug, Default)]
struct DependencyTable {
    /// field index → computed fields on this definition that read it.
    dependents: FxHashMap<i32, Vec<i32>>,
    /// computed field index → its access paths, in declaration order.
    paths: FxHashMap<i32, Vec<AccessPath>>,
}

#[derive(Debug)]
pub struct Definition {
    name: String,
    fields_by_index: BTreeMap<i32, Field>,
    index_by_name: FxHashMap<String, i32>,
    deps: DependencyTable,
}

impl Definition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.index_by_name
            .get(name)
            .and_then(|i| self.fields_by_index.get(i))
    }

    pub fn field_by_index(&self, index: i32) -> Option<&Field> {
        self.fields_by_index.get(&index)
    }

    /// Fields in index order, reserved fields first.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields_by_index.values()
    }

    /// Computed fields that must re-evaluate when `index` changes.
    pub fn dependents_of(&self, index: i32) -> &[i32] {
        self.deps
            .dependents
            .get(&index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether any computed field on this definition reads `index`.
    pub fn is_watched(&self, index: i32) -> bool {
        !self.dependents_of(index).is_empty()
    }

    pub fn paths_of(&self, computed: i32) -> &[AccessPath] {
        self.deps
            .paths
            .get(&computed)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// The immutable catalog of worksheet types.
#[derive(Debug)]
pub struct Definitions {
    defs: BTreeMap<String, Arc<Definition>>,
}

impl Definitions {
    pub fn new(source: &str) -> Result<Self, WorksheetError> {
        Self::new_with_options(source, Options::default())
    }

    pub fn new_with_options(source: &str, options: Options) -> Result<Self, WorksheetError> {
        let decls = parse(source).map_err(from_parser_error)?;
        build(decls, options)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Definition>> {
        self.defs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(String::as_str)
    }
}

fn from_parser_error(e: ParserError) -> WorksheetError {
    let mut err = WorksheetError::new(WorksheetErrorKind::Parse).with_message(e.message);
    if let Some(pos) = e.position {
        err = err.with_position(pos);
    }
    err
}

fn parse_err(msg: impl Into<String>) -> WorksheetError {
    WorksheetError::new(WorksheetErrorKind::Parse).with_message(msg)
}

fn plugin_err(msg: impl Into<String>) -> WorksheetError {
    WorksheetError::new(WorksheetErrorKind::Plugin).with_message(msg)
}

/* ─────────────────────── catalog construction ─────────────────────── */

fn build(decls: Vec<TypeDecl>, options: Options) -> Result<Definitions, WorksheetError> {
    let mut defs: BTreeMap<String, Definition> = BTreeMap::new();

    for decl in &decls {
        let mut fields_by_index: BTreeMap<i32, Field> = BTreeMap::new();
        let mut index_by_name: FxHashMap<String, i32> = FxHashMap::default();

        for (index, name, ty) in [
            (INDEX_ID, "id", Type::Text),
            (INDEX_VERSION, "version", Type::Number(0)),
        ] {
            fields_by_index.insert(
                index,
                Field {
                    index,
                    name: name.to_string(),
                    ty,
                    computed_by: None,
                    constrained_by: Vec::new(),
                },
            );
            index_by_name.insert(name.to_string(), index);
        }

        for field in &decl.fields {
            if index_by_name.contains_key(&field.name) {
                return Err(parse_err(format!(
                    "{}: field name '{}' is reserved",
                    decl.name, field.name
                ))
                .with_position(field.pos));
            }
            let ty = resolve_type(&field.ty);
            let computed_by = match &field.computed_by {
                None => None,
                Some(ComputedByDecl::Expr(e)) => Some(ComputedBy::Expr(e.clone())),
                // plugin attached below, once options are consulted
                Some(ComputedByDecl::External) => None,
            };
            index_by_name.insert(field.name.clone(), field.index);
            fields_by_index.insert(
                field.index,
                Field {
                    index: field.index,
                    name: field.name.clone(),
                    ty,
                    computed_by,
                    constrained_by: field.constrained_by.clone(),
                },
            );
        }

        defs.insert(
            decl.name.clone(),
            Definition {
                name: decl.name.clone(),
                fields_by_index,
                index_by_name,
                deps: DependencyTable::default(),
            },
        );
    }

    // Resolve every named reference now that all types are known.
    for decl in &decls {
        for field in &decl.fields {
            check_refs_resolve(&defs, &decl.name, &field.name, &resolve_type(&field.ty))?;
        }
    }

    attach_plugins(&mut defs, &decls, options)?;
    build_dependency_tables(&mut defs, &decls)?;

    Ok(Definitions {
        defs: defs
            .into_iter()
            .map(|(name, def)| (name, Arc::new(def)))
            .collect(),
    })
}

fn resolve_type(ty: &TypeExpr) -> Type {
    match ty {
        TypeExpr::Text => Type::Text,
        TypeExpr::Bool => Type::Bool,
        TypeExpr::Undefined => Type::Undefined,
        TypeExpr::Date => Type::Date,
        TypeExpr::Time => Type::Time,
        TypeExpr::Number { scale } => Type::Number(*scale),
        TypeExpr::Slice(elem) => Type::Slice(Box::new(resolve_type(elem))),
        TypeExpr::Named(name) => Type::Ref(name.clone()),
    }
}

fn check_refs_resolve(
    defs: &BTreeMap<String, Definition>,
    owner: &str,
    field: &str,
    ty: &Type,
) -> Result<(), WorksheetError> {
    match ty {
        Type::Ref(name) if !defs.contains_key(name) => Err(parse_err(format!(
            "{owner}.{field}: unknown type '{name}'"
        ))),
        Type::Slice(elem) => check_refs_resolve(defs, owner, field, elem),
        _ => Ok(()),
    }
}

fn attach_plugins(
    defs: &mut BTreeMap<String, Definition>,
    decls: &[TypeDecl],
    options: Options,
) -> Result<(), WorksheetError> {
    // Deterministic iteration so validation errors are stable.
    let mut plugins: Vec<(String, Vec<(String, Arc<dyn Plugin>)>)> = options
        .plugins
        .into_iter()
        .map(|(ws, fields)| {
            let mut fields: Vec<_> = fields.into_iter().collect();
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            (ws, fields)
        })
        .collect();
    plugins.sort_by(|a, b| a.0.cmp(&b.0));

    for (ws_name, fields) in plugins {
        if !defs.contains_key(&ws_name) {
            return Err(plugin_err(format!("plugins: unknown worksheet({ws_name})")));
        }
        for (field_name, plugin) in fields {
            let decl = decls.iter().find(|d| d.name == ws_name).unwrap();
            let declared = decl.fields.iter().find(|f| f.name == field_name);
            match declared {
                None => {
                    return Err(plugin_err(format!(
                        "plugins: unknown field {ws_name}.{field_name}"
                    )));
                }
                Some(f) if !matches!(f.computed_by, Some(ComputedByDecl::External)) => {
                    return Err(plugin_err(format!(
                        "plugins: field {ws_name}.{field_name} not externally defined"
                    )));
                }
                Some(f) => {
                    let def = defs.get_mut(&ws_name).unwrap();
                    let field = def.fields_by_index.get_mut(&f.index).unwrap();
                    field.computed_by = Some(ComputedBy::External(plugin));
                }
            }
        }
    }

    // Every `external` block needs a plugin behind it.
    for decl in decls {
        for field in &decl.fields {
            if matches!(field.computed_by, Some(ComputedByDecl::External)) {
                let bound = defs[&decl.name].fields_by_index[&field.index]
                    .computed_by
                    .is_some();
                if !bound {
                    return Err(plugin_err(format!(
                        "{}.{}: missing plugin for external computed_by",
                        decl.name, field.name
                    )));
                }
            }
        }
    }
    Ok(())
}

/* ─────────────────────── dependency analysis ─────────────────────── */

fn build_dependency_tables(
    defs: &mut BTreeMap<String, Definition>,
    decls: &[TypeDecl],
) -> Result<(), WorksheetError> {
    let mut tables: BTreeMap<String, DependencyTable> = BTreeMap::new();

    for decl in decls {
        let def = &defs[&decl.name];
        let mut table = DependencyTable::default();

        for field in def.fields() {
            let Some(computed) = &field.computed_by else {
                continue;
            };
            let raw_paths: Vec<Vec<String>> = match computed {
                ComputedBy::Expr(expr) => {
                    check_calls(&decl.name, &field.name, expr)?;
                    let mut paths = Vec::new();
                    collect_paths(expr, &mut paths);
                    paths
                }
                ComputedBy::External(plugin) => {
                    let args = plugin.args();
                    if args.is_empty() {
                        return Err(plugin_err(format!(
                            "{}.{} has no dependencies",
                            decl.name, field.name
                        )));
                    }
                    args.into_iter()
                        .map(|a| a.split('.').map(str::to_string).collect())
                        .collect()
                }
            };

            let external = matches!(computed, ComputedBy::External(_));
            let mut paths = Vec::with_capacity(raw_paths.len());
            for segments in raw_paths {
                let root = resolve_path(defs, def, &segments).map_err(|bad| {
                    if external {
                        plugin_err(format!(
                            "{}.{} references unknown arg {}",
                            decl.name,
                            field.name,
                            segments.join(".")
                        ))
                    } else {
                        parse_err(format!(
                            "{}.{}: unknown identifier '{bad}'",
                            decl.name, field.name
                        ))
                    }
                })?;
                if root == field.index {
                    return Err(parse_err(format!(
                        "{}.{}: cyclic computed_by",
                        decl.name, field.name
                    )));
                }
                paths.push(AccessPath { root, segments });
            }

            for path in &paths {
                let dependents = table.dependents.entry(path.root).or_default();
                if !dependents.contains(&field.index) {
                    dependents.push(field.index);
                }
            }
            table.paths.insert(field.index, paths);
        }

        tables.insert(decl.name.clone(), table);
    }

    for (name, table) in tables {
        defs.get_mut(&name).unwrap().deps = table;
    }
    Ok(())
}

/// Every selector or identifier an expression reads, in source order.
fn collect_paths(expr: &Expr, out: &mut Vec<Vec<String>>) {
    match &expr.kind {
        ExprKind::Literal(_) => {}
        ExprKind::Ident(name) => out.push(vec![name.clone()]),
        ExprKind::Selector(path) => out.push(path.clone()),
        ExprKind::UnaryOp { expr, .. } | ExprKind::Round { expr, .. } => collect_paths(expr, out),
        ExprKind::BinaryOp { left, right, .. } => {
            collect_paths(left, out);
            collect_paths(right, out);
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                collect_paths(arg, out);
            }
        }
    }
}

fn check_calls(owner: &str, field: &str, expr: &Expr) -> Result<(), WorksheetError> {
    match &expr.kind {
        ExprKind::Call { name, args } => {
            if !BUILTINS.contains(&name.as_str()) {
                return Err(parse_err(format!(
                    "{owner}.{field}: unknown function '{name}'"
                )));
            }
            for arg in args {
                check_calls(owner, field, arg)?;
            }
            Ok(())
        }
        ExprKind::UnaryOp { expr, .. } | ExprKind::Round { expr, .. } => {
            check_calls(owner, field, expr)
        }
        ExprKind::BinaryOp { left, right, .. } => {
            check_calls(owner, field, left)?;
            check_calls(owner, field, right)
        }
        _ => Ok(()),
    }
}

/// Resolve a selector path starting at `def`, following refs (through
/// slices) across definitions. Returns the root field index, or the first
/// segment that fails to resolve.
fn resolve_path(
    defs: &BTreeMap<String, Definition>,
    def: &Definition,
    segments: &[String],
) -> Result<i32, String> {
    let first = segments.first().ok_or_else(String::new)?;
    let root = def.field_by_name(first).ok_or_else(|| first.clone())?;
    let mut current = root.ty.clone();
    for segment in &segments[1..] {
        let target = ref_target(&current).ok_or_else(|| segment.clone())?;
        let target_def = defs.get(target).ok_or_else(|| segment.clone())?;
        let field = target_def
            .field_by_name(segment)
            .ok_or_else(|| segment.clone())?;
        current = field.ty.clone();
    }
    Ok(root.index)
}

/// The definition a type (possibly nested in slices) refers to.
fn ref_target(ty: &Type) -> Option<&str> {
    match ty {
        Type::Ref(name) => Some(name),
        Type::Slice(elem) => ref_target(elem),
        _ => None,
    }
}
