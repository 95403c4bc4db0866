use std::sync::Arc;

use worksheets_eval::{Definitions, Options, WorksheetGraph};

pub fn definitions(source: &str) -> Arc<Definitions> {
    Arc::new(Definitions::new(source).unwrap())
}

pub fn definitions_with_options(source: &str, options: Options) -> Arc<Definitions> {
    Arc::new(Definitions::new_with_options(source, options).unwrap())
}

pub fn graph(defs: &Arc<Definitions>) -> WorksheetGraph {
    WorksheetGraph::new(defs.clone())
}
