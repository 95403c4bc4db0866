mod definitions;
mod recompute;

use std::sync::Arc;

use crate::{Definitions, Options, WorksheetGraph};

pub(crate) fn graph(source: &str) -> WorksheetGraph {
    WorksheetGraph::new(Arc::new(Definitions::new(source).unwrap()))
}

pub(crate) fn graph_with_options(source: &str, options: Options) -> WorksheetGraph {
    WorksheetGraph::new(Arc::new(
        Definitions::new_with_options(source, options).unwrap(),
    ))
}
