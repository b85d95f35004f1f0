//! Built-in modules.
//!
//! | Module | Output order |
//! |--------|--------------|
//! | [`ModuleCollection`] | whatever its children produce |
//! | [`Branch`] | inputs, unchanged |
//! | [`ConcatBranch`] | inputs, then child results |
//! | [`Meta`] | one output per input, same order |
//! | [`FileName`] | one output per input, same order |
//! | [`ReadFiles`] | per input, matched files sorted by relative path |
//! | [`WriteFiles`] | one output per input, same order |
//!
//! [`execute_fn`](crate::module::execute_fn) and [`execute_each`] wrap
//! closures for one-off stages.

mod control;
mod io;
mod metadata;

pub use control::{Branch, ConcatBranch, ModuleCollection, execute_each};
pub use io::{ReadFiles, WriteFiles};
pub use metadata::{FileName, Meta};

use crate::document::Document;
use crate::pipeline::ExecutionContext;
use std::sync::Arc;

/// Per-document filter used by `Branch`, `ConcatBranch` and `WriteFiles`.
pub type DocumentPredicate = Arc<dyn Fn(&Document, &ExecutionContext<'_>) -> bool + Send + Sync>;

/// AND `next` onto an existing predicate.
fn and_predicate(current: Option<DocumentPredicate>, next: DocumentPredicate) -> DocumentPredicate {
    match current {
        None => next,
        Some(current) => Arc::new(move |doc: &Document, ctx: &ExecutionContext<'_>| {
            current(doc, ctx) && next(doc, ctx)
        }),
    }
}

fn select(
    inputs: &[Document],
    predicate: Option<&DocumentPredicate>,
    ctx: &ExecutionContext<'_>,
) -> Vec<Document> {
    match predicate {
        None => inputs.to_vec(),
        Some(pred) => inputs.iter().filter(|doc| pred(doc, ctx)).cloned().collect(),
    }
}
