//! Shared test utilities.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let a = CountModule::new("A", 1);
//! let engine = engine_with(vec![a.clone()]);
//! engine.execute().unwrap();
//! assert_eq!(a.counts(), (1, 1, 2));
//! ```

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::document::Document;
use crate::engine::Engine;
use crate::io::FileSystem;
use crate::module::{BoxError, Module};
use crate::pipeline::ExecutionContext;

// =========================================================================
// Engines
// =========================================================================

/// An engine with one pipeline, `Pipeline 1`, that never touches disk.
pub fn engine_with(modules: Vec<Arc<dyn Module>>) -> Engine {
    let mut engine = Engine::new(FileSystem::new(std::env::temp_dir().join("quire-unused")));
    engine.set_clean_output_on_execute(false);
    engine.add_unnamed_pipeline(modules);
    engine
}

/// Write `(relative path, content)` pairs under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

pub fn text(doc: &Document) -> String {
    doc.read_text().unwrap()
}

// =========================================================================
// CountModule
// =========================================================================

#[derive(Default)]
struct Counts {
    value: i64,
    executions: usize,
    inputs: usize,
    outputs: usize,
}

/// Emits `additional + 1` clones per input.
///
/// A running counter, shared across every input and run, is appended to the
/// input content (or used alone when it is empty) and stored under the
/// module's name.
pub struct CountModule {
    name: String,
    additional: usize,
    counts: Mutex<Counts>,
}

impl CountModule {
    pub fn new(name: &str, additional: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            additional,
            counts: Mutex::new(Counts::default()),
        })
    }

    /// `(executions, inputs, outputs)` so far.
    pub fn counts(&self) -> (usize, usize, usize) {
        let c = self.counts.lock().unwrap();
        (c.executions, c.inputs, c.outputs)
    }
}

impl Module for CountModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        inputs: &[Document],
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<Document>, BoxError> {
        let mut counts = self.counts.lock().unwrap();
        counts.executions += 1;
        let mut outputs = Vec::new();
        for input in inputs {
            counts.inputs += 1;
            let prefix = input.read_text()?;
            for _ in 0..=self.additional {
                counts.value += 1;
                let value = counts.value;
                let doc = ctx.create_document(
                    Some(input),
                    crate::document::DocumentChanges::new()
                        .content(format!("{prefix}{value}"))
                        .item(self.name.clone(), value),
                )?;
                outputs.push(doc);
                counts.outputs += 1;
            }
        }
        Ok(outputs)
    }
}
