//! Named, ordered module sequences and their per-run bookkeeping.
//!
//! # Execution
//!
//! ```text
//! seed ──► module 0 ──► module 1 ──► … ──► module N ──► published
//!  (1 doc,   inputs =      inputs =                      DocumentCollection
//!  initial   seed          module 0                      [pipeline name]
//!  metadata)               outputs
//! ```
//!
//! Modules run strictly in order; a module only starts once the previous
//! module's whole output list exists. Inside one module, per-document work
//! may run in parallel, which is why the run state below sits behind a mutex.
//!
//! # Run state
//!
//! Reset at the start of every run:
//!
//! - **sources**: every non-empty source assigned during the run. Assigning
//!   the same source twice fails the creation with
//!   [`DocumentError::DuplicateSource`].
//! - **clone tree**: child revision → parent revision for every clone.
//! - **streams**: content streams introduced by this run. After a
//!   successful run, streams not reachable from any published document are
//!   disposed.
//!
//! While the pipeline runs, its entry in the [`DocumentCollection`] holds
//! the most recent top-level module's output. Nested runs never write the
//! entry, so parallel nested runs cannot leak their intermediate lists. A
//! fault removes the entry so no partial output stays visible.

mod collection;
mod context;

pub use collection::DocumentCollection;
pub use context::ExecutionContext;

use crate::document::{
    ContentStream, CustomConstructor, CustomDocument, Document, DocumentError, DocumentFactory,
    Revision,
};
use crate::engine::{Engine, RunEvent};
use crate::module::{BoxError, Module};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Error while executing module {index} ({module}) in pipeline {pipeline}: {cause}")]
    ModuleExecution {
        pipeline: String,
        index: usize,
        module: String,
        #[source]
        cause: BoxError,
    },
    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl PipelineError {
    /// The pipeline a module failure happened in.
    pub fn pipeline(&self) -> Option<&str> {
        match self {
            PipelineError::ModuleExecution { pipeline, .. } => Some(pipeline),
            PipelineError::Document(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Faulted,
}

#[derive(Default)]
struct RunState {
    sources: HashSet<String>,
    clone_tree: HashMap<Revision, Revision>,
    streams: Vec<ContentStream>,
}

pub struct Pipeline {
    name: String,
    modules: Vec<Arc<dyn Module>>,
    custom: Option<CustomConstructor>,
    state: Mutex<RunState>,
    status: Mutex<PipelineStatus>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, modules: impl IntoIterator<Item = Arc<dyn Module>>) -> Self {
        Self {
            name: name.into(),
            modules: modules.into_iter().collect(),
            custom: None,
            state: Mutex::new(RunState::default()),
            status: Mutex::new(PipelineStatus::Idle),
        }
    }

    /// Every document created by this pipeline carries a `T` payload.
    pub fn with_custom_documents<T: CustomDocument + Default>(mut self) -> Self {
        self.custom = Some(crate::document::constructor::<T>());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn modules(&self) -> &[Arc<dyn Module>] {
        &self.modules
    }

    pub fn status(&self) -> PipelineStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: PipelineStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The revision `revision` was cloned from during the last run.
    pub fn parent_of(&self, revision: Revision) -> Option<Revision> {
        self.state().clone_tree.get(&revision).copied()
    }

    /// Every ancestor of `revision`, nearest first.
    pub fn ancestry(&self, revision: Revision) -> Vec<Revision> {
        let state = self.state();
        std::iter::successors(state.clone_tree.get(&revision).copied(), |r| {
            state.clone_tree.get(r).copied()
        })
        .collect()
    }

    /// Sources assigned during the last run, sorted.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<_> = self.state().sources.iter().cloned().collect();
        sources.sort();
        sources
    }

    fn factory(&self, engine: &Engine) -> DocumentFactory {
        DocumentFactory::new(engine.initial_metadata().clone()).with_constructor(self.custom.clone())
    }

    /// Record a document created during this run.
    pub(crate) fn register(
        &self,
        parent: Option<&Document>,
        document: &Document,
    ) -> Result<(), DocumentError> {
        let mut state = self.state();

        let source = document.source();
        let assigned = !source.is_empty() && parent.is_none_or(|p| p.source() != source);
        if assigned && !state.sources.insert(source.to_string()) {
            return Err(DocumentError::DuplicateSource {
                path: source.to_string(),
                pipeline: self.name.clone(),
            });
        }

        if let Some(parent) = parent {
            state
                .clone_tree
                .insert(document.revision(), parent.revision());
        }

        if let Some(stream) = document.content().as_stream() {
            let inherited = parent
                .and_then(|p| p.content().as_stream())
                .is_some_and(|p| ContentStream::ptr_eq(p, stream));
            if !inherited {
                state.streams.push(stream.clone());
            }
        }
        Ok(())
    }

    /// Run the whole pipeline once and publish its output.
    pub(crate) fn execute(&self, engine: &Engine) -> Result<Vec<Document>, PipelineError> {
        *self.state() = RunState::default();
        self.set_status(PipelineStatus::Running);
        let start = Instant::now();

        let factory = self.factory(engine);
        let seed = factory.new_document();
        match self.execute_modules(engine, &factory, &self.modules, vec![seed], true) {
            Ok(outputs) => {
                engine.documents().set(&self.name, outputs.clone());
                self.dispose_unreachable_streams(engine);
                self.set_status(PipelineStatus::Completed);
                info!(
                    pipeline = %self.name,
                    documents = outputs.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "pipeline completed"
                );
                Ok(outputs)
            }
            Err(e) => {
                engine.documents().remove(&self.name);
                self.set_status(PipelineStatus::Faulted);
                warn!(pipeline = %self.name, error = %e, "pipeline faulted");
                Err(e)
            }
        }
    }

    /// Feed `inputs` through `modules` in order.
    ///
    /// Top-level runs publish each module's output and report progress
    /// events; nested runs only log.
    pub(crate) fn execute_modules(
        &self,
        engine: &Engine,
        factory: &DocumentFactory,
        modules: &[Arc<dyn Module>],
        inputs: Vec<Document>,
        top_level: bool,
    ) -> Result<Vec<Document>, PipelineError> {
        let mut documents = inputs;
        for (index, module) in modules.iter().enumerate() {
            let ctx = ExecutionContext::new(engine, self, factory, module);
            let start = Instant::now();
            debug!(
                pipeline = %self.name,
                module = module.name(),
                index,
                inputs = documents.len(),
                "executing module"
            );

            let outputs = module.execute(&documents, &ctx).map_err(|cause| {
                PipelineError::ModuleExecution {
                    pipeline: self.name.clone(),
                    index,
                    module: module.name().to_string(),
                    cause,
                }
            })?;

            let elapsed = start.elapsed();
            debug!(
                pipeline = %self.name,
                module = module.name(),
                index,
                documents = outputs.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "module completed"
            );
            if top_level {
                engine.documents().set(&self.name, outputs.clone());
                engine.emit(RunEvent::ModuleCompleted {
                    pipeline: self.name.clone(),
                    index,
                    module: module.name().to_string(),
                    documents: outputs.len(),
                    elapsed,
                });
            }
            documents = outputs;
        }
        Ok(documents)
    }

    fn dispose_unreachable_streams(&self, engine: &Engine) {
        let live: HashSet<usize> = engine
            .documents()
            .all()
            .iter()
            .filter_map(|doc| doc.content().as_stream().map(ContentStream::addr))
            .collect();
        let streams = std::mem::take(&mut self.state().streams);
        let mut disposed = 0;
        for stream in streams {
            if !live.contains(&stream.addr()) {
                stream.dispose();
                disposed += 1;
            }
        }
        if disposed > 0 {
            debug!(pipeline = %self.name, disposed, "disposed intermediate content streams");
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field(
                "modules",
                &self.modules.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("status", &self.status())
            .finish()
    }
}
