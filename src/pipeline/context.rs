use super::{DocumentCollection, Pipeline, PipelineError};
use crate::cache::ExecutionCache;
use crate::document::{Content, Document, DocumentChanges, DocumentError, DocumentFactory};
use crate::engine::Engine;
use crate::io::FileSystem;
use crate::meta::{Metadata, Value};
use crate::module::Module;
use std::sync::Arc;

/// What a running module sees of the engine.
///
/// Bound to one (pipeline, module) pair. Shareable across rayon workers, so
/// per-document work may create documents concurrently.
pub struct ExecutionContext<'a> {
    engine: &'a Engine,
    pipeline: &'a Pipeline,
    factory: &'a DocumentFactory,
    module: &'a Arc<dyn Module>,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(
        engine: &'a Engine,
        pipeline: &'a Pipeline,
        factory: &'a DocumentFactory,
        module: &'a Arc<dyn Module>,
    ) -> Self {
        Self {
            engine,
            pipeline,
            factory,
            module,
        }
    }

    pub fn pipeline_name(&self) -> &str {
        self.pipeline.name()
    }

    pub fn module_name(&self) -> &str {
        self.module.name()
    }

    pub fn initial_metadata(&self) -> &Metadata {
        self.factory.initial_metadata()
    }

    /// Documents published by pipelines that already ran (and this one so far).
    pub fn documents(&self) -> &DocumentCollection {
        self.engine.documents()
    }

    pub fn file_system(&self) -> &FileSystem {
        self.engine.file_system()
    }

    /// This module's cache, kept across runs of the same engine.
    pub fn execution_cache(&self) -> Arc<ExecutionCache> {
        self.engine.caches().cache_for(self.module)
    }

    /// A fresh root document with the initial metadata.
    pub fn new_document(&self) -> Document {
        self.factory.new_document()
    }

    /// Create a root document or clone `parent`, recording it in the
    /// pipeline's run state.
    pub fn create_document(
        &self,
        parent: Option<&Document>,
        changes: DocumentChanges,
    ) -> Result<Document, DocumentError> {
        let document = self.factory.create(parent, changes)?;
        self.pipeline.register(parent, &document)?;
        Ok(document)
    }

    pub fn clone_with_items<K, V, I>(&self, parent: &Document, items: I) -> Result<Document, DocumentError>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.create_document(Some(parent), DocumentChanges::new().items(items))
    }

    pub fn clone_with_content(
        &self,
        parent: &Document,
        content: impl Into<Content>,
    ) -> Result<Document, DocumentError> {
        self.create_document(Some(parent), DocumentChanges::new().content(content))
    }

    /// Run `modules` against `inputs` inside this pipeline.
    ///
    /// Nested runs never publish to the document collection, so the
    /// pipeline's entry is the same before and after the call even when
    /// several run concurrently.
    pub fn run_modules(
        &self,
        modules: &[Arc<dyn Module>],
        inputs: &[Document],
    ) -> Result<Vec<Document>, PipelineError> {
        self.pipeline.execute_modules(
            self.engine,
            self.factory,
            modules,
            inputs.to_vec(),
            false,
        )
    }

    /// Run `modules` against one fresh document carrying `items`.
    pub fn run_modules_with_items<K, V, I>(
        &self,
        modules: &[Arc<dyn Module>],
        items: I,
    ) -> Result<Vec<Document>, PipelineError>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let seed = self.create_document(None, DocumentChanges::new().items(items))?;
        self.run_modules(modules, &[seed])
    }
}
