use crate::document::Document;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Cross-pipeline document index: pipeline name → its current documents.
///
/// Read by modules through [`ExecutionContext::documents`](super::ExecutionContext::documents);
/// written only by the pipeline driver.
#[derive(Default)]
pub struct DocumentCollection {
    by_pipeline: RwLock<HashMap<String, Vec<Document>>>,
}

impl DocumentCollection {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Document>>> {
        self.by_pipeline.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Document>>> {
        self.by_pipeline.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Documents of `pipeline`, empty when it has not run yet.
    pub fn from_pipeline(&self, pipeline: &str) -> Vec<Document> {
        self.read().get(pipeline).cloned().unwrap_or_default()
    }

    /// Documents of every listed pipeline, in the order given.
    pub fn from_pipelines<'a>(&self, pipelines: impl IntoIterator<Item = &'a str>) -> Vec<Document> {
        let map = self.read();
        pipelines
            .into_iter()
            .filter_map(|name| map.get(name))
            .flatten()
            .cloned()
            .collect()
    }

    /// Every indexed document, grouped by pipeline name in sorted order.
    pub fn all(&self) -> Vec<Document> {
        let map = self.read();
        let mut names: Vec<_> = map.keys().collect();
        names.sort();
        names
            .into_iter()
            .flat_map(|name| map[name].iter().cloned())
            .collect()
    }

    /// Pipelines with an entry, sorted.
    pub fn pipeline_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains_pipeline(&self, pipeline: &str) -> bool {
        self.read().contains_key(pipeline)
    }

    pub(crate) fn set(&self, pipeline: &str, documents: Vec<Document>) {
        self.write().insert(pipeline.to_string(), documents);
    }

    pub(crate) fn remove(&self, pipeline: &str) {
        self.write().remove(pipeline);
    }

    pub(crate) fn clear(&self) {
        self.write().clear();
    }
}
