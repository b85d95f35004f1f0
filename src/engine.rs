//! Run orchestration across every registered pipeline.
//!
//! An [`Engine`] owns the initial metadata, the pipelines in registration
//! order, the cross-pipeline [`DocumentCollection`], the [`FileSystem`] and
//! the per-module execution caches. [`Engine::execute`] performs one full
//! run:
//!
//! 1. **Setup**: at least one input path and one pipeline must exist; the
//!    output directory is cleaned when configured. Failures here are
//!    [`EngineError::Configuration`] / [`EngineError::Setup`].
//! 2. **Reset**: the document collection is cleared and cache entries are
//!    marked unused.
//! 3. **Pipelines** run in registration order. A pipeline can read the
//!    published output of earlier pipelines; later ones are not visible yet.
//!    The first fault aborts the run with [`EngineError::Execution`].
//! 4. **Cleanup**: cache entries that no module asked for are evicted.
//!
//! The collection stays queryable after the run until the next `execute`.

use crate::cache::{CacheStats, ExecutionCacheManager};
use crate::io::{FileSystem, FileSystemError};
use crate::meta::Metadata;
use crate::module::Module;
use crate::pipeline::{DocumentCollection, Pipeline, PipelineError};
use serde::Serialize;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Process exit codes reported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Normal = 0,
    UnhandledError = 1,
    CommandLineError = 2,
    ConfigurationError = 3,
    ExecutionError = 4,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Setup failed: {0}")]
    Setup(#[from] FileSystemError),
    #[error(transparent)]
    Execution(#[from] PipelineError),
}

impl EngineError {
    /// Setup problems happen before any pipeline ran; execution errors during.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            EngineError::Configuration(_) | EngineError::Setup(_) => ExitCode::ConfigurationError,
            EngineError::Execution(_) => ExitCode::ExecutionError,
        }
    }
}

/// Progress notifications sent while a run executes.
#[derive(Debug, Clone)]
pub enum RunEvent {
    PipelineStarted {
        pipeline: String,
        position: usize,
        total: usize,
    },
    ModuleCompleted {
        pipeline: String,
        index: usize,
        module: String,
        documents: usize,
        elapsed: Duration,
    },
    PipelineCompleted {
        pipeline: String,
        documents: usize,
        elapsed: Duration,
    },
    PipelineFaulted {
        pipeline: String,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub name: String,
    pub modules: usize,
    pub documents: usize,
    pub elapsed_ms: u64,
}

/// Result of a successful run, written by `build --summary`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub pipelines: Vec<PipelineSummary>,
    pub cache: CacheStats,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn total_documents(&self) -> usize {
        self.pipelines.iter().map(|p| p.documents).sum()
    }
}

pub struct Engine {
    initial_metadata: Metadata,
    pipelines: Vec<Pipeline>,
    documents: DocumentCollection,
    file_system: FileSystem,
    caches: ExecutionCacheManager,
    clean_output_on_execute: bool,
    events: Option<Sender<RunEvent>>,
}

impl Engine {
    pub fn new(file_system: FileSystem) -> Self {
        Self {
            initial_metadata: Metadata::empty(),
            pipelines: Vec::new(),
            documents: DocumentCollection::new(),
            file_system,
            caches: ExecutionCacheManager::default(),
            clean_output_on_execute: true,
            events: None,
        }
    }

    pub fn with_initial_metadata(mut self, metadata: Metadata) -> Self {
        self.initial_metadata = metadata;
        self
    }

    pub fn initial_metadata(&self) -> &Metadata {
        &self.initial_metadata
    }

    /// Register a pipeline. Names must be unique.
    pub fn add_pipeline(&mut self, pipeline: Pipeline) -> Result<&Pipeline, EngineError> {
        if pipeline.name().is_empty() {
            return Err(EngineError::Configuration(
                "pipeline name must not be empty".into(),
            ));
        }
        if self.pipeline(pipeline.name()).is_some() {
            return Err(EngineError::Configuration(format!(
                "a pipeline named {} already exists",
                pipeline.name()
            )));
        }
        self.pipelines.push(pipeline);
        Ok(&self.pipelines[self.pipelines.len() - 1])
    }

    /// Register a pipeline named `Pipeline N` after its position.
    pub fn add_unnamed_pipeline(
        &mut self,
        modules: impl IntoIterator<Item = Arc<dyn Module>>,
    ) -> &Pipeline {
        let mut n = self.pipelines.len() + 1;
        while self.pipeline(&format!("Pipeline {n}")).is_some() {
            n += 1;
        }
        self.pipelines
            .push(Pipeline::new(format!("Pipeline {n}"), modules));
        &self.pipelines[self.pipelines.len() - 1]
    }

    pub fn pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.name() == name)
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn documents(&self) -> &DocumentCollection {
        &self.documents
    }

    pub fn file_system(&self) -> &FileSystem {
        &self.file_system
    }

    pub fn file_system_mut(&mut self) -> &mut FileSystem {
        &mut self.file_system
    }

    pub fn caches(&self) -> &ExecutionCacheManager {
        &self.caches
    }

    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.caches.set_enabled(enabled);
    }

    pub fn set_clean_output_on_execute(&mut self, clean: bool) {
        self.clean_output_on_execute = clean;
    }

    /// Send [`RunEvent`]s to `sender` during [`execute`](Self::execute).
    pub fn set_event_sender(&mut self, sender: Sender<RunEvent>) {
        self.events = Some(sender);
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            // A departed receiver just means nobody is watching.
            let _ = tx.send(event);
        }
    }

    fn setup(&self) -> Result<(), EngineError> {
        if self.file_system.input_paths().is_empty() {
            return Err(EngineError::Configuration(
                "at least one input path is required".into(),
            ));
        }
        if self.pipelines.is_empty() {
            return Err(EngineError::Configuration("no pipelines are defined".into()));
        }
        if self.clean_output_on_execute {
            debug!(output = %self.file_system.output_path().display(), "cleaning output");
            self.file_system.clean_output()?;
        }
        Ok(())
    }

    /// Execute every pipeline once.
    pub fn execute(&self) -> Result<RunSummary, EngineError> {
        self.setup()?;

        self.documents.clear();
        self.caches.reset_entry_hits();

        let start = Instant::now();
        let total = self.pipelines.len();
        info!(pipelines = total, "executing pipelines");

        let mut summaries = Vec::with_capacity(total);
        for (position, pipeline) in self.pipelines.iter().enumerate() {
            self.emit(RunEvent::PipelineStarted {
                pipeline: pipeline.name().to_string(),
                position: position + 1,
                total,
            });
            let pipeline_start = Instant::now();
            match pipeline.execute(self) {
                Ok(documents) => {
                    let elapsed = pipeline_start.elapsed();
                    self.emit(RunEvent::PipelineCompleted {
                        pipeline: pipeline.name().to_string(),
                        documents: documents.len(),
                        elapsed,
                    });
                    summaries.push(PipelineSummary {
                        name: pipeline.name().to_string(),
                        modules: pipeline.modules().len(),
                        documents: documents.len(),
                        elapsed_ms: elapsed.as_millis() as u64,
                    });
                }
                Err(e) => {
                    self.emit(RunEvent::PipelineFaulted {
                        pipeline: pipeline.name().to_string(),
                        error: e.to_string(),
                    });
                    return Err(e.into());
                }
            }
        }

        let evicted = self.caches.clear_unhit_entries();
        let elapsed = start.elapsed();
        info!(
            pipelines = total,
            evicted,
            elapsed_ms = elapsed.as_millis() as u64,
            "run completed"
        );

        Ok(RunSummary {
            pipelines: summaries,
            cache: self.caches.stats(),
            elapsed_ms: elapsed.as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::execute_fn;
    use crate::test_helpers::{CountModule, engine_with};
    use tempfile::TempDir;

    // =========================================================================
    // Pipeline registration
    // =========================================================================

    #[test]
    fn duplicate_pipeline_name_is_rejected() {
        let mut engine = engine_with(vec![]);
        let err = engine
            .add_pipeline(Pipeline::new("Pipeline 1", Vec::new()))
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert_eq!(err.exit_code(), ExitCode::ConfigurationError);
    }

    #[test]
    fn empty_pipeline_name_is_rejected() {
        let mut engine = Engine::new(FileSystem::new("."));
        assert!(engine.add_pipeline(Pipeline::new("", Vec::new())).is_err());
    }

    #[test]
    fn unnamed_pipelines_skip_taken_names() {
        let mut engine = Engine::new(FileSystem::new("."));
        engine
            .add_pipeline(Pipeline::new("Pipeline 2", Vec::new()))
            .unwrap();
        assert_eq!(engine.add_unnamed_pipeline(Vec::new()).name(), "Pipeline 3");
        assert_eq!(engine.add_unnamed_pipeline(Vec::new()).name(), "Pipeline 4");
        let names: Vec<_> = engine.pipelines().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["Pipeline 2", "Pipeline 3", "Pipeline 4"]);
    }

    // =========================================================================
    // Setup
    // =========================================================================

    #[test]
    fn no_pipelines_is_a_configuration_error() {
        let engine = Engine::new(FileSystem::new("."));
        let err = engine.execute().unwrap_err();
        assert_eq!(err.exit_code(), ExitCode::ConfigurationError);
        assert!(err.to_string().contains("no pipelines"));
    }

    #[test]
    fn no_input_paths_is_a_configuration_error() {
        let mut engine = engine_with(vec![]);
        *engine.file_system_mut() =
            FileSystem::new(".").with_input_paths(Vec::<String>::new());
        let err = engine.execute().unwrap_err();
        assert_eq!(err.exit_code().code(), 3);
    }

    #[test]
    fn output_is_cleaned_before_run() {
        let tmp = TempDir::new().unwrap();
        let stale = tmp.path().join("output/stale.html");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "old").unwrap();

        let mut engine = Engine::new(FileSystem::new(tmp.path()));
        engine.add_unnamed_pipeline(Vec::new());
        engine.execute().unwrap();
        assert!(!stale.exists());

        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "old").unwrap();
        engine.set_clean_output_on_execute(false);
        engine.execute().unwrap();
        assert!(stale.exists());
    }

    // =========================================================================
    // Execution
    // =========================================================================

    #[test]
    fn seed_carries_initial_metadata() {
        let mut engine = Engine::new(FileSystem::new("."))
            .with_initial_metadata(Metadata::new([("SiteTitle", "Quire")]));
        engine.set_clean_output_on_execute(false);
        engine.add_unnamed_pipeline([CountModule::new("A", 0) as Arc<dyn Module>]);

        engine.execute().unwrap();

        let doc = &engine.documents().from_pipeline("Pipeline 1")[0];
        assert_eq!(doc.string("SiteTitle").as_deref(), Some("Quire"));
        assert_eq!(doc.get_as::<i64>("A").unwrap(), Some(1));
    }

    #[test]
    fn summary_lists_pipelines_in_order() {
        let mut engine = engine_with(vec![CountModule::new("A", 2)]);
        engine
            .add_pipeline(Pipeline::new(
                "Assets",
                [execute_fn("Empty", |_, _| Ok(Vec::new()))],
            ))
            .unwrap();

        let summary = engine.execute().unwrap();

        let names: Vec<_> = summary.pipelines.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Pipeline 1", "Assets"]);
        assert_eq!(summary.total_documents(), 3);
        assert_eq!(summary.pipelines[0].modules, 1);
    }

    #[test]
    fn rerun_replaces_previous_documents() {
        let engine = engine_with(vec![CountModule::new("A", 0)]);
        engine.execute().unwrap();
        engine.execute().unwrap();
        let docs = engine.documents().from_pipeline("Pipeline 1");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_as::<i64>("A").unwrap(), Some(2));
    }

    #[test]
    fn execution_error_maps_to_exit_code_four() {
        let engine = engine_with(vec![execute_fn("Fail", |_, _| Err("nope".into()))]);
        let err = engine.execute().unwrap_err();
        assert!(matches!(err, EngineError::Execution(_)));
        assert_eq!(err.exit_code().code(), 4);
    }
}
