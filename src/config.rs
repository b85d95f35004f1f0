//! Build configuration.
//!
//! Loads `quire.toml`, layers it over the stock defaults, validates it and
//! turns it into a ready-to-run [`Engine`].
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! root = "."                # Relative to the config file's directory
//! input = ["input"]         # Later paths override earlier ones
//! output = "output"
//! clean_output = true       # Delete the output directory before each build
//!
//! [processing]
//! max_threads = 4           # Omit for auto = CPU cores
//!
//! [io]
//! retry_attempts = 3        # Retries for transient IO failures
//! retry_interval_ms = 100   # Grows linearly with each retry
//!
//! [cache]
//! enabled = true
//!
//! [metadata]                # Initial metadata of every document
//! SiteTitle = "My Site"
//!
//! [[pipelines]]
//! name = "Pages"
//! modules = [
//!     { module = "read-files", pattern = "**/*.md" },
//!     { module = "write-files", extension = "html" },
//! ]
//! ```
//!
//! ## Partial Configuration
//!
//! Only the keys being changed need to be present. Tables merge key by key;
//! arrays such as `input` and `pipelines` replace the default entirely.
//!
//! Unknown keys are rejected to catch typos early.
//!
//! ## Module Specs
//!
//! Every entry in a pipeline's `modules` list names its module with the
//! `module` tag:
//!
//! | `module` | Keys |
//! |----------|------|
//! | `read-files` | `pattern` |
//! | `write-files` | `extension`, `use_write_metadata`, `ignore_empty_content`, `filter` |
//! | `file-name` | `key`, `output_key`, `preserve_path`, `allowed` |
//! | `meta` | `key`, `value`, `only_if_missing` |
//! | `modules` | `modules` |
//! | `branch` | `modules`, `filter` |
//! | `concat-branch` | `modules`, `filter` |
//!
//! A `filter` is `{ key = "...", equals = ... }`: documents whose value for
//! `key` renders the same as `equals` match. Without `equals`, documents
//! that have the key at all match.

use crate::document::Document;
use crate::engine::Engine;
use crate::io::{FileSystem, RetryPolicy};
use crate::meta::{Metadata, Value};
use crate::module::Module;
use crate::modules::{
    Branch, ConcatBranch, DocumentPredicate, FileName, Meta, ModuleCollection, ReadFiles,
    WriteFiles,
};
use crate::pipeline::{ExecutionContext, Pipeline};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// File name looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "quire.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Contents of `quire.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuireConfig {
    /// Project root, relative to the config file's directory.
    pub root: String,
    /// Input paths, relative to `root`. Later paths take precedence.
    pub input: Vec<String>,
    /// Output path, relative to `root`.
    pub output: String,
    /// Delete the output directory before each build.
    pub clean_output: bool,
    pub processing: ProcessingConfig,
    pub io: IoConfig,
    pub cache: CacheConfig,
    /// Initial metadata given to every root document.
    pub metadata: toml::Table,
    pub pipelines: Vec<PipelineConfig>,
}

impl Default for QuireConfig {
    fn default() -> Self {
        Self {
            root: ".".to_string(),
            input: vec!["input".to_string()],
            output: "output".to_string(),
            clean_output: true,
            processing: ProcessingConfig::default(),
            io: IoConfig::default(),
            cache: CacheConfig::default(),
            metadata: toml::Table::new(),
            pipelines: Vec::new(),
        }
    }
}

impl QuireConfig {
    /// Check values that parse fine but cannot be run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.is_empty() {
            return Err(ConfigError::Validation(
                "input must list at least one path".into(),
            ));
        }
        if self.output.trim().is_empty() {
            return Err(ConfigError::Validation("output must not be empty".into()));
        }
        if self.processing.max_threads == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_threads must be at least 1".into(),
            ));
        }
        if self.pipelines.is_empty() {
            return Err(ConfigError::Validation(
                "at least one [[pipelines]] entry is required".into(),
            ));
        }

        let mut names = HashSet::new();
        for pipeline in &self.pipelines {
            if let Some(name) = &pipeline.name {
                if name.trim().is_empty() {
                    return Err(ConfigError::Validation(
                        "pipeline names must not be empty".into(),
                    ));
                }
                if !names.insert(name.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "pipeline {name} is defined twice"
                    )));
                }
            }
            for spec in &pipeline.modules {
                spec.validate()?;
            }
        }
        Ok(())
    }

    /// Build an engine with every configured pipeline registered.
    ///
    /// `base_dir` is the directory `root` is resolved against, normally the
    /// config file's parent.
    pub fn build_engine(&self, base_dir: &Path) -> Result<Engine, ConfigError> {
        let file_system = FileSystem::new(base_dir.join(&self.root))
            .with_input_paths(&self.input)
            .with_output_path(&self.output)
            .with_retry(RetryPolicy {
                attempts: self.io.retry_attempts,
                interval: Duration::from_millis(self.io.retry_interval_ms),
            });

        let metadata = Metadata::new(
            self.metadata
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_toml(v.clone()))),
        );

        let mut engine = Engine::new(file_system).with_initial_metadata(metadata);
        engine.set_cache_enabled(self.cache.enabled);
        engine.set_clean_output_on_execute(self.clean_output);

        for pipeline in &self.pipelines {
            let modules: Vec<Arc<dyn Module>> =
                pipeline.modules.iter().map(ModuleSpec::build).collect();
            match &pipeline.name {
                Some(name) => {
                    engine
                        .add_pipeline(Pipeline::new(name.clone(), modules))
                        .map_err(|e| ConfigError::Validation(e.to_string()))?;
                }
                None => {
                    engine.add_unnamed_pipeline(modules);
                }
            }
        }
        Ok(engine)
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Worker threads for per-document work. When absent, all cores.
    /// Values larger than the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_threads: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_threads.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Retry settings for transient file-system failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IoConfig {
    pub retry_attempts: u32,
    pub retry_interval_ms: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            retry_attempts: policy.attempts,
            retry_interval_ms: policy.interval.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// One `[[pipelines]]` entry. Unnamed pipelines become `Pipeline N`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub modules: Vec<ModuleSpec>,
}

/// Matches documents by one metadata value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<toml::Value>,
}

impl Condition {
    pub fn matches(&self, doc: &Document) -> bool {
        match &self.equals {
            None => doc.contains_key(&self.key),
            Some(expected) => {
                doc.string(&self.key) == Some(Value::from_toml(expected.clone()).to_string())
            }
        }
    }

    fn predicate(&self) -> DocumentPredicate {
        let condition = self.clone();
        Arc::new(move |doc: &Document, _: &ExecutionContext<'_>| condition.matches(doc))
    }
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A built-in module as written in a pipeline's `modules` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "module", rename_all = "kebab-case", deny_unknown_fields)]
pub enum ModuleSpec {
    ReadFiles {
        pattern: String,
    },
    WriteFiles {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extension: Option<String>,
        #[serde(default = "default_true", skip_serializing_if = "is_true")]
        use_write_metadata: bool,
        #[serde(default = "default_true", skip_serializing_if = "is_true")]
        ignore_empty_content: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<Condition>,
    },
    FileName {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_key: Option<String>,
        /// Also set `WritePath`. Defaults to on, or off with `output_key`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preserve_path: Option<bool>,
        /// Reserved characters to keep, e.g. `"_."`.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        allowed: String,
    },
    Meta {
        key: String,
        value: toml::Value,
        #[serde(default, skip_serializing_if = "is_false")]
        only_if_missing: bool,
    },
    Modules {
        modules: Vec<ModuleSpec>,
    },
    Branch {
        modules: Vec<ModuleSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<Condition>,
    },
    ConcatBranch {
        modules: Vec<ModuleSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<Condition>,
    },
}

impl ModuleSpec {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ModuleSpec::ReadFiles { pattern } => {
                glob::Pattern::new(pattern).map_err(|e| {
                    ConfigError::Validation(format!("invalid read-files pattern {pattern:?}: {e}"))
                })?;
            }
            ModuleSpec::Meta { key, .. } if key.trim().is_empty() => {
                return Err(ConfigError::Validation("meta key must not be empty".into()));
            }
            ModuleSpec::FileName {
                key, output_key, ..
            } if [key, output_key]
                .into_iter()
                .flatten()
                .any(|k| k.trim().is_empty()) =>
            {
                return Err(ConfigError::Validation(
                    "file-name keys must not be empty".into(),
                ));
            }
            ModuleSpec::Modules { modules }
            | ModuleSpec::Branch { modules, .. }
            | ModuleSpec::ConcatBranch { modules, .. } => {
                for child in modules {
                    child.validate()?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn build(&self) -> Arc<dyn Module> {
        let children = |modules: &[ModuleSpec]| -> Vec<Arc<dyn Module>> {
            modules.iter().map(ModuleSpec::build).collect()
        };
        match self {
            ModuleSpec::ReadFiles { pattern } => Arc::new(ReadFiles::new(pattern.clone())),
            ModuleSpec::WriteFiles {
                extension,
                use_write_metadata,
                ignore_empty_content,
                filter,
            } => {
                let mut module = match extension {
                    Some(ext) => WriteFiles::with_extension(ext.clone()),
                    None => WriteFiles::new(),
                }
                .use_write_metadata(*use_write_metadata)
                .ignore_empty_content(*ignore_empty_content);
                if let Some(condition) = filter {
                    let condition = condition.clone();
                    module = module.filter(move |doc, _| condition.matches(doc));
                }
                Arc::new(module)
            }
            ModuleSpec::FileName {
                key,
                output_key,
                preserve_path,
                allowed,
            } => {
                let mut module = match key {
                    Some(key) => FileName::from_key(key.clone()),
                    None => FileName::new(),
                };
                if let Some(output_key) = output_key {
                    module = module.with_output_key(output_key.clone());
                }
                if let Some(preserve) = preserve_path {
                    module = module.preserve_path(*preserve);
                }
                Arc::new(module.with_allowed_characters(allowed.chars()))
            }
            ModuleSpec::Meta {
                key,
                value,
                only_if_missing,
            } => {
                let module = Meta::new(key.clone(), Value::from_toml(value.clone()));
                if *only_if_missing {
                    Arc::new(module.only_if_missing())
                } else {
                    Arc::new(module)
                }
            }
            ModuleSpec::Modules { modules } => Arc::new(ModuleCollection::new(children(modules))),
            ModuleSpec::Branch { modules, filter } => {
                let branch = Branch::new(children(modules));
                Arc::new(match filter {
                    Some(condition) => branch.with_predicate(condition.predicate()),
                    None => branch,
                })
            }
            ModuleSpec::ConcatBranch { modules, filter } => {
                let branch = ConcatBranch::new(children(modules));
                Arc::new(match filter {
                    Some(condition) => branch.with_predicate(condition.predicate()),
                    None => branch,
                })
            }
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(QuireConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Parse config text, merge it over the stock defaults and validate.
pub fn parse_config(text: &str) -> Result<QuireConfig, ConfigError> {
    let overlay: toml::Value = toml::from_str(text)?;
    let config: QuireConfig = merge_toml(stock_defaults_value(), overlay).try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load and validate the config file at `path`.
pub fn load_config(path: &Path) -> Result<QuireConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text)
}

/// Returns a fully-commented stock `quire.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Quire Configuration
# ===================
# Values shown below are the defaults, except for the example pipeline.
# Unknown keys will cause an error.

# Project root, relative to this file's directory.
root = "."

# Input directories, relative to root. When the same file exists in several
# of them, the last one listed wins.
input = ["input"]

# Output directory, relative to root.
output = "output"

# Delete the output directory before each build.
clean_output = true

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Worker threads for per-document work.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_threads = 4

# ---------------------------------------------------------------------------
# File system
# ---------------------------------------------------------------------------
[io]
# Transient failures (locked or busy files) are retried this many times,
# waiting retry_interval_ms, then twice that, and so on.
retry_attempts = 3
retry_interval_ms = 100

# ---------------------------------------------------------------------------
# Execution cache
# ---------------------------------------------------------------------------
[cache]
# Keep module results between builds of the same process.
enabled = true

# ---------------------------------------------------------------------------
# Initial metadata, visible on every document
# ---------------------------------------------------------------------------
[metadata]
# SiteTitle = "My Site"

# ---------------------------------------------------------------------------
# Pipelines run in the order listed. Modules:
#   read-files     pattern
#   write-files    extension, use_write_metadata, ignore_empty_content, filter
#   file-name      key, output_key, preserve_path, allowed
#   meta           key, value, only_if_missing
#   modules        modules
#   branch         modules, filter
#   concat-branch  modules, filter
# A filter is { key = "...", equals = ... }.
# ---------------------------------------------------------------------------
[[pipelines]]
name = "Pages"
modules = [
    { module = "read-files", pattern = "**/*.md" },
    { module = "file-name" },
    { module = "write-files" },
]
"##
}
