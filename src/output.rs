//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Build
//!
//! ```text
//! [1/2] Pages
//!     000 ReadFiles → 12 documents (4 ms)
//!     001 FileName → 12 documents (0 ms)
//!     002 WriteFiles → 12 documents (3 ms)
//! Pages: 12 documents (8 ms)
//! [2/2] Assets
//!     000 ReadFiles → 3 documents (1 ms)
//! Assets: 3 documents (1 ms)
//!
//! Built 15 documents in 2 pipelines (9 ms)
//! Cache: 12 cached, 3 computed (15 total)
//! ```
//!
//! ## Check
//!
//! ```text
//! Input
//!     /site/input
//! Output
//!     /site/output
//! Pipelines
//! 001 Pages
//!     ReadFiles
//!     Branch
//!         FileName
//!     WriteFiles
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for
//! testability and, where the binary prints it whole, a `print_*` wrapper
//! that writes to stdout. Format functions are pure: no I/O, no side effects.

use crate::config::{ModuleSpec, QuireConfig};
use crate::engine::{RunEvent, RunSummary};
use std::path::Path;
use std::time::Duration;

fn millis(elapsed: &Duration) -> u128 {
    elapsed.as_millis()
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

// ============================================================================
// Build
// ============================================================================

/// Lines for one progress event.
pub fn format_run_event(event: &RunEvent) -> Vec<String> {
    match event {
        RunEvent::PipelineStarted {
            pipeline,
            position,
            total,
        } => vec![format!("[{position}/{total}] {pipeline}")],
        RunEvent::ModuleCompleted {
            index,
            module,
            documents,
            elapsed,
            ..
        } => vec![format!(
            "    {index:03} {module} → {} ({} ms)",
            plural(*documents, "document"),
            millis(elapsed)
        )],
        RunEvent::PipelineCompleted {
            pipeline,
            documents,
            elapsed,
        } => vec![format!(
            "{pipeline}: {} ({} ms)",
            plural(*documents, "document"),
            millis(elapsed)
        )],
        RunEvent::PipelineFaulted { pipeline, error } => {
            vec![format!("{pipeline}: FAILED"), format!("    {error}")]
        }
    }
}

/// Closing lines of a successful build.
pub fn format_summary(summary: &RunSummary) -> Vec<String> {
    vec![
        String::new(),
        format!(
            "Built {} in {} ({} ms)",
            plural(summary.total_documents(), "document"),
            plural(summary.pipelines.len(), "pipeline"),
            summary.elapsed_ms
        ),
        format!("Cache: {}", summary.cache),
    ]
}

pub fn print_summary(summary: &RunSummary) {
    for line in format_summary(summary) {
        println!("{line}");
    }
}

// ============================================================================
// Check
// ============================================================================

fn module_label(spec: &ModuleSpec) -> String {
    match spec {
        ModuleSpec::ReadFiles { pattern } => format!("ReadFiles {pattern}"),
        ModuleSpec::WriteFiles {
            extension: Some(ext),
            ..
        } => format!("WriteFiles .{}", ext.trim_start_matches('.')),
        ModuleSpec::WriteFiles { .. } => "WriteFiles".to_string(),
        ModuleSpec::FileName { key: Some(key), .. } => format!("FileName from {key}"),
        ModuleSpec::FileName { .. } => "FileName".to_string(),
        ModuleSpec::Meta { key, .. } => format!("Meta {key}"),
        ModuleSpec::Modules { .. } => "ModuleCollection".to_string(),
        ModuleSpec::Branch { filter, .. } => match filter {
            Some(f) => format!("Branch where {}", f.key),
            None => "Branch".to_string(),
        },
        ModuleSpec::ConcatBranch { filter, .. } => match filter {
            Some(f) => format!("ConcatBranch where {}", f.key),
            None => "ConcatBranch".to_string(),
        },
    }
}

fn module_tree(specs: &[ModuleSpec], depth: usize, lines: &mut Vec<String>) {
    let indent = "    ".repeat(depth);
    for spec in specs {
        lines.push(format!("{indent}{}", module_label(spec)));
        if let ModuleSpec::Modules { modules }
        | ModuleSpec::Branch { modules, .. }
        | ModuleSpec::ConcatBranch { modules, .. } = spec
        {
            module_tree(modules, depth + 1, lines);
        }
    }
}

/// Resolved paths and the module tree of every pipeline.
pub fn format_config_check(config: &QuireConfig, root: &Path) -> Vec<String> {
    let mut lines = vec!["Input".to_string()];
    for input in &config.input {
        lines.push(format!("    {}", root.join(input).display()));
    }
    lines.push("Output".to_string());
    lines.push(format!("    {}", root.join(&config.output).display()));

    lines.push("Pipelines".to_string());
    for (i, pipeline) in config.pipelines.iter().enumerate() {
        let name = pipeline
            .name
            .clone()
            .unwrap_or_else(|| format!("Pipeline {}", i + 1));
        lines.push(format!("{:03} {name}", i + 1));
        module_tree(&pipeline.modules, 1, &mut lines);
    }
    lines
}

pub fn print_config_check(config: &QuireConfig, root: &Path) {
    for line in format_config_check(config, root) {
        println!("{line}");
    }
}
