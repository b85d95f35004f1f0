//! # Quire
//!
//! A pipeline-driven static content generator. Documents (immutable
//! content plus layered metadata) flow through named pipelines of modules;
//! each module turns a list of documents into a new list.
//!
//! # Architecture: Pipelines of Modules
//!
//! ```text
//! quire.toml ──► Engine ──► Pipeline "Pages" ──► ReadFiles → FileName → WriteFiles
//!                      └──► Pipeline "Feed"  ──► (reads "Pages" output) → …
//! ```
//!
//! Pipelines run one after another in registration order. Each publishes its
//! final output to a shared [`pipeline::DocumentCollection`], so later
//! pipelines can build on earlier ones (a feed from the pages, an index
//! from the posts). Within a module, per-document work runs on the rayon pool.
//!
//! Documents are never mutated. Every change produces a clone with a new
//! metadata layer on top of its parent's, which keeps clones cheap and makes
//! sharing documents across threads and pipelines safe.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`meta`] | Layered, immutable metadata store and value conversions |
//! | [`document`] | Documents, content, custom payloads and the document factory |
//! | [`module`] | The `Module` trait and closure modules |
//! | [`modules`] | Built-in modules: control flow, metadata, file IO |
//! | [`pipeline`] | Pipeline execution, per-run bookkeeping, execution context |
//! | [`engine`] | Run orchestration, progress events, exit codes |
//! | [`io`] | Input/output path resolution with retry on transient failures |
//! | [`cache`] | Per-module execution caches keyed by SHA-256 fingerprints |
//! | [`keys`] | Well-known metadata key names |
//! | [`naming`] | URL-safe file name optimization |
//! | [`config`] | `quire.toml` loading, validation, merging and engine construction |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Immutable Documents, Layered Metadata
//!
//! A clone shares its parent's metadata layers and adds one more on top.
//! Lookups walk from the newest layer down, so overriding a key never copies
//! the rest. Values can be deferred: computed on every read against the
//! document that holds them.
//!
//! ## Sources Are Unique Per Run
//!
//! A pipeline tracks every source assigned during a run. Two documents
//! claiming the same source fail the run, because they would otherwise
//! overwrite each other's output.
//!
//! ## Caches Survive Between Runs
//!
//! Each module instance owns an execution cache that lives as long as the
//! engine. Entries not touched during a run are evicted at its end, so a
//! long-lived engine only keeps what is still relevant.

pub mod cache;
pub mod config;
pub mod document;
pub mod engine;
pub mod io;
pub mod keys;
pub mod meta;
pub mod module;
pub mod modules;
pub mod naming;
pub mod output;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod test_helpers;
