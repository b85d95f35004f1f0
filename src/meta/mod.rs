//! Layered, immutable document metadata.
//!
//! Every document carries a [`Metadata`] stack. Each pipeline stage that
//! touches a document pushes one new layer holding only the keys it added or
//! overrode; lookups scan from the most recent layer down and the first hit
//! wins. Layers are shared between every document cloned from the same
//! parent, so cloning is O(1) no matter how deep the stack has grown.
//!
//! ```text
//! layer 3   { Title: "Hello" }                  ← FileName stage
//! layer 2   { RelativeFilePath: "a/hello.md" }   ← ReadFiles stage
//! layer 1   { SiteTitle: "Example" }            ← engine initial metadata
//! ```
//!
//! Values are [`Value`]s. A value may be [deferred](Deferred): instead of a
//! literal it holds a computation that runs on every read with the key and
//! the metadata instance being read. Resolved values are never cached.
//!
//! Typed access goes through [`FromValue`], which performs the reasonable
//! conversions (numeric widening, string parsing, element-wise list
//! conversion) and fails with [`MetadataError::Conversion`] otherwise.

mod convert;
mod metadata;
mod value;

pub use convert::FromValue;
pub use metadata::Metadata;
pub use value::{Deferred, DeferredValue, Value};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetadataError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("The key {0} was not found in metadata, use get_or() to provide a default value")]
    KeyNotFound(String),
    #[error("Cannot convert {value} to {target}")]
    Conversion { value: String, target: &'static str },
}
