//! Immutable documents.
//!
//! A [`Document`] is a cheap handle to content plus layered [`Metadata`].
//! Documents are never mutated: every change goes through the
//! [`DocumentFactory`], which either creates a fresh root document or clones
//! an existing one with a new metadata layer on top.
//!
//! ## Identity
//!
//! - [`DocumentId`] is shared by a document and every clone made from it,
//!   so it identifies one *logical* document as it flows through a pipeline.
//! - [`Revision`] is unique per instance. Pipelines key their clone tree by
//!   revision (child → parent) since ids alone cannot tell clones apart.
//! - `source` records where the document came from (usually an absolute
//!   file path). It can be assigned once; clones of a sourced document keep
//!   the original source.

mod content;
mod custom;
mod factory;

pub use content::{Content, ContentReader, ContentStream};
pub use custom::CustomDocument;
pub(crate) use custom::{CustomConstructor, constructor};
pub use factory::{DocumentChanges, DocumentFactory};

use crate::meta::{FromValue, Metadata, MetadataError, Value};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("Invalid clone: {0}")]
    InvalidClone(String),
    #[error("Duplicate source {path} in pipeline {pipeline}")]
    DuplicateSource { path: String, pipeline: String },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Identity shared by a document and all of its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Process-unique number of one document instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Revision(u64);

static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

impl Revision {
    fn next() -> Self {
        Self(NEXT_REVISION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

struct DocumentInner {
    id: DocumentId,
    revision: Revision,
    source: String,
    content: Content,
    metadata: Metadata,
    custom: Option<Arc<dyn CustomDocument>>,
}

/// Shared handle to an immutable document.
#[derive(Clone)]
pub struct Document(Arc<DocumentInner>);

impl Document {
    pub(crate) fn from_parts(
        id: DocumentId,
        source: String,
        content: Content,
        metadata: Metadata,
        custom: Option<Arc<dyn CustomDocument>>,
    ) -> Self {
        Self(Arc::new(DocumentInner {
            id,
            revision: Revision::next(),
            source,
            content,
            metadata,
            custom,
        }))
    }

    pub fn id(&self) -> DocumentId {
        self.0.id
    }

    pub fn revision(&self) -> Revision {
        self.0.revision
    }

    /// Origin locator, empty when the document has none.
    pub fn source(&self) -> &str {
        &self.0.source
    }

    pub fn content(&self) -> &Content {
        &self.0.content
    }

    /// Content as UTF-8 text; see [`Content::read_text`].
    pub fn read_text(&self) -> std::io::Result<String> {
        self.0.content.read_text()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.0.metadata
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>, MetadataError> {
        self.0.metadata.get(key)
    }

    pub fn get_as<T: FromValue>(&self, key: &str) -> Result<Option<T>, MetadataError> {
        self.0.metadata.get_as(key)
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.0.metadata.string(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.metadata.contains_key(key)
    }

    /// The custom payload downcast to `T`, if this document carries one.
    pub fn custom<T: CustomDocument>(&self) -> Option<&T> {
        self.0.custom.as_deref()?.as_any().downcast_ref::<T>()
    }

    pub(crate) fn custom_payload(&self) -> Option<&Arc<dyn CustomDocument>> {
        self.0.custom.as_ref()
    }

    /// Reference identity.
    pub fn ptr_eq(a: &Document, b: &Document) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.0.id)
            .field("revision", &self.0.revision)
            .field("source", &self.0.source)
            .field("content", &self.0.content)
            .field("metadata", &self.0.metadata)
            .finish()
    }
}

/// Renders the source (or the id when there is none), for log lines.
impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.source.is_empty() {
            write!(f, "{}", self.0.id)
        } else {
            f.write_str(&self.0.source)
        }
    }
}
