use super::{Content, CustomConstructor, CustomDocument, Document, DocumentError, DocumentId};
use crate::meta::{Metadata, Value};
use std::sync::Arc;

/// What a creation call changes relative to its parent.
///
/// ```
/// use quire::document::DocumentChanges;
///
/// let changes = DocumentChanges::new()
///     .source("/site/input/about.md")
///     .content("# About")
///     .item("Title", "About");
/// ```
#[derive(Default)]
pub struct DocumentChanges {
    source: Option<String>,
    content: Option<Content>,
    items: Vec<(String, Value)>,
}

impl DocumentChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn content(mut self, content: impl Into<Content>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn item(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.items.push((key.into(), value.into()));
        self
    }

    pub fn items<K, V, I>(mut self, items: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.items
            .extend(items.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

/// Creates and clones documents.
///
/// Root documents start from the initial metadata; clones keep their
/// parent's id and push one metadata layer.
#[derive(Clone)]
pub struct DocumentFactory {
    initial: Metadata,
    custom: Option<CustomConstructor>,
    as_new_documents: bool,
}

impl DocumentFactory {
    pub fn new(initial: Metadata) -> Self {
        Self {
            initial,
            custom: None,
            as_new_documents: false,
        }
    }

    /// Attach a fresh `T::default()` payload to every root document.
    pub fn with_custom_documents<T: CustomDocument + Default>(mut self) -> Self {
        self.custom = Some(super::constructor::<T>());
        self
    }

    pub(crate) fn with_constructor(mut self, custom: Option<CustomConstructor>) -> Self {
        self.custom = custom;
        self
    }

    /// Ignore parents: every creation yields a fresh root document.
    pub fn as_new_documents(mut self, enabled: bool) -> Self {
        self.as_new_documents = enabled;
        self
    }

    pub fn initial_metadata(&self) -> &Metadata {
        &self.initial
    }

    /// A fresh root: new id, empty source and content, initial metadata.
    pub fn new_document(&self) -> Document {
        Document::from_parts(
            DocumentId::new(),
            String::new(),
            Content::Empty,
            self.initial.clone(),
            self.custom.as_ref().map(|ctor| ctor()),
        )
    }

    /// Create a root document (`parent` is `None`) or clone `parent`.
    ///
    /// Clones keep the parent's id; the source is only taken from `changes`
    /// when the parent has none, and the content only when `changes`
    /// supplies one.
    pub fn create(
        &self,
        parent: Option<&Document>,
        changes: DocumentChanges,
    ) -> Result<Document, DocumentError> {
        let DocumentChanges {
            source,
            content,
            items,
        } = changes;

        let parent = if self.as_new_documents { None } else { parent };
        let Some(parent) = parent else {
            return Ok(Document::from_parts(
                DocumentId::new(),
                source.unwrap_or_default(),
                content.unwrap_or_default(),
                self.initial.with_overrides(items),
                self.custom.as_ref().map(|ctor| ctor()),
            ));
        };

        let custom = match parent.custom_payload() {
            Some(payload) => Some(clone_payload(payload)?),
            None => None,
        };
        let source = if parent.source().is_empty() {
            source.unwrap_or_default()
        } else {
            parent.source().to_string()
        };

        Ok(Document::from_parts(
            parent.id(),
            source,
            content.unwrap_or_else(|| parent.content().clone()),
            parent.metadata().with_overrides(items),
            custom,
        ))
    }
}

fn clone_payload(
    payload: &Arc<dyn CustomDocument>,
) -> Result<Arc<dyn CustomDocument>, DocumentError> {
    let cloned = Arc::clone(payload).clone_custom().ok_or_else(|| {
        DocumentError::InvalidClone("custom document clone returned nothing".into())
    })?;
    if std::ptr::addr_eq(Arc::as_ptr(&cloned), Arc::as_ptr(payload)) {
        return Err(DocumentError::InvalidClone(
            "custom document clone returned the same instance".into(),
        ));
    }
    Ok(cloned)
}
