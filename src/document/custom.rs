use std::any::Any;
use std::sync::Arc;

/// A typed payload carried alongside a document's content and metadata.
///
/// Pipelines configured with
/// [`with_custom_documents`](crate::pipeline::Pipeline::with_custom_documents)
/// attach a fresh `T::default()` to every root document and call
/// [`clone_custom`](Self::clone_custom) whenever a document is cloned.
///
/// The clone must be a new allocation. Returning `None` or `self` fails the
/// creation with [`DocumentError::InvalidClone`](super::DocumentError::InvalidClone).
///
/// ```
/// use quire::document::CustomDocument;
/// use std::any::Any;
/// use std::sync::Arc;
///
/// #[derive(Default, Clone)]
/// struct Page { weight: u32 }
///
/// impl CustomDocument for Page {
///     fn clone_custom(self: Arc<Self>) -> Option<Arc<dyn CustomDocument>> {
///         Some(Arc::new((*self).clone()))
///     }
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
/// }
/// ```
pub trait CustomDocument: Any + Send + Sync {
    fn clone_custom(self: Arc<Self>) -> Option<Arc<dyn CustomDocument>>;

    fn as_any(&self) -> &dyn Any;
}

pub(crate) type CustomConstructor = Arc<dyn Fn() -> Arc<dyn CustomDocument> + Send + Sync>;

pub(crate) fn constructor<T: CustomDocument + Default>() -> CustomConstructor {
    Arc::new(|| Arc::new(T::default()) as Arc<dyn CustomDocument>)
}
