//! The pipeline stage contract.
//!
//! A [`Module`] receives the previous stage's documents and returns a new
//! list. It never mutates its inputs; new or changed documents are created
//! through the [`ExecutionContext`]. Returning an error faults the enclosing
//! pipeline.
//!
//! Modules may process their inputs in parallel (the built-ins use rayon)
//! but every module states whether its output preserves input order.

use crate::document::Document;
use crate::pipeline::ExecutionContext;
use std::sync::Arc;

/// Error type returned by module bodies. Anything `?`-convertible works.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub trait Module: Send + Sync {
    /// Display name used in logs, progress output and errors.
    fn name(&self) -> &str;

    fn execute(
        &self,
        inputs: &[Document],
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<Document>, BoxError>;
}

/// A module backed by a closure. See [`execute_fn`].
pub struct ExecuteFn<F> {
    name: String,
    f: F,
}

impl<F> Module for ExecuteFn<F>
where
    F: Fn(&[Document], &ExecutionContext<'_>) -> Result<Vec<Document>, BoxError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        inputs: &[Document],
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<Document>, BoxError> {
        (self.f)(inputs, ctx)
    }
}

/// Wrap a closure as a module.
///
/// ```
/// use quire::module::execute_fn;
///
/// let passthrough = execute_fn("Passthrough", |inputs, _ctx| Ok(inputs.to_vec()));
/// ```
pub fn execute_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn Module>
where
    F: Fn(&[Document], &ExecutionContext<'_>) -> Result<Vec<Document>, BoxError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(ExecuteFn {
        name: name.into(),
        f,
    })
}
