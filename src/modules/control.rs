use super::{DocumentPredicate, and_predicate, select};
use crate::document::Document;
use crate::module::{BoxError, Module};
use crate::pipeline::ExecutionContext;
use std::sync::Arc;

/// Runs child modules inline, as if they were listed in the pipeline.
pub struct ModuleCollection {
    modules: Vec<Arc<dyn Module>>,
}

impl ModuleCollection {
    pub fn new(modules: impl IntoIterator<Item = Arc<dyn Module>>) -> Self {
        Self {
            modules: modules.into_iter().collect(),
        }
    }
}

impl Module for ModuleCollection {
    fn name(&self) -> &str {
        "ModuleCollection"
    }

    fn execute(
        &self,
        inputs: &[Document],
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<Document>, BoxError> {
        Ok(ctx.run_modules(&self.modules, inputs)?)
    }
}

/// Runs child modules for their side effects and outputs its inputs.
///
/// With [`filter`](Self::filter) only matching inputs reach the children.
pub struct Branch {
    modules: Vec<Arc<dyn Module>>,
    predicate: Option<DocumentPredicate>,
}

impl Branch {
    pub fn new(modules: impl IntoIterator<Item = Arc<dyn Module>>) -> Self {
        Self {
            modules: modules.into_iter().collect(),
            predicate: None,
        }
    }

    /// Only pass documents matching `predicate` to the children. Repeated
    /// calls must all match.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Document, &ExecutionContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(and_predicate(self.predicate.take(), Arc::new(predicate)));
        self
    }

    pub(crate) fn with_predicate(mut self, predicate: DocumentPredicate) -> Self {
        self.predicate = Some(and_predicate(self.predicate.take(), predicate));
        self
    }
}

impl Module for Branch {
    fn name(&self) -> &str {
        "Branch"
    }

    fn execute(
        &self,
        inputs: &[Document],
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<Document>, BoxError> {
        let selected = select(inputs, self.predicate.as_ref(), ctx);
        ctx.run_modules(&self.modules, &selected)?;
        Ok(inputs.to_vec())
    }
}

/// Like [`Branch`], but appends the children's output after its inputs.
pub struct ConcatBranch {
    modules: Vec<Arc<dyn Module>>,
    predicate: Option<DocumentPredicate>,
}

impl ConcatBranch {
    pub fn new(modules: impl IntoIterator<Item = Arc<dyn Module>>) -> Self {
        Self {
            modules: modules.into_iter().collect(),
            predicate: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Document, &ExecutionContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(and_predicate(self.predicate.take(), Arc::new(predicate)));
        self
    }

    pub(crate) fn with_predicate(mut self, predicate: DocumentPredicate) -> Self {
        self.predicate = Some(and_predicate(self.predicate.take(), predicate));
        self
    }
}

impl Module for ConcatBranch {
    fn name(&self) -> &str {
        "ConcatBranch"
    }

    fn execute(
        &self,
        inputs: &[Document],
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<Document>, BoxError> {
        let selected = select(inputs, self.predicate.as_ref(), ctx);
        let results = ctx.run_modules(&self.modules, &selected)?;
        let mut outputs = inputs.to_vec();
        outputs.extend(results);
        Ok(outputs)
    }
}

/// Wrap a per-document closure as a module.
///
/// Inputs are processed one at a time, in order; the outputs of each call
/// are concatenated.
pub fn execute_each<F>(name: impl Into<String>, f: F) -> Arc<dyn Module>
where
    F: Fn(&Document, &ExecutionContext<'_>) -> Result<Vec<Document>, BoxError>
        + Send
        + Sync
        + 'static,
{
    crate::module::execute_fn(name, move |inputs, ctx| {
        let mut outputs = Vec::new();
        for input in inputs {
            outputs.extend(f(input, ctx)?);
        }
        Ok(outputs)
    })
}
