use crate::document::Document;
use crate::keys;
use crate::meta::{Metadata, Value};
use crate::module::{BoxError, Module};
use crate::naming::optimize_file_name;
use crate::pipeline::ExecutionContext;
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;

type ValueFn = Arc<dyn Fn(&Document, &ExecutionContext<'_>) -> Result<Value, BoxError> + Send + Sync>;

enum MetaValue {
    Constant(Value),
    Computed(ValueFn),
}

/// Adds one metadata value to every input.
///
/// The value is a constant (which may itself be [deferred](Value::Deferred)
/// and then resolves on every read) or computed per document when the
/// module runs. Documents are processed in parallel; output order matches
/// input order.
pub struct Meta {
    key: String,
    value: MetaValue,
    only_if_missing: bool,
    ignore_null: bool,
}

impl Meta {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with_value(key, MetaValue::Constant(value.into()))
    }

    /// Compute the value from each document during execution.
    pub fn computed<F>(key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Document, &ExecutionContext<'_>) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self::with_value(key, MetaValue::Computed(Arc::new(f)))
    }

    /// Store a value computed from the reading metadata on every lookup.
    pub fn deferred<F>(key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str, &Metadata) -> Value + Send + Sync + 'static,
    {
        Self::new(key, Value::deferred(f))
    }

    fn with_value(key: impl Into<String>, value: MetaValue) -> Self {
        Self {
            key: key.into(),
            value,
            only_if_missing: false,
            ignore_null: false,
        }
    }

    /// Leave documents that already have the key untouched.
    pub fn only_if_missing(mut self) -> Self {
        self.only_if_missing = true;
        self
    }

    /// Leave documents untouched when the value is null.
    pub fn ignore_null(mut self) -> Self {
        self.ignore_null = true;
        self
    }

    fn apply(&self, input: &Document, ctx: &ExecutionContext<'_>) -> Result<Document, BoxError> {
        if self.only_if_missing && input.contains_key(&self.key) {
            return Ok(input.clone());
        }
        let value = match &self.value {
            MetaValue::Constant(v) => v.clone(),
            MetaValue::Computed(f) => f(input, ctx)?,
        };
        if self.ignore_null && value.is_null() {
            return Ok(input.clone());
        }
        Ok(ctx.clone_with_items(input, [(self.key.as_str(), value)])?)
    }
}

impl Module for Meta {
    fn name(&self) -> &str {
        "Meta"
    }

    fn execute(
        &self,
        inputs: &[Document],
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<Document>, BoxError> {
        if self.key.is_empty() {
            return Err("Meta requires a non-empty key".into());
        }
        inputs.par_iter().map(|input| self.apply(input, ctx)).collect()
    }
}

/// Sets `WriteFileName` (and `WritePath`) to a URL-safe version of a
/// metadata value, `SourceFileName` by default. With a custom output key only
/// that key is set unless the path is asked for explicitly.
///
/// Documents whose value is missing or optimizes to nothing pass through
/// unchanged. Output order matches input order.
pub struct FileName {
    input_key: String,
    output_key: String,
    path_key: Option<String>,
    allowed: Vec<char>,
}

impl Default for FileName {
    fn default() -> Self {
        Self::from_key(keys::SOURCE_FILE_NAME)
    }
}

impl FileName {
    pub fn new() -> Self {
        Self::default()
    }

    /// Optimize the value of `input_key` instead of `SourceFileName`.
    pub fn from_key(input_key: impl Into<String>) -> Self {
        Self {
            input_key: input_key.into(),
            output_key: keys::WRITE_FILE_NAME.to_string(),
            path_key: Some(keys::WRITE_PATH.to_string()),
            allowed: Vec::new(),
        }
    }

    /// Store the name under `output_key` instead of `WriteFileName`.
    ///
    /// A custom output key turns off `WritePath`; call
    /// [`preserve_path`](Self::preserve_path) or
    /// [`preserve_path_as`](Self::preserve_path_as) afterwards to set it.
    pub fn with_output_key(mut self, output_key: impl Into<String>) -> Self {
        self.output_key = output_key.into();
        self.path_key = None;
        self
    }

    /// Whether to also set `WritePath` to `RelativeFileDir/<name>`.
    pub fn preserve_path(mut self, preserve: bool) -> Self {
        self.path_key = preserve.then(|| keys::WRITE_PATH.to_string());
        self
    }

    /// Set the combined path under `path_key` instead of `WritePath`.
    pub fn preserve_path_as(mut self, path_key: impl Into<String>) -> Self {
        self.path_key = Some(path_key.into());
        self
    }

    pub fn with_allowed_characters(mut self, allowed: impl IntoIterator<Item = char>) -> Self {
        self.allowed.extend(allowed);
        self
    }

    fn apply(&self, input: &Document, ctx: &ExecutionContext<'_>) -> Result<Document, BoxError> {
        let Some(raw) = input.string(&self.input_key) else {
            return Ok(input.clone());
        };
        let name = optimize_file_name(&raw, &self.allowed);
        if name.is_empty() {
            return Ok(input.clone());
        }

        let mut items = vec![(self.output_key.clone(), Value::from(name.as_str()))];
        if let Some(path_key) = &self.path_key {
            let dir = input.string(keys::RELATIVE_FILE_DIR).unwrap_or_default();
            if !dir.trim().is_empty() {
                let path = Path::new(&dir).join(&name);
                items.push((path_key.clone(), Value::from(path)));
            }
        }
        Ok(ctx.clone_with_items(input, items)?)
    }
}

impl Module for FileName {
    fn name(&self) -> &str {
        "FileName"
    }

    fn execute(
        &self,
        inputs: &[Document],
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<Document>, BoxError> {
        if self.input_key.trim().is_empty() || self.output_key.trim().is_empty() {
            return Err("FileName requires non-empty input and output keys".into());
        }
        inputs.par_iter().map(|input| self.apply(input, ctx)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentChanges;
    use crate::modules::execute_each;
    use crate::test_helpers::{engine_with, text};
    use std::sync::atomic::{AtomicI64, Ordering};

    fn seed_with(items: Vec<(&'static str, &'static str)>) -> Arc<dyn Module> {
        crate::module::execute_fn("Seed", move |inputs, ctx| {
            let mut outputs = Vec::new();
            for input in inputs {
                outputs.push(ctx.clone_with_items(input, items.clone())?);
            }
            Ok(outputs)
        })
    }

    // =========================================================================
    // Meta
    // =========================================================================

    #[test]
    fn completed_content_is_populated_after_run() {
        let c = Arc::new(AtomicI64::new(0));
        let (c1, c2) = (c.clone(), c.clone());
        let engine = engine_with(vec![
            execute_each("Two", move |doc, ctx| {
                Ok(vec![
                    ctx.clone_with_content(doc, c1.fetch_add(1, Ordering::SeqCst).to_string())?,
                    ctx.clone_with_content(doc, c1.fetch_add(1, Ordering::SeqCst).to_string())?,
                ])
            }),
            execute_each("One", move |doc, ctx| {
                Ok(vec![ctx.clone_with_content(
                    doc,
                    c2.fetch_add(1, Ordering::SeqCst).to_string(),
                )?])
            }),
            Arc::new(Meta::computed("Content", |doc, _| Ok(Value::from(doc.read_text()?)))),
        ]);

        engine.execute().unwrap();

        let docs = engine.documents().from_pipeline("Pipeline 1");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].string("Content").as_deref(), Some("2"));
        assert_eq!(docs[1].string("Content").as_deref(), Some("3"));
    }

    #[test]
    fn meta_preserves_input_order() {
        let engine = engine_with(vec![
            crate::module::execute_fn("Many", |inputs, ctx| {
                (0..50)
                    .map(|i| -> Result<Document, BoxError> {
                        Ok(ctx.clone_with_content(&inputs[0], i.to_string())?)
                    })
                    .collect()
            }),
            Arc::new(Meta::computed("N", |doc, _| Ok(Value::from(doc.read_text()?)))),
        ]);
        engine.execute().unwrap();

        let docs = engine.documents().from_pipeline("Pipeline 1");
        let ns: Vec<String> = docs.iter().map(|d| d.string("N").unwrap()).collect();
        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(ns, expected);
    }

    #[test]
    fn meta_constant_and_only_if_missing() {
        let engine = engine_with(vec![
            seed_with(vec![("Title", "kept")]),
            Arc::new(Meta::new("Title", "replaced").only_if_missing()),
            Arc::new(Meta::new("Layout", "post")),
        ]);
        engine.execute().unwrap();
        let doc = &engine.documents().from_pipeline("Pipeline 1")[0];
        assert_eq!(doc.string("Title").as_deref(), Some("kept"));
        assert_eq!(doc.string("Layout").as_deref(), Some("post"));
    }

    #[test]
    fn meta_deferred_reads_current_metadata() {
        let engine = engine_with(vec![
            Arc::new(Meta::deferred("Greeting", |_, meta| {
                Value::from(format!("hi {}", meta.string("Name").unwrap_or_default()))
            })),
            seed_with(vec![("Name", "kim")]),
        ]);
        engine.execute().unwrap();
        let doc = &engine.documents().from_pipeline("Pipeline 1")[0];
        assert_eq!(doc.string("Greeting").as_deref(), Some("hi kim"));
    }

    #[test]
    fn meta_ignore_null_passes_document_through() {
        let engine = engine_with(vec![Arc::new(Meta::new("Gone", Value::Null).ignore_null())]);
        engine.execute().unwrap();
        let doc = &engine.documents().from_pipeline("Pipeline 1")[0];
        assert!(!doc.contains_key("Gone"));
    }

    #[test]
    fn meta_computed_error_faults_pipeline() {
        let engine = engine_with(vec![Arc::new(Meta::computed("X", |_, _| {
            Err("boom".into())
        }))]);
        let err = engine.execute().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    // =========================================================================
    // FileName
    // =========================================================================

    #[test]
    fn file_name_sets_write_file_name_and_path() {
        let engine = engine_with(vec![
            seed_with(vec![
                (keys::SOURCE_FILE_NAME, "My Post (Draft).md"),
                (keys::RELATIVE_FILE_DIR, "blog"),
            ]),
            Arc::new(FileName::new()),
        ]);
        engine.execute().unwrap();
        let doc = &engine.documents().from_pipeline("Pipeline 1")[0];
        assert_eq!(doc.string(keys::WRITE_FILE_NAME).as_deref(), Some("my-post-draft.md"));
        assert_eq!(
            doc.string(keys::WRITE_PATH).as_deref(),
            Some(Path::new("blog").join("my-post-draft.md").to_str().unwrap())
        );
    }

    #[test]
    fn file_name_without_directory_sets_only_name() {
        let engine = engine_with(vec![
            seed_with(vec![(keys::SOURCE_FILE_NAME, "About Me.md"), (keys::RELATIVE_FILE_DIR, "")]),
            Arc::new(FileName::new()),
        ]);
        engine.execute().unwrap();
        let doc = &engine.documents().from_pipeline("Pipeline 1")[0];
        assert_eq!(doc.string(keys::WRITE_FILE_NAME).as_deref(), Some("about-me.md"));
        assert!(!doc.contains_key(keys::WRITE_PATH));
    }

    #[test]
    fn file_name_from_custom_key_without_path() {
        let engine = engine_with(vec![
            seed_with(vec![("Title", "Hello, World!"), (keys::RELATIVE_FILE_DIR, "posts")]),
            Arc::new(
                FileName::from_key("Title").with_output_key("Slug"),
            ),
        ]);
        engine.execute().unwrap();
        let doc = &engine.documents().from_pipeline("Pipeline 1")[0];
        assert_eq!(doc.string("Slug").as_deref(), Some("hello-world"));
        assert!(!doc.contains_key(keys::WRITE_PATH));
    }

    #[test]
    fn file_name_custom_output_key_can_keep_path() {
        let engine = engine_with(vec![
            seed_with(vec![("Title", "Hello, World!"), (keys::RELATIVE_FILE_DIR, "posts")]),
            Arc::new(
                FileName::from_key("Title")
                    .with_output_key("Slug")
                    .preserve_path(true),
            ),
        ]);
        engine.execute().unwrap();
        let doc = &engine.documents().from_pipeline("Pipeline 1")[0];
        assert_eq!(doc.string("Slug").as_deref(), Some("hello-world"));
        assert!(!doc.contains_key(keys::WRITE_FILE_NAME));
        assert_eq!(
            doc.string(keys::WRITE_PATH).as_deref(),
            Some(Path::new("posts").join("hello-world").to_str().unwrap())
        );
    }

    #[test]
    fn file_name_missing_value_passes_through() {
        let engine = engine_with(vec![
            crate::module::execute_fn("Content", |inputs, ctx| {
                Ok(vec![ctx.create_document(
                    Some(&inputs[0]),
                    DocumentChanges::new().content("body"),
                )?])
            }),
            Arc::new(FileName::new()),
        ]);
        engine.execute().unwrap();
        let doc = &engine.documents().from_pipeline("Pipeline 1")[0];
        assert_eq!(text(doc), "body");
        assert!(!doc.contains_key(keys::WRITE_FILE_NAME));
    }
}
