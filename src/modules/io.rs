use super::{DocumentPredicate, and_predicate};
use crate::document::{Content, Document, DocumentChanges};
use crate::keys;
use crate::meta::Value;
use crate::module::{BoxError, Module};
use crate::pipeline::ExecutionContext;
use glob::{MatchOptions, Pattern};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// `/`-separated form of a relative path, independent of platform.
fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn extension_with_dot(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn parent_string(path: &Path) -> String {
    path.parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Metadata describing a relative path: `Relative*` keys.
fn relative_items(relative: &Path) -> Vec<(&'static str, Value)> {
    vec![
        (keys::RELATIVE_FILE_PATH, Value::from(slash_path(relative))),
        (
            keys::RELATIVE_FILE_PATH_BASE,
            Value::from(slash_path(&relative.with_extension(""))),
        ),
        (
            keys::RELATIVE_FILE_DIR,
            Value::from(relative.parent().map(slash_path).unwrap_or_default()),
        ),
    ]
}

/// Reads every file matching a glob pattern from all input paths.
///
/// The pattern is matched against `/`-separated paths relative to each
/// input path: `*.md` matches top-level files, `**/*.md` any depth. When
/// the same relative path exists in several input paths the last one wins.
///
/// Each input document (usually the pipeline seed) is cloned once per file.
/// Inputs without a source take the absolute file path as their source.
/// UTF-8 files become text content, anything else a byte stream. Output is
/// sorted by relative path.
pub struct ReadFiles {
    pattern: String,
}

impl ReadFiles {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// Matching files as (input root, absolute path, relative path), sorted
    /// by relative path.
    fn find_files(&self, ctx: &ExecutionContext<'_>) -> Result<Vec<(PathBuf, PathBuf, PathBuf)>, BoxError> {
        let pattern = Pattern::new(&self.pattern)?;
        let mut found: BTreeMap<String, (PathBuf, PathBuf, PathBuf)> = BTreeMap::new();
        for root in ctx.file_system().input_paths() {
            if !root.is_dir() {
                debug!(path = %root.display(), "input path does not exist");
                continue;
            }
            for entry in WalkDir::new(&root).follow_links(true) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry.path().strip_prefix(&root)?.to_path_buf();
                let key = slash_path(&relative);
                if pattern.matches_with(&key, MATCH_OPTIONS) {
                    found.insert(key, (root.clone(), entry.path().to_path_buf(), relative));
                }
            }
        }
        Ok(found.into_values().collect())
    }

    fn read(
        &self,
        input: &Document,
        (root, path, relative): &(PathBuf, PathBuf, PathBuf),
        ctx: &ExecutionContext<'_>,
    ) -> Result<Document, BoxError> {
        let bytes = ctx.file_system().read_file(path)?;
        let content = match String::from_utf8(bytes) {
            Ok(text) => Content::text(text),
            Err(e) => Content::bytes(e.into_bytes()),
        };

        let source = path.to_string_lossy().into_owned();
        let mut items: Vec<(&'static str, Value)> = vec![
            (keys::SOURCE_FILE_ROOT, Value::from(root.clone())),
            (keys::SOURCE_FILE_BASE, Value::from(file_stem(path))),
            (keys::SOURCE_FILE_EXT, Value::from(extension_with_dot(path))),
            (keys::SOURCE_FILE_NAME, Value::from(file_name(path))),
            (keys::SOURCE_FILE_DIR, Value::from(parent_string(path))),
            (keys::SOURCE_FILE_PATH, Value::from(source.as_str())),
            (keys::SOURCE_FILE_PATH_BASE, Value::from(path.with_extension(""))),
        ];
        items.extend(relative_items(relative));

        Ok(ctx.create_document(
            Some(input),
            DocumentChanges::new()
                .source(source)
                .content(content)
                .items(items),
        )?)
    }
}

impl Module for ReadFiles {
    fn name(&self) -> &str {
        "ReadFiles"
    }

    fn execute(
        &self,
        inputs: &[Document],
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<Document>, BoxError> {
        let files = self.find_files(ctx)?;
        debug!(pattern = %self.pattern, files = files.len(), "matched input files");
        let mut outputs = Vec::with_capacity(files.len() * inputs.len());
        for input in inputs {
            let docs: Vec<Document> = files
                .par_iter()
                .map(|file| self.read(input, file, ctx))
                .collect::<Result<_, _>>()?;
            outputs.extend(docs);
        }
        Ok(outputs)
    }
}

type PathFn = Arc<dyn Fn(&Document, &ExecutionContext<'_>) -> Option<String> + Send + Sync>;

enum WriteTarget {
    /// Keep `RelativeFilePath`.
    Relative,
    /// `RelativeFilePath` with a new extension.
    Extension(String),
    Custom(PathFn),
}

/// Writes document content under the output path.
///
/// The relative destination comes from the first of:
///
/// 1. `WritePath`
/// 2. `RelativeFileDir` joined with `WriteFileName`
/// 3. `RelativeFilePath` with its extension replaced by `WriteExtension`
/// 4. the module's own rule: keep `RelativeFilePath`, swap its extension,
///    or call a closure
///
/// Documents without a destination, filtered out, or with empty content
/// (unless [`ignore_empty_content(false)`](Self::ignore_empty_content)) pass
/// through unchanged. Written documents gain `Destination*` keys and their
/// `Relative*` keys now describe the output location. Output order matches
/// input order.
pub struct WriteFiles {
    target: WriteTarget,
    use_write_metadata: bool,
    ignore_empty_content: bool,
    predicate: Option<DocumentPredicate>,
}

impl Default for WriteFiles {
    fn default() -> Self {
        Self::with_target(WriteTarget::Relative)
    }
}

impl WriteFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write to `RelativeFilePath` with the extension replaced by `extension`.
    pub fn with_extension(extension: impl Into<String>) -> Self {
        Self::with_target(WriteTarget::Extension(extension.into()))
    }

    /// Compute the relative destination per document.
    pub fn with_path<F>(f: F) -> Self
    where
        F: Fn(&Document, &ExecutionContext<'_>) -> Option<String> + Send + Sync + 'static,
    {
        Self::with_target(WriteTarget::Custom(Arc::new(f)))
    }

    fn with_target(target: WriteTarget) -> Self {
        Self {
            target,
            use_write_metadata: true,
            ignore_empty_content: true,
            predicate: None,
        }
    }

    /// Whether `WritePath`/`WriteFileName`/`WriteExtension` take precedence.
    pub fn use_write_metadata(mut self, enabled: bool) -> Self {
        self.use_write_metadata = enabled;
        self
    }

    pub fn ignore_empty_content(mut self, enabled: bool) -> Self {
        self.ignore_empty_content = enabled;
        self
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Document, &ExecutionContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(and_predicate(self.predicate.take(), Arc::new(predicate)));
        self
    }

    fn metadata_path(&self, input: &Document) -> Option<(&'static str, PathBuf)> {
        let present = |key: &str| input.string(key).filter(|s| !s.trim().is_empty());

        if let Some(path) = present(keys::WRITE_PATH) {
            return Some((keys::WRITE_PATH, PathBuf::from(path)));
        }
        if let Some(name) = present(keys::WRITE_FILE_NAME)
            && input.contains_key(keys::RELATIVE_FILE_DIR)
        {
            let dir = input.string(keys::RELATIVE_FILE_DIR).unwrap_or_default();
            return Some((keys::WRITE_FILE_NAME, Path::new(&dir).join(name)));
        }
        if let Some(ext) = present(keys::WRITE_EXTENSION)
            && let Some(relative) = present(keys::RELATIVE_FILE_PATH)
        {
            return Some((
                keys::WRITE_EXTENSION,
                Path::new(&relative).with_extension(ext.trim_start_matches('.')),
            ));
        }
        None
    }

    fn destination(&self, input: &Document, ctx: &ExecutionContext<'_>) -> Option<PathBuf> {
        if self.use_write_metadata
            && let Some((key, path)) = self.metadata_path(input)
        {
            if !matches!(self.target, WriteTarget::Relative) {
                warn!(
                    key,
                    document = %input,
                    "write metadata took precedence over the WriteFiles extension or path rule"
                );
            }
            return Some(path);
        }

        let relative = || {
            input
                .string(keys::RELATIVE_FILE_PATH)
                .filter(|s| !s.trim().is_empty())
        };
        match &self.target {
            WriteTarget::Relative => relative().map(PathBuf::from),
            WriteTarget::Extension(ext) => {
                relative().map(|r| Path::new(&r).with_extension(ext.trim_start_matches('.')))
            }
            WriteTarget::Custom(f) => f(input, ctx)
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    fn write(&self, input: &Document, ctx: &ExecutionContext<'_>) -> Result<Document, BoxError> {
        if let Some(pred) = &self.predicate
            && !pred(input, ctx)
        {
            return Ok(input.clone());
        }
        let Some(relative) = self.destination(input, ctx) else {
            return Ok(input.clone());
        };
        // Metadata paths are always taken as relative to the output path.
        let relative = PathBuf::from(slash_path(&relative));

        let bytes = input.content().read_bytes()?;
        if self.ignore_empty_content && bytes.is_empty() {
            return Ok(input.clone());
        }

        let fs = ctx.file_system();
        let path = fs.get_output_path(&relative)?;
        fs.write_file(&path, &bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "wrote file");

        let mut items: Vec<(&'static str, Value)> = vec![
            (keys::DESTINATION_FILE_BASE, Value::from(file_stem(&path))),
            (keys::DESTINATION_FILE_EXT, Value::from(extension_with_dot(&path))),
            (keys::DESTINATION_FILE_NAME, Value::from(file_name(&path))),
            (keys::DESTINATION_FILE_DIR, Value::from(parent_string(&path))),
            (keys::DESTINATION_FILE_PATH_BASE, Value::from(path.with_extension(""))),
            (keys::DESTINATION_FILE_PATH, Value::from(path)),
        ];
        items.extend(relative_items(&relative));
        Ok(ctx.clone_with_items(input, items)?)
    }
}

impl Module for WriteFiles {
    fn name(&self) -> &str {
        "WriteFiles"
    }

    fn execute(
        &self,
        inputs: &[Document],
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<Document>, BoxError> {
        inputs.par_iter().map(|input| self.write(input, ctx)).collect()
    }
}
