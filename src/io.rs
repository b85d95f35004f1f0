//! File-system access for modules and the engine.
//!
//! A [`FileSystem`] has a root directory, an ordered list of input paths and
//! one output path, all resolved against the root. Later input paths take
//! precedence when the same relative file exists in several of them, so a
//! theme directory can be listed first and overridden by site content.
//!
//! Every read, write and delete goes through a bounded retry loop: transient
//! contention errors (locked file, access denied while another process holds
//! it, interrupted call) are retried with a linearly growing delay. Missing
//! files and other errors surface immediately.

use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum FileSystemError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("IO error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl FileSystemError {
    pub fn kind(&self) -> Option<io::ErrorKind> {
        match self {
            FileSystemError::Io { source, .. } => Some(source.kind()),
            FileSystemError::InvalidPath(_) => None,
        }
    }
}

/// How often and how patiently to retry transient IO failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub attempts: u32,
    /// Delay before retry `n` (0-based) is `interval * (n + 1)`.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, retry: u32) -> Duration {
        self.interval * (retry + 1)
    }
}

/// Errors worth retrying: another process briefly holds the file.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ResourceBusy
    )
}

#[derive(Debug, Clone)]
pub struct FileSystem {
    root: PathBuf,
    input_paths: Vec<PathBuf>,
    output_path: PathBuf,
    retry: RetryPolicy,
}

impl FileSystem {
    /// A file system rooted at `root` with `input` and `output` defaults.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            input_paths: vec![PathBuf::from("input")],
            output_path: PathBuf::from("output"),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_input_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.input_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Input paths resolved against the root, in precedence order (lowest first).
    pub fn input_paths(&self) -> Vec<PathBuf> {
        self.input_paths.iter().map(|p| self.root.join(p)).collect()
    }

    pub fn output_path(&self) -> PathBuf {
        self.root.join(&self.output_path)
    }

    /// The first existing file at `relative` searching input paths from the
    /// last configured to the first.
    pub fn get_input_file(&self, relative: impl AsRef<Path>) -> Result<Option<PathBuf>, FileSystemError> {
        let relative = check_relative(relative.as_ref())?;
        Ok(self
            .input_paths()
            .into_iter()
            .rev()
            .map(|dir| dir.join(relative))
            .find(|candidate| candidate.is_file()))
    }

    /// Absolute location of `relative` under the output path.
    pub fn get_output_path(&self, relative: impl AsRef<Path>) -> Result<PathBuf, FileSystemError> {
        Ok(self.output_path().join(check_relative(relative.as_ref())?))
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>, FileSystemError> {
        self.with_retry_loop(path, || std::fs::read(path))
    }

    /// Write `bytes` to `path`, creating parent directories.
    pub fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<(), FileSystemError> {
        self.with_retry_loop(path, || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, bytes)
        })
    }

    /// Delete and recreate the output directory.
    pub fn clean_output(&self) -> Result<(), FileSystemError> {
        let output = self.output_path();
        self.with_retry_loop(&output, || {
            match std::fs::remove_dir_all(&output) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            std::fs::create_dir_all(&output)
        })
    }

    fn with_retry_loop<T>(
        &self,
        path: &Path,
        mut op: impl FnMut() -> io::Result<T>,
    ) -> Result<T, FileSystemError> {
        let mut retry = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if retry < self.retry.attempts && is_transient(&e) => {
                    let delay = self.retry.delay(retry);
                    warn!(
                        path = %path.display(),
                        error = %e,
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transient IO error, retrying"
                    );
                    thread::sleep(delay);
                    retry += 1;
                }
                Err(source) => {
                    return Err(FileSystemError::Io {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
    }
}

fn check_relative(path: &Path) -> Result<&Path, FileSystemError> {
    if path.as_os_str().is_empty() {
        return Err(FileSystemError::InvalidPath("path must not be empty".into()));
    }
    if path.is_absolute() {
        return Err(FileSystemError::InvalidPath(format!(
            "{} is not a relative path",
            path.display()
        )));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs;
    use tempfile::TempDir;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            interval: Duration::from_millis(1),
        }
    }

    // =========================================================================
    // Path resolution
    // =========================================================================

    #[test]
    fn later_input_paths_take_precedence() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("theme")).unwrap();
        fs::create_dir_all(tmp.path().join("input")).unwrap();
        fs::write(tmp.path().join("theme/page.html"), "theme").unwrap();
        fs::write(tmp.path().join("input/page.html"), "site").unwrap();
        fs::write(tmp.path().join("theme/only.css"), "css").unwrap();

        let fs_ = FileSystem::new(tmp.path()).with_input_paths(["theme", "input"]);
        assert_eq!(
            fs_.get_input_file("page.html").unwrap(),
            Some(tmp.path().join("input/page.html"))
        );
        assert_eq!(
            fs_.get_input_file("only.css").unwrap(),
            Some(tmp.path().join("theme/only.css"))
        );
        assert_eq!(fs_.get_input_file("missing.txt").unwrap(), None);
    }

    #[test]
    fn empty_or_absolute_paths_are_invalid() {
        let fs_ = FileSystem::new("/site");
        assert!(matches!(
            fs_.get_output_path(""),
            Err(FileSystemError::InvalidPath(_))
        ));
        assert!(matches!(
            fs_.get_input_file("/etc/passwd"),
            Err(FileSystemError::InvalidPath(_))
        ));
    }

    #[test]
    fn output_path_resolves_under_root() {
        let fs_ = FileSystem::new("/site").with_output_path("public");
        assert_eq!(
            fs_.get_output_path("a/b.html").unwrap(),
            PathBuf::from("/site/public/a/b.html")
        );
    }

    // =========================================================================
    // Read / write / clean
    // =========================================================================

    #[test]
    fn write_creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let fs_ = FileSystem::new(tmp.path());
        let target = fs_.get_output_path("deep/nested/file.txt").unwrap();
        fs_.write_file(&target, b"hi").unwrap();
        assert_eq!(fs_.read_file(&target).unwrap(), b"hi");
    }

    #[test]
    fn clean_output_empties_the_directory() {
        let tmp = TempDir::new().unwrap();
        let fs_ = FileSystem::new(tmp.path());
        let stale = fs_.get_output_path("stale.html").unwrap();
        fs_.write_file(&stale, b"old").unwrap();

        fs_.clean_output().unwrap();
        assert!(!stale.exists());
        assert!(fs_.output_path().is_dir());
    }

    #[test]
    fn clean_output_creates_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let fs_ = FileSystem::new(tmp.path()).with_output_path("never-built");
        fs_.clean_output().unwrap();
        assert!(tmp.path().join("never-built").is_dir());
    }

    #[test]
    fn missing_file_is_not_retried() {
        let tmp = TempDir::new().unwrap();
        let fs_ = FileSystem::new(tmp.path()).with_retry(quick());
        let err = fs_.read_file(&tmp.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), Some(io::ErrorKind::NotFound));
    }

    // =========================================================================
    // Retry loop
    // =========================================================================

    #[test]
    fn transient_errors_are_retried_until_success() {
        let fs_ = FileSystem::new("/").with_retry(quick());
        let calls = Cell::new(0);
        let value = fs_
            .with_retry_loop(Path::new("locked"), || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(io::Error::from(io::ErrorKind::PermissionDenied))
                } else {
                    Ok(42)
                }
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retries_are_bounded() {
        let fs_ = FileSystem::new("/").with_retry(quick());
        let calls = Cell::new(0);
        let result: Result<(), _> = fs_.with_retry_loop(Path::new("locked"), || {
            calls.set(calls.get() + 1);
            Err(io::Error::from(io::ErrorKind::WouldBlock))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn delay_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(300));
    }
}
