use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Readers a document can own as content.
pub trait ContentReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> ContentReader for T {}

/// Document content: nothing, in-memory text, or a seekable byte stream.
///
/// Text and stream are mutually exclusive. Cloning shares the underlying
/// buffer or stream.
#[derive(Clone, Default)]
pub enum Content {
    #[default]
    Empty,
    Text(Arc<str>),
    Stream(ContentStream),
}

impl Content {
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Content::Text(text.into())
    }

    /// Wrap raw bytes in an in-memory stream.
    pub fn bytes(bytes: Vec<u8>) -> Self {
        Content::Stream(ContentStream::new(Cursor::new(bytes)))
    }

    pub fn stream(reader: impl ContentReader + 'static) -> Self {
        Content::Stream(ContentStream::new(reader))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Empty => true,
            Content::Text(text) => text.is_empty(),
            Content::Stream(_) => false,
        }
    }

    /// The full content as bytes. Streams are read from the start.
    pub fn read_bytes(&self) -> io::Result<Vec<u8>> {
        match self {
            Content::Empty => Ok(Vec::new()),
            Content::Text(text) => Ok(text.as_bytes().to_vec()),
            Content::Stream(stream) => stream.read_all(),
        }
    }

    /// The full content as UTF-8 text.
    pub fn read_text(&self) -> io::Result<String> {
        match self {
            Content::Empty => Ok(String::new()),
            Content::Text(text) => Ok(text.to_string()),
            Content::Stream(stream) => String::from_utf8(stream.read_all()?)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }

    pub fn as_stream(&self) -> Option<&ContentStream> {
        match self {
            Content::Stream(stream) => Some(stream),
            _ => None,
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::text(text)
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::text(text)
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Empty => f.write_str("Empty"),
            Content::Text(text) => write!(f, "Text({} bytes)", text.len()),
            Content::Stream(stream) => stream.fmt(f),
        }
    }
}

struct StreamInner {
    reader: Mutex<Option<Box<dyn ContentReader>>>,
    disposed: AtomicBool,
}

/// A shared, seekable byte stream.
///
/// Every read rewinds to the start so the stream can be consumed any number
/// of times. [`dispose`](Self::dispose) drops the reader; later reads fail.
#[derive(Clone)]
pub struct ContentStream(Arc<StreamInner>);

impl ContentStream {
    pub fn new(reader: impl ContentReader + 'static) -> Self {
        Self(Arc::new(StreamInner {
            reader: Mutex::new(Some(Box::new(reader))),
            disposed: AtomicBool::new(false),
        }))
    }

    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut guard = self.0.reader.lock().unwrap_or_else(PoisonError::into_inner);
        let reader = guard
            .as_mut()
            .ok_or_else(|| io::Error::other("content stream has been disposed"))?;
        reader.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Release the underlying reader. Idempotent.
    pub fn dispose(&self) {
        if !self.0.disposed.swap(true, Ordering::SeqCst) {
            self.0
                .reader
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.load(Ordering::SeqCst)
    }

    /// Whether both handles share one underlying stream.
    pub fn ptr_eq(a: &ContentStream, b: &ContentStream) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Stable address of the shared stream, for identity sets.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_disposed() {
            f.write_str("Stream(disposed)")
        } else {
            f.write_str("Stream(..)")
        }
    }
}
