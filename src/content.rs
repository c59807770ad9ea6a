//! Content sources for archived files.
//!
//! The archive model stores file content opaquely as a [`Content`] and only
//! resolves it into a reader when a render pass reaches the file. Literal
//! sources can be rendered any number of times; producers are re-invoked
//! per render; an already-open stream is drained by exactly one render.

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{Error, Result};

type Producer = Box<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

/// A source of file content, resolved lazily at render time.
pub enum Content {
    /// Literal bytes held in memory.
    Bytes(Vec<u8>),
    /// A zero-argument producer invoked once per render. Opening happens
    /// here, so registration never touches the filesystem.
    Producer(Producer),
    /// An already-open stream, consumed by the first render that reaches it.
    Stream(Mutex<Option<Box<dyn Read + Send>>>),
}

impl Content {
    /// Wrap a producer closure that opens the content on demand.
    pub fn producer<F>(f: F) -> Self
    where
        F: Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync + 'static,
    {
        Content::Producer(Box::new(f))
    }

    /// Content read lazily from a file on disk, opened at render time.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Content::producer(move || {
            let file = File::open(&path)?;
            Ok(Box::new(file) as Box<dyn Read + Send>)
        })
    }

    /// Wrap an already-open stream. The stream is closed (dropped) when the
    /// render that consumes it reaches end-of-data.
    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        Content::Stream(Mutex::new(Some(Box::new(reader))))
    }

    /// Resolve this source into a reader for one render pass.
    ///
    /// `name` is the registered file path, used to report a drained stream.
    pub(crate) fn open(&self, name: &str) -> Result<Box<dyn Read + '_>> {
        match self {
            Content::Bytes(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
            Content::Producer(f) => {
                let reader = f()?;
                Ok(Box::new(reader))
            }
            Content::Stream(slot) => {
                let taken = match slot.lock() {
                    Ok(mut guard) => guard.take(),
                    Err(_) => None,
                };
                taken
                    .map(|r| Box::new(r) as Box<dyn Read + '_>)
                    .ok_or_else(|| Error::StreamConsumed(name.to_string()))
            }
        }
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Bytes(s.into_bytes())
    }
}

impl From<&[u8]> for Content {
    fn from(b: &[u8]) -> Self {
        Content::Bytes(b.to_vec())
    }
}

impl From<Vec<u8>> for Content {
    fn from(b: Vec<u8>) -> Self {
        Content::Bytes(b)
    }
}

/// Read from `reader` until `buf` is full or end-of-data, returning the
/// number of bytes read.
///
/// Encoders rely on this to see exact fixed-size chunks: a short read from
/// an arbitrary reader is re-filled rather than passed through, so only the
/// final chunk of a stream may be short.
pub fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
