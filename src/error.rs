//! Error taxonomy for archive construction and rendering.
//!
//! Registration errors surface when the model is mutated, content errors
//! when a lazy source is resolved during render, validation errors when a
//! build validator rejects the generated script. Runtime failures (checksum
//! mismatch, move conflicts) happen only inside the generated script on the
//! target machine and are reported through its exit code, never here.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The path normalizes to the filesystem root and cannot name a file.
    #[error("is a directory: '{0}'")]
    IsADirectory(String),

    /// A file with the same normalized path is already registered.
    #[error("duplicate file: '{0}'")]
    DuplicateFile(String),

    /// A directory walk hit an entry that is neither a regular file nor a
    /// real directory (e.g. a non-followed symlink, a fifo).
    #[error("do not know how to deal with '{0}'")]
    UnsupportedEntry(PathBuf),

    /// An embedded path must be valid UTF-8 to appear in shell text.
    #[error("path is not valid UTF-8: '{0}'")]
    NonUtf8Path(PathBuf),

    /// A stream content source was already drained by an earlier render.
    #[error("stream content for '{0}' was already consumed by a previous render")]
    StreamConsumed(String),

    /// An external validation tool could not be located on the host.
    #[error("tool not found: '{0}'")]
    ToolNotFound(String),

    /// A build validator rejected the generated script.
    #[error("{0}")]
    Validator(String),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
