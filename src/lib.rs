//! Build self-contained POSIX shell scripts that embed a file tree and a
//! sequence of shell commands.
//!
//! Running a generated script on a target machine recreates the file tree
//! in a freshly created temporary arena and executes the attached commands.
//! Only a POSIX shell plus common coreutils is assumed on the target.
//!
//! ```no_run
//! use sharc::{RenderOptions, SharCreator};
//!
//! let mut shar = SharCreator::new();
//! shar.add_file("etc/motd", "welcome\n")?;
//! shar.add_post("cat etc/motd");
//! let _script = shar.render(RenderOptions::new())?.concat();
//! # Ok::<(), sharc::Error>(())
//! ```

pub mod archive;
pub mod cli;
pub mod content;
pub mod encode;
pub mod error;
pub mod shell;
pub mod validate;

pub use archive::{DirOptions, RenderOptions, SharCreator};
pub use content::Content;
pub use encode::{Base64Encoder, Encoder};
pub use error::{Error, Result};
pub use validate::{
    BuildSink, BuildValidator, ExtractionValidator, Sha256Validator, ShellcheckValidator,
};
