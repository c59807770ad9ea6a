//! Encoders turn raw file bytes into shell-embeddable text.
//!
//! An encoder owns the full embedded block for one file: it emits the
//! decode invocation, the content-bearing text, and a terminator the decode
//! command recognizes. The contract is streaming-only — content is pulled
//! in bounded chunks and never materialized whole.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::Read;

use crate::content::read_full;
use crate::error::Result;

/// Sink for emitted script text. Writes go to every build validator and the
/// terminal output in call order.
pub type Emit<'a> = dyn FnMut(&[u8]) -> Result<()> + 'a;

/// Transforms a stream of raw bytes into self-delimiting shell text.
///
/// Implementations must pull from `reader` in bounded chunks and pair the
/// emitted text with a decode command understood by POSIX `sh` plus common
/// coreutils.
pub trait Encoder {
    fn encode(&self, reader: &mut dyn Read, out: &mut Emit) -> Result<()>;
}

/// Default encoder: line-oriented base64 fed to `base64 -d`.
///
/// Reads 57 raw bytes per chunk so every non-final line is an exact 76
/// character base64 group, which keeps the heredoc decodable as one
/// concatenated stream.
pub struct Base64Encoder;

impl Base64Encoder {
    const MAX_BIN_CHUNK: usize = 57;
}

impl Encoder for Base64Encoder {
    fn encode(&self, reader: &mut dyn Read, out: &mut Emit) -> Result<()> {
        out(b"base64 -d << _END_\n")?;

        let mut buf = [0u8; Self::MAX_BIN_CHUNK];
        loop {
            let n = read_full(reader, &mut buf)?;
            if n == 0 {
                break;
            }
            let mut line = STANDARD.encode(&buf[..n]).into_bytes();
            line.push(b'\n');
            out(&line)?;
        }

        out(b"_END_\n")?;
        Ok(())
    }
}
