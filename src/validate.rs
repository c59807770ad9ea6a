//! Build-time and extraction-time validation.
//!
//! Extraction validators certify that file content survives
//! embedding/decoding intact: each one wraps the per-file reader, keeps a
//! running digest while the encoder pulls, and later renders a verification
//! block that the generated script executes against the extracted files.
//!
//! Build validators certify the generated script itself: each one owns a
//! scoped external checking process that is fed every emitted byte and has
//! its exit status inspected when the render completes. A non-zero exit
//! aborts the render.

use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::encode::Emit;
use crate::error::{Error, Result};

/// Wraps per-file readers with an integrity accumulator and renders the
/// verification command block once all files have streamed through.
pub trait ExtractionValidator {
    /// Wrap `inner` so that bytes are forwarded unchanged while the
    /// accumulator for `tmp_name` is updated. End-of-stream records the
    /// completed digest.
    fn wrap<'a>(&'a self, inner: Box<dyn Read + 'a>, tmp_name: &str) -> Box<dyn Read + 'a>;

    /// Emit the verification block. Consumes the digests accumulated during
    /// this render, so a validator instance can be reused sequentially.
    fn render_check(&self, out: &mut Emit) -> Result<()>;
}

/// Default extraction validator: SHA-256 per file, verified by
/// `sha256sum --quiet --strict --check` in the generated script.
pub struct Sha256Validator {
    sums: RefCell<Vec<(String, String)>>,
}

impl Sha256Validator {
    pub fn new() -> Self {
        Self {
            sums: RefCell::new(Vec::new()),
        }
    }
}

impl Default for Sha256Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionValidator for Sha256Validator {
    fn wrap<'a>(&'a self, inner: Box<dyn Read + 'a>, tmp_name: &str) -> Box<dyn Read + 'a> {
        Box::new(HashingReader {
            inner,
            tmp_name: tmp_name.to_string(),
            hasher: Some(Sha256::new()),
            sums: &self.sums,
        })
    }

    fn render_check(&self, out: &mut Emit) -> Result<()> {
        out(b"sha256sum --quiet --strict --check << _END_\n")?;
        for (tmp_name, digest) in self.sums.borrow_mut().drain(..) {
            out(format!("{digest}  {tmp_name}\n").as_bytes())?;
        }
        out(b"_END_\n")?;
        Ok(())
    }
}

/// Forwards reads while hashing; records the digest at end-of-stream.
struct HashingReader<'a> {
    inner: Box<dyn Read + 'a>,
    tmp_name: String,
    hasher: Option<Sha256>,
    sums: &'a RefCell<Vec<(String, String)>>,
}

impl Read for HashingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n > 0 {
            if let Some(hasher) = self.hasher.as_mut() {
                hasher.update(&buf[..n]);
            }
        } else if let Some(hasher) = self.hasher.take() {
            let digest = format!("{:x}", hasher.finalize());
            self.sums.borrow_mut().push((self.tmp_name.clone(), digest));
        }
        Ok(n)
    }
}

/// A scoped external check over the full rendered script.
pub trait BuildValidator {
    /// Start the checking process for one render pass.
    fn spawn(&self) -> Result<Box<dyn BuildSink>>;
}

/// The running side of a build validator. Dropping a sink releases the
/// external process even when the render fails partway.
pub trait BuildSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    /// Close the process input, wait, and report a non-zero exit as a
    /// validation error.
    fn finish(&mut self) -> Result<()>;
}

/// Default build validator: pipes the script through `shellcheck -`.
pub struct ShellcheckValidator {
    program: Option<PathBuf>,
}

impl ShellcheckValidator {
    /// Locate `shellcheck` on the host via PATH when the render starts.
    pub fn new() -> Self {
        Self { program: None }
    }

    /// Use an explicit checker binary instead of PATH discovery.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }
}

impl Default for ShellcheckValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildValidator for ShellcheckValidator {
    fn spawn(&self) -> Result<Box<dyn BuildSink>> {
        let program = match &self.program {
            Some(p) => p.clone(),
            None => which::which("shellcheck")
                .map_err(|_| Error::ToolNotFound("shellcheck".to_string()))?,
        };

        let mut child = Command::new(&program)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    Error::ToolNotFound(program.display().to_string())
                } else {
                    Error::Io(e)
                }
            })?;

        let stdin = child.stdin.take();
        Ok(Box::new(ShellcheckSink { child, stdin }))
    }
}

struct ShellcheckSink {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl BuildSink for ShellcheckSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        if let Some(stdin) = self.stdin.as_mut() {
            stdin.write_all(chunk)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        // Closing stdin lets the checker see end-of-script.
        drop(self.stdin.take());

        let mut findings = String::new();
        if let Some(mut out) = self.child.stdout.take() {
            let _ = out.read_to_string(&mut findings);
        }

        let status = self.child.wait()?;
        if !status.success() {
            let mut msg = format!(
                "shellcheck failed (exit code {})",
                status.code().unwrap_or(-1)
            );
            let findings = findings.trim();
            if !findings.is_empty() {
                msg.push_str(":\n");
                msg.push_str(findings);
            }
            return Err(Error::Validator(msg));
        }
        Ok(())
    }
}

impl Drop for ShellcheckSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        drop(self.child.stdout.take());
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_sha256_digest_recorded_at_eof() {
        let validator = Sha256Validator::new();
        let mut reader = validator.wrap(Box::new(Cursor::new(b"abc".to_vec())), "000000");

        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).unwrap();
        // One extra read past EOF must not record a second digest.
        assert_eq!(reader.read(&mut [0u8; 8]).unwrap(), 0);
        drop(reader);

        let mut block = Vec::new();
        let mut out = |chunk: &[u8]| -> Result<()> {
            block.extend_from_slice(chunk);
            Ok(())
        };
        validator.render_check(&mut out).unwrap();

        let block = String::from_utf8(block).unwrap();
        assert_eq!(
            block,
            "sha256sum --quiet --strict --check << _END_\n\
             ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad  000000\n\
             _END_\n"
        );
    }

    #[test]
    fn test_render_check_drains_for_sequential_reuse() {
        let validator = Sha256Validator::new();
        let mut reader = validator.wrap(Box::new(Cursor::new(Vec::new())), "000000");
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).unwrap();
        drop(reader);

        for pass in 0..2 {
            let mut block = Vec::new();
            let mut out = |chunk: &[u8]| -> Result<()> {
                block.extend_from_slice(chunk);
                Ok(())
            };
            validator.render_check(&mut out).unwrap();
            let block = String::from_utf8(block).unwrap();
            if pass == 0 {
                assert!(block.contains("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"));
            } else {
                assert_eq!(block, "sha256sum --quiet --strict --check << _END_\n_END_\n");
            }
        }
    }

    #[test]
    fn test_missing_checker_binary() {
        let validator = ShellcheckValidator::with_program("/nonexistent/shellcheck-12345");
        match validator.spawn() {
            Err(Error::ToolNotFound(p)) => assert!(p.contains("shellcheck-12345")),
            other => panic!("expected ToolNotFound, got {:?}", other.map(|_| ())),
        }
    }
}
