//! Archive model and render pipeline.
//!
//! [`SharCreator`] accumulates a logical description of files, implied
//! directories, and pre/post command chunks, then renders it into an
//! executable POSIX shell script. Rendering streams file content through an
//! [`Encoder`] and any number of extraction validators while teeing every
//! emitted byte into the build validators' checking processes.
//!
//! The generated script runs in a private `mktemp -d` directory: decode all
//! files under sequential temporary names, verify them, create the `arena`
//! subdirectory, move everything into its real path, run post chunks, and
//! clean up. On failure `set -e` aborts the script and the temporary
//! directory (with its `log` file when teeing is enabled) is left behind
//! for inspection.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::content::Content;
use crate::encode::{Base64Encoder, Encoder};
use crate::error::{Error, Result};
use crate::shell;
use crate::validate::{
    BuildSink, BuildValidator, ExtractionValidator, Sha256Validator, ShellcheckValidator,
};

const BREAK: &[u8] =
    b"################################################################################\n";

/// A pre- or post-installation fragment of shell text.
struct Chunk {
    order: i32,
    text: Vec<u8>,
}

/// Options for [`SharCreator::add_dir_with`].
pub struct DirOptions<'a> {
    /// Treat a symlink to a directory as a directory and descend into it.
    /// Off by default; a non-followed symlink is an unsupported entry.
    pub follow_symlinks: bool,
    /// Tags to apply per registered file, keyed by its source path.
    pub tags_for: Option<&'a dyn Fn(&Path) -> Vec<String>>,
}

impl Default for DirOptions<'_> {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            tags_for: None,
        }
    }
}

/// Options for one render pass.
///
/// `None` validator lists select the defaults (`shellcheck` build
/// validation, SHA-256 extraction validation); pass an empty `Vec` to
/// disable a stage entirely.
pub struct RenderOptions {
    encoder: Option<Box<dyn Encoder>>,
    build_validators: Option<Vec<Box<dyn BuildValidator>>>,
    extraction_validators: Option<Vec<Box<dyn ExtractionValidator>>>,
    tee_to_file: bool,
    header: Vec<String>,
    test_tmp_dir: Option<PathBuf>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            encoder: None,
            build_validators: None,
            extraction_validators: None,
            tee_to_file: true,
            header: Vec::new(),
            test_tmp_dir: None,
        }
    }
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encoder(mut self, encoder: impl Encoder + 'static) -> Self {
        self.encoder = Some(Box::new(encoder));
        self
    }

    pub fn build_validators(mut self, validators: Vec<Box<dyn BuildValidator>>) -> Self {
        self.build_validators = Some(validators);
        self
    }

    pub fn extraction_validators(mut self, validators: Vec<Box<dyn ExtractionValidator>>) -> Self {
        self.extraction_validators = Some(validators);
        self
    }

    /// Tee the script's combined output into a `log` file next to the
    /// extracted content. Enabled by default.
    pub fn tee_to_file(mut self, tee: bool) -> Self {
        self.tee_to_file = tee;
        self
    }

    /// Free-text lines emitted as `#` comments right after the shebang.
    pub fn header<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Root the script's `mktemp -d` under `dir`. Used by tests to avoid
    /// leftover temporary directories; not part of the normal surface.
    pub fn test_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.test_tmp_dir = Some(dir.into());
        self
    }
}

/// Logical description of a shell archive.
///
/// Created empty, mutated by append-only operations, and rendered any
/// number of times. Rendering never mutates the model, so an unmodified
/// creator renders byte-identical output on every pass — the one exception
/// is a [`Content::Stream`] source, which only the first render can drain.
#[derive(Default)]
pub struct SharCreator {
    files: BTreeMap<String, Content>,
    dirs: BTreeSet<Vec<String>>,
    pre_chunks: Vec<Chunk>,
    post_chunks: Vec<Chunk>,
    tags: BTreeMap<String, Vec<String>>,
}

impl SharCreator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file at `name` with the given content source.
    ///
    /// The name is normalized POSIX-style. Ancestor directories are
    /// recorded implicitly; an absolute name installs to an absolute path
    /// on the target machine rather than into the arena.
    pub fn add_file(&mut self, name: &str, content: impl Into<Content>) -> Result<&mut Self> {
        self.add_file_tagged(name, content, &[])
    }

    /// Like [`add_file`](Self::add_file), also appending the file to each
    /// of the given tags.
    pub fn add_file_tagged(
        &mut self,
        name: &str,
        content: impl Into<Content>,
        tags: &[&str],
    ) -> Result<&mut Self> {
        let name = shell::normalize(name);
        if name == "." || name == "/" {
            return Err(Error::IsADirectory(name));
        }
        if self.files.contains_key(&name) {
            return Err(Error::DuplicateFile(name));
        }

        let components: Vec<String> = name.split('/').map(str::to_string).collect();
        // The empty leading component of an absolute path marks
        // absolute-ness, not a directory level.
        let start = if components[0].is_empty() { 2 } else { 1 };
        for depth in start..components.len() {
            self.dirs.insert(components[..depth].to_vec());
        }

        self.files.insert(name.clone(), content.into());
        for tag in tags {
            self.tags.entry((*tag).to_string()).or_default().push(name.clone());
        }
        Ok(self)
    }

    /// Register every file under `src`, rooted at `dest` inside the archive.
    ///
    /// File content is opened lazily at render time. Entries that are
    /// neither regular files nor real directories fail registration, so a
    /// render can never silently drop an unsupported entry.
    pub fn add_dir(&mut self, src: &Path, dest: &str) -> Result<&mut Self> {
        self.add_dir_with(src, dest, &DirOptions::default())
    }

    /// [`add_dir`](Self::add_dir) with symlink policy and per-entry tags.
    pub fn add_dir_with(
        &mut self,
        src: &Path,
        dest: &str,
        opts: &DirOptions,
    ) -> Result<&mut Self> {
        let walker = WalkDir::new(src)
            .min_depth(1)
            .follow_links(opts.follow_symlinks)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry?;
            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                return Err(Error::UnsupportedEntry(entry.path().to_path_buf()));
            }

            let rel = match entry.path().strip_prefix(src) {
                Ok(rel) => rel,
                // min_depth(1) guarantees entries live under src
                Err(_) => continue,
            };
            let rel = rel
                .to_str()
                .ok_or_else(|| Error::NonUtf8Path(entry.path().to_path_buf()))?;
            let dest_name = shell::join(dest, rel);

            let tags: Vec<String> = match opts.tags_for {
                Some(tags_for) => tags_for(entry.path()),
                None => Vec::new(),
            };
            let tag_refs: Vec<&str> = tags.iter().map(String::as_str).collect();
            self.add_file_tagged(&dest_name, Content::from_file(entry.path()), &tag_refs)?;
        }
        Ok(self)
    }

    /// Append a shell fragment executed before file installation.
    pub fn add_pre(&mut self, chunk: impl Into<Vec<u8>>) -> &mut Self {
        self.add_pre_with_order(chunk, 0)
    }

    /// [`add_pre`](Self::add_pre) with an explicit sort key. Chunks are
    /// emitted in ascending key order, insertion order within a key.
    pub fn add_pre_with_order(&mut self, chunk: impl Into<Vec<u8>>, order: i32) -> &mut Self {
        self.pre_chunks.push(Chunk {
            order,
            text: chunk.into(),
        });
        self
    }

    /// Append a shell fragment executed after file installation.
    pub fn add_post(&mut self, chunk: impl Into<Vec<u8>>) -> &mut Self {
        self.add_post_with_order(chunk, 0)
    }

    /// [`add_post`](Self::add_post) with an explicit sort key.
    pub fn add_post_with_order(&mut self, chunk: impl Into<Vec<u8>>, order: i32) -> &mut Self {
        self.post_chunks.push(Chunk {
            order,
            text: chunk.into(),
        });
        self
    }

    /// Sorted list of file paths carrying `tag`; empty for unknown tags.
    pub fn files_by_tag(&self, tag: &str) -> Vec<String> {
        let mut names = self.tags.get(tag).cloned().unwrap_or_default();
        names.sort();
        names
    }

    /// The same list, shell-quoted and space-joined, for embedding into
    /// pre/post chunk text that references a tagged subset of files.
    pub fn files_by_tag_as_shell_str(&self, tag: &str) -> String {
        self.files_by_tag(tag)
            .iter()
            .map(|name| shell::quote(name))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Render the archive into an in-memory list of script chunks.
    ///
    /// Use `concat()` on the result to obtain the script bytes.
    pub fn render(&self, opts: RenderOptions) -> Result<Vec<Vec<u8>>> {
        let mut chunks: Vec<Vec<u8>> = Vec::new();
        self.render_impl(
            &mut |chunk| {
                chunks.push(chunk.to_vec());
                Ok(())
            },
            opts,
        )?;
        Ok(chunks)
    }

    /// Render the archive into a caller-supplied sink.
    ///
    /// On a validation error the sink may already hold a partially written
    /// script; the caller must discard it.
    pub fn render_to(&self, out: &mut dyn Write, opts: RenderOptions) -> Result<()> {
        self.render_impl(&mut |chunk| out.write_all(chunk).map_err(Error::Io), opts)
    }

    fn render_impl(
        &self,
        terminal: &mut dyn FnMut(&[u8]) -> Result<()>,
        opts: RenderOptions,
    ) -> Result<()> {
        let RenderOptions {
            encoder,
            build_validators,
            extraction_validators,
            tee_to_file,
            header,
            test_tmp_dir,
        } = opts;

        let encoder = encoder.unwrap_or_else(|| Box::new(Base64Encoder));
        let build_validators = build_validators
            .unwrap_or_else(|| vec![Box::new(ShellcheckValidator::new()) as Box<dyn BuildValidator>]);
        let extraction_validators = extraction_validators.unwrap_or_else(|| {
            vec![Box::new(Sha256Validator::new()) as Box<dyn ExtractionValidator>]
        });

        // Checker processes are scoped to this pass: spawned here, status
        // checked in finish(), released by Drop on every early return.
        let mut sinks = Vec::with_capacity(build_validators.len());
        for validator in &build_validators {
            sinks.push(validator.spawn()?);
        }
        let mut em = Emitter { sinks, terminal };

        em.put(b"#!/bin/sh\n")?;
        for line in &header {
            em.put(format!("# {line}\n").as_bytes())?;
        }
        // pipefail is what lets a failure inside the teed block abort the
        // script; every shell this targets supports it, but checkers flag
        // it as a POSIX extension.
        em.put(b"set -e\n# shellcheck disable=SC3040\nset -o pipefail\nDIR=$(mktemp -d")?;
        if let Some(dir) = &test_tmp_dir {
            let dir = dir
                .to_str()
                .ok_or_else(|| Error::NonUtf8Path(dir.clone()))?;
            em.put(format!(" --tmpdir={}", shell::quote(dir)).as_bytes())?;
        }
        em.put(b")\ncd \"$DIR\"\n")?;

        if tee_to_file {
            em.putl(b"{")?;
        }

        if !self.pre_chunks.is_empty() {
            em.put_annotation("PRE:")?;
            for chunk in sorted_chunks(&self.pre_chunks) {
                em.putl(chunk)?;
            }
        }

        let mut files_map: Vec<(String, &str)> = Vec::new();
        for (i, (name, content)) in self.files.iter().enumerate() {
            let tmp_name = format!("{i:06}");

            em.put_annotation(&format!("file: {name}\n"))?;
            em.put(format!(">\"{tmp_name}\" ").as_bytes())?;

            let mut reader = content.open(name)?;
            for validator in &extraction_validators {
                reader = validator.wrap(reader, &tmp_name);
            }
            encoder.encode(&mut reader, &mut |chunk| em.put(chunk))?;

            files_map.push((tmp_name, name.as_str()));
        }

        if !files_map.is_empty() {
            em.put_annotation("validation:\n")?;
            for validator in &extraction_validators {
                validator.render_check(&mut |chunk| em.put(chunk))?;
            }
        }

        em.put_break()?;
        em.put(b"mkdir arena\ncd arena\n")?;

        for dir in &self.dirs {
            em.put(format!("mkdir -p {}\n", shell::quote(&dir.join("/"))).as_bytes())?;
        }

        for (tmp_name, name) in &files_map {
            em.put(
                format!(
                    "mv --no-target-directory ../{tmp_name} {}\n",
                    shell::quote(name)
                )
                .as_bytes(),
            )?;
        }

        if !self.post_chunks.is_empty() {
            em.put_annotation("POST:")?;
            for chunk in sorted_chunks(&self.post_chunks) {
                em.putl(chunk)?;
            }
        }

        if tee_to_file {
            em.putl(b"} 2>&1 | tee log")?;
        }

        em.put_break()?;
        em.put(b"cd /\nrm -rf \"$DIR\"\n")?;
        em.put_break()?;

        em.finish()
    }
}

/// Fan-out over the build validator sinks plus the terminal sink, in
/// strict call order on every emission.
struct Emitter<'a> {
    sinks: Vec<Box<dyn BuildSink>>,
    terminal: &'a mut dyn FnMut(&[u8]) -> Result<()>,
}

impl Emitter<'_> {
    fn put(&mut self, chunk: &[u8]) -> Result<()> {
        for sink in &mut self.sinks {
            sink.write_chunk(chunk)?;
        }
        (self.terminal)(chunk)
    }

    fn putl(&mut self, chunk: &[u8]) -> Result<()> {
        self.put(chunk)?;
        self.put(b"\n")
    }

    fn put_break(&mut self) -> Result<()> {
        self.put(BREAK)
    }

    fn put_annotation(&mut self, label: &str) -> Result<()> {
        self.put(b"\n")?;
        self.put_break()?;
        self.put(format!("# {label}\n").as_bytes())
    }

    fn finish(mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.finish()?;
        }
        Ok(())
    }
}

/// Stable sort by chunk order key; insertion order within a key.
fn sorted_chunks(chunks: &[Chunk]) -> Vec<&[u8]> {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|chunk| chunk.order);
    ordered.into_iter().map(|chunk| chunk.text.as_slice()).collect()
}
