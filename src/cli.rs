//! Command-line front end for building shell archives.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::archive::{DirOptions, RenderOptions, SharCreator};

#[derive(Parser)]
#[command(name = "sharc")]
#[command(about = "Build self-extracting POSIX shell archives")]
#[command(
    after_help = "EXAMPLES:\n  sharc -r ./payload -c ./setup.sh -o install.sh\n  sharc -a ./rootfs -p 'systemctl stop app' -c 'systemctl start app' -o deploy.sh"
)]
pub struct Cli {
    /// Write the generated script here (default: stdout)
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Shell command to run before file installation (repeatable)
    #[arg(short = 'p', long = "pre", value_name = "CMD")]
    pre: Vec<String>,

    /// Shell command to run after file installation (repeatable)
    #[arg(short = 'c', long = "post", value_name = "CMD")]
    post: Vec<String>,

    /// Embed a directory whose layout mirrors absolute target paths
    #[arg(short = 'a', long = "absolute", value_name = "DIR")]
    absolute: Vec<PathBuf>,

    /// Embed a directory into the arena
    #[arg(short = 'r', long = "arena", value_name = "DIR")]
    arena: Vec<PathBuf>,

    /// Descend into directory symlinks while embedding
    #[arg(long)]
    follow_symlinks: bool,

    /// Do not tee script output into a log file
    #[arg(long)]
    no_tee: bool,

    /// Skip the shellcheck pass over the generated script
    #[arg(long)]
    no_check: bool,
}

pub fn run(cli: Cli) -> Result<()> {
    let mut shar = SharCreator::new();

    for cmd in &cli.pre {
        shar.add_pre(cmd.as_str());
    }
    for cmd in &cli.post {
        shar.add_post(cmd.as_str());
    }

    let dir_opts = DirOptions {
        follow_symlinks: cli.follow_symlinks,
        tags_for: None,
    };
    for dir in &cli.absolute {
        shar.add_dir_with(dir, "/", &dir_opts)
            .with_context(|| format!("failed to embed '{}'", dir.display()))?;
    }
    for dir in &cli.arena {
        shar.add_dir_with(dir, "", &dir_opts)
            .with_context(|| format!("failed to embed '{}'", dir.display()))?;
    }

    let mut opts = RenderOptions::new().tee_to_file(!cli.no_tee);
    if cli.no_check {
        opts = opts.build_validators(Vec::new());
    }

    match &cli.output {
        Some(path) => write_script(&shar, path, opts),
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            shar.render_to(&mut out, opts)
                .context("failed to render archive")?;
            out.flush()?;
            Ok(())
        }
    }
}

/// Render into `<path>.tmp` and rename over `path` on success, so a failed
/// render never leaves a half-written script at the requested name.
fn write_script(shar: &SharCreator, path: &Path, opts: RenderOptions) -> Result<()> {
    let mut tmp_os = path.as_os_str().to_os_string();
    tmp_os.push(".tmp");
    let tmp_path = PathBuf::from(tmp_os);

    let mut file = File::create(&tmp_path)
        .with_context(|| format!("failed to create '{}'", tmp_path.display()))?;

    match shar.render_to(&mut file, opts) {
        Ok(()) => {
            drop(file);
            fs::rename(&tmp_path, path)
                .with_context(|| format!("failed to move script into '{}'", path.display()))?;
            Ok(())
        }
        Err(e) => {
            drop(file);
            let _ = fs::remove_file(&tmp_path);
            Err(e).context("failed to render archive")
        }
    }
}
