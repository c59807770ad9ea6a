//! sharc — self-extracting POSIX shell archive builder.

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    sharc::cli::run(sharc::cli::Cli::parse())
}
