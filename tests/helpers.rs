//! Shared test utilities for sharc integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

use sharc::RenderOptions;

/// Test environment with a pinned temp root for generated scripts.
///
/// Scripts rendered with [`TestEnv::render_options`] create their private
/// working directory under `script_tmp`, so a test can assert whether a run
/// cleaned up after itself (success) or left the directory behind for
/// inspection (failure).
pub struct TestEnv {
    /// Kept alive for the lifetime of the environment.
    pub _temp_dir: TempDir,
    /// Base directory for fixture trees and script files.
    pub base: PathBuf,
    /// Temp root handed to the script's `mktemp -d`.
    pub script_tmp: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let script_tmp = base.join("tmp");
        fs::create_dir_all(&script_tmp).expect("failed to create script tmp dir");

        Self {
            _temp_dir: temp_dir,
            base,
            script_tmp,
        }
    }

    /// Render options for script-execution tests: no build validators (the
    /// scripts run under a real shell instead) and a pinned temp root.
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions::new()
            .build_validators(Vec::new())
            .test_tmp_dir(&self.script_tmp)
    }
}

/// Outcome of executing a generated script.
pub struct RunResult {
    pub status_code: i32,
    /// Entries left behind under the pinned temp root. Empty after a
    /// successful run; one working directory after a failed one.
    pub leftover: Vec<PathBuf>,
}

impl RunResult {
    /// The arena directory of the single leftover working directory.
    pub fn arena_dir(&self) -> Option<PathBuf> {
        self.leftover.first().map(|dir| dir.join("arena"))
    }
}

/// Write `script` to disk and execute it, returning the exit code and the
/// leftover contents of the pinned temp root.
pub fn run_script(env: &TestEnv, script: &[u8], extra_env: &[(&str, &Path)]) -> RunResult {
    let path = env.base.join("script.sh");
    fs::write(&path, script).expect("failed to write script");

    let mut cmd = Command::new("bash");
    cmd.arg(&path).stdin(Stdio::null());
    for (key, value) in extra_env {
        cmd.env(key, value);
    }
    let output = cmd.output().expect("failed to execute script");

    let mut leftover: Vec<PathBuf> = fs::read_dir(&env.script_tmp)
        .expect("failed to list script tmp dir")
        .map(|entry| entry.expect("failed to read dir entry").path())
        .collect();
    leftover.sort();

    RunResult {
        status_code: output.status.code().unwrap_or(-1),
        leftover,
    }
}

/// Create a fixture tree: `(relative path, content)` pairs under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create fixture dir");
        }
        fs::write(&path, content).expect("failed to write fixture file");
    }
}
