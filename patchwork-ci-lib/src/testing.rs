//! Testing utilities.
//!
//! This is inside `src` rather than `tests` since we use this code in unit
//! tests of other crates in the workspace.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use eyre::Context;
use lazy_static::lazy_static;
use regex::Regex;
use tempfile::TempDir;

use crate::core::effects::{Effects, Glyphs};

lazy_static! {
    static ref TIMING_RE: Regex = Regex::new(r"\d+\.\d+s").unwrap();
}

/// An `Effects` which records everything written to it.
#[derive(Clone, Debug)]
pub struct CapturedEffects {
    /// The effects to pass to the code under test.
    pub effects: Effects,
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
}

impl CapturedEffects {
    /// Constructor.
    pub fn new() -> Self {
        let stdout: Arc<Mutex<Vec<u8>>> = Default::default();
        let stderr: Arc<Mutex<Vec<u8>>> = Default::default();
        let effects = Effects::new_from_buffer_for_test(Glyphs::text(), &stdout, &stderr);
        Self {
            effects,
            stdout,
            stderr,
        }
    }

    /// Everything written to the output stream so far, with durations
    /// replaced by `<time>`.
    pub fn stdout(&self) -> String {
        redact_timings(&String::from_utf8_lossy(&self.stdout.lock().unwrap()))
    }

    /// Everything written to the error stream so far, with durations
    /// replaced by `<time>`.
    pub fn stderr(&self) -> String {
        redact_timings(&String::from_utf8_lossy(&self.stderr.lock().unwrap()))
    }
}

impl Default for CapturedEffects {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace durations like `0.01s` with `<time>` so that output can be
/// snapshotted.
pub fn redact_timings(output: &str) -> String {
    TIMING_RE.replace_all(output, "<time>").into_owned()
}

/// A temporary directory of test scripts, plus a scratch worktree to run them
/// in.
#[derive(Debug)]
pub struct ScriptDir {
    dir: TempDir,
}

impl ScriptDir {
    /// Constructor.
    pub fn new() -> eyre::Result<Self> {
        let dir = tempfile::tempdir().wrap_err("Creating temporary script dir")?;
        fs::create_dir(dir.path().join("scripts")).wrap_err("Creating scripts dir")?;
        fs::create_dir(dir.path().join("worktree")).wrap_err("Creating worktree dir")?;
        Ok(Self { dir })
    }

    /// The root of the temporary directory.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// The directory scripts are written to.
    pub fn scripts_dir(&self) -> PathBuf {
        self.dir.path().join("scripts")
    }

    /// An empty directory to run scripts in.
    pub fn worktree(&self) -> PathBuf {
        self.dir.path().join("worktree")
    }

    /// Write a script named `name` with the given body and return its path.
    pub fn write_script(&self, name: &str, body: &str) -> eyre::Result<PathBuf> {
        let path = self.scripts_dir().join(name);
        fs::write(&path, body).wrap_err_with(|| format!("Writing script {path:?}"))?;
        Ok(path)
    }
}
