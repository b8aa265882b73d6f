//! Thin wrapper over the `git` binary.
//!
//! Every command runs from the repository's top-level directory so that the
//! paths git prints are always relative to the repo root.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::{debug, trace};

use nbbuild_shared::{NbBuildError, Result};

/// A git working tree.
#[derive(Debug, Clone)]
pub struct Git {
    root: PathBuf,
}

impl Git {
    /// Locate the repository containing `path`.
    pub fn open(path: &Path) -> Result<Self> {
        // git's spawn error for a missing cwd is indistinguishable from a missing binary
        if !path.is_dir() {
            return Err(NbBuildError::resolution(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        let output = run_git(path, ["rev-parse", "--show-toplevel"])?;
        if !output.status.success() {
            return Err(NbBuildError::resolution(format!(
                "{} is not inside a git repository: {}",
                path.display(),
                stderr_of(&output)
            )));
        }

        let root = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        debug!(root = %root.display(), "git repository opened");
        Ok(Self { root })
    }

    /// Top-level directory of the working tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a reference to a commit id. `Ok(None)` if it does not exist.
    pub fn resolve_commit(&self, reference: &str) -> Result<Option<String>> {
        let spec = format!("{reference}^{{commit}}");
        let output = self.run(["rev-parse", "--verify", "--quiet", spec.as_str()])?;
        if !output.status.success() {
            return Ok(None);
        }
        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!commit.is_empty()).then_some(commit))
    }

    /// Paths whose working-tree content differs from `commit`, excluding deletions.
    pub fn changed_since(&self, commit: &str) -> Result<Vec<PathBuf>> {
        self.list([
            "diff",
            "--name-only",
            "--no-ext-diff",
            "--diff-filter=d",
            "-z",
            commit,
            "--",
        ])
    }

    /// Untracked files not covered by an ignore rule.
    pub fn untracked(&self) -> Result<Vec<PathBuf>> {
        self.list(["ls-files", "--others", "--exclude-standard", "-z"])
    }

    /// Tracked plus untracked, non-ignored files.
    pub fn all_files(&self) -> Result<Vec<PathBuf>> {
        self.list([
            "ls-files",
            "--cached",
            "--others",
            "--exclude-standard",
            "-z",
        ])
    }

    /// Run a command that prints NUL-separated paths.
    fn list<I, S>(&self, args: I) -> Result<Vec<PathBuf>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(NbBuildError::resolution(format!(
                "git failed: {}",
                stderr_of(&output)
            )));
        }

        Ok(output
            .stdout
            .split(|b| *b == 0)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| PathBuf::from(String::from_utf8_lossy(chunk).into_owned()))
            .collect())
    }

    fn run<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        run_git(&self.root, args)
    }
}

fn run_git<I, S>(cwd: &Path, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new("git");
    cmd.args(args).current_dir(cwd);
    trace!(?cmd, "running git");

    cmd.output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            NbBuildError::tool_missing("git", "install git and make sure it is on PATH")
        } else {
            NbBuildError::io(cwd, e)
        }
    })
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}
