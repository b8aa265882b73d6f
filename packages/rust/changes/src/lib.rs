//! Change detection: which notebooks does this run need to process?
//!
//! In the default mode the change set is every notebook whose working-tree
//! content differs from a base reference (plus new, untracked notebooks). When
//! the override label is present on the pull request, or the caller asks for
//! it, every notebook in the repository is selected instead.

mod git;
pub mod trigger;

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, instrument};

use nbbuild_shared::{ChangeSet, NbBuildError, Result, SelectionMode};

pub use git::Git;
pub use trigger::{EventPayload, load_event};

/// Notebook file extension.
const NOTEBOOK_EXT: &str = "ipynb";

/// Directory Jupyter uses for autosave copies; never part of a change set.
const CHECKPOINT_DIR: &str = ".ipynb_checkpoints";

/// Inputs for [`detect`].
#[derive(Debug, Clone)]
pub struct DetectOptions {
    /// Base branch or commit to diff against. Ignored when `all` is set.
    pub base_ref: Option<String>,
    /// Remote tried as `<remote>/<base_ref>` when the bare ref does not resolve.
    pub remote: String,
    /// Select every notebook regardless of diffs.
    pub all: bool,
    /// Regexes matched against repo-relative paths to leave out.
    pub exclude_patterns: Vec<String>,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            base_ref: None,
            remote: "origin".into(),
            all: false,
            exclude_patterns: Vec::new(),
        }
    }
}

/// Compute the change set for the repository containing `repo`.
#[instrument(skip_all, fields(repo = %repo.display(), all = opts.all))]
pub fn detect(repo: &Path, opts: &DetectOptions) -> Result<ChangeSet> {
    let git = Git::open(repo)?;
    let excludes = compile_excludes(&opts.exclude_patterns)?;

    let (mode, candidates) = if opts.all {
        let files = git.all_files()?;
        (SelectionMode::All, files)
    } else {
        let base_ref = opts
            .base_ref
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                NbBuildError::resolution(
                    "no base reference given (pass --base or set the base ref env var)",
                )
            })?;

        let base_commit = resolve_base(&git, base_ref, &opts.remote)?;
        let mut files = git.changed_since(&base_commit)?;
        files.extend(git.untracked()?);

        (
            SelectionMode::Modified {
                base_ref: base_ref.to_string(),
                base_commit,
            },
            files,
        )
    };

    let root = git.root().to_path_buf();
    let notebooks: Vec<PathBuf> = candidates
        .into_iter()
        .filter(|p| is_notebook_path(p))
        .filter(|p| !is_excluded(p, &excludes))
        // index entries can outlive the file on disk
        .filter(|p| root.join(p).is_file())
        .collect();

    let set = ChangeSet::new(root, mode, notebooks);
    info!(count = set.len(), mode = ?set.mode, "change set computed");
    for path in set.paths() {
        debug!(path = %path.display(), "selected notebook");
    }

    Ok(set)
}

/// Resolve `base_ref` to a commit, falling back to `<remote>/<base_ref>`.
pub fn resolve_base(git: &Git, base_ref: &str, remote: &str) -> Result<String> {
    if let Some(commit) = git.resolve_commit(base_ref)? {
        debug!(base_ref, %commit, "base reference resolved");
        return Ok(commit);
    }

    let remote_prefix = format!("{remote}/");
    if !remote.is_empty() && !base_ref.starts_with(&remote_prefix) {
        let remote_ref = format!("{remote_prefix}{base_ref}");
        if let Some(commit) = git.resolve_commit(&remote_ref)? {
            debug!(base_ref = %remote_ref, %commit, "base reference resolved via remote");
            return Ok(commit);
        }
    }

    Err(NbBuildError::resolution(format!(
        "'{base_ref}' does not name a commit in {}",
        git.root().display()
    )))
}

/// Whether a path names a notebook that should be considered at all.
pub fn is_notebook_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == NOTEBOOK_EXT)
        && !path.components().any(|c| c.as_os_str() == CHECKPOINT_DIR)
}

fn compile_excludes(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| NbBuildError::config(format!("invalid exclude pattern '{p}': {e}")))
        })
        .collect()
}

fn is_excluded(path: &Path, excludes: &[Regex]) -> bool {
    let s = path.to_string_lossy();
    excludes.iter().any(|re| re.is_match(&s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    /// Scratch git repository with a committed baseline.
    struct TestRepo {
        root: PathBuf,
        base: String,
    }

    impl TestRepo {
        fn new(files: &[&str]) -> Self {
            let root =
                std::env::temp_dir().join(format!("nbbuild-changes-{}", uuid::Uuid::now_v7()));
            std::fs::create_dir_all(&root).unwrap();
            let mut repo = Self {
                root,
                base: String::new(),
            };
            repo.git(&["init", "-q"]);
            for f in files {
                repo.write(f, "{}");
            }
            repo.commit("baseline");
            repo.base = repo.head();
            repo
        }

        fn git(&self, args: &[&str]) -> String {
            let out = Command::new("git")
                .args([
                    "-c",
                    "user.name=nbbuild",
                    "-c",
                    "user.email=nbbuild@example.com",
                    "-c",
                    "commit.gpgsign=false",
                ])
                .args(args)
                .current_dir(&self.root)
                .output()
                .expect("run git");
            assert!(
                out.status.success(),
                "git {args:?} failed: {}",
                String::from_utf8_lossy(&out.stderr)
            );
            String::from_utf8_lossy(&out.stdout).trim().to_string()
        }

        fn write(&self, rel: &str, content: &str) {
            let path = self.root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        fn commit(&self, msg: &str) {
            self.git(&["add", "-A"]);
            self.git(&["commit", "-q", "--allow-empty", "-m", msg]);
        }

        fn head(&self) -> String {
            self.git(&["rev-parse", "HEAD"])
        }

        fn opts(&self) -> DetectOptions {
            DetectOptions {
                base_ref: Some(self.base.clone()),
                ..DetectOptions::default()
            }
        }
    }

    impl Drop for TestRepo {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    fn paths(set: &ChangeSet) -> Vec<String> {
        set.paths()
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn notebook_path_filter() {
        assert!(is_notebook_path(Path::new("tutorials/units.ipynb")));
        assert!(!is_notebook_path(Path::new("tutorials/units.py")));
        assert!(!is_notebook_path(Path::new(
            "tutorials/.ipynb_checkpoints/units-checkpoint.ipynb"
        )));
        assert!(!is_notebook_path(Path::new("ipynb")));
    }

    #[test]
    fn modified_mode_selects_exactly_changed_notebooks() {
        let repo = TestRepo::new(&["a/units.ipynb", "b/integrate.ipynb", "c/blackbody.ipynb", "README.md"]);

        repo.write("b/integrate.ipynb", r#"{"changed": true}"#);
        repo.write("README.md", "edited");
        repo.write("d/new.ipynb", "{}");
        std::fs::remove_file(repo.root.join("c/blackbody.ipynb")).unwrap();

        let set = detect(&repo.root, &repo.opts()).expect("detect");
        assert_eq!(paths(&set), vec!["b/integrate.ipynb", "d/new.ipynb"]);
        assert!(matches!(set.mode, SelectionMode::Modified { ref base_commit, .. } if *base_commit == repo.base));
    }

    #[test]
    fn committed_changes_count_against_base() {
        let repo = TestRepo::new(&["a/units.ipynb", "b/integrate.ipynb", "c/blackbody.ipynb"]);
        repo.write("a/units.ipynb", r#"{"cells": []}"#);
        repo.commit("edit units");

        let set = detect(&repo.root, &repo.opts()).expect("detect");
        assert_eq!(paths(&set), vec!["a/units.ipynb"]);
    }

    #[test]
    fn unchanged_tree_yields_empty_set() {
        let repo = TestRepo::new(&["a/units.ipynb"]);
        let set = detect(&repo.root, &repo.opts()).expect("detect");
        assert!(set.is_empty());
    }

    #[test]
    fn all_mode_selects_every_notebook() {
        let repo = TestRepo::new(&["a/units.ipynb", "b/integrate.ipynb", "c/blackbody.ipynb", "setup.cfg"]);
        repo.write("a/.ipynb_checkpoints/units-checkpoint.ipynb", "{}");

        let opts = DetectOptions {
            all: true,
            base_ref: None,
            ..DetectOptions::default()
        };
        let set = detect(&repo.root, &opts).expect("detect");
        assert_eq!(
            paths(&set),
            vec!["a/units.ipynb", "b/integrate.ipynb", "c/blackbody.ipynb"]
        );
        assert_eq!(set.mode, SelectionMode::All);
    }

    #[test]
    fn exclude_patterns_are_applied() {
        let repo = TestRepo::new(&["tutorials/units.ipynb", "drafts/wip.ipynb"]);
        let opts = DetectOptions {
            all: true,
            exclude_patterns: vec!["^drafts/".into()],
            ..DetectOptions::default()
        };
        let set = detect(&repo.root, &opts).expect("detect");
        assert_eq!(paths(&set), vec!["tutorials/units.ipynb"]);

        let bad = DetectOptions {
            all: true,
            exclude_patterns: vec!["(".into()],
            ..DetectOptions::default()
        };
        assert!(matches!(
            detect(&repo.root, &bad).unwrap_err(),
            NbBuildError::Config { .. }
        ));
    }

    #[test]
    fn unresolvable_base_is_resolution_error() {
        let repo = TestRepo::new(&["a/units.ipynb"]);
        let opts = DetectOptions {
            base_ref: Some("no-such-branch".into()),
            ..DetectOptions::default()
        };
        let err = detect(&repo.root, &opts).unwrap_err();
        assert!(matches!(err, NbBuildError::Resolution { .. }));
        assert!(err.to_string().contains("no-such-branch"));

        let missing = DetectOptions {
            base_ref: Some("  ".into()),
            ..DetectOptions::default()
        };
        assert!(matches!(
            detect(&repo.root, &missing).unwrap_err(),
            NbBuildError::Resolution { .. }
        ));
    }

    #[test]
    fn base_falls_back_to_remote_tracking_ref() {
        let repo = TestRepo::new(&["a/units.ipynb", "b/integrate.ipynb"]);
        repo.git(&["update-ref", "refs/remotes/origin/trunk", &repo.base]);
        repo.write("a/units.ipynb", r#"{"edited": 1}"#);

        let opts = DetectOptions {
            base_ref: Some("trunk".into()),
            ..DetectOptions::default()
        };
        let set = detect(&repo.root, &opts).expect("detect");
        assert_eq!(paths(&set), vec!["a/units.ipynb"]);
    }

    #[test]
    fn outside_repository_is_resolution_error() {
        let dir = std::env::temp_dir().join(format!("nbbuild-norepo-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        // an enclosing repository would make this directory valid
        if Git::open(&dir).is_ok() {
            let _ = std::fs::remove_dir_all(&dir);
            return;
        }

        let opts = DetectOptions {
            all: true,
            ..DetectOptions::default()
        };
        assert!(matches!(
            detect(&dir, &opts).unwrap_err(),
            NbBuildError::Resolution { .. }
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_repo_directory_is_resolution_error() {
        let dir = std::env::temp_dir().join(format!("nbbuild-missing-{}", uuid::Uuid::now_v7()));
        let opts = DetectOptions {
            all: true,
            ..DetectOptions::default()
        };

        let err = detect(&dir, &opts).unwrap_err();
        assert!(matches!(err, NbBuildError::Resolution { .. }), "got {err}");
        assert!(err.to_string().contains("not a directory"));
    }
}
