//! Core domain types shared by the change detector and the pipeline.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for the JSON run report.
pub const CURRENT_REPORT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Pipeline knobs
// ---------------------------------------------------------------------------

/// What to do when a notebook fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Process every notebook and report all failures at the end.
    #[default]
    Continue,
    /// Stop processing at the first failure.
    FailFast,
}

/// Which stages a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Execute notebooks in place.
    Execute,
    /// Render notebooks to HTML as they are on disk.
    Convert,
    /// Execute, then convert the notebooks that executed cleanly.
    Build,
}

impl Stage {
    pub fn executes(self) -> bool {
        matches!(self, Self::Execute | Self::Build)
    }

    pub fn converts(self) -> bool {
        matches!(self, Self::Convert | Self::Build)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Execute => "execute",
            Self::Convert => "convert",
            Self::Build => "build",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ChangeSet
// ---------------------------------------------------------------------------

/// How the change set was selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SelectionMode {
    /// Notebooks differing from the resolved base commit.
    Modified {
        /// The reference as given (e.g. `main`).
        base_ref: String,
        /// The commit it resolved to.
        base_commit: String,
    },
    /// Every notebook in the repository.
    All,
}

/// The set of repo-relative notebook paths selected for one run.
///
/// Sorted and de-duplicated; immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Repository root the paths are relative to.
    pub repo_root: PathBuf,
    /// Selection mode.
    pub mode: SelectionMode,
    paths: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        mode: SelectionMode,
        paths: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        let paths: BTreeSet<PathBuf> = paths.into_iter().collect();
        Self {
            repo_root: repo_root.into(),
            mode,
            paths: paths.into_iter().collect(),
        }
    }

    /// Repo-relative notebook paths, sorted.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Absolute path of a repo-relative entry.
    pub fn absolute(&self, rel: &Path) -> PathBuf {
        self.repo_root.join(rel)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
