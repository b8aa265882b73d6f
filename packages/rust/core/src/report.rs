//! Run report: per-notebook outcomes of one pipeline run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use nbbuild_shared::{
    CURRENT_REPORT_VERSION, FailurePolicy, NbBuildError, Result, RunId, SelectionMode, Stage,
};

/// The step a notebook was in when something happened to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Execute,
    Convert,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execute => f.write_str("execute"),
            Self::Convert => f.write_str("convert"),
        }
    }
}

/// Lifecycle of one notebook within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotebookStatus {
    /// Not processed (yet, or ever, after a fail-fast stop).
    Pending,
    Succeeded,
    Failed,
}

/// Why a notebook failed.
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub step: Step,
    /// Error kind, e.g. `execution`.
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_index: Option<usize>,
    pub message: String,
}

impl Failure {
    pub fn new(step: Step, error: &NbBuildError) -> Self {
        let cell_index = match error {
            NbBuildError::Execution { cell_index, .. } => *cell_index,
            _ => None,
        };
        Self {
            step,
            kind: error.kind().to_string(),
            cell_index,
            message: error.to_string(),
        }
    }
}

/// Outcome for one notebook.
#[derive(Debug, Clone, Serialize)]
pub struct NotebookReport {
    /// Repo-relative notebook path.
    pub path: PathBuf,
    pub status: NotebookStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_sha256: Option<String>,
    /// Milliseconds spent on this notebook across all steps.
    pub elapsed_ms: u64,
}

impl NotebookReport {
    pub fn pending(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            status: NotebookStatus::Pending,
            failure: None,
            html_path: None,
            html_sha256: None,
            elapsed_ms: 0,
        }
    }

    /// Mark failed in `step`.
    pub fn fail(&mut self, step: Step, error: &NbBuildError) {
        self.status = NotebookStatus::Failed;
        self.failure = Some(Failure::new(step, error));
    }
}

/// Everything a run did, in change-set order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub schema_version: u32,
    pub run_id: RunId,
    pub stage: Stage,
    pub policy: FailurePolicy,
    pub selection: SelectionMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub notebooks: Vec<NotebookReport>,
}

impl RunReport {
    pub fn new(stage: Stage, policy: FailurePolicy, selection: SelectionMode) -> Self {
        let now = Utc::now();
        Self {
            schema_version: CURRENT_REPORT_VERSION,
            run_id: RunId::new(),
            stage,
            policy,
            selection,
            started_at: now,
            finished_at: now,
            notebooks: Vec::new(),
        }
    }

    /// Notebooks that failed, in processing order.
    pub fn failures(&self) -> impl Iterator<Item = &NotebookReport> {
        self.notebooks
            .iter()
            .filter(|n| n.status == NotebookStatus::Failed)
    }

    pub fn count(&self, status: NotebookStatus) -> usize {
        self.notebooks.iter().filter(|n| n.status == status).count()
    }

    /// True when no notebook failed.
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Report entry for a repo-relative path.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<&NotebookReport> {
        self.notebooks.iter().find(|n| n.path == path.as_ref())
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| NbBuildError::validation(format!("failed to serialize report: {e}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| NbBuildError::io(parent, e))?;
        }
        std::fs::write(path, json).map_err(|e| NbBuildError::io(path, e))
    }
}
