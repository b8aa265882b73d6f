//! End-to-end run: change set → execute → convert → report.
//!
//! Notebooks are processed one at a time, in change-set order. Under
//! [`FailurePolicy::Continue`] every notebook is attempted and every failure is
//! recorded; a notebook that failed to execute is never converted. Under
//! [`FailurePolicy::FailFast`] the run stops at the first failure and the
//! remaining notebooks stay pending.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use nbbuild_shared::{ChangeSet, FailurePolicy, NbBuildError, Result, Stage};

use crate::converter::{convert_notebook, html_path_for};
use crate::executor::execute_notebook;
use crate::report::{NotebookReport, NotebookStatus, RunReport, Step};
use crate::toolchain::Toolchain;

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Stages to perform.
    pub stage: Stage,
    /// Behaviour on notebook failure.
    pub policy: FailurePolicy,
    /// Directory receiving HTML output.
    pub html_dir: PathBuf,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before a notebook enters a step.
    fn notebook_started(&self, step: Step, path: &Path, current: usize, total: usize);
    /// Called when a notebook fails a step.
    fn notebook_failed(&self, step: Step, path: &Path, error: &NbBuildError);
    /// Called when the run completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn notebook_started(&self, _step: Step, _path: &Path, _current: usize, _total: usize) {}
    fn notebook_failed(&self, _step: Step, _path: &Path, _error: &NbBuildError) {}
    fn done(&self, _report: &RunReport) {}
}

/// Whether the run must stop after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

/// Run the pipeline over a change set.
///
/// Per-notebook failures land in the report; the returned error is reserved
/// for failures that invalidate the whole run (missing tools).
#[instrument(skip_all, fields(stage = %config.stage, notebooks = changes.len()))]
pub async fn run(
    changes: &ChangeSet,
    config: &PipelineConfig,
    toolchain: &dyn Toolchain,
    progress: &dyn ProgressReporter,
) -> Result<RunReport> {
    let start = Instant::now();
    let mut report = RunReport::new(config.stage, config.policy, changes.mode.clone());
    report.notebooks = changes.paths().iter().map(NotebookReport::pending).collect();

    if changes.is_empty() {
        info!("no notebooks selected, nothing to do");
        report.finished_at = Utc::now();
        progress.done(&report);
        return Ok(report);
    }

    progress.phase("Checking toolchain");
    toolchain.check().await?;

    let mut flow = Flow::Continue;

    if config.stage.executes() {
        progress.phase("Executing notebooks");
        flow = execute_step(changes, config, toolchain, progress, &mut report).await?;
    }

    if config.stage.converts() && flow == Flow::Continue {
        progress.phase("Converting notebooks");
        convert_step(changes, config, toolchain, progress, &mut report).await?;
    }

    report.finished_at = Utc::now();
    progress.done(&report);

    info!(
        run_id = %report.run_id,
        succeeded = report.count(NotebookStatus::Succeeded),
        failed = report.count(NotebookStatus::Failed),
        pending = report.count(NotebookStatus::Pending),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "pipeline complete"
    );

    Ok(report)
}

async fn execute_step(
    changes: &ChangeSet,
    config: &PipelineConfig,
    toolchain: &dyn Toolchain,
    progress: &dyn ProgressReporter,
    report: &mut RunReport,
) -> Result<Flow> {
    let total = report.notebooks.len();
    // under Build a notebook only succeeds once its HTML exists
    let final_step = !config.stage.converts();

    for (i, entry) in report.notebooks.iter_mut().enumerate() {
        progress.notebook_started(Step::Execute, &entry.path, i + 1, total);
        let started = Instant::now();
        let outcome = execute_notebook(toolchain, &changes.absolute(&entry.path)).await;
        entry.elapsed_ms += started.elapsed().as_millis() as u64;

        match outcome {
            Ok(_) => {
                if final_step {
                    entry.status = NotebookStatus::Succeeded;
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                record_failure(Step::Execute, entry, &e, progress);
                if config.stage.converts() {
                    remove_stale_html(&config.html_dir, &entry.path);
                }
                if config.policy == FailurePolicy::FailFast {
                    return Ok(Flow::Halt);
                }
            }
        }
    }

    Ok(Flow::Continue)
}

async fn convert_step(
    changes: &ChangeSet,
    config: &PipelineConfig,
    toolchain: &dyn Toolchain,
    progress: &dyn ProgressReporter,
    report: &mut RunReport,
) -> Result<Flow> {
    let total = report
        .notebooks
        .iter()
        .filter(|n| n.status == NotebookStatus::Pending)
        .count();
    let mut current = 0;

    for entry in report.notebooks.iter_mut() {
        if entry.status != NotebookStatus::Pending {
            continue;
        }
        current += 1;
        progress.notebook_started(Step::Convert, &entry.path, current, total);

        let html = html_path_for(&config.html_dir, &entry.path);
        let started = Instant::now();
        let outcome = convert_notebook(toolchain, &changes.absolute(&entry.path), &html).await;
        entry.elapsed_ms += started.elapsed().as_millis() as u64;

        match outcome {
            Ok(converted) => {
                entry.status = NotebookStatus::Succeeded;
                entry.html_path = Some(converted.html_path);
                entry.html_sha256 = Some(converted.sha256);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                record_failure(Step::Convert, entry, &e, progress);
                if config.policy == FailurePolicy::FailFast {
                    return Ok(Flow::Halt);
                }
            }
        }
    }

    Ok(Flow::Continue)
}

fn record_failure(
    step: Step,
    entry: &mut NotebookReport,
    err: &NbBuildError,
    progress: &dyn ProgressReporter,
) {
    error!(notebook = %entry.path.display(), %step, error = %err, "notebook failed");
    progress.notebook_failed(step, &entry.path, err);
    entry.fail(step, err);
}

/// Drop HTML left by an earlier run for a notebook that will not be converted.
fn remove_stale_html(html_dir: &Path, notebook: &Path) {
    let html = html_path_for(html_dir, notebook);
    match std::fs::remove_file(&html) {
        Ok(()) => debug!(html = %html.display(), "removed stale HTML"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(html = %html.display(), error = %e, "could not remove stale HTML"),
    }
}
