//! Notebook execution.
//!
//! Runs one notebook through the toolchain, then reloads the document to find
//! out what actually happened: the first cell carrying an error output fails
//! the notebook, and so does any non-empty code cell left unexecuted.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use nbbuild_notebook::Notebook;
use nbbuild_shared::{NbBuildError, Result};

use crate::toolchain::Toolchain;

/// A notebook that executed without any cell raising.
#[derive(Debug, Clone)]
pub struct ExecutedNotebook {
    /// Notebook file, now holding fresh outputs.
    pub path: PathBuf,
    /// Number of code cells that ran.
    pub executed_cells: usize,
    /// Wall-clock time spent in the tool.
    pub elapsed: Duration,
}

/// Execute `path` in place.
///
/// Errors:
/// - `Notebook` if the file is not a readable notebook, before or after the run
/// - `Execution` naming the failing cell index if any cell raised
/// - `Execution` without a cell if the tool failed or skipped cells
/// - `ToolMissing` if the tool cannot be spawned
#[instrument(skip_all, fields(notebook = %path.display()))]
pub async fn execute_notebook(toolchain: &dyn Toolchain, path: &Path) -> Result<ExecutedNotebook> {
    // refuse to hand a broken document to the tool
    let before = Notebook::load(path)?;
    debug!(
        code_cells = before.code_cells().count(),
        kernel = before.kernel_name().unwrap_or("default"),
        "executing notebook"
    );

    let start = Instant::now();
    let run = toolchain.execute(path).await?;
    let elapsed = start.elapsed();

    let after = Notebook::load(path)?;

    if let Some(err) = after.first_error() {
        warn!(cell = err.cell_index, error = %err.summary(), "cell raised");
        return Err(NbBuildError::cell_failed(path, err.cell_index, err.summary()));
    }

    if !run.success {
        return Err(NbBuildError::execution(
            path,
            format!("tool exited with an error:\n{}", run.stderr_tail()),
        ));
    }

    if let Some(&idx) = after.unexecuted_code_cells().first() {
        return Err(NbBuildError::cell_failed(
            path,
            idx,
            "cell has no execution count after the run",
        ));
    }

    let executed_cells = after.code_cells().filter(|(_, c)| c.is_executable()).count();
    info!(
        executed_cells,
        elapsed_ms = elapsed.as_millis() as u64,
        "notebook executed"
    );

    Ok(ExecutedNotebook {
        path: path.to_path_buf(),
        executed_cells,
        elapsed,
    })
}
