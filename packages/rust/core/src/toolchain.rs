//! External notebook tooling.
//!
//! The executor and converter never spawn processes themselves; they go
//! through a [`Toolchain`]. Production code uses [`JupyterToolchain`], which
//! drives `jupyter nbconvert`.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use nbbuild_shared::{JupyterConfig, NbBuildError, Result};

/// Hint printed when the Jupyter tooling cannot be found.
const JUPYTER_INSTALL_HINT: &str = "install it with `pip install jupyter nbconvert`";

/// How many trailing stderr lines to keep in error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Exit status and diagnostics of one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolRun {
    /// Whether the tool exited with status zero.
    pub success: bool,
    /// Captured standard error.
    pub stderr: String,
}

impl ToolRun {
    /// Last lines of stderr, for error messages.
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self.stderr.trim_end().lines().collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        lines[start..].join("\n")
    }
}

/// Programs that execute notebooks and render them to HTML.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Confirm the tools are installed. Returns a version string.
    async fn check(&self) -> Result<String>;

    /// Execute every code cell of `notebook` in a fresh kernel, writing
    /// outputs back into the file. Cells that raise must still have their
    /// error outputs recorded.
    async fn execute(&self, notebook: &Path) -> Result<ToolRun>;

    /// Render `notebook` to a standalone HTML document at `output`.
    async fn render_html(&self, notebook: &Path, output: &Path) -> Result<ToolRun>;
}

// ---------------------------------------------------------------------------
// Jupyter
// ---------------------------------------------------------------------------

/// [`Toolchain`] backed by `jupyter nbconvert`.
#[derive(Debug, Clone)]
pub struct JupyterToolchain {
    command: String,
    kernel: Option<String>,
    cell_timeout: Duration,
    run_timeout: Duration,
}

impl From<&JupyterConfig> for JupyterToolchain {
    fn from(config: &JupyterConfig) -> Self {
        Self {
            command: config.command.clone(),
            kernel: config.kernel.clone(),
            cell_timeout: Duration::from_secs(config.timeout_secs),
            run_timeout: Duration::from_secs(config.run_timeout_secs),
        }
    }
}

impl JupyterToolchain {
    /// Arguments for in-place execution.
    ///
    /// `--allow-errors` keeps the tool going after a raising cell so the
    /// traceback lands in the document, where the executor picks it up.
    pub(crate) fn execute_args(&self, notebook: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "nbconvert".into(),
            "--to".into(),
            "notebook".into(),
            "--execute".into(),
            "--inplace".into(),
            "--allow-errors".into(),
            format!("--ExecutePreprocessor.timeout={}", self.cell_timeout.as_secs()).into(),
        ];
        if let Some(kernel) = &self.kernel {
            args.push(format!("--ExecutePreprocessor.kernel_name={kernel}").into());
        }
        args.push(notebook.as_os_str().to_owned());
        args
    }

    /// Arguments for HTML rendering. nbconvert appends `.html` to `--output`.
    pub(crate) fn render_args(&self, notebook: &Path, output: &Path) -> Vec<OsString> {
        let out_dir = output.parent().unwrap_or_else(|| Path::new("."));
        let stem = output
            .file_stem()
            .map(|s| s.to_owned())
            .unwrap_or_else(|| "index".into());

        vec![
            "nbconvert".into(),
            "--to".into(),
            "html".into(),
            "--output-dir".into(),
            out_dir.as_os_str().to_owned(),
            "--output".into(),
            stem,
            notebook.as_os_str().to_owned(),
        ]
    }

    /// Spawn the tool and wait for it, bounded by the run timeout.
    async fn run(&self, args: Vec<OsString>, subject: &Path) -> Result<std::process::Output> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %self.command, ?args, "spawning tool");

        let child = cmd.spawn().map_err(|e| self.spawn_error(e, subject))?;

        tokio::time::timeout(self.run_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                NbBuildError::execution(
                    subject,
                    format!("timed out after {}s", self.run_timeout.as_secs()),
                )
            })?
            .map_err(|e| NbBuildError::io(subject, e))
    }

    fn spawn_error(&self, e: std::io::Error, subject: &Path) -> NbBuildError {
        if e.kind() == std::io::ErrorKind::NotFound {
            NbBuildError::tool_missing(&self.command, JUPYTER_INSTALL_HINT)
        } else {
            NbBuildError::io(subject, e)
        }
    }
}

fn tool_run(output: std::process::Output) -> ToolRun {
    ToolRun {
        success: output.status.success(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

#[async_trait]
impl Toolchain for JupyterToolchain {
    async fn check(&self) -> Result<String> {
        let args: Vec<OsString> = vec!["nbconvert".into(), "--version".into()];
        let output = self.run(args, Path::new(&self.command)).await?;

        if !output.status.success() {
            return Err(NbBuildError::tool_missing(
                format!("{} nbconvert", self.command),
                JUPYTER_INSTALL_HINT,
            ));
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(nbconvert_version = %version, "jupyter nbconvert found");
        Ok(version)
    }

    async fn execute(&self, notebook: &Path) -> Result<ToolRun> {
        let output = self.run(self.execute_args(notebook), notebook).await?;
        Ok(tool_run(output))
    }

    async fn render_html(&self, notebook: &Path, output: &Path) -> Result<ToolRun> {
        let result = self
            .run(self.render_args(notebook, output), notebook)
            .await
            .map_err(|e| match e {
                // a stuck renderer is a conversion failure, not an execution one
                NbBuildError::Execution { message, .. } => {
                    NbBuildError::conversion(notebook, message)
                }
                other => other,
            })?;
        Ok(tool_run(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toolchain(command: &str, kernel: Option<&str>) -> JupyterToolchain {
        JupyterToolchain::from(&JupyterConfig {
            command: command.into(),
            kernel: kernel.map(String::from),
            timeout_secs: 120,
            run_timeout_secs: 5,
        })
    }

    #[test]
    fn execute_args_run_in_place_with_errors_allowed() {
        let tc = toolchain("jupyter", Some("python3"));
        let args = tc.execute_args(Path::new("tutorials/units.ipynb"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(args[0], "nbconvert");
        assert!(args.contains(&"--execute".to_string()));
        assert!(args.contains(&"--inplace".to_string()));
        assert!(args.contains(&"--allow-errors".to_string()));
        assert!(args.contains(&"--ExecutePreprocessor.timeout=120".to_string()));
        assert!(args.contains(&"--ExecutePreprocessor.kernel_name=python3".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("tutorials/units.ipynb"));
    }

    #[test]
    fn execute_args_without_kernel_override() {
        let tc = toolchain("jupyter", None);
        let args = tc.execute_args(Path::new("a.ipynb"));
        assert!(
            !args
                .iter()
                .any(|a| a.to_string_lossy().contains("kernel_name"))
        );
    }

    #[test]
    fn render_args_split_output_dir_and_stem() {
        let tc = toolchain("jupyter", None);
        let args = tc.render_args(
            Path::new("/repo/tutorials/units.ipynb"),
            Path::new("/repo/_build/html/tutorials/units.html"),
        );
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "nbconvert",
                "--to",
                "html",
                "--output-dir",
                "/repo/_build/html/tutorials",
                "--output",
                "units",
                "/repo/tutorials/units.ipynb",
            ]
        );
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let stderr = (0..30).map(|i| format!("line {i}\n")).collect::<String>();
        let run = ToolRun {
            success: false,
            stderr,
        };
        let tail = run.stderr_tail();
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }

    #[tokio::test]
    async fn missing_binary_is_tool_missing() {
        let tc = toolchain("nbbuild-no-such-jupyter-binary", None);
        let err = tc.check().await.unwrap_err();
        assert!(matches!(err, NbBuildError::ToolMissing { .. }));

        let err = tc.execute(Path::new("a.ipynb")).await.unwrap_err();
        assert!(matches!(err, NbBuildError::ToolMissing { .. }));
    }
}
