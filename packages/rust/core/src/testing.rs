//! In-process toolchain and fixtures for tests.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, json};

use nbbuild_notebook::{Cell, MultilineString, Notebook, Output};
use nbbuild_shared::{NbBuildError, Result};

use crate::toolchain::{ToolRun, Toolchain};

/// Source text the fake kernel treats as raising.
pub(crate) const RAISING_SOURCE: &str = "1/0";

/// Deterministic stand-in for Jupyter.
///
/// Executing a code cell records a stream output; a cell whose source
/// contains `1/0` records a `ZeroDivisionError` instead, and later cells still
/// run, like `nbconvert --allow-errors`.
#[derive(Default)]
pub(crate) struct FakeToolchain {
    /// `check` fails with `ToolMissing`.
    pub missing: bool,
    /// `execute` exits non-zero without touching the notebook.
    pub crash: bool,
    /// `execute` leaves code cells unexecuted.
    pub skip_cells: bool,
    /// `render_html` exits zero but writes nothing.
    pub no_output: bool,
    pub calls: Mutex<Vec<(String, PathBuf)>>,
}

impl FakeToolchain {
    fn record(&self, op: &str, path: &Path) {
        self.calls
            .lock()
            .expect("calls lock")
            .push((op.to_string(), path.to_path_buf()));
    }

    /// File names passed to `op`, in call order.
    pub(crate) fn calls_for(&self, op: &str) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|(o, _)| o == op)
            .map(|(_, p)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }
}

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn check(&self) -> Result<String> {
        if self.missing {
            return Err(NbBuildError::tool_missing("jupyter", "not installed in test"));
        }
        Ok("fake 1.0".into())
    }

    async fn execute(&self, notebook: &Path) -> Result<ToolRun> {
        self.record("execute", notebook);
        if self.crash {
            return Ok(ToolRun {
                success: false,
                stderr: "Traceback...\nRuntimeError: Kernel died before replying\n".into(),
            });
        }

        let mut nb = Notebook::load(notebook)?;
        if !self.skip_cells {
            let mut counter = 0;
            for (_, cell) in nb.code_cells_mut() {
                if !cell.is_executable() {
                    continue;
                }
                counter += 1;
                cell.execution_count = Some(counter);
                cell.outputs = if cell.source.text().contains(RAISING_SOURCE) {
                    vec![Output::Error {
                        ename: "ZeroDivisionError".into(),
                        evalue: "division by zero".into(),
                        traceback: vec![
                            "\u{1b}[0;31mZeroDivisionError\u{1b}[0m: division by zero".into(),
                        ],
                    }]
                } else {
                    vec![Output::Stream {
                        name: "stdout".into(),
                        text: MultilineString::from("ok\n"),
                    }]
                };
            }
        }
        nb.save(notebook)?;

        Ok(ToolRun {
            success: true,
            stderr: String::new(),
        })
    }

    async fn render_html(&self, notebook: &Path, output: &Path) -> Result<ToolRun> {
        self.record("render", notebook);
        if self.no_output {
            return Ok(ToolRun {
                success: true,
                stderr: String::new(),
            });
        }

        let nb = Notebook::load(notebook)?;
        let mut html = String::from("<!DOCTYPE html>\n<html><body>\n");
        for cell in &nb.cells {
            match cell {
                Cell::Markdown(c) | Cell::Raw(c) => {
                    html.push_str(&format!("<div class=\"md\">{}</div>\n", c.source.text()));
                }
                Cell::Code(c) => {
                    html.push_str(&format!("<pre class=\"code\">{}</pre>\n", c.source.text()));
                    for out in &c.outputs {
                        let text = serde_json::to_string(out).unwrap_or_default();
                        html.push_str(&format!("<pre class=\"out\">{text}</pre>\n"));
                    }
                }
            }
        }
        html.push_str("</body></html>\n");
        std::fs::write(output, html).map_err(|e| NbBuildError::io(output, e))?;

        Ok(ToolRun {
            success: true,
            stderr: String::new(),
        })
    }
}

/// Build an unexecuted notebook whose code cells have the given sources.
pub(crate) fn notebook_with(sources: &[&str]) -> Notebook {
    let mut cells = vec![json!({
        "cell_type": "markdown",
        "metadata": {},
        "source": "# Tutorial"
    })];
    for src in sources {
        cells.push(json!({
            "cell_type": "code",
            "execution_count": null,
            "metadata": {},
            "outputs": [],
            "source": src,
        }));
    }
    let doc = json!({
        "cells": cells,
        "metadata": Map::new(),
        "nbformat": 4,
        "nbformat_minor": 5,
    });
    serde_json::from_value(doc).expect("valid notebook")
}

/// Tag the cell at `index` of the notebook at `path`.
pub(crate) fn tag_cell(path: &Path, index: usize, tag: &str) {
    let mut nb = Notebook::load(path).expect("load notebook");
    let Cell::Code(cell) = &mut nb.cells[index] else {
        panic!("cell {index} is not a code cell");
    };
    cell.metadata.insert("tags".into(), json!([tag]));
    nb.save(path).expect("save notebook");
}

/// Write a notebook under `dir`, creating parent directories.
pub(crate) fn write_notebook(dir: &Path, rel: &str, sources: &[&str]) -> PathBuf {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    notebook_with(sources).save(&path).expect("save notebook");
    path
}

/// A fresh scratch directory.
pub(crate) fn scratch_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Run git in `dir` with a throwaway identity.
pub(crate) fn git(dir: &Path, args: &[&str]) -> String {
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
        .current_dir(dir)
        .output()
        .expect("run git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}
