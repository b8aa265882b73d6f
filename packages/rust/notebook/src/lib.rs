//! Jupyter notebook (nbformat v4) document model.
//!
//! Notebooks are read and written as JSON with `serde`. Metadata maps are kept
//! as raw `serde_json` values so a load/save cycle never drops fields this
//! crate does not interpret. Saving follows the on-disk layout Jupyter itself
//! writes (one-space indent, trailing newline).

mod outputs;

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use nbbuild_shared::{NbBuildError, Result};

pub use outputs::{CellError, Output};

/// Oldest major nbformat version we understand.
const MIN_NBFORMAT: u32 = 4;

/// Cell tag that tells the executor to leave a code cell alone.
pub const SKIP_EXECUTION_TAG: &str = "skip-execution";

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

/// A notebook document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    /// Ordered cells.
    pub cells: Vec<Cell>,
    /// Notebook-level metadata (kernelspec, language_info, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Major format version.
    pub nbformat: u32,
    /// Minor format version.
    pub nbformat_minor: u32,
}

/// A single cell, discriminated by `cell_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    Markdown(TextCell),
    Code(CodeCell),
    Raw(TextCell),
}

/// Markdown or raw cell body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub source: MultilineString,
}

/// Executable code cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeCell {
    /// `null` until the cell has been run.
    #[serde(default)]
    pub execution_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    pub source: MultilineString,
}

impl CodeCell {
    /// Whether the cell contains anything besides whitespace.
    pub fn has_code(&self) -> bool {
        !self.source.text().trim().is_empty()
    }

    /// Whether `metadata.tags` lists `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata
            .get("tags")
            .and_then(Value::as_array)
            .is_some_and(|tags| tags.iter().any(|t| t.as_str() == Some(tag)))
    }

    /// Whether the executor runs this cell at all.
    pub fn is_executable(&self) -> bool {
        self.has_code() && !self.has_tag(SKIP_EXECUTION_TAG)
    }

    /// First error output of this cell, if it raised.
    pub fn error(&self) -> Option<&Output> {
        self.outputs.iter().find(|o| o.is_error())
    }
}

/// nbformat "multiline string": either one string or a list of lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MultilineString {
    Single(String),
    Lines(Vec<String>),
}

impl MultilineString {
    /// The full text, lines concatenated as stored.
    pub fn text(&self) -> String {
        match self {
            Self::Single(s) => s.clone(),
            Self::Lines(lines) => lines.concat(),
        }
    }
}

impl Default for MultilineString {
    fn default() -> Self {
        Self::Lines(Vec::new())
    }
}

impl From<&str> for MultilineString {
    fn from(s: &str) -> Self {
        Self::Lines(s.split_inclusive('\n').map(String::from).collect())
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

impl Notebook {
    /// Read and parse a notebook file.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| NbBuildError::io(path, e))?;
        let nb = Self::parse(&content, path)?;
        debug!(cells = nb.cells.len(), "notebook loaded");
        Ok(nb)
    }

    /// Parse notebook JSON. `origin` is used only for error messages.
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        let nb: Self = serde_json::from_str(content)
            .map_err(|e| NbBuildError::notebook(origin, format!("invalid notebook JSON: {e}")))?;

        if nb.nbformat < MIN_NBFORMAT {
            return Err(NbBuildError::notebook(
                origin,
                format!(
                    "nbformat {} is not supported (need {MIN_NBFORMAT} or newer)",
                    nb.nbformat
                ),
            ));
        }

        Ok(nb)
    }

    /// Serialize using Jupyter's on-disk layout.
    pub fn to_json_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)
            .map_err(|e| NbBuildError::validation(format!("failed to serialize notebook: {e}")))?;
        buf.push(b'\n');

        String::from_utf8(buf)
            .map_err(|e| NbBuildError::validation(format!("notebook is not valid UTF-8: {e}")))
    }

    /// Write the notebook to disk, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json_string()?;
        std::fs::write(path, json).map_err(|e| NbBuildError::io(path, e))
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Code cells with their index in the full cell list.
    pub fn code_cells(&self) -> impl Iterator<Item = (usize, &CodeCell)> {
        self.cells.iter().enumerate().filter_map(|(i, cell)| match cell {
            Cell::Code(code) => Some((i, code)),
            _ => None,
        })
    }

    /// Mutable counterpart of [`Notebook::code_cells`].
    pub fn code_cells_mut(&mut self) -> impl Iterator<Item = (usize, &mut CodeCell)> {
        self.cells
            .iter_mut()
            .enumerate()
            .filter_map(|(i, cell)| match cell {
                Cell::Code(code) => Some((i, code)),
                _ => None,
            })
    }

    /// The first cell, in document order, that recorded an error output.
    pub fn first_error(&self) -> Option<CellError> {
        self.code_cells().find_map(|(idx, cell)| {
            cell.error().and_then(|out| CellError::from_output(idx, out))
        })
    }

    /// Indices of executable code cells that were never executed.
    ///
    /// Cells tagged `skip-execution` are left unexecuted on purpose and are
    /// not listed.
    pub fn unexecuted_code_cells(&self) -> Vec<usize> {
        self.code_cells()
            .filter(|(_, cell)| cell.is_executable() && cell.execution_count.is_none())
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Kernel name recorded in `metadata.kernelspec.name`, if any.
    pub fn kernel_name(&self) -> Option<&str> {
        self.metadata
            .get("kernelspec")
            .and_then(|k| k.get("name"))
            .and_then(Value::as_str)
    }
}
