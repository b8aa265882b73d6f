//! Cell outputs and error extraction.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::MultilineString;

/// Matches terminal color/cursor escape sequences in kernel tracebacks.
static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid ANSI regex"));

/// One entry of a code cell's `outputs` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    Stream {
        name: String,
        text: MultilineString,
    },
    DisplayData {
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    ExecuteResult {
        data: Map<String, Value>,
        #[serde(default)]
        execution_count: Option<u32>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl Output {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// An exception recorded in a notebook cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellError {
    /// Index of the cell in the notebook's full cell list.
    pub cell_index: usize,
    /// Exception class name.
    pub ename: String,
    /// Exception message.
    pub evalue: String,
    /// Traceback with terminal escapes removed.
    pub traceback: String,
}

impl CellError {
    pub(crate) fn from_output(cell_index: usize, output: &Output) -> Option<Self> {
        match output {
            Output::Error {
                ename,
                evalue,
                traceback,
            } => Some(Self {
                cell_index,
                ename: ename.clone(),
                evalue: strip_ansi(evalue),
                traceback: traceback
                    .iter()
                    .map(|line| strip_ansi(line))
                    .collect::<Vec<_>>()
                    .join("\n"),
            }),
            _ => None,
        }
    }

    /// `Ename: evalue`, the way Python prints the last traceback line.
    pub fn summary(&self) -> String {
        if self.evalue.is_empty() {
            self.ename.clone()
        } else {
            format!("{}: {}", self.ename, self.evalue)
        }
    }
}

/// Remove ANSI escape sequences.
fn strip_ansi(s: &str) -> String {
    ANSI_ESCAPE.replace_all(s, "").into_owned()
}
