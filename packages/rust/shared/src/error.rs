//! Error types for nbbuild.
//!
//! Library crates use [`NbBuildError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all nbbuild operations.
#[derive(Debug, thiserror::Error)]
pub enum NbBuildError {
    /// The base reference could not be resolved in version-control history.
    #[error("cannot resolve base reference: {message}")]
    Resolution { message: String },

    /// A notebook cell raised during execution (or the run itself failed).
    #[error("{}", execution_message(.path, .cell_index, .message))]
    Execution {
        path: PathBuf,
        cell_index: Option<usize>,
        message: String,
    },

    /// Rendering a notebook to HTML failed or produced no output.
    #[error("conversion failed for {path:?}: {message}")]
    Conversion { path: PathBuf, message: String },

    /// A required external binary is not installed.
    #[error("required tool `{tool}` not found: {hint}")]
    ToolMissing { tool: String, hint: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Notebook document could not be parsed or serialized.
    #[error("notebook error at {path:?}: {message}")]
    Notebook { path: PathBuf, message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

fn execution_message(path: &std::path::Path, cell_index: &Option<usize>, message: &str) -> String {
    match cell_index {
        Some(idx) => format!("execution failed for {path:?} at cell {idx}: {message}"),
        None => format!("execution failed for {path:?}: {message}"),
    }
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NbBuildError>;

impl NbBuildError {
    /// Create a resolution error from any displayable message.
    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution {
            message: msg.into(),
        }
    }

    /// Create an execution error that is attributed to a specific cell.
    pub fn cell_failed(path: impl Into<PathBuf>, cell_index: usize, msg: impl Into<String>) -> Self {
        Self::Execution {
            path: path.into(),
            cell_index: Some(cell_index),
            message: msg.into(),
        }
    }

    /// Create an execution error not tied to any cell (timeout, tool crash).
    pub fn execution(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Execution {
            path: path.into(),
            cell_index: None,
            message: msg.into(),
        }
    }

    /// Create a conversion error.
    pub fn conversion(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Conversion {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a missing-tool error with an install hint.
    pub fn tool_missing(tool: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::ToolMissing {
            tool: tool.into(),
            hint: hint.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a notebook parse/serialize error.
    pub fn notebook(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Notebook {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors that invalidate the whole run rather than a single notebook.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Resolution { .. } | Self::ToolMissing { .. } | Self::Config { .. }
        )
    }

    /// Short machine-readable kind, used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => "resolution",
            Self::Execution { .. } => "execution",
            Self::Conversion { .. } => "conversion",
            Self::ToolMissing { .. } => "tool_missing",
            Self::Config { .. } => "config",
            Self::Notebook { .. } => "notebook",
            Self::Io { .. } => "io",
            Self::Validation { .. } => "validation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = NbBuildError::resolution("origin/main not found");
        assert_eq!(
            err.to_string(),
            "cannot resolve base reference: origin/main not found"
        );

        let err = NbBuildError::cell_failed("nb/units.ipynb", 3, "ZeroDivisionError: division by zero");
        let msg = err.to_string();
        assert!(msg.contains("nb/units.ipynb"));
        assert!(msg.contains("cell 3"));
        assert!(msg.contains("ZeroDivisionError"));

        let err = NbBuildError::execution("nb/units.ipynb", "timed out after 600s");
        assert!(!err.to_string().contains("cell"));
    }

    #[test]
    fn fatal_kinds() {
        assert!(NbBuildError::tool_missing("jupyter", "pip install nbconvert").is_fatal());
        assert!(NbBuildError::resolution("x").is_fatal());
        assert!(!NbBuildError::conversion("a.ipynb", "boom").is_fatal());
        assert_eq!(NbBuildError::conversion("a.ipynb", "boom").kind(), "conversion");
    }
}
