//! Notebook → HTML rendering.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use nbbuild_notebook::Notebook;
use nbbuild_shared::{NbBuildError, Result};

use crate::toolchain::Toolchain;

/// A rendered HTML document.
#[derive(Debug, Clone)]
pub struct ConvertedNotebook {
    /// Source notebook.
    pub notebook: PathBuf,
    /// Written HTML file.
    pub html_path: PathBuf,
    /// Hex SHA-256 of the HTML bytes.
    pub sha256: String,
    /// Size of the HTML file in bytes.
    pub bytes: u64,
}

/// Where the HTML for a repo-relative notebook path goes.
///
/// The notebook's directory structure is mirrored under `html_dir`, so
/// `tutorials/units.ipynb` becomes `<html_dir>/tutorials/units.html`.
pub fn html_path_for(html_dir: &Path, notebook_rel: &Path) -> PathBuf {
    html_dir.join(notebook_rel).with_extension("html")
}

/// Render `notebook` to `html_path`.
#[instrument(skip_all, fields(notebook = %notebook.display(), html = %html_path.display()))]
pub async fn convert_notebook(
    toolchain: &dyn Toolchain,
    notebook: &Path,
    html_path: &Path,
) -> Result<ConvertedNotebook> {
    Notebook::load(notebook)
        .map_err(|e| NbBuildError::conversion(notebook, format!("malformed input: {e}")))?;

    if let Some(parent) = html_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| NbBuildError::io(parent, e))?;
    }

    // a stale file from an earlier run must not pass for fresh output
    match std::fs::remove_file(html_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(NbBuildError::io(html_path, e)),
    }

    let run = toolchain.render_html(notebook, html_path).await?;
    if !run.success {
        return Err(NbBuildError::conversion(
            notebook,
            format!("tool exited with an error:\n{}", run.stderr_tail()),
        ));
    }

    let html = match std::fs::read(html_path) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        _ => {
            return Err(NbBuildError::conversion(
                notebook,
                format!("produced no output at {}", html_path.display()),
            ));
        }
    };

    let sha256 = format!("{:x}", Sha256::digest(&html));
    info!(bytes = html.len(), %sha256, "notebook converted");

    Ok(ConvertedNotebook {
        notebook: notebook.to_path_buf(),
        html_path: html_path.to_path_buf(),
        sha256,
        bytes: html.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::execute_notebook;
    use crate::testing::{FakeToolchain, scratch_dir, write_notebook};

    #[test]
    fn html_path_mirrors_notebook_tree() {
        assert_eq!(
            html_path_for(Path::new("/repo/_build/html"), Path::new("tutorials/units.ipynb")),
            PathBuf::from("/repo/_build/html/tutorials/units.html")
        );
    }

    #[tokio::test]
    async fn converting_twice_is_byte_identical() {
        let dir = scratch_dir("nbbuild-convert");
        let nb = write_notebook(&dir, "units.ipynb", &["x = 1", "x * 2"]);
        let tc = FakeToolchain::default();
        execute_notebook(&tc, &nb).await.expect("execute");

        let html = html_path_for(&dir.join("html"), Path::new("units.ipynb"));
        let first = convert_notebook(&tc, &nb, &html).await.expect("first");
        let first_bytes = std::fs::read(&html).unwrap();
        let second = convert_notebook(&tc, &nb, &html).await.expect("second");
        let second_bytes = std::fs::read(&html).unwrap();

        assert_eq!(first.sha256, second.sha256);
        assert_eq!(first_bytes, second_bytes);
        assert!(first.bytes > 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_output_is_conversion_error() {
        let dir = scratch_dir("nbbuild-convert");
        let nb = write_notebook(&dir, "units.ipynb", &["x = 1"]);
        let tc = FakeToolchain {
            no_output: true,
            ..FakeToolchain::default()
        };

        let html = dir.join("html/units.html");
        let err = convert_notebook(&tc, &nb, &html).await.unwrap_err();
        assert!(matches!(err, NbBuildError::Conversion { .. }));
        assert!(err.to_string().contains("produced no output"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn malformed_input_is_conversion_error() {
        let dir = scratch_dir("nbbuild-convert");
        let nb = dir.join("broken.ipynb");
        std::fs::write(&nb, "[]").unwrap();
        let tc = FakeToolchain::default();

        let err = convert_notebook(&tc, &nb, &dir.join("broken.html"))
            .await
            .unwrap_err();
        assert!(matches!(err, NbBuildError::Conversion { .. }));
        assert!(tc.calls_for("render").is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
