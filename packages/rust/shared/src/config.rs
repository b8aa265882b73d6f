//! Application configuration for nbbuild.
//!
//! Project config lives at `<repo>/nbbuild.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NbBuildError, Result};
use crate::types::FailurePolicy;

/// Default configuration file name, looked up at the repository root.
pub const CONFIG_FILE_NAME: &str = "nbbuild.toml";

// ---------------------------------------------------------------------------
// Config structs (matching nbbuild.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Version-control and CI trigger settings.
    #[serde(default)]
    pub git: GitConfig,

    /// External notebook tool settings.
    #[serde(default)]
    pub jupyter: JupyterConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory (relative to the repo root) receiving rendered HTML.
    #[serde(default = "default_html_dir")]
    pub html_dir: String,

    /// Stop at the first failing notebook instead of reporting all failures.
    #[serde(default)]
    pub fail_fast: bool,

    /// Regexes matched against repo-relative notebook paths to skip.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            html_dir: default_html_dir(),
            fail_fast: false,
            exclude_patterns: Vec::new(),
        }
    }
}

fn default_html_dir() -> String {
    "_build/html".into()
}

/// `[git]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Name of the env var holding the base branch (e.g. set by the CI runner).
    #[serde(default = "default_base_ref_env")]
    pub base_ref_env: String,

    /// Remote tried as a prefix when the bare base ref does not resolve.
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Name of the env var pointing at the CI event payload JSON.
    #[serde(default = "default_event_path_env")]
    pub event_path_env: String,

    /// Pull-request label that forces processing of every notebook.
    #[serde(default = "default_override_label")]
    pub override_label: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            base_ref_env: default_base_ref_env(),
            remote: default_remote(),
            event_path_env: default_event_path_env(),
            override_label: default_override_label(),
        }
    }
}

fn default_base_ref_env() -> String {
    "GITHUB_BASE_REF".into()
}
fn default_remote() -> String {
    "origin".into()
}
fn default_event_path_env() -> String {
    "GITHUB_EVENT_PATH".into()
}
fn default_override_label() -> String {
    "run-all-notebooks".into()
}

/// `[jupyter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JupyterConfig {
    /// Executable used for both execution and conversion.
    #[serde(default = "default_jupyter_command")]
    pub command: String,

    /// Kernel name; `None` uses the kernel recorded in each notebook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,

    /// Per-cell timeout handed to the execution tool.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Wall-clock limit for one whole notebook (execution or conversion).
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

impl Default for JupyterConfig {
    fn default() -> Self {
        Self {
            command: default_jupyter_command(),
            kernel: None,
            timeout_secs: default_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

fn default_jupyter_command() -> String {
    "jupyter".into()
}
fn default_timeout_secs() -> u64 {
    600
}
fn default_run_timeout_secs() -> u64 {
    3600
}

impl AppConfig {
    /// Failure policy implied by `[defaults].fail_fast`.
    pub fn failure_policy(&self) -> FailurePolicy {
        if self.defaults.fail_fast {
            FailurePolicy::FailFast
        } else {
            FailurePolicy::Continue
        }
    }

    /// Reject values that would make every run fail.
    pub fn validate(&self) -> Result<()> {
        if self.jupyter.command.trim().is_empty() {
            return Err(NbBuildError::config("[jupyter].command must not be empty"));
        }
        if self.jupyter.timeout_secs == 0 {
            return Err(NbBuildError::config(
                "[jupyter].timeout_secs must be at least 1",
            ));
        }
        if self.jupyter.run_timeout_secs == 0 {
            return Err(NbBuildError::config(
                "[jupyter].run_timeout_secs must be at least 1",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Path of the config file for a repository root.
pub fn config_file_path(repo_root: &Path) -> PathBuf {
    repo_root.join(CONFIG_FILE_NAME)
}

/// Load the config for a repository. Returns defaults if the file does not exist.
pub fn load_config(repo_root: &Path) -> Result<AppConfig> {
    let path = config_file_path(repo_root);

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NbBuildError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| NbBuildError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Write a default config file at the repository root.
/// Refuses to overwrite an existing file. Returns the path written.
pub fn init_config(repo_root: &Path) -> Result<PathBuf> {
    let path = config_file_path(repo_root);
    if path.exists() {
        return Err(NbBuildError::config(format!(
            "{} already exists",
            path.display()
        )));
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| NbBuildError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| NbBuildError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
