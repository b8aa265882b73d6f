//! Shared types, error model, and configuration for nbbuild.
//!
//! This crate is the foundation depended on by all other nbbuild crates.
//! It provides:
//! - [`NbBuildError`] — the unified error type
//! - Domain types ([`ChangeSet`], [`SelectionMode`], [`Stage`], [`FailurePolicy`], [`RunId`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CONFIG_FILE_NAME, DefaultsConfig, GitConfig, JupyterConfig, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{NbBuildError, Result};
pub use types::{CURRENT_REPORT_VERSION, ChangeSet, FailurePolicy, RunId, SelectionMode, Stage};
