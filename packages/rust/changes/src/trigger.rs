//! CI event payload inspection.
//!
//! The runner writes the triggering webhook payload to a JSON file (GitHub
//! Actions exposes its path as `GITHUB_EVENT_PATH`). Only the pull-request
//! labels and base branch are read from it.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use nbbuild_shared::{NbBuildError, Result};

/// The parts of a pull-request event payload we care about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullRequest {
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub base: Option<BaseBranch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BaseBranch {
    #[serde(rename = "ref")]
    pub reference: String,
}

impl EventPayload {
    /// Read a payload file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| NbBuildError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| {
            NbBuildError::config(format!("malformed event payload {}: {e}", path.display()))
        })
    }

    /// Whether the pull request carries a label with exactly this name.
    pub fn has_label(&self, name: &str) -> bool {
        self.pull_request
            .as_ref()
            .is_some_and(|pr| pr.labels.iter().any(|l| l.name == name))
    }

    /// Base branch name of the pull request, if present.
    pub fn base_ref(&self) -> Option<&str> {
        self.pull_request
            .as_ref()
            .and_then(|pr| pr.base.as_ref())
            .map(|b| b.reference.as_str())
    }
}

/// Load the payload at `path`, or an empty payload when no path is configured.
pub fn load_event(path: Option<&Path>) -> Result<EventPayload> {
    match path {
        Some(p) => {
            let event = EventPayload::load(p)?;
            debug!(
                path = %p.display(),
                has_pr = event.pull_request.is_some(),
                "event payload loaded"
            );
            Ok(event)
        }
        None => Ok(EventPayload::default()),
    }
}
