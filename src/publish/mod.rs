//! Publishing the working tree as a git snapshot.

mod git;

pub use git::{GitPublisher, PublishError, PublishOutcome};

use std::path::PathBuf;

/// Configuration of the snapshot publisher.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Publish a snapshot after the backup run.
    pub enabled: bool,

    /// Remote to rebase onto and push to.
    pub remote: String,

    /// Repository holding the backup artifacts.
    ///
    /// Defaults to the deployment root.
    pub repository: Option<PathBuf>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            remote: "origin".to_string(),
            repository: None,
        }
    }
}
