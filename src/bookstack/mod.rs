//! Handle to the BookStack deployment that is being backed up.

mod compose;

use std::path::{Path, PathBuf};

pub use compose::{Compose, ComposeConfig, ComposeError};

/// Credentials used to dump the BookStack database.
///
/// The application user is tried first; the administrative password, if
/// present, is used for a single fallback attempt.
#[derive(Debug, Clone)]
pub struct DbCredentials {
    /// Name of the BookStack database.
    pub database: String,
    /// Application database user.
    pub user: String,
    /// Password of the application database user.
    pub password: String,
    /// Administrative (root) password for the fallback dump attempt.
    pub root_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Bookstack {
    compose: Compose,
    credentials: DbCredentials,
    deployment_root: PathBuf,
}

impl Bookstack {
    pub fn new(deployment_root: PathBuf, compose: Compose, credentials: DbCredentials) -> Self {
        assert!(
            deployment_root.is_dir(),
            "BookStack deployment root directory exists",
        );

        Self {
            compose,
            credentials,
            deployment_root,
        }
    }

    pub fn deployment_root(&self) -> &Path {
        self.deployment_root.as_path()
    }

    pub fn compose(&self) -> &Compose {
        &self.compose
    }

    pub fn credentials(&self) -> &DbCredentials {
        &self.credentials
    }
}
