//! Backend modules for performing individual backup tasks.
//!
//! Currently the following backends are implemented:
//!
//! - [MariaDb]: Compressed dump of the BookStack database.
//! - [Archive]: Compressed tarball of the BookStack data directories.
//! - [PageExport]: Per-page Markdown/HTML export of the wiki content.

pub mod archive;
pub mod export;
pub mod mariadb;

pub use archive::Archive;
pub use export::PageExport;
pub use mariadb::MariaDb;

use crate::bookstack::{Bookstack, ComposeConfig};
use crate::publish::PublishConfig;
use crate::util::retention::RetentionConfig;

#[allow(missing_docs)]
/// Generic backup backend.
pub trait Backup {
    /// Error that may happen on backup.
    type Error;

    /// Backups data managed by the implementation.
    ///
    /// # Dry Run
    ///
    /// On a dry run (`dry_run=true`) no files are altered.
    /// This does include folders and other special files.
    ///
    /// Instead sanity checks are performed to determine if a "real" backup
    /// would succeed under the present conditions.
    fn backup(&self, bookstack: &Bookstack, dry_run: bool) -> Result<(), Self::Error>;

    /// Applies the [RetentionConfig] to all backups created by the [Backup].
    fn retention(&self, cfg: &RetentionConfig, dry_run: bool) -> Result<(), Self::Error>;
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
/// Configuration of all available backends.
pub struct BackendsConfig {
    /// Compose deployment resolution.
    pub compose: ComposeConfig,

    /// Configuration of the [MariaDb] backend.
    pub mariadb: mariadb::MariaDbConfig,

    /// Configuration of the [Archive] backend.
    pub archive: archive::ArchiveConfig,

    /// Configuration of the [PageExport] backend.
    pub export: export::PageExportConfig,

    /// Configuration of the snapshot publisher.
    pub publish: PublishConfig,

    /// Retention config.
    pub retention: RetentionConfig,
}
