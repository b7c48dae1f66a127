//! Compressed tarball of the BookStack data directories and deployment
//! config, with secrets masked.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Local;
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;

use crate::backends::Backup;
use crate::bookstack::Bookstack;
use crate::util::retention::{self, RetentionConfig};

const ARCHIVE_DEST: &str = "data/";
const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Configuration of the [Archive] backend.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Prefix of the archive file name.
    pub prefix: String,

    /// Directories and files archived, relative to the deployment root.
    pub paths: Vec<PathBuf>,

    /// Include the deployment `.env` file, with secret values masked.
    pub include_env: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            prefix: "bookstack-data".to_string(),
            paths: ["public/uploads", "storage"].map(PathBuf::from).to_vec(),
            include_env: true,
        }
    }
}

/// The [Archive] backend tars the bind-mounted BookStack data directories
/// together with the compose file and a masked copy of `.env`.
pub struct Archive {
    archive_dest: PathBuf,
    config: ArchiveConfig,
}

impl Archive {
    pub fn with_config(backup_root: &Path, config: ArchiveConfig) -> Self {
        let archive_dest = backup_root.join(ARCHIVE_DEST);
        if archive_dest.is_relative() {
            log::warn!(target: "backend::archive", "archive_dest is relative: {}", archive_dest.display());
        }

        Self {
            archive_dest,
            config,
        }
    }

    fn generate_archive_filename(&self) -> PathBuf {
        let timestamp = Local::now().format("%Y-%m-%dT%H-%M-%S");

        let path = self
            .archive_dest
            .join(format!("{}_{timestamp}{ARCHIVE_SUFFIX}", self.config.prefix));
        assert!(!path.exists(), "archive file should not exist prior");

        path
    }

    /// Write the archive to `dest`.
    ///
    /// `extra_files` are archived under their file name next to the data
    /// directories (used for the compose file).
    fn write_archive(
        &self,
        deployment_root: &Path,
        extra_files: &[&Path],
        dest: &Path,
    ) -> io::Result<()> {
        let archive_file = File::create_new(dest)?;
        let encoder = GzEncoder::new(archive_file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);

        for path in &self.config.paths {
            let source = deployment_root.join(path);
            if !source.exists() {
                log::warn!(target: "backend::archive", "Skipping missing path: {}", source.display());
                continue;
            }

            log::debug!(target: "backend::archive", "Archiving: {}", source.display());
            if source.is_dir() {
                builder.append_dir_all(path, &source)?;
            } else {
                builder.append_path_with_name(&source, path)?;
            }
        }

        for file in extra_files {
            if !file.is_file() {
                log::warn!(target: "backend::archive", "Skipping missing file: {}", file.display());
                continue;
            }
            let name = file.file_name().expect("extra files have a file name");
            builder.append_path_with_name(file, name)?;
        }

        if self.config.include_env {
            let env_file = deployment_root.join(".env");
            match fs::read_to_string(&env_file) {
                Ok(contents) => {
                    let masked = mask_env_secrets(&contents);
                    append_text(&mut builder, ".env", &masked)?;
                }
                Err(e) => {
                    log::warn!(target: "backend::archive", "Skipping {}: {e}", env_file.display());
                }
            }
        }

        let encoder = builder.into_inner()?;
        encoder.finish()?;

        Ok(())
    }
}

fn append_text<W: io::Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    contents: &str,
) -> io::Result<()> {
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o600);
    header.set_mtime(mtime);
    header.set_cksum();

    builder.append_data(&mut header, name, contents.as_bytes())
}

/// Mask the values of secret-bearing `.env` entries.
///
/// Keys ending in `PASSWORD`, `SECRET` or `KEY` keep their name but lose
/// their value, analogous to masking the dbpassword when exporting an
/// application config.
fn mask_env_secrets(contents: &str) -> String {
    let re = Regex::new(r"(?m)^(\s*[A-Za-z0-9_]*(?:PASSWORD|SECRET|KEY)\s*=).*$").unwrap();
    re.replace_all(contents, "${1}MASKED").into_owned()
}

impl Backup for Archive {
    type Error = io::Error;

    fn backup(&self, bookstack: &Bookstack, dry_run: bool) -> Result<(), Self::Error> {
        log::info!(target: "backend::archive", "Create archive of the BookStack data directories");

        let compose_file = bookstack.compose().compose_file();

        if dry_run {
            // sanity checks only
            for path in &self.config.paths {
                let source = bookstack.deployment_root().join(path);
                if !source.exists() {
                    log::warn!(target: "backend::archive", "Would skip missing path: {}", source.display());
                }
            }
            log::trace!(target: "backend::archive", "Skipping archive creation on dry-run");
            return Ok(());
        }

        fs::create_dir_all(&self.archive_dest)?;
        let archive_file = self.generate_archive_filename();
        log::debug!(target: "backend::archive", "Save BookStack data archive at: {}", archive_file.display());

        let part_file = archive_file.with_extension("gz.part");
        if let Err(e) = self.write_archive(
            bookstack.deployment_root(),
            &[compose_file],
            &part_file,
        ) {
            if part_file.exists() {
                if let Err(e) = fs::remove_file(&part_file) {
                    log::warn!(target: "backend::archive", "Removing partial archive {} failed: {e}", part_file.display());
                }
            }
            return Err(e);
        }
        fs::rename(&part_file, &archive_file)?;

        log::info!(target: "backend::archive", "Finished BookStack data archive.");

        Ok(())
    }

    fn retention(&self, cfg: &RetentionConfig, dry_run: bool) -> Result<(), Self::Error> {
        if !self.archive_dest.is_dir() {
            return Ok(());
        }

        let deleted = retention::prune(&self.archive_dest, ARCHIVE_SUFFIX, cfg, dry_run)?;
        log::info!(target: "backend::archive", "Retention removed {deleted} data archive(s)");

        Ok(())
    }
}
