use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

const LOCK_FILE_NAME: &str = ".bs-backup.lock";

/// Errors while acquiring the run lock.
#[derive(Debug, Display, Error, From)]
pub enum LockError {
    /// Another backup run holds the lock.
    #[display("Another backup run holds the lock at {}", _0.display())]
    Held(#[error(ignore)] PathBuf),

    #[from]
    Io(io::Error),
}

/// Guards against two backup runs racing on the same backups directory.
///
/// The lock file is created with `create_new` and removed on drop. Stale
/// locks (e.g. after a power loss) have to be removed manually; the daily
/// scheduler interval makes overlap the exception, not the rule.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn acquire(backup_root: &Path) -> Result<Self, LockError> {
        let path = backup_root.join(LOCK_FILE_NAME);

        let mut file = match File::create_new(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LockError::Held(path));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        log::trace!(target: "lock", "Acquired lock: {}", path.display());

        Ok(Self { path })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!(target: "lock", "Releasing lock {} failed: {e}", self.path.display());
        }
    }
}
