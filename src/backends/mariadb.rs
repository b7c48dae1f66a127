//! Compressed dump of the BookStack database with credential fallback.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::thread;

use chrono::Local;
use derive_more::{Display, Error, From};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::backends::Backup;
use crate::bookstack::Bookstack;
use crate::util::retention::{self, RetentionConfig};

const DB_DUMP_DEST: &str = "db/";
const DB_DUMP_SUFFIX: &str = ".sql.gz";

/// Dump tools probed inside the database container, in declaration order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum DumpTool {
    #[display("mariadb-dump")]
    MariaDbDump,
    #[display("mysqldump")]
    MysqlDump,
}

impl DumpTool {
    fn binary(&self) -> &'static str {
        match self {
            DumpTool::MariaDbDump => "mariadb-dump",
            DumpTool::MysqlDump => "mysqldump",
        }
    }
}

/// A single failed dump invocation.
#[derive(Debug, Display, Error, From)]
pub enum DumpAttemptError {
    /// The dump tool ran but exited unsuccessfully.
    #[display("{tool} as '{user}' exited with {status}: {stderr}")]
    DumpFailed {
        tool: DumpTool,
        user: String,
        status: ExitStatus,
        stderr: String,
    },

    #[from]
    Io(io::Error),
}

/// Errors on backup of the BookStack database.
#[derive(Debug, Display, Error, From)]
pub enum MariaDbBackupError {
    /// Neither dump tool is installed in the database container.
    #[display("Neither mariadb-dump nor mysqldump is available in service '{_0}'")]
    NoDumpTool(#[error(ignore)] String),

    /// Primary attempt failed and no administrative password is configured.
    #[display("Database dump with the application user failed and no administrative password is set for a fallback: {primary}")]
    NoFallback { primary: DumpAttemptError },

    /// Both credential sets were rejected.
    #[display("Database dump failed with both credential sets; application user: {primary}; administrative user: {fallback}")]
    AllAttemptsFailed {
        primary: DumpAttemptError,
        fallback: DumpAttemptError,
    },

    #[from]
    Io(io::Error),
}

/// Configuration of the [MariaDb] backend.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MariaDbConfig {
    /// Extra arguments passed to the dump tool.
    pub dump_args: Vec<String>,
}

impl Default for MariaDbConfig {
    fn default() -> Self {
        Self {
            dump_args: ["--single-transaction", "--quick"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// The [MariaDb] backend dumps the BookStack database through the running
/// compose service, compressing on the fly.
pub struct MariaDb {
    db_dump_dest: PathBuf,
    config: MariaDbConfig,
}

impl MariaDb {
    pub fn with_config(backup_root: &Path, config: MariaDbConfig) -> Self {
        let db_dump_dest = backup_root.join(DB_DUMP_DEST);
        if db_dump_dest.is_relative() {
            log::warn!(target: "backend::mariadb", "db_dump_dest is relative: {}", db_dump_dest.display());
        }

        Self {
            db_dump_dest,
            config,
        }
    }

    fn generate_db_dump_filename(&self, database: &str) -> PathBuf {
        let timestamp = Local::now().format("%Y-%m-%dT%H-%M-%S");

        let path = self
            .db_dump_dest
            .join(format!("{database}_{timestamp}{DB_DUMP_SUFFIX}"));
        assert!(!path.exists(), "db dump file should not exist prior");

        path
    }

    /// Arguments of a dump invocation inside the container.
    ///
    /// The password is *not* part of the arguments; it is passed via the
    /// `MYSQL_PWD` container environment.
    fn dump_invocation(&self, tool: DumpTool, user: &str, database: &str) -> Vec<String> {
        let mut args = vec![tool.binary().to_string()];
        args.extend(self.config.dump_args.iter().cloned());
        args.push(format!("--user={user}"));
        args.push(database.to_string());
        args
    }

    fn resolve_dump_tool(&self, bookstack: &Bookstack) -> Result<DumpTool, MariaDbBackupError> {
        for tool in [DumpTool::MariaDbDump, DumpTool::MysqlDump] {
            let probe = bookstack
                .compose()
                .exec(&[])
                .arg(tool.binary())
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();

            if probe.is_ok_and(|status| status.success()) {
                log::debug!(target: "backend::mariadb", "Using dump tool: {tool}");
                return Ok(tool);
            }
        }

        Err(MariaDbBackupError::NoDumpTool(
            bookstack.compose().service().to_string(),
        ))
    }

    /// Run one dump attempt, streaming stdout through gzip into `dest`.
    ///
    /// With `dest=None` the output is discarded (dry run).
    fn run_dump(
        &self,
        bookstack: &Bookstack,
        tool: DumpTool,
        user: &str,
        password: &str,
        dest: Option<&Path>,
    ) -> Result<(), DumpAttemptError> {
        let database = &bookstack.credentials().database;

        let mut command = bookstack.compose().exec(&[("MYSQL_PWD", password)]);
        command.args(self.dump_invocation(tool, user, database));
        let mut dump_process = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        log::trace!(target: "backend::mariadb", "Started {tool} process as '{user}'.");

        // drain stderr on its own thread; a chatty dump tool would
        // otherwise fill the pipe buffer and deadlock the stdout copy
        let stderr_pipe = dump_process.stderr.take();
        let stderr_reader = thread::spawn(move || {
            let mut stderr = String::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_string(&mut stderr);
            }
            stderr
        });

        // compress and capture stdout of the dump tool
        let stdout = dump_process.stdout.take().unwrap();
        let mut reader = BufReader::new(stdout);
        match dest {
            None => {
                log::trace!(target: "backend::mariadb", "Discarding output of {tool} on dry-run");
                let mut sink = io::sink();
                io::copy(&mut reader, &mut sink)?;
            }
            Some(dest) => {
                let db_dump_file = File::create_new(dest)?;
                let mut encoder = GzEncoder::new(db_dump_file, Compression::default());

                io::copy(&mut reader, &mut encoder)?;
                encoder.finish()?;
            }
        }

        let stderr = stderr_reader.join().unwrap_or_default();
        let exit_status = dump_process.wait()?;

        if !exit_status.success() {
            return Err(DumpAttemptError::DumpFailed {
                tool,
                user: user.to_string(),
                status: exit_status,
                stderr: stderr.trim().to_string(),
            });
        }

        // relay stderr
        if !stderr.trim().is_empty() {
            log::warn!(target: "backend::mariadb", "{}", stderr.trim());
        }

        Ok(())
    }

    fn discard_partial(part_file: Option<&Path>) {
        let Some(part_file) = part_file else { return };
        if !part_file.exists() {
            return;
        }
        if let Err(e) = fs::remove_file(part_file) {
            log::warn!(target: "backend::mariadb", "Removing partial dump {} failed: {e}", part_file.display());
        }
    }
}

impl Backup for MariaDb {
    type Error = MariaDbBackupError;

    fn backup(&self, bookstack: &Bookstack, dry_run: bool) -> Result<(), Self::Error> {
        let credentials = bookstack.credentials();
        log::info!(target: "backend::mariadb", "Create database dump of the BookStack database: {}", credentials.database);
        log::trace!(target: "backend::mariadb", "Using dbuser '{}' for backup", credentials.user);

        let tool = self.resolve_dump_tool(bookstack)?;

        let dump_file = if dry_run {
            None
        } else {
            fs::create_dir_all(&self.db_dump_dest)?;
            Some(self.generate_db_dump_filename(&credentials.database))
        };
        if let Some(dump_file) = &dump_file {
            log::debug!(target: "backend::mariadb", "Save BookStack database dump at: {}", dump_file.display());
        }

        // the dump lands in a .part file and is renamed once complete,
        // so retention and the publisher never see partial dumps
        let part_file = dump_file
            .as_ref()
            .map(|path| path.with_extension("gz.part"));

        let primary = match self.run_dump(
            bookstack,
            tool,
            &credentials.user,
            &credentials.password,
            part_file.as_deref(),
        ) {
            Ok(()) => None,
            Err(primary) => {
                Self::discard_partial(part_file.as_deref());
                Some(primary)
            }
        };

        if let Some(primary) = primary {
            log::warn!(target: "backend::mariadb", "Dump with application user failed ({primary}), retrying with administrative user");

            let Some(root_password) = &credentials.root_password else {
                return Err(MariaDbBackupError::NoFallback { primary });
            };

            if let Err(fallback) =
                self.run_dump(bookstack, tool, "root", root_password, part_file.as_deref())
            {
                Self::discard_partial(part_file.as_deref());
                return Err(MariaDbBackupError::AllAttemptsFailed { primary, fallback });
            }
        }

        if let (Some(part_file), Some(dump_file)) = (&part_file, &dump_file) {
            fs::rename(part_file, dump_file)?;
        }

        log::info!(target: "backend::mariadb", "Finished BookStack database dump.");

        Ok(())
    }

    fn retention(&self, cfg: &RetentionConfig, dry_run: bool) -> Result<(), Self::Error> {
        if !self.db_dump_dest.is_dir() {
            return Ok(());
        }

        let deleted = retention::prune(&self.db_dump_dest, DB_DUMP_SUFFIX, cfg, dry_run)?;
        log::info!(target: "backend::mariadb", "Retention removed {deleted} database dump(s)");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::ffi::OsString;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::{Mutex, MutexGuard};

    use crate::bookstack::{Compose, DbCredentials};

    use super::*;

    // PATH is process-global; tests shimming it must not interleave
    static PATH_LOCK: Mutex<()> = Mutex::new(());

    /// Shims `docker` with a script for the lifetime of the value.
    struct FakeDocker {
        original_path: OsString,
        _dir: tempfile::TempDir,
        _lock: MutexGuard<'static, ()>,
    }

    impl FakeDocker {
        fn install(script: &str) -> Self {
            let lock = PATH_LOCK.lock().unwrap_or_else(|e| e.into_inner());

            let dir = tempfile::tempdir().unwrap();
            let binary = dir.path().join("docker");
            fs::write(&binary, script).unwrap();
            fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();

            let original_path = env::var_os("PATH").unwrap_or_default();
            let paths = std::iter::once(dir.path().to_path_buf())
                .chain(env::split_paths(&original_path));
            env::set_var("PATH", env::join_paths(paths).unwrap());

            Self {
                original_path,
                _dir: dir,
                _lock: lock,
            }
        }
    }

    impl Drop for FakeDocker {
        fn drop(&mut self) {
            env::set_var("PATH", &self.original_path);
        }
    }

    /// Fake dump tool: every `--version` probe succeeds, a dump succeeds
    /// only with the administrative password.
    const DOCKER_ROOT_ONLY: &str = r#"#!/bin/sh
for arg in "$@"; do
    if [ "$arg" = "--version" ]; then exit 0; fi
done
if [ "$MYSQL_PWD" = "root-pass" ]; then
    echo "-- MariaDB dump"
    exit 0
fi
echo "Access denied for user" >&2
exit 1
"#;

    /// Fake dump tool rejecting every credential set.
    const DOCKER_REJECT_ALL: &str = r#"#!/bin/sh
for arg in "$@"; do
    if [ "$arg" = "--version" ]; then exit 0; fi
done
echo "Access denied for user" >&2
exit 1
"#;

    fn deployment_fixture(
        deployment: &Path,
        root_password: Option<&str>,
    ) -> Bookstack {
        let compose_file = deployment.join("docker-compose.yml");
        fs::write(&compose_file, "services: {}\n").unwrap();

        Bookstack::new(
            deployment.to_path_buf(),
            Compose::fixed(compose_file, "db".to_string()),
            DbCredentials {
                database: "bookstack".to_string(),
                user: "bookstack".to_string(),
                password: "app-pass".to_string(),
                root_password: root_password.map(String::from),
            },
        )
    }

    fn dump_files(backup_root: &Path) -> Vec<String> {
        fs::read_dir(backup_root.join(DB_DUMP_DEST))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn fallback_success_leaves_exactly_one_dump_file() {
        let _docker = FakeDocker::install(DOCKER_ROOT_ONLY);
        let deployment = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        let bookstack = deployment_fixture(deployment.path(), Some("root-pass"));
        let backend = MariaDb::with_config(backups.path(), MariaDbConfig::default());

        backend.backup(&bookstack, false).unwrap();

        let dumps = dump_files(backups.path());
        assert_eq!(dumps.len(), 1, "exactly one dump file: {dumps:?}");
        assert!(dumps[0].ends_with(DB_DUMP_SUFFIX));
    }

    #[test]
    fn double_credential_failure_leaves_no_dump_file() {
        let _docker = FakeDocker::install(DOCKER_REJECT_ALL);
        let deployment = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        let bookstack = deployment_fixture(deployment.path(), Some("root-pass"));
        let backend = MariaDb::with_config(backups.path(), MariaDbConfig::default());

        let error = backend.backup(&bookstack, false).unwrap_err();

        assert!(matches!(
            error,
            MariaDbBackupError::AllAttemptsFailed { .. }
        ));
        assert!(dump_files(backups.path()).is_empty());
    }

    #[test]
    fn missing_root_password_skips_the_fallback() {
        let _docker = FakeDocker::install(DOCKER_ROOT_ONLY);
        let deployment = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        let bookstack = deployment_fixture(deployment.path(), None);
        let backend = MariaDb::with_config(backups.path(), MariaDbConfig::default());

        let error = backend.backup(&bookstack, false).unwrap_err();

        assert!(matches!(error, MariaDbBackupError::NoFallback { .. }));
        assert!(dump_files(backups.path()).is_empty());
    }

    #[test]
    fn dump_invocation_places_user_before_database() {
        let backend = MariaDb::with_config(Path::new("/backups"), MariaDbConfig::default());

        let args = backend.dump_invocation(DumpTool::MariaDbDump, "bookstack", "bookstack");

        assert_eq!(
            args,
            [
                "mariadb-dump",
                "--single-transaction",
                "--quick",
                "--user=bookstack",
                "bookstack"
            ]
        );
    }

    #[test]
    fn dump_invocation_never_contains_a_password() {
        let backend = MariaDb::with_config(Path::new("/backups"), MariaDbConfig::default());

        let args = backend.dump_invocation(DumpTool::MysqlDump, "root", "bookstack");

        assert!(args.iter().all(|arg| !arg.contains("password")));
        assert_eq!(args[0], "mysqldump");
    }

    #[test]
    fn dump_filename_embeds_database_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MariaDb::with_config(dir.path(), MariaDbConfig::default());
        fs::create_dir_all(dir.path().join(DB_DUMP_DEST)).unwrap();

        let path = backend.generate_db_dump_filename("bookstack");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();

        assert!(name.starts_with("bookstack_"));
        assert!(name.ends_with(DB_DUMP_SUFFIX));
    }

    #[test]
    fn double_failure_reports_both_attempts() {
        let primary = DumpAttemptError::Io(io::Error::other("primary refused"));
        let fallback = DumpAttemptError::Io(io::Error::other("fallback refused"));

        let error = MariaDbBackupError::AllAttemptsFailed { primary, fallback };
        let message = error.to_string();

        assert!(message.contains("primary refused"));
        assert!(message.contains("fallback refused"));
    }
}
