use std::io;
use std::path::PathBuf;
use std::process::Command;

use chrono::{DateTime, Local};
use derive_more::{Display, Error, From};

/// Errors while publishing a snapshot.
#[derive(Debug, Display, Error, From)]
pub enum PublishError {
    /// The artifact directory is not inside a git repository.
    #[display("{} is not a git repository", _0.display())]
    NotARepository(#[error(ignore)] PathBuf),

    /// A preparatory git invocation failed.
    #[display("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The final push was rejected.
    ///
    /// The commit exists locally; the next run pushes it along.
    #[display("Push to '{remote}' failed: {stderr}")]
    PushFailed { remote: String, stderr: String },

    #[from]
    Io(io::Error),
}

/// What the publisher did for this run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Working tree was clean, nothing committed.
    NothingToDo,
    /// Changes committed, but no remote is configured.
    Committed,
    /// Changes committed and pushed to the remote.
    Pushed,
}

/// Commits the current state of the backup repository and pushes it.
///
/// Stages everything, commits with a timestamped message if the working
/// tree is dirty, rebases onto the remote (failure tolerated) and pushes.
#[derive(Debug, Clone)]
pub struct GitPublisher {
    repository: PathBuf,
    remote: String,
}

fn commit_message(now: DateTime<Local>) -> String {
    format!("Data snapshot {}", now.format("%Y-%m-%dT%H:%M:%S%z"))
}

impl GitPublisher {
    pub fn new(repository: PathBuf, remote: String) -> Self {
        Self { repository, remote }
    }

    fn git(&self) -> Command {
        let mut command = Command::new("git");
        command.arg("-C").arg(&self.repository);
        command
    }

    /// Run a git subcommand, failing on a non-zero exit.
    fn run(&self, args: &[&str]) -> Result<String, PublishError> {
        let output = self.git().args(args).output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(PublishError::CommandFailed {
                command: args.join(" "),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(stdout.trim_end().to_string())
    }

    /// Like [`run`](Self::run), but a failure is only logged.
    fn run_tolerated(&self, args: &[&str]) -> Option<String> {
        match self.run(args) {
            Ok(stdout) => Some(stdout),
            Err(e) => {
                log::warn!(target: "publish::git", "Tolerated: {e}");
                None
            }
        }
    }

    pub fn publish(&self, dry_run: bool) -> Result<PublishOutcome, PublishError> {
        if self.run(&["rev-parse", "--git-dir"]).is_err() {
            return Err(PublishError::NotARepository(self.repository.clone()));
        }

        // porcelain output includes untracked files, so the working tree
        // can be inspected before anything is staged
        let status = self.run(&["status", "--porcelain"])?;
        if status.is_empty() {
            log::info!(target: "publish::git", "Working tree clean, no snapshot to publish");
            return Ok(PublishOutcome::NothingToDo);
        }

        let message = commit_message(Local::now());
        if dry_run {
            log::info!(target: "publish::git", "Would commit snapshot: {message}");
            return Ok(PublishOutcome::Committed);
        }

        self.run(&["add", "-A"])?;
        self.run(&["commit", "-m", &message])?;
        log::info!(target: "publish::git", "Committed snapshot: {message}");

        if self.run(&["remote", "get-url", &self.remote]).is_err() {
            log::info!(target: "publish::git", "No remote '{}' configured, keeping snapshot local", self.remote);
            return Ok(PublishOutcome::Committed);
        }

        // a failed rebase is aborted so the working tree stays usable
        if self
            .run_tolerated(&["pull", "--rebase", &self.remote])
            .is_none()
        {
            self.run_tolerated(&["rebase", "--abort"]);
        }

        let push = self.git().arg("push").arg(&self.remote).output()?;
        if !push.status.success() {
            let stderr = String::from_utf8_lossy(&push.stderr);
            return Err(PublishError::PushFailed {
                remote: self.remote.clone(),
                stderr: stderr.trim().to_string(),
            });
        }

        log::info!(target: "publish::git", "Pushed snapshot to '{}'", self.remote);
        Ok(PublishOutcome::Pushed)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use chrono::TimeZone;

    use super::*;

    fn init_repository(dir: &Path) {
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .arg("-C")
                .arg(dir)
                .args(args)
                .status()
                .unwrap();
            assert!(status.success(), "git {args:?} failed");
        };

        run(&["init", "--quiet"]);
        run(&["config", "user.name", "backup"]);
        run(&["config", "user.email", "backup@localhost"]);
    }

    #[test]
    fn commit_message_carries_iso8601_timestamp() {
        let now = Local.with_ymd_and_hms(2026, 8, 23, 3, 0, 0).unwrap();

        let message = commit_message(now);

        assert!(message.starts_with("Data snapshot 2026-08-23T03:00:00"));
    }

    #[test]
    fn clean_tree_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        init_repository(dir.path());

        let publisher = GitPublisher::new(dir.path().to_path_buf(), "origin".to_string());

        assert_eq!(publisher.publish(false).unwrap(), PublishOutcome::NothingToDo);
    }

    #[test]
    fn dirty_tree_without_remote_commits_locally() {
        let dir = tempfile::tempdir().unwrap();
        init_repository(dir.path());
        fs::write(dir.path().join("dump.sql.gz"), b"gz").unwrap();

        let publisher = GitPublisher::new(dir.path().to_path_buf(), "origin".to_string());

        assert_eq!(publisher.publish(false).unwrap(), PublishOutcome::Committed);
        // the follow-up run sees a clean tree
        assert_eq!(publisher.publish(false).unwrap(), PublishOutcome::NothingToDo);
    }

    #[test]
    fn dry_run_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        init_repository(dir.path());
        fs::write(dir.path().join("dump.sql.gz"), b"gz").unwrap();

        let publisher = GitPublisher::new(dir.path().to_path_buf(), "origin".to_string());

        assert_eq!(publisher.publish(true).unwrap(), PublishOutcome::Committed);
        // still dirty, a real run would commit
        assert_eq!(publisher.publish(true).unwrap(), PublishOutcome::Committed);
    }

    #[test]
    fn outside_a_repository_publishing_fails() {
        let dir = tempfile::tempdir().unwrap();

        let publisher = GitPublisher::new(dir.path().to_path_buf(), "origin".to_string());

        assert!(matches!(
            publisher.publish(false),
            Err(PublishError::NotARepository(_))
        ));
    }
}
